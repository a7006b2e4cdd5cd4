use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use serde::Deserialize;
use serde_json::{json, Value};

use super::jail::{relative_slash, Jail};
use crate::crypto::digest::content_digest;
use crate::error::SandboxError;

/// Job kinds a node knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// Write a file inside the jail.
    Write,
    /// List entries under a jail directory.
    List,
    /// Liveness check; `delay_ms` simulates a slow peer.
    Probe,
}

impl JobKind {
    pub fn parse(kind: &str) -> Result<Self, SandboxError> {
        match kind {
            "write" => Ok(Self::Write),
            "list" => Ok(Self::List),
            "probe" => Ok(Self::Probe),
            other => Err(SandboxError::UnknownKind(other.to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Write => "write",
            Self::List => "list",
            Self::Probe => "probe",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal outcome of one execution. Every variant is persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed(Value),
    Failed { code: &'static str, message: String },
    TimedOut { after: Duration },
}

impl JobOutcome {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Failed {
            code: "INTERNAL_ERROR",
            message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// Result document stored in the ledger and returned to callers.
    pub fn into_result(self) -> Value {
        match self {
            Self::Completed(Value::Object(mut map)) => {
                map.insert("ok".into(), Value::Bool(true));
                Value::Object(map)
            }
            Self::Completed(other) => json!({ "ok": true, "value": other }),
            Self::Failed { code, message } => json!({
                "ok": false,
                "error_code": code,
                "error": message,
            }),
            Self::TimedOut { after } => json!({
                "ok": false,
                "error_code": "JOB_TIMEOUT",
                "error": format!("job exceeded {}ms", after.as_millis()),
            }),
        }
    }
}

impl From<SandboxError> for JobOutcome {
    fn from(e: SandboxError) -> Self {
        Self::Failed {
            code: e.code(),
            message: e.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WriteArgs {
    path: String,
    content_b64: String,
}

#[derive(Debug, Deserialize)]
struct ListArgs {
    #[serde(default = "default_list_root")]
    root: String,
    #[serde(default)]
    patterns: Vec<String>,
    #[serde(default)]
    recursive: bool,
}

fn default_list_root() -> String {
    ".".into()
}

#[derive(Debug, Default, Deserialize)]
struct ProbeArgs {
    #[serde(default)]
    echo: Option<Value>,
    #[serde(default)]
    delay_ms: Option<u64>,
}

fn parse_args<T>(kind: JobKind, args: Value) -> Result<T, SandboxError>
where
    T: serde::de::DeserializeOwned,
{
    // A missing args object means "all defaults".
    let args = if args.is_null() { json!({}) } else { args };
    serde_json::from_value(args).map_err(|e| SandboxError::InvalidArgs(format!("{kind}: {e}")))
}

/// Runs jobs against a [`Jail`] under a hard timeout.
#[derive(Debug, Clone)]
pub struct SandboxedExecutor {
    jail: Arc<Jail>,
}

impl SandboxedExecutor {
    pub fn new(jail: Jail) -> Self {
        Self {
            jail: Arc::new(jail),
        }
    }

    pub fn jail(&self) -> &Jail {
        &self.jail
    }

    /// Execute one job. Never returns an error: every failure is an outcome.
    ///
    /// On timeout the caller stops waiting; blocking file work already handed to
    /// the blocking pool may still finish in the background.
    pub async fn execute(&self, kind: &str, args: Value, timeout: Duration) -> JobOutcome {
        let kind = match JobKind::parse(kind) {
            Ok(kind) => kind,
            Err(e) => return e.into(),
        };

        match tokio::time::timeout(timeout, self.run(kind, args)).await {
            Ok(Ok(value)) => JobOutcome::Completed(value),
            Ok(Err(outcome)) => outcome,
            Err(_) => {
                tracing::warn!(
                    kind = %kind,
                    timeout_ms = timeout.as_millis() as u64,
                    "job timed out"
                );
                JobOutcome::TimedOut { after: timeout }
            }
        }
    }

    async fn run(&self, kind: JobKind, args: Value) -> Result<Value, JobOutcome> {
        match kind {
            JobKind::Probe => {
                let args: ProbeArgs = parse_args(kind, args)?;
                if let Some(ms) = args.delay_ms {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                }
                Ok(json!({
                    "pong": true,
                    "echo": args.echo.unwrap_or(Value::Null),
                    "node_ts": chrono::Utc::now().timestamp_millis(),
                }))
            }
            JobKind::Write => {
                let args: WriteArgs = parse_args(kind, args)?;
                self.blocking(move |jail| write_file(jail, &args)).await
            }
            JobKind::List => {
                let args: ListArgs = parse_args(kind, args)?;
                self.blocking(move |jail| list_dir(jail, &args)).await
            }
        }
    }

    async fn blocking<F>(&self, f: F) -> Result<Value, JobOutcome>
    where
        F: FnOnce(&Jail) -> Result<Value, SandboxError> + Send + 'static,
    {
        let jail = Arc::clone(&self.jail);
        match tokio::task::spawn_blocking(move || f(&jail)).await {
            Ok(result) => result.map_err(JobOutcome::from),
            Err(e) => {
                tracing::error!(error = %e, "job body panicked");
                Err(JobOutcome::internal(format!("job task failed: {e}")))
            }
        }
    }
}

fn write_file(jail: &Jail, args: &WriteArgs) -> Result<Value, SandboxError> {
    let content = base64::engine::general_purpose::STANDARD
        .decode(args.content_b64.trim())
        .map_err(|e| SandboxError::InvalidArgs(format!("content_b64: {e}")))?;

    let path = jail.resolve(&args.path)?;
    if path == jail.root() {
        return Err(SandboxError::InvalidArgs("path must name a file".into()));
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, &content)?;

    tracing::debug!(path = %jail.display_relative(&path), bytes = content.len(), "file written");
    Ok(json!({
        "path": jail.display_relative(&path),
        "bytes_written": content.len(),
        "sha256": content_digest(&content),
    }))
}

fn list_dir(jail: &Jail, args: &ListArgs) -> Result<Value, SandboxError> {
    let patterns = args
        .patterns
        .iter()
        .map(|p| {
            glob::Pattern::new(p)
                .map_err(|e| SandboxError::InvalidArgs(format!("pattern {p:?}: {e}")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let root = jail.resolve(&args.root)?;
    match fs::symlink_metadata(&root) {
        Ok(meta) if meta.is_dir() => {}
        _ => return Err(SandboxError::NotADirectory(args.root.clone())),
    }

    let mut entries = BTreeSet::new();
    let mut pending: Vec<PathBuf> = vec![root.clone()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            // file_type() does not follow links: a symlinked directory is a leaf.
            let file_type = entry.file_type()?;
            if args.recursive && file_type.is_dir() {
                pending.push(path.clone());
            }
            let rel = relative_slash(&root, &path);
            if matches_any(&patterns, &rel, &path) {
                entries.insert(rel);
            }
        }
    }

    let entries: Vec<String> = entries.into_iter().collect();
    Ok(json!({
        "root": jail.display_relative(&root),
        "count": entries.len(),
        "entries": entries,
    }))
}

/// Empty pattern list matches everything. A pattern matches either the relative
/// path or the bare file name.
fn matches_any(patterns: &[glob::Pattern], rel: &str, path: &Path) -> bool {
    if patterns.is_empty() {
        return true;
    }
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    patterns.iter().any(|p| p.matches(rel) || p.matches(&name))
}
