#![no_main]

use libfuzzer_sys::fuzz_target;

use offgrid_node::admission::{ClaimAuthorizer, JobSpec};

fuzz_target!(|data: &[u8]| {
    let Ok(body) = serde_json::from_slice::<serde_json::Value>(data) else {
        return;
    };
    let Ok(spec) = JobSpec::from_request(body) else {
        return;
    };
    let auth = ClaimAuthorizer::new(b"fuzz-key".to_vec());
    let _ = auth.authorize(&spec.claim_context(), 0);
});
