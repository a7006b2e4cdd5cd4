#![no_main]

use std::sync::OnceLock;

use libfuzzer_sys::fuzz_target;

use offgrid_node::session::handshake::{self, HandshakeMessage1};
use offgrid_node::Identity;

static SERVER: OnceLock<Identity> = OnceLock::new();

fuzz_target!(|data: &[u8]| {
    let server = SERVER.get_or_init(|| Identity::generate("fuzz-server"));

    // Raw bytes as a 32-byte ephemeral key, including low-order points.
    if data.len() == 32 {
        let msg1 = HandshakeMessage1 {
            eph_pub: offgrid_node::crypto::b64_encode(data),
            ts: 0,
        };
        let _ = handshake::respond(server, &msg1);
    }

    if let Ok(msg1) = serde_json::from_slice::<HandshakeMessage1>(data) {
        let _ = handshake::respond(server, &msg1);
    }
});
