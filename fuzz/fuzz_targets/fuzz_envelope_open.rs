#![no_main]

use libfuzzer_sys::fuzz_target;

use offgrid_node::crypto::seal::{self, SealedEnvelope};
use offgrid_node::crypto::SymmetricKey;

// Arbitrary bytes as a JSON envelope: parsing and opening must return errors,
// never panic.
fuzz_target!(|data: &[u8]| {
    let Ok(envelope) = SealedEnvelope::from_json(data) else {
        return;
    };
    let key = SymmetricKey::from([0x42; 32]);
    let _ = seal::open(&key, &envelope, 64 * 1024);
});
