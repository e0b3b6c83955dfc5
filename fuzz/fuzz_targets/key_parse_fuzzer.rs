//! Fuzz target for key parsing
//!
//! # Invariants
//!
//! - Key and key file parsing NEVER panic
//! - A parsed key prints as 32 hex digits that parse back to the same key

#![no_main]

use keysweep_crypto::KeyMaterial;
use keysweep_server::parse_keys;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(key) = text.parse::<KeyMaterial>() {
        let printed = key.to_string();
        assert_eq!(printed.len(), 32);
        assert_eq!(printed.parse::<KeyMaterial>().ok(), Some(key));
    }

    if let Ok(keys) = parse_keys(text) {
        assert!(keys.iter().all(|key| !key.is_zero()));
    }
});
