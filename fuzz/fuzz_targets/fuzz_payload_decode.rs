//! Fuzz target: `Payload::decode`
//!
//! Feeds arbitrary text to the bus payload decoder.  Whatever decodes must
//! survive a second encode/decode pass unchanged.
//!
//! cargo fuzz run fuzz_payload_decode

#![no_main]

use fieldctl::wire::Payload;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(payload) = Payload::decode(text) else {
        return;
    };
    let again = Payload::decode(&payload.encode()).expect("encoded payload must decode");
    assert_eq!(again, payload);
});
