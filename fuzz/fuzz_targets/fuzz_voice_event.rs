#![no_main]

use libfuzzer_sys::fuzz_target;
use leadline::fuzz_api::parse_voice_event;

fuzz_target!(|data: &[u8]| {
    let _ = parse_voice_event(data);
});
