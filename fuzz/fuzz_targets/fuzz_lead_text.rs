#![no_main]

use libfuzzer_sys::fuzz_target;
use leadline::fuzz_api::{normalize_postcode, parse_budget};

fuzz_target!(|data: &str| {
    if let Some(range) = parse_budget(data) {
        if let Some(high) = range.high {
            assert!(range.low <= high);
        }
    }
    let once = normalize_postcode(data);
    assert_eq!(normalize_postcode(&once), once);
});
