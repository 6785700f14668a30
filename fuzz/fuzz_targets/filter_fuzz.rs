//! Fuzz test for filter sanitization and evaluation
//!
//! Arbitrary JSON is used as a filter (sanitized and raw) and as a one-stage
//! pipeline against a fixed document. Evaluation must return Ok or Err and
//! never panic.
//!
//! Run with: cargo +nightly fuzz run filter_fuzz -- -max_total_time=60

#![no_main]

use ampere_storage::memory::{filter, pipeline};
use ampere_storage::sanitize_filter;
use libfuzzer_sys::fuzz_target;
use serde_json::{json, Value};

fuzz_target!(|data: &[u8]| {
    let Ok(input) = serde_json::from_slice::<Value>(data) else {
        return;
    };

    let doc = json!({
        "_id": "65a1b2c3d4e5f60718293a4b",
        "serial": "MTR-0042",
        "kwh": 412.5,
        "tags": ["smart", "residential"],
        "location": {"city": "Quito"}
    });

    let _ = filter::matches(&doc, &input);

    let sanitized = sanitize_filter(&input);
    // Sanitizing twice only ever adds escapes, it never removes structure.
    assert_eq!(
        sanitize_filter(&sanitized).is_object(),
        input.is_object(),
        "sanitize changed the filter shape"
    );
    let _ = filter::matches(&doc, &sanitized);

    let _ = pipeline::run(vec![doc.clone(), doc], std::slice::from_ref(&input));
});
