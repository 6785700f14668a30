//! Fuzz test for cache key derivation
//!
//! Feeds arbitrary JSON documents to `generate_key` and checks that derived
//! keys are bounded, deterministic and independent of object key order.
//!
//! Run with: cargo +nightly fuzz run key_fuzz -- -max_total_time=60

#![no_main]

use ampere_cache::{generate_key, normalize, MAX_KEY_LEN};
use libfuzzer_sys::fuzz_target;
use serde_json::{Map, Value};

fn reversed(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::new();
            for (k, v) in map.iter().rev() {
                out.insert(k.clone(), reversed(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(reversed).collect()),
        other => other.clone(),
    }
}

fuzz_target!(|data: &[u8]| {
    let Ok(params) = serde_json::from_slice::<Value>(data) else {
        return;
    };

    let key = generate_key("fuzz", Some(&params));
    let chars = key.chars().count();
    assert!(chars <= MAX_KEY_LEN, "key exceeds bound: {} chars", chars);
    assert_eq!(key, generate_key("fuzz", Some(&params)), "key not deterministic");
    assert_eq!(
        key,
        generate_key("fuzz", Some(&reversed(&params))),
        "key depends on insertion order"
    );

    let once = normalize(&params);
    assert_eq!(normalize(&once), once, "normalize not idempotent");
});
