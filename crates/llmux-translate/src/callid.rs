use serde_json::Value;
use sha2::{Digest, Sha256};

/// Derives a deterministic `call_id` from a function name and its arguments.
///
/// The derivation is independent of JSON object key order so that the same
/// logical call always yields the same id, and the matching
/// `function_call_output` can reproduce it without carrying state.
pub fn derive_call_id(name: &str, args: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update([0u8]);
    hasher.update(canonicalize(args).as_bytes());
    let digest = hasher.finalize();
    format!("call_{}", hex_prefix(&digest, 12))
}

/// Serializes a JSON value with object keys sorted recursively.
fn canonicalize(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys = map.keys().collect::<Vec<_>>();
            keys.sort();
            let fields = keys
                .into_iter()
                .map(|key| {
                    format!(
                        "{}:{}",
                        serde_json::to_string(key).unwrap_or_default(),
                        canonicalize(&map[key])
                    )
                })
                .collect::<Vec<_>>()
                .join(",");
            format!("{{{fields}}}")
        }
        Value::Array(items) => {
            let fields = items.iter().map(canonicalize).collect::<Vec<_>>().join(",");
            format!("[{fields}]")
        }
        other => other.to_string(),
    }
}

fn hex_prefix(digest: &[u8], bytes: usize) -> String {
    digest
        .iter()
        .take(bytes)
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_change_the_id() {
        let a = json!({"a": 1, "b": 2});
        let b = json!({"b": 2, "a": 1});
        assert_eq!(derive_call_id("lookup", &a), derive_call_id("lookup", &b));
    }

    #[test]
    fn nested_key_order_does_not_change_the_id() {
        let a = json!({"outer": {"x": [1, {"p": true, "q": null}], "y": "s"}});
        let b = json!({"outer": {"y": "s", "x": [1, {"q": null, "p": true}]}});
        assert_eq!(derive_call_id("f", &a), derive_call_id("f", &b));
    }

    #[test]
    fn name_and_args_both_participate() {
        let args = json!({"a": 1});
        assert_ne!(derive_call_id("f", &args), derive_call_id("g", &args));
        assert_ne!(
            derive_call_id("f", &json!({"a": 1})),
            derive_call_id("f", &json!({"a": 2}))
        );
    }

    #[test]
    fn id_shape_is_stable() {
        let id = derive_call_id("f", &json!({}));
        assert!(id.starts_with("call_"));
        assert_eq!(id.len(), "call_".len() + 24);
    }
}
