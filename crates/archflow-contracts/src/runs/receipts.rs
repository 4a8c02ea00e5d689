use std::path::Path;

use serde_json::{Map, Value};

pub const RECEIPT_SCHEMA_VERSION: u64 = 1;

/// Snapshot of one generation session: what was asked, what came back, and
/// where results were stored. Inline media is replaced by a size marker.
pub fn build_receipt(
    request: &Map<String, Value>,
    outcome: &Map<String, Value>,
    failures: &[String],
    stored_urls: &[String],
    receipt_path: &Path,
) -> Value {
    let mut root = Map::new();
    root.insert(
        "schema_version".to_string(),
        Value::Number(RECEIPT_SCHEMA_VERSION.into()),
    );
    root.insert(
        "request".to_string(),
        sanitize_payload(&Value::Object(request.clone())),
    );
    root.insert(
        "outcome".to_string(),
        sanitize_payload(&Value::Object(outcome.clone())),
    );
    root.insert(
        "failures".to_string(),
        Value::Array(failures.iter().cloned().map(Value::String).collect()),
    );

    let mut artifacts = Map::new();
    artifacts.insert(
        "stored_urls".to_string(),
        Value::Array(stored_urls.iter().cloned().map(Value::String).collect()),
    );
    artifacts.insert(
        "receipt_path".to_string(),
        Value::String(receipt_path.to_string_lossy().to_string()),
    );
    root.insert("artifacts".to_string(), Value::Object(artifacts));
    Value::Object(root)
}

pub fn write_receipt(path: &Path, payload: &Value) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(payload)?)?;
    Ok(())
}

fn sanitize_payload(value: &Value) -> Value {
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) => value.clone(),
        Value::String(text) if text.starts_with("data:") => {
            Value::String(format!("<omitted {} chars>", text.len()))
        }
        Value::String(_) => value.clone(),
        Value::Array(rows) => Value::Array(rows.iter().map(sanitize_payload).collect()),
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, row) in map {
                let lowered = key.to_ascii_lowercase();
                if matches!(
                    lowered.as_str(),
                    "encodedimage" | "encodedvideo" | "image_bytes" | "api_key"
                ) {
                    out.insert(key.clone(), Value::String("<omitted>".to_string()));
                    continue;
                }
                out.insert(key.clone(), sanitize_payload(row));
            }
            Value::Object(out)
        }
    }
}
