use anyhow::{bail, Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

/// Deep merge `overlay` onto `base`. Objects merge key by key, lists are appended, other values
/// are replaced. Nulls and empty strings in the overlay never clear a base value.
pub(crate) fn merge_values(base: &mut Value, overlay: Value) -> Result<()> {
    merge_at(base, overlay, "")
}

fn merge_at(base: &mut Value, overlay: Value, path: &str) -> Result<()> {
    match (base, overlay) {
        (_, Value::Null) => {}
        (_, Value::String(overlay)) if overlay.is_empty() => {}
        (base @ Value::Null, overlay) => *base = overlay,
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                let child_path = format!("{}/{}", path, key);
                match base.get_mut(&key) {
                    Some(existing) => merge_at(existing, value, &child_path)?,
                    None if value.is_null() => {}
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (Value::Array(base), Value::Array(overlay)) => base.extend(overlay),
        (base, overlay) if base.is_object() || base.is_array() || overlay.is_object() || overlay.is_array() => {
            bail!("cannot merge {} onto {} at {:?}", type_name(&overlay), type_name(base), path)
        }
        (base, overlay) => *base = overlay,
    }

    Ok(())
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

/// Merge two typed documents through their JSON form
pub(crate) fn merge_document<T: Serialize + DeserializeOwned>(base: &T, overlay: &T) -> Result<T> {
    let mut merged = serde_json::to_value(base).context("serializing base")?;
    merge_values(&mut merged, serde_json::to_value(overlay).context("serializing overlay")?)?;
    serde_json::from_value(merged).context("decoding merged document")
}
