use backend_api::{BackendError, FieldOp, FieldUpdate, Fields, Result};
use serde_json::{Map, Value};

/// Apply field transforms in order. `now` backs `ServerTimestamp`.
pub fn apply_updates(fields: &mut Fields, updates: &[FieldUpdate], now: i64) -> Result<()> {
    for update in updates {
        apply_update(fields, update, now)?;
    }
    Ok(())
}

fn invalid(msg: String) -> BackendError {
    BackendError::InvalidArgument(msg)
}

pub fn apply_update(fields: &mut Fields, update: &FieldUpdate, now: i64) -> Result<()> {
    let parts: Vec<&str> = update.path.split('.').collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(invalid(format!("invalid field path `{}`", update.path)));
    }
    let Some((last, parents)) = parts.split_last() else {
        return Err(invalid("empty field path".into()));
    };

    if update.op == FieldOp::Delete {
        if let Some(parent) = existing_parent(fields, parents) {
            parent.remove(*last);
        }
        return Ok(());
    }

    let mut target = fields;
    for part in parents {
        let entry = target
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        target = match entry {
            Value::Object(map) => map,
            _ => return Err(invalid(format!("`{part}` is not a map"))),
        };
    }

    match &update.op {
        FieldOp::Set(value) => {
            target.insert(last.to_string(), value.clone());
        }
        FieldOp::Increment(by) => {
            let current = match target.get(*last) {
                None | Some(Value::Null) => 0,
                Some(Value::Number(n)) => n
                    .as_i64()
                    .ok_or_else(|| invalid(format!("`{}` is not an integer", update.path)))?,
                Some(_) => return Err(invalid(format!("`{}` is not numeric", update.path))),
            };
            target.insert(last.to_string(), Value::from(current + by));
        }
        FieldOp::ArrayUnion(values) => {
            let items = array_at(target, last, &update.path)?;
            for value in values {
                if !items.contains(value) {
                    items.push(value.clone());
                }
            }
        }
        FieldOp::ArrayRemove(values) => {
            let items = array_at(target, last, &update.path)?;
            items.retain(|v| !values.contains(v));
        }
        FieldOp::ServerTimestamp => {
            target.insert(last.to_string(), Value::from(now));
        }
        FieldOp::Delete => {}
    }
    Ok(())
}

fn existing_parent<'a>(fields: &'a mut Fields, parents: &[&str]) -> Option<&'a mut Fields> {
    let mut target = fields;
    for part in parents {
        target = target.get_mut(*part)?.as_object_mut()?;
    }
    Some(target)
}

fn array_at<'a>(target: &'a mut Fields, key: &str, path: &str) -> Result<&'a mut Vec<Value>> {
    let entry = target
        .entry(key.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    if entry.is_null() {
        *entry = Value::Array(Vec::new());
    }
    match entry {
        Value::Array(items) => Ok(items),
        _ => Err(invalid(format!("`{path}` is not an array"))),
    }
}
