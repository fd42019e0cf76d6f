use serde_json::{json, Value};

pub fn ok(id: &str, result: Value) -> Value {
    json!({ "id": id, "ok": true, "result": result })
}

/// Failure envelope. `details` is attached only when present, so clients see
/// a stable two- or three-key error object.
pub fn err(id: &str, code: &str, message: impl Into<String>, details: Option<Value>) -> Value {
    let error = match details {
        Some(d) => json!({ "code": code, "message": message.into(), "details": d }),
        None => json!({ "code": code, "message": message.into() }),
    };
    json!({ "id": id, "ok": false, "error": error })
}
