//! Sample job types shipped with the queue.

use serde_json::{Number, Value};

use crate::handler::{HandlerError, HandlerRegistry};
use crate::job::Payload;

pub const TEXT_REVERSE: &str = "text.reverse";
pub const MATH_SQUARE: &str = "math.square";

pub fn register_all(registry: &mut HandlerRegistry) {
    registry.register(TEXT_REVERSE, text_reverse);
    registry.register(MATH_SQUARE, math_square);
}

/// `{"text": "abc"}` -> `"cba"`
pub fn text_reverse(payload: &Payload) -> Result<Value, HandlerError> {
    let text = payload
        .get("text")
        .and_then(Value::as_str)
        .ok_or_else(|| HandlerError::new("payload.text must be a string"))?;
    Ok(Value::String(text.chars().rev().collect()))
}

/// `{"n": 4}` -> `16`
pub fn math_square(payload: &Payload) -> Result<Value, HandlerError> {
    let n = match payload.get("n") {
        Some(Value::Number(n)) => n,
        _ => return Err(HandlerError::new("payload.n must be a number")),
    };

    if let Some(i) = n.as_i64() {
        return i
            .checked_mul(i)
            .map(Value::from)
            .ok_or_else(|| HandlerError::new("payload.n squared overflows"));
    }

    let f = n
        .as_f64()
        .ok_or_else(|| HandlerError::new("payload.n must be a number"))?;
    Number::from_f64(f * f)
        .map(Value::Number)
        .ok_or_else(|| HandlerError::new("payload.n squared is not finite"))
}
