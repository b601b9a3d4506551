//! Marshalling between [`Message`] and JSON
//!
//! The walkers here only substitute references; deciding which uid an actor
//! gets, or which actor a token resolves to, is left to the caller (the
//! membrane). An actor token is an object whose key set is exactly
//! `{"_proxy", "_config"}`; any other object is plain data. That key set is
//! reserved: a data map with exactly those two keys is read back as a token.

use crate::envelope::TransportConfig;
use crate::error::{NetworkError, Result};
use crate::uid::Uid;
use actors::{Actor, Message};
use serde_json::{Map, Number, Value};

pub const PROXY_KEY: &str = "_proxy";
pub const CONFIG_KEY: &str = "_config";

/// True if `value` has the shape of a marshalled actor reference
pub fn is_marshalled_actor(value: &Value) -> bool {
    match value {
        Value::Object(map) => is_token_map(map),
        _ => false,
    }
}

fn is_token_map(map: &Map<String, Value>) -> bool {
    map.len() == 2 && map.contains_key(PROXY_KEY) && map.contains_key(CONFIG_KEY)
}

/// Build the token that stands in for an actor on the wire
pub fn actor_token(uid: Uid, config: &TransportConfig) -> Value {
    let mut map = Map::with_capacity(2);
    map.insert(PROXY_KEY.to_string(), Value::String(uid.to_string()));
    map.insert(CONFIG_KEY.to_string(), config.to_value());
    Value::Object(map)
}

/// Decode a token already recognised by [`is_marshalled_actor`]
pub fn parse_actor_token(mut map: Map<String, Value>) -> Result<(Uid, TransportConfig)> {
    let uid = match map.remove(PROXY_KEY) {
        Some(Value::String(s)) => s
            .parse::<Uid>()
            .map_err(|e| NetworkError::malformed_with_source(format!("bad uid '{}'", s), e))?,
        _ => return Err(NetworkError::malformed("actor token '_proxy' must be a uid string")),
    };
    let config = match map.remove(CONFIG_KEY) {
        Some(value @ Value::Object(_)) => TransportConfig::from_value(value)?,
        _ => return Err(NetworkError::malformed("actor token '_config' must be an object")),
    };
    Ok((uid, config))
}

/// Convert a message to JSON, replacing each actor with `token(actor)`
///
/// Non-finite floats have no JSON form and are written as `null`.
pub fn export_with<F>(message: &Message, token: &mut F) -> Value
where
    F: FnMut(&Actor) -> Value,
{
    match message {
        Message::Null => Value::Null,
        Message::Bool(b) => Value::Bool(*b),
        Message::Int(n) => Value::from(*n),
        Message::Float(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
        Message::String(s) => Value::String(s.clone()),
        Message::Seq(items) => Value::Array(items.iter().map(|m| export_with(m, token)).collect()),
        Message::Map(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), export_with(v, token)))
                .collect(),
        ),
        Message::Actor(actor) => token(actor),
    }
}

/// Convert JSON to a message, resolving each actor token with `resolve`
pub fn import_with<F>(value: Value, resolve: &mut F) -> Result<Message>
where
    F: FnMut(Uid, TransportConfig) -> Result<Actor>,
{
    Ok(match value {
        Value::Null => Message::Null,
        Value::Bool(b) => Message::Bool(b),
        Value::Number(n) => number_to_message(&n),
        Value::String(s) => Message::String(s),
        Value::Array(items) => Message::Seq(
            items
                .into_iter()
                .map(|v| import_with(v, resolve))
                .collect::<Result<_>>()?,
        ),
        Value::Object(map) => {
            if is_token_map(&map) {
                let (uid, config) = parse_actor_token(map)?;
                Message::Actor(resolve(uid, config)?)
            } else {
                Message::Map(
                    map.into_iter()
                        .map(|(k, v)| Ok((k, import_with(v, resolve)?)))
                        .collect::<Result<_>>()?,
                )
            }
        }
    })
}

// Integers outside i64 become floats
fn number_to_message(n: &Number) -> Message {
    match n.as_i64() {
        Some(i) => Message::Int(i),
        None => Message::Float(n.as_f64().unwrap_or(f64::NAN)),
    }
}
