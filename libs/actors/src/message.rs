//! Message Values
//!
//! Messages are a closed sum type: scalars, strings, ordered sequences,
//! string-keyed mappings and actor references. Strings are atomic values,
//! never walked as sequences of characters.
//!
//! Equality is structural except for actors, which compare by reference.

use crate::actor::Actor;
use serde_json::Value;
use std::collections::BTreeMap;

/// A message exchanged between actors
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Message {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Seq(Vec<Message>),
    Map(BTreeMap<String, Message>),
    Actor(Actor),
}

impl Message {
    /// Build a mapping from key/value pairs
    pub fn map<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Message)>,
    {
        Message::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Message::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Message::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Message::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Numeric view; integers widen to floats
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Message::Int(n) => Some(*n as f64),
            Message::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Message::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_seq(&self) -> Option<&[Message]> {
        match self {
            Message::Seq(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Message>> {
        match self {
            Message::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_actor(&self) -> Option<&Actor> {
        match self {
            Message::Actor(actor) => Some(actor),
            _ => None,
        }
    }

    /// Field lookup on a mapping; `None` for any other variant
    pub fn get(&self, key: &str) -> Option<&Message> {
        self.as_map().and_then(|map| map.get(key))
    }

    /// True if an actor reference appears anywhere inside the message
    pub fn contains_actors(&self) -> bool {
        match self {
            Message::Actor(_) => true,
            Message::Seq(items) => items.iter().any(Message::contains_actors),
            Message::Map(map) => map.values().any(Message::contains_actors),
            _ => false,
        }
    }
}

impl From<bool> for Message {
    fn from(b: bool) -> Self {
        Message::Bool(b)
    }
}

impl From<i64> for Message {
    fn from(n: i64) -> Self {
        Message::Int(n)
    }
}

impl From<i32> for Message {
    fn from(n: i32) -> Self {
        Message::Int(n as i64)
    }
}

impl From<u32> for Message {
    fn from(n: u32) -> Self {
        Message::Int(n as i64)
    }
}

impl From<f64> for Message {
    fn from(f: f64) -> Self {
        Message::Float(f)
    }
}

impl From<&str> for Message {
    fn from(s: &str) -> Self {
        Message::String(s.to_string())
    }
}

impl From<String> for Message {
    fn from(s: String) -> Self {
        Message::String(s)
    }
}

impl From<Actor> for Message {
    fn from(actor: Actor) -> Self {
        Message::Actor(actor)
    }
}

impl From<&Actor> for Message {
    fn from(actor: &Actor) -> Self {
        Message::Actor(actor.clone())
    }
}

impl<T: Into<Message>> From<Vec<T>> for Message {
    fn from(items: Vec<T>) -> Self {
        Message::Seq(items.into_iter().map(Into::into).collect())
    }
}

impl From<BTreeMap<String, Message>> for Message {
    fn from(map: BTreeMap<String, Message>) -> Self {
        Message::Map(map)
    }
}

impl<T: Into<Message>> From<Option<T>> for Message {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Message::Null)
    }
}

/// Plain JSON data. No key is treated specially; marshalled actor tokens
/// are only recognised by a membrane.
impl From<Value> for Message {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Message::Null,
            Value::Bool(b) => Message::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Message::Int(i),
                None => Message::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Message::String(s),
            Value::Array(items) => Message::Seq(items.into_iter().map(Message::from).collect()),
            Value::Object(map) => {
                Message::Map(map.into_iter().map(|(k, v)| (k, Message::from(v))).collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_value() {
        let msg = Message::from(json!({"count": 1337, "name": "counter", "ratio": 0.5, "tags": ["a", "b"]}));

        assert_eq!(msg.get("count").and_then(Message::as_i64), Some(1337));
        assert_eq!(msg.get("name").and_then(Message::as_str), Some("counter"));
        assert_eq!(msg.get("ratio").and_then(Message::as_f64), Some(0.5));
        assert_eq!(
            msg.get("tags"),
            Some(&Message::Seq(vec!["a".into(), "b".into()]))
        );
        assert!(!msg.contains_actors());
    }

    #[test]
    fn test_map_builder_and_accessors() {
        let msg = Message::map([("x", Message::from(1)), ("y", Message::Null)]);

        assert_eq!(msg.get("x"), Some(&Message::Int(1)));
        assert!(msg.get("y").map(Message::is_null).unwrap_or(false));
        assert_eq!(msg.get("z"), None);
        assert_eq!(Message::from("plain").get("x"), None);
    }

    #[test]
    fn test_strings_are_atomic() {
        let msg = Message::from("abc");
        assert!(msg.as_seq().is_none());
        assert_eq!(msg.as_str(), Some("abc"));
    }

    #[test]
    fn test_option_conversion() {
        assert_eq!(Message::from(None::<i64>), Message::Null);
        assert_eq!(Message::from(Some(3)), Message::Int(3));
    }
}
