//! Wire envelope and transport configuration
//!
//! One envelope is one JSON document:
//!
//! ```text
//! {"to": "<uid-hex>", "msg": <marshalled message>}
//! ```
//!
//! A transport configuration is a JSON object with a `protocol` field and
//! whatever parameters that protocol needs (`ip`/`port` for tcp, `membrane`
//! for the in-process transport). It travels inside every marshalled actor
//! token so the receiver knows how to reach the sender.

use crate::error::{NetworkError, Result};
use crate::uid::Uid;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// A marshalled message addressed to a uid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub to: Uid,
    pub msg: Value,
}

impl Envelope {
    pub fn new(to: Uid, msg: Value) -> Self {
        Self { to, msg }
    }

    /// Encode as a single newline-terminated JSON line
    pub fn to_line(&self) -> Result<Vec<u8>> {
        let mut line = serde_json::to_vec(self)
            .map_err(|e| NetworkError::malformed_with_source("failed to encode envelope", e))?;
        line.push(b'\n');
        Ok(line)
    }

    /// Decode one line, with or without its trailing newline
    pub fn from_line(line: &[u8]) -> Result<Self> {
        let trimmed = line.strip_suffix(b"\n").unwrap_or(line);
        let trimmed = trimmed.strip_suffix(b"\r").unwrap_or(trimmed);
        serde_json::from_slice(trimmed)
            .map_err(|e| NetworkError::malformed_with_source("failed to decode envelope", e))
    }
}

/// Protocol name plus protocol parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
    pub protocol: String,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl TransportConfig {
    pub const TCP: &'static str = "tcp";
    pub const NULL: &'static str = "null";

    pub fn new(protocol: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            params: Map::new(),
        }
    }

    /// TCP endpoint; port 0 asks the server to pick one when listening
    pub fn tcp(ip: impl Into<String>, port: u16) -> Self {
        Self::new(Self::TCP)
            .with_param("ip", Value::String(ip.into()))
            .with_param("port", Value::from(port))
    }

    /// In-process endpoint named after a membrane on a shared local network
    pub fn null(membrane: impl Into<String>) -> Self {
        Self::new(Self::NULL).with_param("membrane", Value::String(membrane.into()))
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    /// String parameter, or a configuration error naming the field
    pub fn str_param(&self, key: &str) -> Result<&str> {
        self.param(key).and_then(Value::as_str).ok_or_else(|| {
            NetworkError::configuration(
                format!("{} config requires a string '{}'", self.protocol, key),
                Some(key),
            )
        })
    }

    /// `(ip, port)` of a tcp configuration
    pub fn tcp_endpoint(&self) -> Result<(&str, u16)> {
        let ip = self.str_param("ip")?;
        let port = self
            .param("port")
            .and_then(Value::as_u64)
            .and_then(|p| u16::try_from(p).ok())
            .ok_or_else(|| {
                NetworkError::configuration("tcp config requires a 'port' in 0..=65535", Some("port"))
            })?;
        Ok((ip, port))
    }

    pub fn to_value(&self) -> Value {
        let mut map = self.params.clone();
        map.insert("protocol".to_string(), Value::String(self.protocol.clone()));
        Value::Object(map)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| NetworkError::malformed_with_source("invalid transport config", e))
    }
}

impl fmt::Display for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_value())
    }
}
