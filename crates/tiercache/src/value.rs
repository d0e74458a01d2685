//! Cached value shapes.
//!
//! The remote store is type-agnostic: scalars and arrays are strings, objects
//! are flat hashes. [`CacheValue`] restores the shape at the API boundary.

use crate::error::CacheResult;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Shape tag recorded per key in the type registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Primitive,
    Array,
    Object,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Primitive => write!(f, "primitive"),
            ValueType::Array => write!(f, "array"),
            ValueType::Object => write!(f, "object"),
        }
    }
}

/// A scalar value: string, number or boolean.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Primitive {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Primitive {
    /// Coerce a raw remote string to its nearest native type.
    ///
    /// Anything that is not a boolean or a finite number stays a string.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "true" => return Primitive::Bool(true),
            "false" => return Primitive::Bool(false),
            _ => {}
        }

        if let Ok(i) = raw.parse::<i64>() {
            return Primitive::Int(i);
        }

        match raw.parse::<f64>() {
            Ok(f) if f.is_finite() && !raw.trim().is_empty() => Primitive::Float(f),
            _ => Primitive::Str(raw.to_string()),
        }
    }

    /// Decode a raw remote string, coercing only when `parse_type` is set.
    pub fn decode(raw: String, parse_type: bool) -> Self {
        if parse_type {
            Self::parse(&raw)
        } else {
            Primitive::Str(raw)
        }
    }

    /// String form written to the remote store.
    pub fn encode(&self) -> String {
        self.to_string()
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Primitive::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Primitive::Bool(b) => write!(f, "{}", b),
            Primitive::Int(i) => write!(f, "{}", i),
            // keeps the fractional part so `2.0` reads back as a float
            Primitive::Float(v) => write!(f, "{:?}", v),
            Primitive::Str(s) => f.write_str(s),
        }
    }
}

impl From<bool> for Primitive {
    fn from(value: bool) -> Self {
        Primitive::Bool(value)
    }
}

impl From<i64> for Primitive {
    fn from(value: i64) -> Self {
        Primitive::Int(value)
    }
}

impl From<i32> for Primitive {
    fn from(value: i32) -> Self {
        Primitive::Int(i64::from(value))
    }
}

impl From<u32> for Primitive {
    fn from(value: u32) -> Self {
        Primitive::Int(i64::from(value))
    }
}

impl From<f64> for Primitive {
    fn from(value: f64) -> Self {
        Primitive::Float(value)
    }
}

impl From<String> for Primitive {
    fn from(value: String) -> Self {
        Primitive::Str(value)
    }
}

impl From<&str> for Primitive {
    fn from(value: &str) -> Self {
        Primitive::Str(value.to_string())
    }
}

/// Flat string-keyed object of scalars.
pub type Object = BTreeMap<String, Primitive>;

/// A value held by the local store.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheValue {
    Primitive(Primitive),
    Array(Vec<Primitive>),
    Object(Object),
}

impl CacheValue {
    /// Shape tag of this value.
    pub fn value_type(&self) -> ValueType {
        match self {
            CacheValue::Primitive(_) => ValueType::Primitive,
            CacheValue::Array(_) => ValueType::Array,
            CacheValue::Object(_) => ValueType::Object,
        }
    }

    pub fn into_primitive(self) -> Option<Primitive> {
        match self {
            CacheValue::Primitive(p) => Some(p),
            _ => None,
        }
    }

    pub fn into_array(self) -> Option<Vec<Primitive>> {
        match self {
            CacheValue::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn into_object(self) -> Option<Object> {
        match self {
            CacheValue::Object(o) => Some(o),
            _ => None,
        }
    }
}

/// Serialize an array to its remote scalar form.
pub fn encode_array(values: &[Primitive]) -> CacheResult<String> {
    Ok(serde_json::to_string(values)?)
}

/// Deserialize an array from its remote scalar form.
pub fn decode_array(raw: &str) -> CacheResult<Vec<Primitive>> {
    Ok(serde_json::from_str(raw)?)
}

/// Flatten an object into hash fields.
pub fn encode_object(fields: &Object) -> Vec<(String, String)> {
    fields
        .iter()
        .map(|(name, value)| (name.clone(), value.encode()))
        .collect()
}

/// Rebuild an object from hash fields.
pub fn decode_object(fields: HashMap<String, String>, parse_type: bool) -> Object {
    fields
        .into_iter()
        .map(|(name, raw)| (name, Primitive::decode(raw, parse_type)))
        .collect()
}
