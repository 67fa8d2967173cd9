//! The [`Value`] tagged union used throughout the node model, subscription
//! queues, action results, and redo log.
//!
//! Values live behind callbacks and queues rather than in hot inner loops, so
//! this is a straightforward sum type rather than a small-buffer-optimized
//! inline variant.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// A value in the DSA node tree: a tagged union over null, bool, signed and
/// unsigned 64-bit integers, a finite 64-bit float, a string, an ordered
/// array, or a string-keyed ordered map.
///
/// Maps use a [`BTreeMap`] so iteration order is always lexicographic by key
/// in canonical form, independent of insertion order.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::UInt(u) => i64::try_from(*u).ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UInt(u) => Some(*u),
            Value::Int(i) if *i >= 0 => Some(*i as u64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            Value::UInt(u) => Some(*u as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Constructs a finite float value. Returns `None` for NaN/infinite
    /// inputs, honoring the "floats are finite" invariant.
    pub fn finite_float(f: f64) -> Option<Value> {
        if f.is_finite() {
            Some(Value::Float(f))
        } else {
            None
        }
    }

    /// Renders this value into its canonical JSON projection. Map keys are
    /// emitted in lexicographic order.
    pub fn to_canonical_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::Number((*i).into()),
            Value::UInt(u) => serde_json::Value::Number((*u).into()),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_canonical_json).collect())
            }
            Value::Map(map) => {
                let mut obj = serde_json::Map::new();
                for (k, v) in map {
                    obj.insert(k.clone(), v.to_canonical_json());
                }
                serde_json::Value::Object(obj)
            }
        }
    }

    /// Parses a [`Value`] back from its canonical JSON projection.
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(u) = n.as_u64() {
                    Value::UInt(u)
                } else if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => {
                Value::Array(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(obj) => {
                let mut map = BTreeMap::new();
                for (k, v) in obj {
                    map.insert(k.clone(), Value::from_json(v));
                }
                Value::Map(map)
            }
        }
    }
}

/// Equality treats signed and unsigned integers of equal magnitude as equal
///, and NaN never compares equal to itself by construction
/// since [`Value::finite_float`] rejects non-finite floats.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::UInt(a), Value::UInt(b)) => a == b,
            (Value::Int(a), Value::UInt(b)) | (Value::UInt(b), Value::Int(a)) => {
                *a >= 0 && (*a as u64) == *b
            }
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_canonical_json())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<u64> for Value {
    fn from(u: u64) -> Self {
        Value::UInt(u)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

/// Orders values with a fixed type-rank-then-value comparison so `Value`
/// can be used as a `BTreeMap`/`BTreeSet` element (e.g. enum value lists);
/// not meant to imply a numeric total order across mixed types.
impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        fn rank(v: &Value) -> u8 {
            match v {
                Value::Null => 0,
                Value::Bool(_) => 1,
                Value::Int(_) => 2,
                Value::UInt(_) => 2,
                Value::Float(_) => 3,
                Value::String(_) => 4,
                Value::Array(_) => 5,
                Value::Map(_) => 6,
            }
        }
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::UInt(a), Value::UInt(b)) => a.cmp(b),
            (Value::Int(a), Value::UInt(b)) => (*a as i128).cmp(&(*b as i128)),
            (Value::UInt(a), Value::Int(b)) => (*a as i128).cmp(&(*b as i128)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Array(a), Value::Array(b)) => a.cmp(b),
            (Value::Map(a), Value::Map(b)) => a.cmp(b),
            _ => rank(self).cmp(&rank(other)),
        }
    }
}

/// Serializes through [`Value::to_canonical_json`] rather than a derived
/// tagged-enum encoding, so a persisted `Value` round-trips through
/// `dsa_serializer`'s `nodes.json` in the same shape a wire peer would see
/// it, not as `{"Int": 5}`.
impl serde::Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_canonical_json().serialize(serializer)
    }
}

impl<'de> serde::Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let json = serde_json::Value::deserialize(deserializer)?;
        Ok(Value::from_json(&json))
    }
}

/// The node attribute type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    None,
    Number,
    Int,
    Uint,
    String,
    Bool,
    Map,
    Array,
    Time,
    Enum,
    Binary,
    Dynamic,
}

impl ValueType {
    /// Whether a [`Value`] of this shape is an acceptable instance of this
    /// declared type. `Dynamic` accepts anything; `None` accepts nothing.
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            ValueType::None => false,
            ValueType::Dynamic => true,
            ValueType::Number | ValueType::Time => matches!(
                value,
                Value::Int(_) | Value::UInt(_) | Value::Float(_)
            ),
            ValueType::Int => matches!(value, Value::Int(_) | Value::UInt(_)),
            ValueType::Uint => matches!(value, Value::UInt(_))
                || matches!(value, Value::Int(i) if *i >= 0),
            ValueType::String | ValueType::Binary | ValueType::Enum => {
                matches!(value, Value::String(_))
            }
            ValueType::Bool => matches!(value, Value::Bool(_)),
            ValueType::Map => matches!(value, Value::Map(_)),
            ValueType::Array => matches!(value, Value::Array(_)),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValueType::None => "none",
            ValueType::Number => "number",
            ValueType::Int => "int",
            ValueType::Uint => "uint",
            ValueType::String => "string",
            ValueType::Bool => "bool",
            ValueType::Map => "map",
            ValueType::Array => "array",
            ValueType::Time => "time",
            ValueType::Enum => "enum",
            ValueType::Binary => "binary",
            ValueType::Dynamic => "dynamic",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_uint_equal_magnitude_are_equal() {
        assert_eq!(Value::Int(5), Value::UInt(5));
        assert_eq!(Value::UInt(5), Value::Int(5));
        assert_ne!(Value::Int(-1), Value::UInt(1));
    }

    #[test]
    fn finite_float_rejects_non_finite() {
        assert!(Value::finite_float(f64::NAN).is_none());
        assert!(Value::finite_float(f64::INFINITY).is_none());
        assert!(Value::finite_float(1.5).is_some());
    }

    #[test]
    fn canonical_json_orders_map_keys() {
        let mut map = BTreeMap::new();
        map.insert("b".to_owned(), Value::Int(2));
        map.insert("a".to_owned(), Value::Int(1));
        let value = Value::Map(map);
        let json = value.to_canonical_json();
        let rendered = serde_json::to_string(&json).unwrap();
        assert_eq!(rendered, r#"{"a":1,"b":2}"#);
    }

    #[test]
    fn json_round_trip() {
        let mut map = BTreeMap::new();
        map.insert("x".to_owned(), Value::Array(vec![Value::Bool(true), Value::Null]));
        let value = Value::Map(map);
        let json = value.to_canonical_json();
        let back = Value::from_json(&json);
        assert_eq!(value, back);
    }

    #[test]
    fn serde_round_trips_through_canonical_json() {
        let value = Value::Map(BTreeMap::from([
            ("count".to_owned(), Value::UInt(3)),
            ("name".to_owned(), Value::String("probe".to_owned())),
        ]));
        let encoded = serde_json::to_string(&value).unwrap();
        assert_eq!(encoded, r#"{"count":3,"name":"probe"}"#);
        let decoded: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, Value::Map(BTreeMap::from([
            ("count".to_owned(), Value::Int(3)),
            ("name".to_owned(), Value::String("probe".to_owned())),
        ])));
    }

    #[test]
    fn value_type_accepts() {
        assert!(ValueType::Number.accepts(&Value::Float(1.0)));
        assert!(!ValueType::None.accepts(&Value::Null));
        assert!(ValueType::Dynamic.accepts(&Value::String("x".into())));
        assert!(!ValueType::Bool.accepts(&Value::Int(1)));
    }
}
