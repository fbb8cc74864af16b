//! Dynamic runtime values exchanged with the driver.
//!
//! Every argument bound into a statement and every cell read back from a
//! row is a [`Value`]. The variants cover the scalar types the built-in
//! adapters understand plus the three container shapes the runtime can
//! assemble: sequences, maps, and beans.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::BeanShape;

/// Dynamic value type for statement bindings and row cells.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    /// Ordered sequence; also the runtime shape of list and set results.
    Seq(Vec<Value>),
    /// Map result container, keyed by the designated map-key mapping.
    Map(HashMap<Value, Value>),
    Bean(Bean),
}

// Floats compare by PartialEq and hash by bit pattern, so any value can key
// a map result. NaN keys are the caller's responsibility.
impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(v) => v.hash(state),
            Value::Int(v) => v.hash(state),
            Value::Float(v) => v.to_bits().hash(state),
            Value::Str(v) => v.hash(state),
            Value::Bytes(v) => v.hash(state),
            Value::Uuid(v) => v.hash(state),
            Value::Date(v) => v.hash(state),
            Value::Time(v) => v.hash(state),
            Value::Timestamp(v) => v.hash(state),
            Value::Seq(v) => v.hash(state),
            Value::Map(m) => {
                // Order-independent combine so equal maps hash equally.
                m.len().hash(state);
                let mut acc = 0u64;
                for (k, v) in m {
                    let mut h = std::collections::hash_map::DefaultHasher::new();
                    k.hash(&mut h);
                    v.hash(&mut h);
                    acc = acc.wrapping_add(h.finish());
                }
                acc.hash(state);
            }
            Value::Bean(b) => b.hash(state),
        }
    }
}

impl Value {
    /// Variant name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Uuid(_) => "uuid",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::Timestamp(_) => "timestamp",
            Value::Seq(_) => "seq",
            Value::Map(_) => "map",
            Value::Bean(_) => "bean",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_seq(&self) -> Option<&[Value]> {
        match self {
            Value::Seq(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bean(&self) -> Option<&Bean> {
        match self {
            Value::Bean(b) => Some(b),
            _ => None,
        }
    }

    /// Text form used when partial-definition parts are concatenated into
    /// one logical value, and when one is split back for binding.
    pub fn render(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(v) => v.to_string(),
            Value::Int(v) => v.to_string(),
            Value::Float(v) => v.to_string(),
            Value::Str(v) => v.clone(),
            Value::Uuid(v) => v.to_string(),
            Value::Date(v) => v.to_string(),
            Value::Time(v) => v.to_string(),
            Value::Timestamp(v) => v.to_string(),
            other => format!("{:?}", other),
        }
    }

    /// Convert to a JSON value for diagnostics and the `json` adapter.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(v) => serde_json::Value::Bool(*v),
            Value::Int(v) => serde_json::Value::Number((*v).into()),
            Value::Float(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(v) => serde_json::Value::String(v.clone()),
            Value::Bytes(v) => serde_json::Value::String(
                v.iter().map(|b| format!("{:02x}", b)).collect(),
            ),
            Value::Uuid(v) => serde_json::Value::String(v.to_string()),
            Value::Date(v) => serde_json::Value::String(v.to_string()),
            Value::Time(v) => serde_json::Value::String(v.to_string()),
            Value::Timestamp(v) => serde_json::Value::String(v.to_string()),
            Value::Seq(v) => serde_json::Value::Array(v.iter().map(Value::to_json).collect()),
            Value::Map(m) => serde_json::Value::Object(
                m.iter().map(|(k, v)| (k.render(), v.to_json())).collect(),
            ),
            Value::Bean(b) => serde_json::Value::Object(
                b.entries().map(|(k, v)| (k.to_string(), v.to_json())).collect(),
            ),
        }
    }
}

/// A runtime bean instance: a field map checked against its declared shape.
#[derive(Debug, Clone, PartialEq)]
pub struct Bean {
    shape: Arc<BeanShape>,
    fields: HashMap<String, Value>,
}

impl Eq for Bean {}

impl Hash for Bean {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.shape.name.hash(state);
        let mut acc = 0u64;
        for (k, v) in &self.fields {
            let mut h = std::collections::hash_map::DefaultHasher::new();
            k.hash(&mut h);
            v.hash(&mut h);
            acc = acc.wrapping_add(h.finish());
        }
        acc.hash(state);
    }
}

impl Bean {
    /// Create an empty instance of the given shape.
    pub fn new(shape: Arc<BeanShape>) -> Self {
        Self {
            shape,
            fields: HashMap::new(),
        }
    }

    pub fn shape(&self) -> &Arc<BeanShape> {
        &self.shape
    }

    /// Read a field. Unset fields of the shape read as absent.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Write a field declared by the shape.
    pub fn set(&mut self, field: &str, value: Value) -> Result<()> {
        if self.shape.field_named(field).is_none() {
            return Err(Error::Execution(format!(
                "bean '{}' has no field '{}'",
                self.shape.name, field
            )));
        }
        self.fields.insert(field.to_string(), value);
        Ok(())
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }
}

// From impls so callers can pass plain Rust values as arguments.
impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Uuid(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::Timestamp(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Seq(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeTag;

    #[test]
    fn test_value_from() {
        let _b: Value = true.into();
        let _i: Value = 42i32.into();
        let _f: Value = 3.15f64.into();
        let _s: Value = "hello".into();
        let seq: Value = vec![1i64, 2, 3].into();
        assert_eq!(seq.as_seq().unwrap().len(), 3);
    }

    #[test]
    fn test_value_keys_a_map() {
        let mut m = HashMap::new();
        m.insert(Value::Str("a".into()), Value::Int(1));
        m.insert(Value::Int(2), Value::Str("b".into()));
        assert_eq!(m.get(&Value::Str("a".into())), Some(&Value::Int(1)));
        assert_eq!(m.get(&Value::Int(2)), Some(&Value::Str("b".into())));
    }

    #[test]
    fn test_bean_set_checks_shape() {
        let shape = Arc::new(
            BeanShape::new("Person")
                .field("name", TypeTag::Str)
                .field("age", TypeTag::Int),
        );
        let mut bean = Bean::new(shape);
        bean.set("name", "joan".into()).unwrap();
        assert!(bean.set("missing", Value::Null).is_err());
        assert_eq!(bean.get("name"), Some(&Value::Str("joan".into())));
    }

    #[test]
    fn test_render_round_trip_for_partials() {
        assert_eq!(Value::Int(41).render(), "41");
        assert_eq!(Value::Str("03-1234".into()).render(), "03-1234");
        assert_eq!(Value::Null.render(), "");
    }

    #[test]
    fn test_to_json() {
        let v = Value::Seq(vec![Value::Int(1), Value::Str("x".into())]);
        assert_eq!(v.to_json(), serde_json::json!([1, "x"]));
    }
}
