//! Type adapters and the process-wide adapter registry.
//!
//! An adapter translates one semantic value type to and from the SQL
//! positions it occupies. Adapters are stateless singletons shared across
//! every query object; the registry maps explicit keys (and type-inferred
//! defaults) to them. Registration can race with first-use compilation, so
//! lookups go through a read-write lock.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use uuid::Uuid;

use crate::driver::{RowData, SqlPos, Statement};
use crate::error::{Error, Result};
use crate::types::TypeTag;
use crate::value::Value;

/// Strategy translating a semantic value type to/from bound SQL positions.
pub trait TypeAdapter: Send + Sync {
    /// Registry key and driver type name.
    fn key(&self) -> &'static str;

    /// How many SQL positions this adapter consumes.
    fn columns(&self) -> usize {
        1
    }

    /// Normalize a value into this adapter's canonical variant. Nulls pass
    /// through untouched.
    fn coerce(&self, value: &Value) -> Result<Value>;

    /// Bind `value` at `index` (wide adapters use the following
    /// `columns() - 1` slots as well).
    fn bind(&self, stmt: &mut dyn Statement, index: usize, value: &Value) -> Result<()> {
        stmt.bind(index, &self.coerce(value)?)
    }

    /// Extract from a fetched row at the resolved positions
    /// (`positions.len() == columns()`).
    fn extract(&self, row: &RowData, positions: &[SqlPos]) -> Result<Value> {
        self.coerce(row.get(&positions[0])?)
    }

    fn register_out(&self, stmt: &mut dyn Statement, index: usize) -> Result<()> {
        stmt.register_out(index, self.key())
    }
}

fn mismatch(adapter: &dyn TypeAdapter, value: &Value) -> Error {
    Error::Execution(format!(
        "cannot map {} value through the '{}' adapter",
        value.type_name(),
        adapter.key()
    ))
}

macro_rules! null_passes {
    ($value:expr) => {
        if $value.is_null() {
            return Ok(Value::Null);
        }
    };
}

struct BoolAdapter;

impl TypeAdapter for BoolAdapter {
    fn key(&self) -> &'static str {
        "boolean"
    }

    fn coerce(&self, value: &Value) -> Result<Value> {
        null_passes!(value);
        match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::Int(v) => Ok(Value::Bool(*v != 0)),
            Value::Str(s) if s == "true" => Ok(Value::Bool(true)),
            Value::Str(s) if s == "false" => Ok(Value::Bool(false)),
            _ => Err(mismatch(self, value)),
        }
    }
}

struct IntAdapter;

impl TypeAdapter for IntAdapter {
    fn key(&self) -> &'static str {
        "int"
    }

    fn coerce(&self, value: &Value) -> Result<Value> {
        null_passes!(value);
        match value {
            Value::Int(_) => Ok(value.clone()),
            Value::Str(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| mismatch(self, value)),
            _ => Err(mismatch(self, value)),
        }
    }
}

struct FloatAdapter;

impl TypeAdapter for FloatAdapter {
    fn key(&self) -> &'static str {
        "float"
    }

    fn coerce(&self, value: &Value) -> Result<Value> {
        null_passes!(value);
        match value {
            Value::Float(_) => Ok(value.clone()),
            Value::Int(v) => Ok(Value::Float(*v as f64)),
            Value::Str(s) => s
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| mismatch(self, value)),
            _ => Err(mismatch(self, value)),
        }
    }
}

struct StringAdapter {
    key: &'static str,
}

impl TypeAdapter for StringAdapter {
    fn key(&self) -> &'static str {
        self.key
    }

    fn coerce(&self, value: &Value) -> Result<Value> {
        null_passes!(value);
        match value {
            Value::Str(_) => Ok(value.clone()),
            Value::Bool(_)
            | Value::Int(_)
            | Value::Float(_)
            | Value::Uuid(_)
            | Value::Date(_)
            | Value::Time(_)
            | Value::Timestamp(_) => Ok(Value::Str(value.render())),
            _ => Err(mismatch(self, value)),
        }
    }
}

struct BytesAdapter;

impl TypeAdapter for BytesAdapter {
    fn key(&self) -> &'static str {
        "bytes"
    }

    fn coerce(&self, value: &Value) -> Result<Value> {
        null_passes!(value);
        match value {
            Value::Bytes(_) => Ok(value.clone()),
            _ => Err(mismatch(self, value)),
        }
    }
}

struct DateAdapter;

impl TypeAdapter for DateAdapter {
    fn key(&self) -> &'static str {
        "date"
    }

    fn coerce(&self, value: &Value) -> Result<Value> {
        null_passes!(value);
        match value {
            Value::Date(_) => Ok(value.clone()),
            Value::Timestamp(ts) => Ok(Value::Date(ts.date())),
            Value::Str(s) => s
                .trim()
                .parse::<NaiveDate>()
                .map(Value::Date)
                .map_err(|_| mismatch(self, value)),
            _ => Err(mismatch(self, value)),
        }
    }
}

struct TimeAdapter;

impl TypeAdapter for TimeAdapter {
    fn key(&self) -> &'static str {
        "time"
    }

    fn coerce(&self, value: &Value) -> Result<Value> {
        null_passes!(value);
        match value {
            Value::Time(_) => Ok(value.clone()),
            Value::Timestamp(ts) => Ok(Value::Time(ts.time())),
            Value::Str(s) => s
                .trim()
                .parse::<NaiveTime>()
                .map(Value::Time)
                .map_err(|_| mismatch(self, value)),
            _ => Err(mismatch(self, value)),
        }
    }
}

struct TimestampAdapter;

impl TypeAdapter for TimestampAdapter {
    fn key(&self) -> &'static str {
        "timestamp"
    }

    fn coerce(&self, value: &Value) -> Result<Value> {
        null_passes!(value);
        match value {
            Value::Timestamp(_) => Ok(value.clone()),
            Value::Date(d) => Ok(Value::Timestamp(d.and_hms_opt(0, 0, 0).ok_or_else(
                || Error::Execution(format!("date {} has no midnight", d)),
            )?)),
            Value::Str(s) => parse_timestamp(s.trim())
                .map(Value::Timestamp)
                .ok_or_else(|| mismatch(self, value)),
            _ => Err(mismatch(self, value)),
        }
    }
}

fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
}

struct UuidAdapter;

impl TypeAdapter for UuidAdapter {
    fn key(&self) -> &'static str {
        "uuid"
    }

    fn coerce(&self, value: &Value) -> Result<Value> {
        null_passes!(value);
        match value {
            Value::Uuid(_) => Ok(value.clone()),
            Value::Str(s) => s
                .trim()
                .parse::<Uuid>()
                .map(Value::Uuid)
                .map_err(|_| mismatch(self, value)),
            _ => Err(mismatch(self, value)),
        }
    }
}

/// JSON text column: containers serialize on the way in, text validates as
/// JSON on the way out.
struct JsonAdapter;

impl TypeAdapter for JsonAdapter {
    fn key(&self) -> &'static str {
        "json"
    }

    fn coerce(&self, value: &Value) -> Result<Value> {
        null_passes!(value);
        match value {
            Value::Str(s) => {
                serde_json::from_str::<serde_json::Value>(s)
                    .map_err(|_| Error::Execution(format!("malformed json text: '{}'", s)))?;
                Ok(value.clone())
            }
            Value::Seq(_) | Value::Map(_) | Value::Bean(_) => {
                Ok(Value::Str(value.to_json().to_string()))
            }
            _ => Ok(Value::Str(value.to_json().to_string())),
        }
    }
}

/// Timestamp stored as separate date and time columns; consumes two
/// consecutive SQL positions.
struct SplitTimestampAdapter;

impl TypeAdapter for SplitTimestampAdapter {
    fn key(&self) -> &'static str {
        "datetime2"
    }

    fn columns(&self) -> usize {
        2
    }

    fn coerce(&self, value: &Value) -> Result<Value> {
        TimestampAdapter.coerce(value)
    }

    fn bind(&self, stmt: &mut dyn Statement, index: usize, value: &Value) -> Result<()> {
        match self.coerce(value)? {
            Value::Null => {
                stmt.bind(index, &Value::Null)?;
                stmt.bind(index + 1, &Value::Null)
            }
            Value::Timestamp(ts) => {
                stmt.bind(index, &Value::Date(ts.date()))?;
                stmt.bind(index + 1, &Value::Time(ts.time()))
            }
            other => Err(mismatch(self, &other)),
        }
    }

    fn extract(&self, row: &RowData, positions: &[SqlPos]) -> Result<Value> {
        let date = DateAdapter.coerce(row.get(&positions[0])?)?;
        let time = TimeAdapter.coerce(row.get(&positions[1])?)?;
        match (date, time) {
            (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
            (Value::Date(d), Value::Time(t)) => Ok(Value::Timestamp(NaiveDateTime::new(d, t))),
            (d, _) => Err(mismatch(self, &d)),
        }
    }
}

type Registry = HashMap<String, Arc<dyn TypeAdapter>>;

static REGISTRY: OnceLock<RwLock<Registry>> = OnceLock::new();

fn registry() -> &'static RwLock<Registry> {
    REGISTRY.get_or_init(|| RwLock::new(builtins()))
}

fn builtins() -> Registry {
    let adapters: Vec<Arc<dyn TypeAdapter>> = vec![
        Arc::new(BoolAdapter),
        Arc::new(IntAdapter),
        Arc::new(FloatAdapter),
        Arc::new(StringAdapter { key: "string" }),
        Arc::new(StringAdapter { key: "clob" }),
        Arc::new(BytesAdapter),
        Arc::new(DateAdapter),
        Arc::new(TimeAdapter),
        Arc::new(TimestampAdapter),
        Arc::new(UuidAdapter),
        Arc::new(JsonAdapter),
        Arc::new(SplitTimestampAdapter),
    ];
    adapters
        .into_iter()
        .map(|a| (a.key().to_string(), a))
        .collect()
}

/// Register an adapter under `key`, overwriting any previous registration.
pub fn register(key: &str, adapter: Arc<dyn TypeAdapter>) {
    tracing::debug!(key, "registering type adapter");
    registry()
        .write()
        .unwrap_or_else(|e| e.into_inner())
        .insert(key.to_string(), adapter);
}

/// Remove a registration; returns whether the key was present.
pub fn unregister(key: &str) -> bool {
    tracing::debug!(key, "unregistering type adapter");
    registry()
        .write()
        .unwrap_or_else(|e| e.into_inner())
        .remove(key)
        .is_some()
}

pub fn is_registered(key: &str) -> bool {
    registry()
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .contains_key(key)
}

/// Look an adapter up by key. Absence surfaces at plan-build time as a
/// validation error, never during invocation.
pub fn lookup(key: &str) -> Option<Arc<dyn TypeAdapter>> {
    registry()
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .get(key)
        .cloned()
}

/// The adapter key inferred for an "auto" definition of the given type.
pub fn default_key(ty: &TypeTag) -> Option<&'static str> {
    match ty {
        TypeTag::Bool => Some("boolean"),
        TypeTag::Int => Some("int"),
        TypeTag::Float => Some("float"),
        TypeTag::Str => Some("string"),
        TypeTag::Bytes => Some("bytes"),
        TypeTag::Text => Some("clob"),
        TypeTag::Uuid => Some("uuid"),
        TypeTag::Date => Some("date"),
        TypeTag::Time => Some("time"),
        TypeTag::Timestamp => Some("timestamp"),
        TypeTag::Json => Some("json"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_builtins_are_registered() {
        for key in [
            "boolean",
            "int",
            "float",
            "string",
            "clob",
            "bytes",
            "date",
            "time",
            "timestamp",
            "uuid",
            "json",
            "datetime2",
        ] {
            assert!(is_registered(key), "missing builtin '{}'", key);
        }
        assert!(lookup("nope").is_none());
    }

    #[test]
    fn test_register_unregister_round_trip() {
        struct Upper;
        impl TypeAdapter for Upper {
            fn key(&self) -> &'static str {
                "upper"
            }
            fn coerce(&self, value: &Value) -> Result<Value> {
                match value {
                    Value::Str(s) => Ok(Value::Str(s.to_uppercase())),
                    _ => Ok(value.clone()),
                }
            }
        }
        register("upper", Arc::new(Upper));
        assert!(is_registered("upper"));
        // Overwrite is idempotent.
        register("upper", Arc::new(Upper));
        assert!(unregister("upper"));
        assert!(!unregister("upper"));
        assert!(!is_registered("upper"));
    }

    #[test]
    fn test_int_coercion() {
        let a = lookup("int").unwrap();
        assert_eq!(a.coerce(&Value::Int(4)).unwrap(), Value::Int(4));
        assert_eq!(a.coerce(&Value::Str(" 12 ".into())).unwrap(), Value::Int(12));
        assert_eq!(a.coerce(&Value::Null).unwrap(), Value::Null);
        assert!(a.coerce(&Value::Bytes(vec![1])).is_err());
    }

    #[test]
    fn test_timestamp_coercion() {
        let a = lookup("timestamp").unwrap();
        let v = a
            .coerce(&Value::Str("2024-05-01 10:30:00".into()))
            .unwrap();
        assert!(matches!(v, Value::Timestamp(_)));
    }

    #[test]
    fn test_datetime2_spans_two_positions() {
        let a = lookup("datetime2").unwrap();
        assert_eq!(a.columns(), 2);
        let row = RowData::new(
            vec!["d".into(), "t".into()],
            vec![
                Value::Str("2024-05-01".into()),
                Value::Str("10:30:00".into()),
            ],
        );
        let v = a
            .extract(&row, &[SqlPos::Index(1), SqlPos::Index(2)])
            .unwrap();
        let ts = parse_timestamp("2024-05-01 10:30:00").unwrap();
        assert_eq!(v, Value::Timestamp(ts));
    }

    #[test]
    fn test_json_validates_text() {
        let a = lookup("json").unwrap();
        assert!(a.coerce(&Value::Str("{\"a\":1}".into())).is_ok());
        assert!(a.coerce(&Value::Str("{oops".into())).is_err());
        let v = a
            .coerce(&Value::Seq(vec![Value::Int(1), Value::Int(2)]))
            .unwrap();
        assert_eq!(v, Value::Str("[1,2]".into()));
    }
}
