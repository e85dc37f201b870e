use std::borrow::Cow;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value as JsonValue;

use crate::error::{EmbedSqliteError, NativeError};

/// Largest integer an IEEE-754 double represents exactly (2^53 - 1).
pub const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Values read back from a result row.
///
/// ```rust
/// use embed_sqlite::prelude::*;
///
/// let values = vec![Value::Int(1), Value::Text("alice".into()), Value::Null];
/// assert_eq!(values[0].as_int(), Some(&1));
/// assert!(values[2].is_null());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Integer value (64-bit)
    Int(i64),
    /// Floating point value (64-bit)
    Float(f64),
    /// Text/string value
    Text(String),
    /// Binary data
    Blob(Vec<u8>),
    /// NULL value
    Null,
}

impl Value {
    /// Check if this value is NULL
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_int(&self) -> Option<&i64> {
        if let Value::Int(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(value) => Some(*value),
            #[allow(clippy::cast_precision_loss)]
            Value::Int(value) => Some(*value as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        if let Value::Text(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_blob(&self) -> Option<&[u8]> {
        if let Value::Blob(bytes) = self {
            Some(bytes)
        } else {
            None
        }
    }

    /// Integers 0 and 1 read as booleans.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self.as_int() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        }
    }

    /// Parse a text value written by a bound [`Param::Date`] (or any RFC 3339
    /// timestamp).
    #[must_use]
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        let text = self.as_text()?;
        DateTime::parse_from_rfc3339(text)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// A query parameter.
///
/// Each variant maps to exactly one native bind call:
///
/// | variant | bind call |
/// |---|---|
/// | `Bool` | `bind_int` (1 / 0) |
/// | `Number`, safe integer | `bind_int` |
/// | `Number`, otherwise | `bind_double` |
/// | JSON integer beyond the safe range | `bind_big_int` (converted to `BigInt`) |
/// | `BigInt` | `bind_big_int` with a decimal string |
/// | `Text` | `bind_text` |
/// | `Date` | `bind_text` with `YYYY-MM-DDTHH:MM:SS.SSSZ` |
/// | `Blob` | `bind_blob` |
/// | `Null` | `bind_null` |
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Bool(bool),
    Number(f64),
    /// Arbitrary-width integer; the native side rejects values outside `i64`.
    BigInt(i128),
    Text(String),
    Date(DateTime<Utc>),
    Blob(Vec<u8>),
    Null,
}

/// The native bind primitive a [`Param`] normalizes to.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum BindValue<'a> {
    Int(i64),
    Double(f64),
    BigInt(String),
    Text(Cow<'a, str>),
    Blob(&'a [u8]),
    Null,
}

/// `true` when `value` is an integer a double holds exactly.
#[must_use]
pub fn is_safe_integer(value: f64) -> bool {
    value.is_finite() && value.fract() == 0.0 && value.abs() <= MAX_SAFE_INTEGER
}

impl Param {
    /// Name of the parameter's runtime type, as used in error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Param::Bool(_) => "boolean",
            Param::Number(_) => "number",
            Param::BigInt(_) => "bigint",
            Param::Text(_) => "string",
            Param::Date(_) => "date",
            Param::Blob(_) => "blob",
            Param::Null => "null",
        }
    }

    pub(crate) fn to_bind(&self) -> BindValue<'_> {
        match self {
            Param::Bool(b) => BindValue::Int(i64::from(*b)),
            #[allow(clippy::cast_possible_truncation)]
            Param::Number(n) if is_safe_integer(*n) => BindValue::Int(*n as i64),
            Param::Number(n) => BindValue::Double(*n),
            Param::BigInt(i) => BindValue::BigInt(i.to_string()),
            Param::Text(s) => BindValue::Text(Cow::Borrowed(s)),
            Param::Date(dt) => {
                BindValue::Text(Cow::Owned(dt.to_rfc3339_opts(SecondsFormat::Millis, true)))
            }
            Param::Blob(bytes) => BindValue::Blob(bytes),
            Param::Null => BindValue::Null,
        }
    }
}

macro_rules! param_from {
    ($variant:ident: $($ty:ty),+ => $conv:expr) => {
        $(
            impl From<$ty> for Param {
                fn from(value: $ty) -> Self {
                    Param::$variant($conv(value))
                }
            }
        )+
    };
}

param_from!(Bool: bool => std::convert::identity);
param_from!(Number: f64, f32, i32, i16, i8, u32, u16, u8 => f64::from);
param_from!(BigInt: i64, u64, i128 => i128::from);
param_from!(Text: String => std::convert::identity);
param_from!(Date: DateTime<Utc> => std::convert::identity);
param_from!(Blob: Vec<u8> => std::convert::identity);

impl From<&str> for Param {
    fn from(value: &str) -> Self {
        Param::Text(value.to_string())
    }
}

impl From<&String> for Param {
    fn from(value: &String) -> Self {
        Param::Text(value.clone())
    }
}

impl From<&[u8]> for Param {
    fn from(value: &[u8]) -> Self {
        Param::Blob(value.to_vec())
    }
}

/// Unit stands in for an absent ("undefined") value and binds as NULL.
impl From<()> for Param {
    fn from((): ()) -> Self {
        Param::Null
    }
}

impl<T: Into<Param>> From<Option<T>> for Param {
    fn from(value: Option<T>) -> Self {
        value.map_or(Param::Null, Into::into)
    }
}

/// JSON name of a dynamic value's type.
pub(crate) fn json_type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

impl TryFrom<JsonValue> for Param {
    type Error = EmbedSqliteError;

    /// Dynamic conversion. Arrays and objects have no bind primitive.
    ///
    /// JSON integers outside the safe range become `BigInt` rather than a
    /// `Number` that would bind as a double: a JSON integer literal is exact,
    /// and serde keeps it as `i64`/`u64`. Fractional JSON numbers and integers
    /// within the safe range become `Number` and follow the usual coercion.
    fn try_from(value: JsonValue) -> Result<Self, Self::Error> {
        match value {
            JsonValue::Null => Ok(Param::Null),
            JsonValue::Bool(b) => Ok(Param::Bool(b)),
            JsonValue::String(s) => Ok(Param::Text(s)),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    #[allow(clippy::cast_precision_loss)]
                    let as_float = i as f64;
                    if is_safe_integer(as_float) {
                        return Ok(Param::Number(as_float));
                    }
                    return Ok(Param::BigInt(i128::from(i)));
                }
                if let Some(u) = n.as_u64() {
                    return Ok(Param::BigInt(i128::from(u)));
                }
                Ok(Param::Number(n.as_f64().unwrap_or(f64::NAN)))
            }
            other @ (JsonValue::Array(_) | JsonValue::Object(_)) => {
                Err(EmbedSqliteError::Bind(NativeError::host(format!(
                    "Can not bind {}.",
                    json_type_name(&other)
                ))))
            }
        }
    }
}
