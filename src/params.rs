use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};

use serde_json::Value as JsonValue;

use crate::constants::Status;
use crate::error::{EmbedSqliteError, NativeError};
use crate::marshal;
use crate::native::NativeExports;
use crate::types::{BindValue, Param, json_type_name};

/// Parameters for one query: none, positional (1-based), or named.
///
/// ```rust
/// use embed_sqlite::{named_params, params};
///
/// let positional = params![1, "two", 3.5];
/// let named = named_params! { "id" => 7, "@name" => "x" };
/// # let _ = (positional, named);
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Params {
    #[default]
    None,
    Positional(Vec<Param>),
    Named(Vec<(String, Param)>),
}

impl Params {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Params::None => true,
            Params::Positional(values) => values.is_empty(),
            Params::Named(entries) => entries.is_empty(),
        }
    }

    /// Build parameters from a dynamic JSON value: an array binds
    /// positionally, an object by name, `null` binds nothing.
    ///
    /// # Errors
    /// Returns [`EmbedSqliteError::Bind`] for any other top-level value or for
    /// an element with no bind primitive.
    pub fn from_json(value: JsonValue) -> Result<Self, EmbedSqliteError> {
        match value {
            JsonValue::Null => Ok(Params::None),
            JsonValue::Array(items) => items
                .into_iter()
                .map(Param::try_from)
                .collect::<Result<Vec<_>, _>>()
                .map(Params::Positional),
            JsonValue::Object(map) => map
                .into_iter()
                .map(|(name, value)| Param::try_from(value).map(|param| (name, param)))
                .collect::<Result<Vec<_>, _>>()
                .map(Params::Named),
            other => Err(EmbedSqliteError::Bind(NativeError::host(format!(
                "Parameters must be an array or an object, got {}.",
                json_type_name(&other)
            )))),
        }
    }
}

impl From<()> for Params {
    fn from((): ()) -> Self {
        Params::None
    }
}

impl From<Vec<Param>> for Params {
    fn from(values: Vec<Param>) -> Self {
        Params::Positional(values)
    }
}

impl From<Vec<(String, Param)>> for Params {
    fn from(entries: Vec<(String, Param)>) -> Self {
        Params::Named(entries)
    }
}

impl<T: Into<Param>> From<HashMap<String, T>> for Params {
    fn from(map: HashMap<String, T>) -> Self {
        Params::Named(map.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

impl<T: Into<Param>> From<BTreeMap<String, T>> for Params {
    fn from(map: BTreeMap<String, T>) -> Self {
        Params::Named(map.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

/// Positional parameters: `params![1, "a", None::<i64>]`.
#[macro_export]
macro_rules! params {
    () => {
        $crate::Params::None
    };
    ($($value:expr),+ $(,)?) => {
        $crate::Params::Positional(vec![$($crate::Param::from($value)),+])
    };
}

/// Named parameters: `named_params! { "id" => 1, "$name" => "a" }`.
#[macro_export]
macro_rules! named_params {
    ($($name:expr => $value:expr),+ $(,)?) => {
        $crate::Params::Named(vec![
            $((::std::string::String::from($name), $crate::Param::from($value))),+
        ])
    };
}

/// Prefix a bare parameter name with `:`. Names already starting with `:`,
/// `@` or `$` are used as given.
#[must_use]
pub fn normalize_name(name: &str) -> Cow<'_, str> {
    if name.starts_with([':', '@', '$']) {
        Cow::Borrowed(name)
    } else {
        Cow::Owned(format!(":{name}"))
    }
}

/// Bind every parameter onto `stmt`. Stops at the first failure; the caller
/// still owns `stmt` and must finalize it.
pub(crate) fn bind_params(
    exports: &dyn NativeExports,
    stmt: i32,
    params: &Params,
) -> Result<(), EmbedSqliteError> {
    match params {
        Params::None => Ok(()),
        Params::Positional(values) => {
            for (offset, value) in values.iter().enumerate() {
                let idx = i32::try_from(offset + 1).map_err(|_| {
                    EmbedSqliteError::Bind(NativeError::new(
                        "too many parameters",
                        Status::Range.code(),
                    ))
                })?;
                bind_value(exports, stmt, idx, value)?;
            }
            Ok(())
        }
        Params::Named(entries) => {
            for (name, value) in entries {
                let idx = resolve_index(exports, stmt, name)?;
                bind_value(exports, stmt, idx, value)?;
            }
            Ok(())
        }
    }
}

fn resolve_index(
    exports: &dyn NativeExports,
    stmt: i32,
    name: &str,
) -> Result<i32, EmbedSqliteError> {
    let key = normalize_name(name);
    let idx = marshal::with_string(exports, &key, |ptr| exports.bind_parameter_index(stmt, ptr))
        .map_err(EmbedSqliteError::Bind)?;
    if idx == 0 {
        return Err(EmbedSqliteError::Bind(NativeError::host(format!(
            "No parameter named '{key}'."
        ))));
    }
    Ok(idx)
}

fn bind_value(
    exports: &dyn NativeExports,
    stmt: i32,
    idx: i32,
    value: &Param,
) -> Result<(), EmbedSqliteError> {
    let status = match value.to_bind() {
        BindValue::Int(v) => exports.bind_int(stmt, idx, v),
        BindValue::Double(v) => exports.bind_double(stmt, idx, v),
        BindValue::BigInt(text) => {
            marshal::with_string(exports, &text, |ptr| exports.bind_big_int(stmt, idx, ptr))
                .map_err(EmbedSqliteError::Bind)?
        }
        BindValue::Text(text) => {
            marshal::with_string(exports, &text, |ptr| exports.bind_text(stmt, idx, ptr))
                .map_err(EmbedSqliteError::Bind)?
        }
        BindValue::Blob(bytes) => {
            marshal::with_bytes(exports, bytes, |ptr, len| {
                exports.bind_blob(stmt, idx, ptr, len)
            })
            .map_err(EmbedSqliteError::Bind)?
        }
        BindValue::Null => exports.bind_null(stmt, idx),
    };
    if status != Status::Ok.code() {
        return Err(EmbedSqliteError::Bind(NativeError::from_exports(
            exports, status,
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bare_names_gain_colon_prefix() {
        assert_eq!(normalize_name("a"), ":a");
        assert_eq!(normalize_name(":a"), ":a");
        assert_eq!(normalize_name("@a"), "@a");
        assert_eq!(normalize_name("$a"), "$a");
    }

    #[test]
    fn macros_build_expected_shapes() {
        assert_eq!(params![], Params::None);
        assert_eq!(
            params![1, "x"],
            Params::Positional(vec![Param::Number(1.0), Param::Text("x".into())])
        );
        assert_eq!(
            named_params! { "a" => true },
            Params::Named(vec![("a".to_string(), Param::Bool(true))])
        );
    }

    #[test]
    fn json_params() {
        assert_eq!(Params::from_json(json!(null)).unwrap(), Params::None);
        assert_eq!(
            Params::from_json(json!([1, null])).unwrap(),
            Params::Positional(vec![Param::Number(1.0), Param::Null])
        );
        assert_eq!(
            Params::from_json(json!({"a": "b"})).unwrap(),
            Params::Named(vec![("a".to_string(), Param::Text("b".into()))])
        );
        let err = Params::from_json(json!(5)).unwrap_err();
        assert!(err.to_string().contains("got number"));
        let err = Params::from_json(json!([[1]])).unwrap_err();
        assert!(err.to_string().contains("Can not bind array."));
    }
}
