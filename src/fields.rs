//! Column adapters converting application types to and from SQLite values.
//!
//! Each adapter implements [`Field`]: it knows the column type it needs and
//! how to encode a value for binding and decode it when reading a row. The
//! stateless adapters also come as newtypes ([`Json`], [`Stored`]) that
//! implement `ToSql`/`FromSql` directly.

use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Value, ValueRef};
use rusqlite::Row;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::sqlite::{ColumnDefinition, DataType};

/// A typed column adapter.
pub trait Field {
    type Value;

    fn data_type(&self) -> DataType;

    fn to_sql(&self, value: &Self::Value) -> Result<Value>;

    fn from_sql(&self, value: ValueRef<'_>) -> Result<Self::Value>;

    /// Column definition named `name` using this adapter's type.
    fn column(&self, name: &str) -> ColumnDefinition {
        ColumnDefinition::new(name, self.data_type())
    }

    /// Decodes column `idx` of `row`.
    fn read(&self, row: &Row<'_>, idx: usize) -> Result<Self::Value> {
        self.from_sql(row.get_ref(idx)?)
    }
}

/// Maps SQL `NULL` to `None` around any other field.
#[derive(Debug, Clone, Default)]
pub struct Nullable<F>(pub F);

impl<F: Field> Field for Nullable<F> {
    type Value = Option<F::Value>;

    fn data_type(&self) -> DataType {
        self.0.data_type()
    }

    fn to_sql(&self, value: &Self::Value) -> Result<Value> {
        match value {
            Some(value) => self.0.to_sql(value),
            None => Ok(Value::Null),
        }
    }

    fn from_sql(&self, value: ValueRef<'_>) -> Result<Self::Value> {
        match value {
            ValueRef::Null => Ok(None),
            value => self.0.from_sql(value).map(Some),
        }
    }

    fn column(&self, name: &str) -> ColumnDefinition {
        self.0.column(name).nullable()
    }
}

fn text<'a>(value: ValueRef<'a>, what: &str) -> Result<&'a str> {
    match value {
        ValueRef::Text(bytes) => std::str::from_utf8(bytes)
            .map_err(|e| Error::Integrity(format!("{what} is not valid UTF-8: {e}"))),
        other => Err(Error::Integrity(format!(
            "expected {what} stored as TEXT, found {}",
            other.data_type()
        ))),
    }
}

/// Stores filesystem paths as text, optionally relative to a root chosen at
/// runtime so the root can move without rewriting the table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathField {
    relative_to: Option<PathBuf>,
}

impl PathField {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absolute paths are stored relative to `root` and every path read back
    /// is joined onto it.
    pub fn relative_to(root: impl Into<PathBuf>) -> Self {
        Self {
            relative_to: Some(root.into()),
        }
    }

    pub fn root(&self) -> Option<&Path> {
        self.relative_to.as_deref()
    }

    pub fn encode(&self, path: &Path) -> Result<String> {
        let stored = match &self.relative_to {
            Some(root) if path.is_absolute() => {
                path.strip_prefix(root)
                    .map_err(|_| Error::PathOutsideRoot {
                        path: path.to_path_buf(),
                        root: root.clone(),
                    })?
            }
            _ => path,
        };
        stored
            .to_str()
            .map(str::to_owned)
            .ok_or_else(|| Error::NonUtf8Path(path.to_path_buf()))
    }

    pub fn decode(&self, stored: &str) -> PathBuf {
        match &self.relative_to {
            Some(root) => root.join(stored),
            None => PathBuf::from(stored),
        }
    }
}

impl Field for PathField {
    type Value = PathBuf;

    fn data_type(&self) -> DataType {
        DataType::Text
    }

    fn to_sql(&self, value: &PathBuf) -> Result<Value> {
        self.encode(value).map(Value::Text)
    }

    fn from_sql(&self, value: ValueRef<'_>) -> Result<PathBuf> {
        text(value, "path").map(|stored| self.decode(stored))
    }
}

/// A float column declared with MySQL-style `FLOAT(M, D)` precision.
///
/// SQLite only looks at the type name for affinity, so there the column
/// behaves like any other `REAL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrecisionFloatField {
    max_digits: u32,
    decimal_places: u32,
}

impl Default for PrecisionFloatField {
    fn default() -> Self {
        Self {
            max_digits: 10,
            decimal_places: 4,
        }
    }
}

impl PrecisionFloatField {
    pub fn new(max_digits: u32, decimal_places: u32) -> Result<Self> {
        if max_digits == 0 {
            return Err(Error::InvalidArgument { name: "max_digits" });
        }
        if decimal_places > max_digits {
            return Err(Error::InvalidArgument {
                name: "decimal_places",
            });
        }
        Ok(Self {
            max_digits,
            decimal_places,
        })
    }

    pub fn max_digits(&self) -> u32 {
        self.max_digits
    }

    pub fn decimal_places(&self) -> u32 {
        self.decimal_places
    }
}

impl Field for PrecisionFloatField {
    type Value = f64;

    fn data_type(&self) -> DataType {
        DataType::Float {
            max_digits: self.max_digits,
            decimal_places: self.decimal_places,
        }
    }

    fn to_sql(&self, value: &f64) -> Result<Value> {
        Ok(Value::Real(*value))
    }

    fn from_sql(&self, value: ValueRef<'_>) -> Result<f64> {
        match value {
            ValueRef::Real(v) => Ok(v),
            ValueRef::Integer(v) => Ok(v as f64),
            other => Err(Error::Integrity(format!(
                "expected a float, found {}",
                other.data_type()
            ))),
        }
    }
}

/// Stores any serde-serializable value as JSON text.
///
/// The stored document can no longer be queried by SQL; keep it for data
/// that is only ever loaded whole.
#[derive(Debug, Clone, Copy)]
pub struct JsonField<T> {
    pretty: bool,
    _value: PhantomData<fn() -> T>,
}

impl<T> Default for JsonField<T> {
    fn default() -> Self {
        Self {
            pretty: false,
            _value: PhantomData,
        }
    }
}

impl<T: Serialize + DeserializeOwned> JsonField<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes indented JSON instead of the compact form.
    pub fn pretty(mut self) -> Self {
        self.pretty = true;
        self
    }

    pub fn encode(&self, value: &T) -> Result<String> {
        let encoded = if self.pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };
        encoded.map_err(Error::JsonEncode)
    }

    pub fn decode(&self, stored: &[u8]) -> Result<T> {
        serde_json::from_slice(stored)
            .map_err(|e| Error::Integrity(format!("failed to decode JSON value: {e}")))
    }
}

impl<T: Serialize + DeserializeOwned> Field for JsonField<T> {
    type Value = T;

    fn data_type(&self) -> DataType {
        DataType::Text
    }

    fn to_sql(&self, value: &T) -> Result<Value> {
        self.encode(value).map(Value::Text)
    }

    fn from_sql(&self, value: ValueRef<'_>) -> Result<T> {
        match value {
            ValueRef::Text(bytes) | ValueRef::Blob(bytes) => self.decode(bytes),
            other => Err(Error::Integrity(format!(
                "expected JSON stored as TEXT, found {}",
                other.data_type()
            ))),
        }
    }
}

/// Binds and reads a value as compact JSON text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Json<T>(pub T);

impl<T: Serialize> ToSql for Json<T> {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        serde_json::to_string(&self.0)
            .map(ToSqlOutput::from)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(Error::JsonEncode(e))))
    }
}

impl<T: DeserializeOwned> FromSql for Json<T> {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let bytes = match value {
            ValueRef::Text(bytes) | ValueRef::Blob(bytes) => bytes,
            _ => return Err(FromSqlError::InvalidType),
        };
        serde_json::from_slice(bytes).map(Json).map_err(|e| {
            FromSqlError::Other(Box::new(Error::Integrity(format!(
                "failed to decode JSON value: {e}"
            ))))
        })
    }
}

/// An enum whose variants are stored by name.
///
/// Renaming or removing a variant breaks rows written with the old name;
/// those rows then fail to decode with [`Error::Integrity`].
pub trait SqlEnum: Sized {
    /// Name of the enum, used in error messages.
    const TYPE_NAME: &'static str;

    fn variant_name(&self) -> &'static str;

    fn from_variant_name(name: &str) -> Option<Self>;
}

/// Implements [`SqlEnum`] for a fieldless enum, storing variants under their
/// Rust identifiers.
///
/// ```
/// #[derive(Debug, PartialEq)]
/// enum Colour {
///     Red,
///     Green,
/// }
///
/// sqlite_plus::impl_sql_enum!(Colour { Red, Green });
///
/// use sqlite_plus::SqlEnum;
/// assert_eq!(Colour::Green.variant_name(), "Green");
/// assert_eq!(Colour::from_variant_name("Red"), Some(Colour::Red));
/// ```
#[macro_export]
macro_rules! impl_sql_enum {
    ($ty:ident { $($variant:ident),+ $(,)? }) => {
        impl $crate::SqlEnum for $ty {
            const TYPE_NAME: &'static str = stringify!($ty);

            fn variant_name(&self) -> &'static str {
                match self {
                    $($ty::$variant => stringify!($variant),)+
                }
            }

            fn from_variant_name(name: &str) -> ::std::option::Option<Self> {
                match name {
                    $(stringify!($variant) => ::std::option::Option::Some($ty::$variant),)+
                    _ => ::std::option::Option::None,
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy)]
pub struct EnumField<E> {
    _enum: PhantomData<fn() -> E>,
}

impl<E> Default for EnumField<E> {
    fn default() -> Self {
        Self {
            _enum: PhantomData,
        }
    }
}

impl<E: SqlEnum> EnumField<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&self, stored: &str) -> Result<E> {
        E::from_variant_name(stored).ok_or_else(|| {
            Error::Integrity(format!(
                "enum {} has no value with name '{stored}'",
                E::TYPE_NAME
            ))
        })
    }
}

impl<E: SqlEnum> Field for EnumField<E> {
    type Value = E;

    fn data_type(&self) -> DataType {
        DataType::Text
    }

    fn to_sql(&self, value: &E) -> Result<Value> {
        Ok(Value::Text(value.variant_name().to_owned()))
    }

    fn from_sql(&self, value: ValueRef<'_>) -> Result<E> {
        text(value, E::TYPE_NAME).and_then(|stored| self.decode(stored))
    }
}

/// Binds and reads an [`SqlEnum`] by variant name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stored<E>(pub E);

impl<E: SqlEnum> ToSql for Stored<E> {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0.variant_name()))
    }
}

impl<E: SqlEnum> FromSql for Stored<E> {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let name = value.as_str()?;
        E::from_variant_name(name).map(Stored).ok_or_else(|| {
            FromSqlError::Other(Box::new(Error::Integrity(format!(
                "enum {} has no value with name '{name}'",
                E::TYPE_NAME
            ))))
        })
    }
}

/// Stores a [`Duration`] as whole microseconds in an INTEGER column.
/// Sub-microsecond precision is truncated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimedeltaField;

impl TimedeltaField {
    pub fn encode(&self, value: &Duration) -> Result<i64> {
        i64::try_from(value.as_micros()).map_err(|_| {
            Error::Integrity(format!("duration {value:?} does not fit in a 64-bit column"))
        })
    }

    pub fn decode(&self, micros: i64) -> Result<Duration> {
        u64::try_from(micros)
            .map(Duration::from_micros)
            .map_err(|_| Error::Integrity(format!("negative duration of {micros} microseconds")))
    }
}

impl Field for TimedeltaField {
    type Value = Duration;

    fn data_type(&self) -> DataType {
        DataType::Integer
    }

    fn to_sql(&self, value: &Duration) -> Result<Value> {
        self.encode(value).map(Value::Integer)
    }

    fn from_sql(&self, value: ValueRef<'_>) -> Result<Duration> {
        match value {
            ValueRef::Integer(micros) => self.decode(micros),
            other => Err(Error::Integrity(format!(
                "expected a duration stored as INTEGER, found {}",
                other.data_type()
            ))),
        }
    }
}
