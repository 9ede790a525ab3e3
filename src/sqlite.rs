use std::borrow::Cow;
use std::fmt;

use rusqlite::types::{ToSqlOutput, Value as SqlValue};
use rusqlite::{params_from_iter, Connection, ToSql};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::batch::{calc_batch_size, BatchPlan, SQLITE_DEFAULT_VARIABLE_LIMIT};
use crate::error::{Error, Result};
use crate::transaction::flat_transaction;

/// Recommended pragmas for application databases, applied at open time.
pub const SQLITE_DEFAULT_PRAGMAS: &[(&str, PragmaValue)] = &[
    ("journal_mode", PragmaValue::Text(Cow::Borrowed("wal"))),
    ("cache_size", PragmaValue::Integer(-64_000)),
    ("foreign_keys", PragmaValue::Integer(1)),
    ("ignore_check_constraints", PragmaValue::Integer(0)),
    ("synchronous", PragmaValue::Integer(0)),
];

/// Core value types for SQLite operations
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    Boolean(bool),
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Real(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Blob(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

impl From<SqlValue> for Value {
    fn from(value: SqlValue) -> Self {
        match value {
            SqlValue::Null => Value::Null,
            SqlValue::Integer(v) => Value::Integer(v),
            SqlValue::Real(v) => Value::Real(v),
            SqlValue::Text(v) => Value::Text(v),
            SqlValue::Blob(v) => Value::Blob(v),
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::from(rusqlite::types::Null),
            Value::Integer(v) => ToSqlOutput::from(*v),
            Value::Real(v) => ToSqlOutput::from(*v),
            Value::Text(v) => ToSqlOutput::from(v.as_str()),
            Value::Blob(v) => ToSqlOutput::from(v.as_slice()),
            Value::Boolean(v) => ToSqlOutput::from(*v),
        })
    }
}

/// Quotes an identifier for use in generated SQL.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Schema definition for the SQLite database
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Schema {
    pub tables: Vec<TableDefinition>,
}

impl Schema {
    pub fn new() -> Self {
        Self { tables: Vec::new() }
    }

    pub fn add_table(mut self, table: TableDefinition) -> Self {
        self.tables.push(table);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableDefinition {
    pub name: String,
    pub columns: Vec<ColumnDefinition>,
    pub primary_key: Vec<String>,
}

impl TableDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
        }
    }

    pub fn column(mut self, column: ColumnDefinition) -> Self {
        self.columns.push(column);
        self
    }

    pub fn primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    /// `CREATE TABLE IF NOT EXISTS` statement for this table.
    pub fn create_sql(&self) -> String {
        let mut parts: Vec<String> = self.columns.iter().map(ToString::to_string).collect();
        if !self.primary_key.is_empty() {
            let keys: Vec<String> = self.primary_key.iter().map(|k| quote_identifier(k)).collect();
            parts.push(format!("PRIMARY KEY ({})", keys.join(", ")));
        }
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_identifier(&self.name),
            parts.join(", ")
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDefinition {
    pub name: String,
    pub data_type: DataType,
    pub constraints: Vec<ColumnConstraint>,
    pub default_value: Option<DefaultValue>,
}

impl ColumnDefinition {
    /// A `NOT NULL` column; see [`ColumnDefinition::nullable`].
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            constraints: vec![ColumnConstraint::NotNull],
            default_value: None,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.constraints.retain(|c| *c != ColumnConstraint::NotNull);
        self
    }

    pub fn constraint(mut self, constraint: ColumnConstraint) -> Self {
        if !self.constraints.contains(&constraint) {
            self.constraints.push(constraint);
        }
        self
    }

    pub fn default_value(mut self, value: DefaultValue) -> Self {
        self.default_value = Some(value);
        self
    }
}

impl fmt::Display for ColumnDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", quote_identifier(&self.name), self.data_type)?;
        for constraint in &self.constraints {
            write!(f, " {constraint}")?;
        }
        if let Some(default) = &self.default_value {
            write!(f, " DEFAULT {default}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Integer,
    Text,
    Real,
    Blob,
    /// MySQL-style `FLOAT(M, D)`; REAL affinity on SQLite.
    Float { max_digits: u32, decimal_places: u32 },
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Integer => f.write_str("INTEGER"),
            DataType::Text => f.write_str("TEXT"),
            DataType::Real => f.write_str("REAL"),
            DataType::Blob => f.write_str("BLOB"),
            DataType::Float {
                max_digits,
                decimal_places,
            } => write!(f, "FLOAT({max_digits}, {decimal_places})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnConstraint {
    PrimaryKey,
    NotNull,
    Unique,
}

impl fmt::Display for ColumnConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ColumnConstraint::PrimaryKey => "PRIMARY KEY",
            ColumnConstraint::NotNull => "NOT NULL",
            ColumnConstraint::Unique => "UNIQUE",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValue {
    Integer(i64),
    Text(String),
    Real(f64),
    Null,
    CurrentTimestamp,
}

impl fmt::Display for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultValue::Integer(v) => write!(f, "{v}"),
            DefaultValue::Text(v) => write!(f, "'{}'", v.replace('\'', "''")),
            DefaultValue::Real(v) => write!(f, "{v:?}"),
            DefaultValue::Null => f.write_str("NULL"),
            DefaultValue::CurrentTimestamp => f.write_str("CURRENT_TIMESTAMP"),
        }
    }
}

/// Value of a connection pragma.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PragmaValue {
    Integer(i64),
    Text(Cow<'static, str>),
}

impl fmt::Display for PragmaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PragmaValue::Integer(v) => write!(f, "{v}"),
            PragmaValue::Text(v) => f.write_str(v),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pragma {
    pub name: String,
    pub value: PragmaValue,
}

impl Pragma {
    pub fn new(name: impl Into<String>, value: PragmaValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    /// `PRAGMA name = value`.
    ///
    /// The name must be a plain identifier. Text values that are plain
    /// identifiers (`wal`, `normal`) are written bare; anything else is
    /// written as a quoted string literal, which SQLite accepts for every
    /// pragma argument (`'UTF-16le'`, `'/tmp/x.db'`).
    pub fn statement(&self) -> Result<String> {
        if !is_word(&self.name) {
            return Err(Error::InvalidPragma {
                name: self.name.clone(),
                value: self.value.to_string(),
            });
        }
        let value = match &self.value {
            PragmaValue::Integer(v) => v.to_string(),
            PragmaValue::Text(v) if is_word(v) => v.to_string(),
            PragmaValue::Text(v) => format!("'{}'", v.replace('\'', "''")),
        };
        Ok(format!("PRAGMA {} = {}", self.name, value))
    }
}

fn is_word(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// [`SQLITE_DEFAULT_PRAGMAS`] as owned configuration entries.
pub fn default_pragmas() -> Vec<Pragma> {
    SQLITE_DEFAULT_PRAGMAS
        .iter()
        .map(|(name, value)| Pragma::new(*name, value.clone()))
        .collect()
}

fn default_variable_limit() -> usize {
    SQLITE_DEFAULT_VARIABLE_LIMIT
}

/// Applies `pragmas` to `conn` in order.
pub fn apply_pragmas(conn: &Connection, pragmas: &[Pragma]) -> Result<()> {
    for pragma in pragmas {
        let mut stmt = conn.prepare(&pragma.statement()?)?;
        // some pragmas echo the new value back as a row
        let mut rows = stmt.query([])?;
        while rows.next()?.is_some() {}
        debug!(pragma = %pragma.name, value = %pragma.value, "Applied pragma");
    }
    Ok(())
}

/// SQLite database configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqliteConfig {
    /// Path to the SQLite database file, or `:memory:`
    pub db_path: String,
    /// Pragmas applied right after the connection opens. Names must be
    /// plain identifiers; text values that are not are sent quoted.
    #[serde(default = "default_pragmas")]
    pub pragmas: Vec<Pragma>,
    /// Bound-parameter ceiling used to size batches
    #[serde(default = "default_variable_limit")]
    pub variable_limit: usize,
    /// Tables created on open
    #[serde(skip)]
    pub schema: Schema,
}

impl SqliteConfig {
    /// Create a new SQLite config with path and schema
    pub fn new(db_path: impl Into<String>, schema: Schema) -> Self {
        Self {
            db_path: db_path.into(),
            pragmas: default_pragmas(),
            variable_limit: SQLITE_DEFAULT_VARIABLE_LIMIT,
            schema,
        }
    }

    pub fn with_pragmas(mut self, pragmas: Vec<Pragma>) -> Self {
        self.pragmas = pragmas;
        self
    }

    pub fn with_variable_limit(mut self, variable_limit: usize) -> Self {
        self.variable_limit = variable_limit;
        self
    }
}

/// An open SQLite connection configured from a [`SqliteConfig`].
pub struct SqliteDatabase {
    config: SqliteConfig,
    connection: Connection,
}

impl SqliteDatabase {
    /// Opens the database, applies the configured pragmas and creates the
    /// schema's tables.
    pub fn open(config: SqliteConfig) -> Result<Self> {
        if config.variable_limit == 0 {
            return Err(Error::InvalidArgument {
                name: "variable_limit",
            });
        }
        debug!(path = %config.db_path, "Opening sqlite database");
        let connection = if config.db_path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(&config.db_path)?
        };
        apply_pragmas(&connection, &config.pragmas)?;

        let database = Self { config, connection };
        database.initialize_schema()?;
        Ok(database)
    }

    fn initialize_schema(&self) -> Result<()> {
        self.transaction(|conn| {
            for table in &self.config.schema.tables {
                conn.execute_batch(&table.create_sql())?;
                debug!(table = %table.name, "Created table");
            }
            Ok(())
        })
    }

    pub fn config(&self) -> &SqliteConfig {
        &self.config
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn into_connection(self) -> Connection {
        self.connection
    }

    /// Rows of `columns_per_row` parameters that fit in one statement.
    pub fn batch_size(&self, columns_per_row: usize) -> Result<usize> {
        calc_batch_size(columns_per_row, self.config.variable_limit)
    }

    /// Runs `work` in a flattened transaction on this connection.
    pub fn transaction<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&Connection) -> Result<T, E>,
        E: From<Error> + fmt::Display,
    {
        flat_transaction(&self.connection, work)
    }

    /// Inserts `rows` into `table`, as many rows per statement as the
    /// variable limit allows, all inside one flattened transaction.
    ///
    /// Returns the number of inserted rows.
    pub fn bulk_insert(&self, table: &str, columns: &[&str], rows: &[Vec<Value>]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        if let Some((index, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != columns.len())
        {
            return Err(Error::RowShape {
                index,
                expected: columns.len(),
                found: row.len(),
            });
        }

        let plan = BatchPlan::new(rows.len(), columns.len(), self.config.variable_limit)?;
        let head = format!(
            "INSERT INTO {} ({}) VALUES ",
            quote_identifier(table),
            columns
                .iter()
                .map(|c| quote_identifier(c))
                .collect::<Vec<_>>()
                .join(", ")
        );
        let placeholders = format!("({})", vec!["?"; columns.len()].join(", "));

        self.transaction(|conn| {
            let mut inserted = 0;
            for range in plan.ranges() {
                let batch = &rows[range];
                let sql = format!("{head}{}", vec![placeholders.as_str(); batch.len()].join(", "));
                inserted += conn.execute(&sql, params_from_iter(batch.iter().flatten()))?;
            }
            debug!(
                table,
                rows = inserted,
                batches = plan.batch_count(),
                rows_per_batch = plan.rows_per_batch(),
                "Bulk insert complete"
            );
            Ok(inserted)
        })
    }
}

impl fmt::Debug for SqliteDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteDatabase")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
