use std::path::PathBuf;
use std::time::Duration;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use sqlite_plus::sqlite::{ColumnDefinition, DataType, Schema, TableDefinition, Value};
use sqlite_plus::{
    EnumField, Error, Field, JsonField, PathField, PrecisionFloatField, SqliteConfig,
    SqliteDatabase, TimedeltaField, SQLITE_DEFAULT_VARIABLE_LIMIT,
};
use tempfile::NamedTempFile;

fn users_schema() -> Schema {
    Schema::new().add_table(
        TableDefinition::new("users")
            .column(ColumnDefinition::new("id", DataType::Integer))
            .column(ColumnDefinition::new("name", DataType::Text))
            .column(ColumnDefinition::new("age", DataType::Integer).nullable())
            .primary_key(&["id"]),
    )
}

// Helper function to create a temporary file-based database
fn create_temp_db(schema: Schema) -> (SqliteDatabase, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_str().unwrap();
    let db = SqliteDatabase::open(SqliteConfig::new(path, schema)).unwrap();
    (db, temp_file)
}

fn count_users(conn: &Connection) -> i64 {
    conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
        .unwrap()
}

fn user_rows(n: i64) -> Vec<Vec<Value>> {
    (0..n)
        .map(|i| {
            vec![
                Value::Integer(i),
                Value::from(format!("user-{i}")),
                Value::from((i % 2 == 0).then_some(i)),
            ]
        })
        .collect()
}

#[test]
fn open_applies_default_pragmas() {
    let (db, _file) = create_temp_db(users_schema());
    let conn = db.connection();

    let journal: String = conn
        .query_row("PRAGMA journal_mode", [], |row| row.get(0))
        .unwrap();
    assert_eq!(journal, "wal");
    let foreign_keys: i64 = conn
        .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
        .unwrap();
    assert_eq!(foreign_keys, 1);
    let cache_size: i64 = conn
        .query_row("PRAGMA cache_size", [], |row| row.get(0))
        .unwrap();
    assert_eq!(cache_size, -64000);
    let synchronous: i64 = conn
        .query_row("PRAGMA synchronous", [], |row| row.get(0))
        .unwrap();
    assert_eq!(synchronous, 0);
}

#[test]
fn open_creates_schema_idempotently() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_str().unwrap().to_string();

    let db = SqliteDatabase::open(SqliteConfig::new(path.clone(), users_schema())).unwrap();
    db.bulk_insert("users", &["id", "name", "age"], &user_rows(3))
        .unwrap();
    drop(db);

    let db = SqliteDatabase::open(SqliteConfig::new(path, users_schema())).unwrap();
    assert_eq!(count_users(db.connection()), 3);
}

#[test]
fn bulk_insert_splits_rows_across_statements() {
    let (db, _file) = create_temp_db(users_schema());
    assert_eq!(db.batch_size(3).unwrap(), 333);

    // three times the limit forces several statements
    let rows = user_rows(SQLITE_DEFAULT_VARIABLE_LIMIT as i64 * 3);
    let inserted = db.bulk_insert("users", &["id", "name", "age"], &rows).unwrap();

    assert_eq!(inserted, rows.len());
    assert_eq!(count_users(db.connection()), rows.len() as i64);
    let age: Option<i64> = db
        .connection()
        .query_row("SELECT age FROM users WHERE id = 3", [], |row| row.get(0))
        .unwrap();
    assert_eq!(age, None);
}

#[test]
fn bulk_insert_is_all_or_nothing() {
    let (db, _file) = create_temp_db(users_schema());
    let mut rows = user_rows(700);
    // duplicate primary key in the third batch
    rows.push(vec![Value::Integer(5), Value::from("dup"), Value::Null]);

    let err = db
        .bulk_insert("users", &["id", "name", "age"], &rows)
        .unwrap_err();
    assert!(matches!(err, Error::Sqlite(_)));
    assert_eq!(count_users(db.connection()), 0);
    assert!(db.connection().is_autocommit());
}

#[test]
fn bulk_insert_joins_caller_transaction() {
    let (db, _file) = create_temp_db(users_schema());
    let result: Result<(), Error> = db.transaction(|_| {
        db.bulk_insert("users", &["id", "name", "age"], &user_rows(10))?;
        Err(Error::Integrity("caller aborted".into()))
    });
    assert!(result.is_err());
    assert_eq!(count_users(db.connection()), 0);
}

#[test]
fn bulk_insert_validates_input() {
    let (db, _file) = create_temp_db(users_schema());
    assert_eq!(db.bulk_insert("users", &["id"], &[]).unwrap(), 0);

    let rows = vec![vec![Value::Integer(1), Value::from("a")], vec![Value::Integer(2)]];
    let err = db.bulk_insert("users", &["id", "name"], &rows).unwrap_err();
    assert!(matches!(
        err,
        Error::RowShape {
            index: 1,
            expected: 2,
            found: 1
        }
    ));

    let db = SqliteDatabase::open(
        SqliteConfig::new(":memory:", users_schema()).with_variable_limit(2),
    )
    .unwrap();
    let err = db
        .bulk_insert("users", &["id", "name", "age"], &user_rows(1))
        .unwrap_err();
    assert!(matches!(err, Error::RowTooWide { columns: 3, limit: 2 }));
}

#[test]
fn open_rejects_zero_variable_limit() {
    let config = SqliteConfig::new(":memory:", Schema::new()).with_variable_limit(0);
    assert!(matches!(
        SqliteDatabase::open(config),
        Err(Error::InvalidArgument {
            name: "variable_limit"
        })
    ));
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Status {
    Active,
    Archived,
}

sqlite_plus::impl_sql_enum!(Status { Active, Archived });

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Meta {
    tags: Vec<String>,
}

#[test]
fn field_adapters_define_and_fill_a_table() {
    let root = PathBuf::from("/srv/data");
    let path = PathField::relative_to(&root);
    let score = PrecisionFloatField::new(7, 3).unwrap();
    let meta = JsonField::<Meta>::new();
    let status = EnumField::<Status>::new();
    let ttl = TimedeltaField;

    let schema = Schema::new().add_table(
        TableDefinition::new("files")
            .column(path.column("path"))
            .column(score.column("score"))
            .column(meta.column("meta"))
            .column(status.column("status"))
            .column(ttl.column("ttl")),
    );
    let db = SqliteDatabase::open(SqliteConfig::new(":memory:", schema)).unwrap();

    let row = vec![
        Value::from(path.to_sql(&root.join("a/b.json")).unwrap()),
        Value::from(score.to_sql(&1234.567).unwrap()),
        Value::from(meta.to_sql(&Meta { tags: vec!["x".into()] }).unwrap()),
        Value::from(status.to_sql(&Status::Archived).unwrap()),
        Value::from(ttl.to_sql(&Duration::from_secs(300)).unwrap()),
    ];
    db.bulk_insert("files", &["path", "score", "meta", "status", "ttl"], &[row])
        .unwrap();

    let stored: String = db
        .connection()
        .query_row("SELECT path FROM files", [], |row| row.get(0))
        .unwrap();
    assert_eq!(stored, "a/b.json");

    let mut stmt = db
        .connection()
        .prepare("SELECT path, score, meta, status, ttl FROM files")
        .unwrap();
    let mut rows = stmt.query([]).unwrap();
    let row = rows.next().unwrap().unwrap();
    assert_eq!(path.read(row, 0).unwrap(), root.join("a/b.json"));
    assert_eq!(score.read(row, 1).unwrap(), 1234.567);
    assert_eq!(meta.read(row, 2).unwrap().tags, vec!["x".to_string()]);
    assert_eq!(status.read(row, 3).unwrap(), Status::Archived);
    assert_eq!(ttl.read(row, 4).unwrap(), Duration::from_secs(300));
    assert_ne!(status.read(row, 3).unwrap(), Status::Active);
}

#[test]
fn corrupted_json_is_an_integrity_error() {
    let meta = JsonField::<Meta>::new();
    let schema = Schema::new().add_table(TableDefinition::new("docs").column(meta.column("meta")));
    let db = SqliteDatabase::open(SqliteConfig::new(":memory:", schema)).unwrap();
    db.connection()
        .execute(
            "INSERT INTO docs (meta) VALUES (?1)",
            ["This{ string' is not, valid JSON;"],
        )
        .unwrap();

    let err = db
        .connection()
        .query_row("SELECT meta FROM docs", [], |row| Ok(meta.read(row, 0)))
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, Error::Integrity(_)));
}
