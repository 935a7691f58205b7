//! End-to-end tests against real SQLite databases
//!
//! Every test works on its own temporary database file and goes through the
//! whole stack: building statements, rendering them for the dialect,
//! executing them through a locked connection context and reading the rows
//! back.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use tempfile::TempDir;

    use dialectdb::ast::{
        CheckConstraint, ColumnDeclaration, ConflictResolution, CreateTableStatement, Expression,
        InsertStatement, LogicalType, OrderingTerm, SelectStatement, Value,
    };
    use dialectdb::config::DatabaseConfig;
    use dialectdb::core::db::{purge_once, AccessMode, ConnectionContext, Database, SqliteDriver};
    use dialectdb::values::SelectionResult;
    use dialectdb::{DatabaseError, Dialect, Result, Unit};

    fn init_tracing() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }

    fn open(dialect: Dialect) -> (TempDir, Arc<Database>) {
        init_tracing();
        let dir = TempDir::new().unwrap();
        let driver = SqliteDriver::open(dir.path().join("test.db"));
        let database = Database::new(dialect, AccessMode::Single, Box::new(driver));
        (dir, database)
    }

    fn sevens(name: &str) -> CreateTableStatement {
        CreateTableStatement::new(
            name,
            vec![ColumnDeclaration::new("value", LogicalType::Int32)
                .not_null()
                .check(CheckConstraint::multiple_of("value", 7).unwrap())],
        )
        .unwrap()
    }

    fn insert_value(table: &str, value: i64) -> InsertStatement {
        InsertStatement::new(table, vec!["value".to_string()], vec![Expression::integer(value)]).unwrap()
    }

    fn values_of(context: &mut ConnectionContext, table: &str, unit: &Unit) -> Result<Vec<i32>> {
        let selection = SelectStatement::new(table, vec![Expression::column("value")])?
            .order_by(OrderingTerm::ascending("value"));
        context
            .select(&selection, unit)?
            .iter_mut()
            .map(|row| row.get_int32())
            .collect()
    }

    #[test]
    fn test_check_constraint_scenario() {
        let (_dir, database) = open(Dialect::Sqlite);
        let unit = Unit::default();
        let mut context = database.context();

        context
            .with_lock(|context| {
                context.create_table(&sevens("sevens"), &unit)?;
                context.create_table(&sevens("fresh"), &unit)?;
                context.commit()
            })
            .unwrap();

        context
            .with_lock(|context| {
                context.execute(&insert_value("sevens", 14).into(), &unit)?;
                context.commit()
            })
            .unwrap();
        let values = context.with_lock(|context| values_of(context, "sevens", &unit)).unwrap();
        assert_eq!(values, vec![14]);

        let error = context
            .with_lock(|context| {
                let result = context.execute(&insert_value("fresh", 2).into(), &unit);
                if result.is_err() {
                    context.rollback();
                }
                result
            })
            .unwrap_err();
        assert!(matches!(error, DatabaseError::FailedUpdateExecution { .. }));
        assert!(error.is_constraint_violation());

        let values = context.with_lock(|context| values_of(context, "fresh", &unit)).unwrap();
        assert!(values.is_empty());
    }

    #[test]
    fn test_savepoint_isolation() {
        let (_dir, database) = open(Dialect::Sqlite);
        let unit = Unit::default();
        let mut context = database.context();

        context
            .with_lock(|context| {
                context.create_table(&sevens("sevens"), &unit)?;
                context.execute(&insert_value("sevens", 7).into(), &unit)?;
                let savepoint = context.set_savepoint()?;
                assert!(savepoint.is_some());
                context.execute(&insert_value("sevens", 14).into(), &unit)?;
                context.rollback_to(savepoint)?;
                context.execute(&insert_value("sevens", 21).into(), &unit)?;
                context.commit()
            })
            .unwrap();

        let values = context.with_lock(|context| values_of(context, "sevens", &unit)).unwrap();
        assert_eq!(values, vec![7, 21]);
    }

    #[test]
    fn test_released_savepoint_keeps_its_rows() {
        let (_dir, database) = open(Dialect::Sqlite);
        let unit = Unit::default();
        let mut context = database.context();

        context
            .with_lock(|context| {
                context.create_table(&sevens("sevens"), &unit)?;
                context.execute(&insert_value("sevens", 7).into(), &unit)?;
                let savepoint = context.set_savepoint()?;
                context.execute(&insert_value("sevens", 14).into(), &unit)?;
                context.release_savepoint(savepoint)?;
                context.commit()
            })
            .unwrap();

        let values = context.with_lock(|context| values_of(context, "sevens", &unit)).unwrap();
        assert_eq!(values, vec![7, 14]);
    }

    #[test]
    fn test_embedded_savepoints_are_absent() {
        let (_dir, database) = open(Dialect::Embedded);
        let unit = Unit::default();
        let mut context = database.context();

        context
            .with_lock(|context| {
                context.create_table(&sevens("sevens"), &unit)?;
                context.execute(&insert_value("sevens", 7).into(), &unit)?;
                let savepoint = context.set_savepoint()?;
                assert!(savepoint.is_none());
                context.execute(&insert_value("sevens", 14).into(), &unit)?;
                context.release_savepoint(None)?;
                context.rollback_to(None)?;
                context.commit()
            })
            .unwrap();

        let values = context.with_lock(|context| values_of(context, "sevens", &unit)).unwrap();
        assert_eq!(values, vec![7, 14]);
    }

    #[test]
    fn test_uncommitted_reads_do_not_block_other_writers() {
        init_tracing();
        let dir = TempDir::new().unwrap();
        let driver = SqliteDriver::open(dir.path().join("test.db")).with_busy_timeout(Duration::from_millis(300));
        let database = Database::new(Dialect::Sqlite, AccessMode::Single, Box::new(driver));
        let unit = Unit::default();
        let mut reader = database.context();
        let mut writer = database.context();

        reader
            .with_lock(|context| {
                context.create_table(&sevens("sevens"), &unit)?;
                context.commit()
            })
            .unwrap();

        let values = reader.with_lock(|context| values_of(context, "sevens", &unit)).unwrap();
        assert!(values.is_empty());

        writer
            .with_lock(|context| {
                context.execute(&insert_value("sevens", 21).into(), &unit)?;
                context.commit()
            })
            .unwrap();

        let values = reader.with_lock(|context| values_of(context, "sevens", &unit)).unwrap();
        assert_eq!(values, vec![21]);
    }

    #[test]
    fn test_generated_keys() {
        for dialect in [Dialect::Sqlite, Dialect::Embedded] {
            let (_dir, database) = open(dialect);
            let unit = Unit::default();
            let mut context = database.context();
            let table = CreateTableStatement::new(
                "person",
                vec![
                    ColumnDeclaration::new("id", LogicalType::Int64).primary_key().auto_increment(),
                    ColumnDeclaration::new("name", LogicalType::String).not_null(),
                ],
            )
            .unwrap();

            let keys = context
                .with_lock(|context| {
                    context.create_table(&table, &unit)?;
                    let alice = InsertStatement::from_row("person", vec![("name".to_string(), Value::from("alice"))])?;
                    let bob = InsertStatement::from_row("person", vec![("name".to_string(), Value::from("bob"))])?;
                    let keys = (context.insert(&alice, &unit)?, context.insert(&bob, &unit)?);
                    context.commit()?;
                    Ok(keys)
                })
                .unwrap();
            assert_eq!(keys, (1, 2));
        }
    }

    #[test]
    fn test_ignored_insert_generates_no_key() {
        let (_dir, database) = open(Dialect::Sqlite);
        let unit = Unit::default();
        let mut context = database.context();
        let table = CreateTableStatement::new(
            "identity",
            vec![
                ColumnDeclaration::new("address", LogicalType::String).primary_key(),
                ColumnDeclaration::new("category", LogicalType::Int8).not_null(),
            ],
        )
        .unwrap();
        let row = |category: i8| {
            InsertStatement::from_row(
                "identity",
                vec![
                    ("address".to_string(), Value::from("alice@example.com")),
                    ("category".to_string(), Value::Int8(category)),
                ],
            )
            .unwrap()
        };

        context
            .with_lock(|context| {
                context.create_table(&table, &unit)?;
                context.execute(&row(1).into(), &unit)?;
                let ignored = context.execute(&row(2).with_conflict(ConflictResolution::Ignore).into(), &unit)?;
                assert_eq!(ignored, 0);
                let key = context.insert(&row(3).with_conflict(ConflictResolution::Ignore), &unit);
                assert!(matches!(key, Err(DatabaseError::FailedKeyGeneration { .. })));
                context.execute(&row(4).with_conflict(ConflictResolution::Replace).into(), &unit)?;
                context.commit()
            })
            .unwrap();

        let categories = context
            .with_lock(|context| {
                let mut rows = context.select(&SelectStatement::all("identity"), &unit)?;
                assert_eq!(rows.len(), 1);
                assert_eq!(rows[0].get_string()?, "alice@example.com");
                rows[0].get_int8()
            })
            .unwrap();
        assert_eq!(categories, 4);
    }

    #[test]
    fn test_typed_values_round_trip() {
        let (_dir, database) = open(Dialect::Sqlite);
        let unit = Unit::named("tenant");
        let mut context = database.context();
        let table = CreateTableStatement::new(
            "sample",
            vec![
                ColumnDeclaration::new("flag", LogicalType::Boolean).not_null(),
                ColumnDeclaration::new("small", LogicalType::Int16).not_null(),
                ColumnDeclaration::new("big", LogicalType::Int64).not_null(),
                ColumnDeclaration::new("hash", LogicalType::Binary256).not_null(),
                ColumnDeclaration::new("vector", LogicalType::Binary128),
                ColumnDeclaration::new("ratio", LogicalType::Float64).not_null(),
                ColumnDeclaration::new("note", LogicalType::String),
            ],
        )
        .unwrap();
        let insert = InsertStatement::from_row(
            "sample",
            vec![
                ("flag".to_string(), Value::Boolean(true)),
                ("small".to_string(), Value::Int16(-12)),
                ("big".to_string(), Value::Int64(1 << 40)),
                ("hash".to_string(), Value::Binary256([3; 32])),
                ("vector".to_string(), Value::Null(LogicalType::Binary128)),
                ("ratio".to_string(), Value::Float64(0.125)),
                ("note".to_string(), Value::Null(LogicalType::String)),
            ],
        )
        .unwrap();

        context
            .with_lock(|context| {
                context.create_table(&table, &unit)?;
                context.execute(&insert.into(), &unit)?;
                context.commit()
            })
            .unwrap();

        context
            .with_lock(|context| {
                let mut rows = context.select(&SelectStatement::all("sample"), &unit)?;
                let row = &mut rows[0];
                assert!(row.get_boolean()?);
                assert_eq!(row.get_int16()?, -12);
                assert_eq!(row.get_int64()?, 1 << 40);
                assert_eq!(row.get_binary256()?, [3; 32]);
                assert!(matches!(
                    row.get_binary128(),
                    Err(DatabaseError::CorruptNullValue { column: 4 })
                ));
                assert_eq!(row.get_float64()?, 0.125);
                assert_eq!(row.get_nullable_string()?, None);
                assert!(row.get_string().is_err());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_contexts_are_serialized() {
        let (_dir, database) = open(Dialect::Sqlite);
        let unit = Unit::default();
        let mut setup = database.context();
        setup
            .with_lock(|context| {
                context.create_table(&sevens("sevens"), &unit)?;
                context.commit()
            })
            .unwrap();

        let handles: Vec<_> = (1..=4)
            .map(|worker: i64| {
                let database = Arc::clone(&database);
                thread::spawn(move || {
                    let unit = Unit::default();
                    let mut context = database.context();
                    for i in 0..10 {
                        context
                            .with_lock(|context| {
                                context.execute(&insert_value("sevens", 7 * (worker * 100 + i)).into(), &unit)?;
                                context.commit()
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let values = setup.with_lock(|context| values_of(context, "sevens", &unit)).unwrap();
        assert_eq!(values.len(), 40);
    }

    #[test]
    fn test_purge_removes_expired_rows() {
        let (_dir, database) = open(Dialect::Sqlite);
        let unit = Unit::default();
        let mut context = database.context();
        let table = CreateTableStatement::new(
            "session",
            vec![
                ColumnDeclaration::new("token", LogicalType::String).not_null(),
                ColumnDeclaration::new("time", LogicalType::Int64)
                    .not_null()
                    .default_value(Expression::current_time()),
            ],
        )
        .unwrap();
        let now = 10_000_000;
        let session = |token: &str, time: i64| {
            InsertStatement::from_row(
                "session",
                vec![
                    ("token".to_string(), Value::from(token)),
                    ("time".to_string(), Value::Int64(time)),
                ],
            )
            .unwrap()
        };

        context
            .with_lock(|context| {
                context.create_table(&table, &unit)?;
                context.execute(&session("expired", now - 7_200_000).into(), &unit)?;
                context.execute(&session("fresh", now - 60_000).into(), &unit)?;
                context.commit()
            })
            .unwrap();

        let registry = Arc::clone(database.purge_registry());
        registry.add(&unit, "session", Duration::from_secs(3600));
        registry.add(&unit, "missing", Duration::from_secs(3600));
        let report = purge_once(&mut context, &registry, now).unwrap();
        assert_eq!(report.purged, vec![("session".to_string(), 1)]);
        assert_eq!(report.failed, vec!["missing".to_string()]);

        let tokens = context
            .with_lock(|context| {
                let selection = SelectStatement::new("session", vec![Expression::column("token")])?;
                context
                    .select(&selection, &unit)?
                    .iter_mut()
                    .map(|row| row.get_string())
                    .collect::<Result<Vec<String>>>()
            })
            .unwrap();
        assert_eq!(tokens, vec!["fresh".to_string()]);
    }

    #[test]
    fn test_default_time_is_filled_in() {
        let (_dir, database) = open(Dialect::Embedded);
        let unit = Unit::default();
        let mut context = database.context();
        let table = CreateTableStatement::new(
            "event",
            vec![
                ColumnDeclaration::new("name", LogicalType::String).not_null(),
                ColumnDeclaration::new("time", LogicalType::Int64)
                    .not_null()
                    .default_value(Expression::current_time()),
            ],
        )
        .unwrap()
        .with_index(vec!["time".to_string()])
        .unwrap();

        let time = context
            .with_lock(|context| {
                context.create_table(&table, &unit)?;
                context.execute(
                    &InsertStatement::new("event", vec!["name".to_string()], vec![Expression::string("boot")])?
                        .into(),
                    &unit,
                )?;
                context.commit()?;
                let selection = SelectStatement::new("event", vec![Expression::column("time")])?;
                context.select(&selection, &unit)?[0].get_int64()
            })
            .unwrap();
        let now = chrono::Utc::now().timestamp_millis();
        assert!((now - time).abs() < 60_000);
    }

    #[test]
    fn test_database_from_config() {
        init_tracing();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("configured.db");
        let config = DatabaseConfig::from_toml_str(&format!(
            "dialect = \"sqlite\"\naccess_mode = \"multi\"\n[sqlite]\npath = {:?}\n",
            path.to_string_lossy()
        ))
        .unwrap();
        let database = Database::from_config(&config, None).unwrap();
        assert_eq!(database.dialect(), Dialect::Sqlite);
        assert!(!database.is_single_access());

        let mut context = database.context();
        context
            .with_lock(|context| {
                context.create_table(&sevens("sevens"), &Unit::default())?;
                context.commit()
            })
            .unwrap();
        context.close().unwrap();
        assert!(path.exists());

        let server = DatabaseConfig::from_toml_str("dialect = \"postgresql\"").unwrap();
        assert!(matches!(
            Database::from_config(&server, None),
            Err(DatabaseError::Config(_))
        ));
    }

    #[test]
    fn test_drop_table() {
        let (_dir, database) = open(Dialect::Sqlite);
        let unit = Unit::default();
        let mut context = database.context();
        context
            .with_lock(|context| {
                context.create_table(&sevens("sevens"), &unit)?;
                context.drop_table("sevens", &unit)?;
                context.commit()
            })
            .unwrap();
        let result = context.with_lock(|context| values_of(context, "sevens", &unit));
        assert!(matches!(
            result,
            Err(DatabaseError::FailedPreparedStatementCreation { .. })
        ));
    }
}
