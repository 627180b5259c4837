use herald_db::{create_pool, run_migrations, with_transaction, DbRuntimeSettings};

#[test]
fn db_initialization_works() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let path = dir.path().join("herald.db");
    let pool = create_pool(
        path.to_str().expect("utf-8 path"),
        DbRuntimeSettings::default(),
    )
    .expect("failed to create pool");
    let mut conn = pool.get().expect("failed to get connection");
    let applied = run_migrations(&mut conn).expect("failed to run migrations");
    assert_eq!(applied, 3);

    let mut stmt = conn
        .prepare(
            "SELECT name FROM sqlite_master
             WHERE type='table' AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
        )
        .expect("failed to prepare table query");
    let tables: Vec<String> = stmt
        .query_map([], |row| row.get(0))
        .expect("failed to execute table query")
        .map(|r| r.expect("failed to read table name"))
        .collect();

    assert_eq!(
        tables,
        vec![
            "_herald_migrations",
            "appservice_events",
            "appservice_txn_counters",
            "herald_meta",
        ]
    );
}

#[test]
fn committed_scope_is_visible_to_other_pooled_connections() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let path = dir.path().join("herald.db");
    let pool = create_pool(
        path.to_str().expect("utf-8 path"),
        DbRuntimeSettings::default(),
    )
    .expect("failed to create pool");

    let mut writer = pool.get().expect("failed to get writer");
    run_migrations(&mut writer).expect("failed to run migrations");

    with_transaction(&mut writer, |tx| {
        tx.execute(
            "INSERT INTO herald_meta (key, value) VALUES ('marker', 'committed')",
            [],
        )?;
        Ok::<_, rusqlite::Error>(())
    })
    .expect("scope should commit");

    let reader = pool.get().expect("failed to get reader");
    let value: String = reader
        .query_row(
            "SELECT value FROM herald_meta WHERE key = 'marker'",
            [],
            |row| row.get(0),
        )
        .expect("committed row should be visible");
    assert_eq!(value, "committed");
}
