use canvas_api::db::{DbConfig, PgStore};

/// Store against the database named by `CANVAS_DB_*`, schema ensured.
pub async fn test_pg_store() -> PgStore {
    PgStore::connect(&DbConfig::from_env())
        .await
        .expect("Failed to connect to the test database")
}
