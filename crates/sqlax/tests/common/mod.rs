#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use sqlax::{DatabaseManager, ManagerConfig, SqlxBackend};

pub fn sqlite_file_url(dir: &Path, name: &str) -> String {
    format!("sqlite://{}?mode=rwc", dir.join(name).display())
}

/// A SQLite URL that can never be opened
pub fn unreachable_sqlite_url(dir: &Path) -> String {
    format!("sqlite://{}", dir.join("missing-dir").join("nope.db").display())
}

pub fn fast_config() -> ManagerConfig {
    ManagerConfig::new()
        .with_max_attempts(2)
        .with_backoff(Duration::from_millis(10))
        .with_acquire_timeout(5)
}

pub fn manager(urls: Vec<String>) -> Arc<DatabaseManager> {
    let manager = DatabaseManager::with_config(urls, Arc::new(SqlxBackend::new()), fast_config())
        .expect("valid manager configuration");
    Arc::new(manager)
}

pub const SCHEMA: &[&str] = &[
    "CREATE TABLE orders (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        customer TEXT NOT NULL,
        total REAL NOT NULL,
        status TEXT NOT NULL
    )",
    "CREATE TABLE products (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        sku TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        stock INTEGER NOT NULL
    )",
];

pub async fn create_schema(manager: &DatabaseManager) {
    let mut session = manager.new_session().await.expect("session");
    for statement in SCHEMA {
        session.execute(statement, &[]).await.expect("schema statement");
    }
    session.commit().await.expect("commit schema");
    session.close().await.expect("close session");
}
