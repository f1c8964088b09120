use std::path::PathBuf;
use ticketcore::infrastructure::persistence::Database;

/// Per-test SQLite file. Removed (with its WAL side files) on drop.
pub struct TestDatabase {
    db: Database,
    path: PathBuf,
}

impl TestDatabase {
    pub fn db(&self) -> Database {
        self.db.clone()
    }
}

impl Drop for TestDatabase {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let mut file = self.path.clone().into_os_string();
            file.push(suffix);
            let _ = std::fs::remove_file(file);
        }
    }
}

pub async fn setup_test_db() -> TestDatabase {
    // Use file-based SQLite for tests (unique UUID per test for parallel execution)
    let path = std::env::temp_dir().join(format!("ticketcore_test_{}.db", uuid::Uuid::new_v4()));
    let db_url = format!("sqlite://{}?mode=rwc", path.display());

    let db = Database::connect(&db_url)
        .await
        .expect("Failed to connect to test database");

    db.run_migrations()
        .await
        .expect("Failed to apply migrations to test database");

    TestDatabase { db, path }
}
