pub mod migrations;

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Shared handle to the single SQLite connection. Handlers run their store
/// work through this under tokio::task::spawn_blocking; the mutex serializes
/// every operation, which is also what makes the add-to-set statements
/// (receipts, reactions) atomic with respect to each other.
pub type DbPool = Arc<Mutex<Connection>>;

/// Open (or create) the database under `data_dir` and bring the schema up to
/// date. WAL keeps readers off the writer's back; foreign keys are enforced
/// so cascading chat deletion actually cascades.
pub fn init_db(data_dir: &str) -> Result<DbPool, Box<dyn std::error::Error>> {
    std::fs::create_dir_all(data_dir)?;

    let db_path = Path::new(data_dir).join("alumnet.db");
    let mut conn = Connection::open(&db_path)?;

    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    // A writer blocked behind a checkpoint waits instead of failing.
    conn.busy_timeout(std::time::Duration::from_secs(5))?;

    migrations::migrations().to_latest(&mut conn)?;

    tracing::info!("Database initialized at {}", db_path.display());

    Ok(Arc::new(Mutex::new(conn)))
}
