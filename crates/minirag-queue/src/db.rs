use rusqlite::{Connection, Result};

/// Initialise queue tables. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    create_jobs_table(conn)?;
    create_cron_table(conn)?;
    Ok(())
}

fn create_jobs_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS queue_jobs (
            id          TEXT PRIMARY KEY NOT NULL,
            job_name    TEXT NOT NULL,
            args        TEXT NOT NULL DEFAULT '{}',
            status      TEXT NOT NULL DEFAULT 'pending',
            attempts    INTEGER NOT NULL DEFAULT 0,
            last_error  TEXT,
            run_after   TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_queue_due
            ON queue_jobs(status, run_after);",
    )
}

fn create_cron_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS cron_jobs (
            name          TEXT PRIMARY KEY NOT NULL,
            interval_secs INTEGER NOT NULL,
            next_run      TEXT NOT NULL,
            last_run      TEXT,
            created_at    TEXT NOT NULL,
            updated_at    TEXT NOT NULL
        );",
    )
}
