//! Database schema migrations.
//!
//! v1 creates users, chips, simulations, messages and the schema_migrations
//! bookkeeping table. v2 allows at most one RUNNING simulation per chip.
//! v3 adds plans.

use rusqlite::Connection;
use tracing::info;

use chipwarm_core::error::ChipwarmError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), ChipwarmError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| ChipwarmError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| ChipwarmError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: initial_schema");
    }

    if current_version < 2 {
        apply_v2(conn)?;
        info!("Applied migration v2: one_running_simulation");
    }

    if current_version < 3 {
        apply_v3(conn)?;
        info!("Applied migration v3: plans");
    }

    Ok(())
}

/// Version 1: Initial schema.
///
/// Timestamps are Unix milliseconds. Deleting a chip cascades to its
/// simulations and their messages.
fn apply_v1(conn: &Connection) -> Result<(), ChipwarmError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            api_token   TEXT NOT NULL UNIQUE,
            created_at  INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS chips (
            id            TEXT PRIMARY KEY NOT NULL,
            phone_number  TEXT NOT NULL UNIQUE,
            status        TEXT NOT NULL DEFAULT 'PENDING'
                          CHECK (status IN ('PENDING', 'ACTIVE', 'PAUSED', 'DISCONNECTED')),
            connected     INTEGER NOT NULL DEFAULT 0,
            owner_id      TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            created_at    INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_chips_owner
            ON chips (owner_id, created_at);

        CREATE TABLE IF NOT EXISTS simulations (
            id          TEXT PRIMARY KEY NOT NULL,
            chip_id     TEXT NOT NULL REFERENCES chips(id) ON DELETE CASCADE,
            status      TEXT NOT NULL
                        CHECK (status IN ('RUNNING', 'PAUSED', 'COMPLETED')),
            started_at  INTEGER NOT NULL,
            ended_at    INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_simulations_chip
            ON simulations (chip_id, status);

        CREATE TABLE IF NOT EXISTS messages (
            id             TEXT PRIMARY KEY NOT NULL,
            simulation_id  TEXT NOT NULL REFERENCES simulations(id) ON DELETE CASCADE,
            chip_id        TEXT NOT NULL REFERENCES chips(id) ON DELETE CASCADE,
            direction      TEXT NOT NULL
                           CHECK (direction IN ('OUTBOUND', 'INBOUND')),
            sender         TEXT NOT NULL,
            recipient      TEXT NOT NULL,
            content        TEXT NOT NULL,
            timestamp      INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_simulation
            ON messages (simulation_id, timestamp ASC);

        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (1, 'initial_schema');
        ",
    )
    .map_err(|e| ChipwarmError::Storage(format!("Failed to apply migration v1: {}", e)))?;

    Ok(())
}

/// Version 2: at most one RUNNING simulation per chip.
///
/// Older rows that break the rule keep the newest RUNNING simulation and
/// pause the rest.
fn apply_v2(conn: &Connection) -> Result<(), ChipwarmError> {
    conn.execute_batch(
        "
        UPDATE simulations SET status = 'PAUSED'
        WHERE status = 'RUNNING'
          AND rowid NOT IN (
              SELECT MAX(rowid) FROM simulations WHERE status = 'RUNNING' GROUP BY chip_id
          );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_simulations_one_running
            ON simulations (chip_id) WHERE status = 'RUNNING';

        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (2, 'one_running_simulation');
        ",
    )
    .map_err(|e| ChipwarmError::Storage(format!("Failed to apply migration v2: {}", e)))?;

    Ok(())
}

/// Version 3: plans. `owner_id` is NULL for catalog plans.
fn apply_v3(conn: &Connection) -> Result<(), ChipwarmError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS plans (
            id             TEXT PRIMARY KEY NOT NULL,
            name           TEXT NOT NULL,
            description    TEXT NOT NULL,
            price_cents    INTEGER NOT NULL CHECK (price_cents >= 0),
            duration_days  INTEGER NOT NULL,
            chip_count     INTEGER NOT NULL,
            has_ai         INTEGER NOT NULL DEFAULT 0,
            has_api        INTEGER NOT NULL DEFAULT 0,
            has_priority   INTEGER NOT NULL DEFAULT 0,
            owner_id       TEXT REFERENCES users(id) ON DELETE CASCADE,
            created_at     INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_plans_owner
            ON plans (owner_id, created_at);

        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (3, 'plans');
        ",
    )
    .map_err(|e| ChipwarmError::Storage(format!("Failed to apply migration v3: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        conn
    }

    fn seed_chip(conn: &Connection) {
        conn.execute(
            "INSERT INTO users (id, name, api_token, created_at) VALUES ('u1', 'ana', 'tok', 0)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO chips (id, phone_number, owner_id, created_at) VALUES ('c1', '5511', 'u1', 0)",
            [],
        )
        .unwrap();
    }

    #[test]
    fn test_migrations_run_once() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, 3);
    }

    #[test]
    fn test_chip_defaults() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();
        seed_chip(&conn);

        let (status, connected): (String, i64) = conn
            .query_row("SELECT status, connected FROM chips WHERE id = 'c1'", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!(status, "PENDING");
        assert_eq!(connected, 0);
    }

    #[test]
    fn test_chip_phone_unique() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();
        seed_chip(&conn);

        let result = conn.execute(
            "INSERT INTO chips (id, phone_number, owner_id, created_at) VALUES ('c2', '5511', 'u1', 0)",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_simulation_status_check() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();
        seed_chip(&conn);

        let result = conn.execute(
            "INSERT INTO simulations (id, chip_id, status, started_at) VALUES ('s1', 'c1', 'STOPPED', 0)",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_message_requires_simulation() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();
        seed_chip(&conn);

        let result = conn.execute(
            "INSERT INTO messages (id, simulation_id, chip_id, direction, sender, recipient, content, timestamp)
             VALUES ('m1', 'missing', 'c1', 'OUTBOUND', 'a', 'b', 'hi', 0)",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_chip_delete_cascades() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();
        seed_chip(&conn);
        conn.execute(
            "INSERT INTO simulations (id, chip_id, status, started_at) VALUES ('s1', 'c1', 'RUNNING', 0)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO messages (id, simulation_id, chip_id, direction, sender, recipient, content, timestamp)
             VALUES ('m1', 's1', 'c1', 'INBOUND', 'a', 'b', 'hi', 0)",
            [],
        )
        .unwrap();

        conn.execute("DELETE FROM chips WHERE id = 'c1'", []).unwrap();

        let sims: i64 = conn
            .query_row("SELECT COUNT(*) FROM simulations", [], |row| row.get(0))
            .unwrap();
        let msgs: i64 = conn
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))
            .unwrap();
        assert_eq!(sims, 0);
        assert_eq!(msgs, 0);
    }

    #[test]
    fn test_one_running_simulation_per_chip() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();
        seed_chip(&conn);
        conn.execute(
            "INSERT INTO simulations (id, chip_id, status, started_at) VALUES ('s1', 'c1', 'RUNNING', 0)",
            [],
        )
        .unwrap();

        let second = conn.execute(
            "INSERT INTO simulations (id, chip_id, status, started_at) VALUES ('s2', 'c1', 'RUNNING', 1)",
            [],
        );
        assert!(second.is_err());

        // PAUSED and COMPLETED rows are unrestricted.
        conn.execute(
            "INSERT INTO simulations (id, chip_id, status, started_at) VALUES ('s3', 'c1', 'PAUSED', 2)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO simulations (id, chip_id, status, started_at) VALUES ('s4', 'c1', 'PAUSED', 3)",
            [],
        )
        .unwrap();
    }

    #[test]
    fn test_v2_pauses_duplicate_running_rows() {
        let conn = open_test_conn();
        conn.execute_batch(
            "CREATE TABLE schema_migrations (
                version INTEGER PRIMARY KEY NOT NULL,
                name TEXT NOT NULL,
                applied_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
            );",
        )
        .unwrap();
        apply_v1(&conn).unwrap();
        seed_chip(&conn);
        conn.execute_batch(
            "INSERT INTO simulations (id, chip_id, status, started_at) VALUES ('old', 'c1', 'RUNNING', 0);
             INSERT INTO simulations (id, chip_id, status, started_at) VALUES ('new', 'c1', 'RUNNING', 1);",
        )
        .unwrap();

        run_migrations(&conn).unwrap();

        let running: String = conn
            .query_row("SELECT id FROM simulations WHERE status = 'RUNNING'", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(running, "new");
    }
}
