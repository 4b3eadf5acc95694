//! Repository implementations for SQLite-backed persistence.
//!
//! Provides UserRepository, ChipRepository, SimulationRepository,
//! MessageRepository and PlanRepository that operate on the Database struct
//! using raw SQL.

use std::str::FromStr;
use std::sync::Arc;

use rusqlite::OptionalExtension;
use uuid::Uuid;

use chipwarm_core::error::ChipwarmError;
use chipwarm_core::types::{
    Chip, ChipStatus, Direction, Message, Plan, Simulation, SimulationStatus, Timestamp, User,
};

use crate::db::Database;

fn storage_err(e: rusqlite::Error) -> ChipwarmError {
    ChipwarmError::Storage(e.to_string())
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _) if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn parse_uuid(s: &str) -> Result<Uuid, ChipwarmError> {
    Uuid::parse_str(s).map_err(|e| ChipwarmError::Storage(format!("Invalid UUID: {}", e)))
}

fn parse_enum<T: FromStr<Err = String>>(s: &str) -> Result<T, ChipwarmError> {
    s.parse::<T>().map_err(ChipwarmError::Storage)
}

// =============================================================================
// Users
// =============================================================================

/// Repository for API users.
pub struct UserRepository {
    db: Arc<Database>,
}

impl UserRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn create(&self, user: &User) -> Result<(), ChipwarmError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, name, api_token, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    user.id.to_string(),
                    user.name,
                    user.api_token,
                    user.created_at.0,
                ],
            )
            .map_err(|e| ChipwarmError::Storage(format!("Failed to save user: {}", e)))?;
            Ok(())
        })
    }

    pub fn find_by_id(&self, id: Uuid) -> Result<Option<User>, ChipwarmError> {
        self.find_one(
            "SELECT id, name, api_token, created_at FROM users WHERE id = ?1",
            &id.to_string(),
        )
    }

    /// Resolve a bearer token to its user.
    pub fn find_by_token(&self, token: &str) -> Result<Option<User>, ChipwarmError> {
        self.find_one(
            "SELECT id, name, api_token, created_at FROM users WHERE api_token = ?1",
            token,
        )
    }

    /// Swap the user's token for `replacement`, only while `current` is
    /// still the live one. Returns false if it was already replaced.
    pub fn replace_token(
        &self,
        id: Uuid,
        current: &str,
        replacement: &str,
    ) -> Result<bool, ChipwarmError> {
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE users SET api_token = ?1 WHERE id = ?2 AND api_token = ?3",
                    rusqlite::params![replacement, id.to_string(), current],
                )
                .map_err(|e| ChipwarmError::Storage(format!("Failed to replace token: {}", e)))?;
            Ok(changed > 0)
        })
    }

    fn find_one(&self, sql: &str, key: &str) -> Result<Option<User>, ChipwarmError> {
        self.db.with_conn(|conn| {
            let result = conn
                .query_row(sql, rusqlite::params![key], |row| Ok(row_to_user(row)))
                .optional()
                .map_err(storage_err)?;
            result.transpose()
        })
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> Result<User, ChipwarmError> {
    let id: String = row.get(0).map_err(storage_err)?;
    Ok(User {
        id: parse_uuid(&id)?,
        name: row.get(1).map_err(storage_err)?,
        api_token: row.get(2).map_err(storage_err)?,
        created_at: Timestamp(row.get(3).map_err(storage_err)?),
    })
}

// =============================================================================
// Chips
// =============================================================================

const CHIP_COLUMNS: &str = "id, phone_number, status, connected, owner_id, created_at";

/// Repository for chips.
pub struct ChipRepository {
    db: Arc<Database>,
}

impl ChipRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn create(&self, chip: &Chip) -> Result<(), ChipwarmError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO chips (id, phone_number, status, connected, owner_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    chip.id.to_string(),
                    chip.phone_number,
                    chip.status.as_str(),
                    chip.connected as i32,
                    chip.owner_id.to_string(),
                    chip.created_at.0,
                ],
            )
            .map_err(|e| ChipwarmError::Storage(format!("Failed to save chip: {}", e)))?;
            Ok(())
        })
    }

    pub fn find_by_id(&self, id: Uuid) -> Result<Option<Chip>, ChipwarmError> {
        self.db.with_conn(|conn| {
            let sql = format!("SELECT {CHIP_COLUMNS} FROM chips WHERE id = ?1");
            let result = conn
                .query_row(&sql, rusqlite::params![id.to_string()], |row| {
                    Ok(row_to_chip(row))
                })
                .optional()
                .map_err(storage_err)?;
            result.transpose()
        })
    }

    pub fn find_by_phone(&self, phone_number: &str) -> Result<Option<Chip>, ChipwarmError> {
        self.db.with_conn(|conn| {
            let sql = format!("SELECT {CHIP_COLUMNS} FROM chips WHERE phone_number = ?1");
            let result = conn
                .query_row(&sql, rusqlite::params![phone_number], |row| {
                    Ok(row_to_chip(row))
                })
                .optional()
                .map_err(storage_err)?;
            result.transpose()
        })
    }

    /// All chips owned by a user, oldest first.
    pub fn list_by_owner(&self, owner_id: Uuid) -> Result<Vec<Chip>, ChipwarmError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {CHIP_COLUMNS} FROM chips WHERE owner_id = ?1 ORDER BY created_at ASC, rowid ASC"
            );
            let mut stmt = conn.prepare(&sql).map_err(storage_err)?;
            let rows = stmt
                .query_map(rusqlite::params![owner_id.to_string()], |row| {
                    Ok(row_to_chip(row))
                })
                .map_err(storage_err)?;

            let mut chips = Vec::new();
            for row in rows {
                chips.push(row.map_err(storage_err)??);
            }
            Ok(chips)
        })
    }

    /// Set the lifecycle status. Returns false if the chip does not exist.
    pub fn update_status(&self, id: Uuid, status: ChipStatus) -> Result<bool, ChipwarmError> {
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE chips SET status = ?1 WHERE id = ?2",
                    rusqlite::params![status.as_str(), id.to_string()],
                )
                .map_err(|e| ChipwarmError::Storage(format!("Failed to update chip: {}", e)))?;
            Ok(changed > 0)
        })
    }

    /// Set the connected flag and the status in a single statement.
    pub fn update_connection(
        &self,
        id: Uuid,
        connected: bool,
        status: ChipStatus,
    ) -> Result<bool, ChipwarmError> {
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE chips SET connected = ?1, status = ?2 WHERE id = ?3",
                    rusqlite::params![connected as i32, status.as_str(), id.to_string()],
                )
                .map_err(|e| ChipwarmError::Storage(format!("Failed to update chip: {}", e)))?;
            Ok(changed > 0)
        })
    }

    pub fn delete(&self, id: Uuid) -> Result<bool, ChipwarmError> {
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "DELETE FROM chips WHERE id = ?1",
                    rusqlite::params![id.to_string()],
                )
                .map_err(|e| ChipwarmError::Storage(format!("Failed to delete chip: {}", e)))?;
            Ok(changed > 0)
        })
    }

    /// Clear every connected flag. Run at startup, when no session can be live.
    pub fn reset_connected_flags(&self) -> Result<usize, ChipwarmError> {
        self.db.with_conn(|conn| {
            conn.execute("UPDATE chips SET connected = 0 WHERE connected <> 0", [])
                .map_err(|e| {
                    ChipwarmError::Storage(format!("Failed to reset connected flags: {}", e))
                })
        })
    }
}

fn row_to_chip(row: &rusqlite::Row<'_>) -> Result<Chip, ChipwarmError> {
    let id: String = row.get(0).map_err(storage_err)?;
    let status: String = row.get(2).map_err(storage_err)?;
    let connected: i64 = row.get(3).map_err(storage_err)?;
    let owner_id: String = row.get(4).map_err(storage_err)?;

    Ok(Chip {
        id: parse_uuid(&id)?,
        phone_number: row.get(1).map_err(storage_err)?,
        status: parse_enum(&status)?,
        connected: connected != 0,
        owner_id: parse_uuid(&owner_id)?,
        created_at: Timestamp(row.get(5).map_err(storage_err)?),
    })
}

// =============================================================================
// Simulations
// =============================================================================

const SIMULATION_COLUMNS: &str = "id, chip_id, status, started_at, ended_at";

/// Repository for simulations.
pub struct SimulationRepository {
    db: Arc<Database>,
}

impl SimulationRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn create(&self, simulation: &Simulation) -> Result<(), ChipwarmError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO simulations (id, chip_id, status, started_at, ended_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    simulation.id.to_string(),
                    simulation.chip_id.to_string(),
                    simulation.status.as_str(),
                    simulation.started_at.0,
                    simulation.ended_at.map(|t| t.0),
                ],
            )
            .map_err(|e| ChipwarmError::Storage(format!("Failed to save simulation: {}", e)))?;
            Ok(())
        })
    }

    /// Insert a RUNNING simulation unless its chip already has one.
    /// Returns false, inserting nothing, in that case.
    pub fn create_if_idle(&self, simulation: &Simulation) -> Result<bool, ChipwarmError> {
        self.db.with_conn(|conn| {
            let running: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM simulations WHERE chip_id = ?1 AND status = 'RUNNING'",
                    rusqlite::params![simulation.chip_id.to_string()],
                    |row| row.get(0),
                )
                .map_err(storage_err)?;
            if running > 0 {
                return Ok(false);
            }

            match conn.execute(
                "INSERT INTO simulations (id, chip_id, status, started_at, ended_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    simulation.id.to_string(),
                    simulation.chip_id.to_string(),
                    simulation.status.as_str(),
                    simulation.started_at.0,
                    simulation.ended_at.map(|t| t.0),
                ],
            ) {
                Ok(_) => Ok(true),
                Err(e) if is_constraint_violation(&e) => Ok(false),
                Err(e) => Err(ChipwarmError::Storage(format!(
                    "Failed to save simulation: {}",
                    e
                ))),
            }
        })
    }

    pub fn find_by_id(&self, id: Uuid) -> Result<Option<Simulation>, ChipwarmError> {
        self.db.with_conn(|conn| {
            let sql = format!("SELECT {SIMULATION_COLUMNS} FROM simulations WHERE id = ?1");
            let result = conn
                .query_row(&sql, rusqlite::params![id.to_string()], |row| {
                    Ok(row_to_simulation(row))
                })
                .optional()
                .map_err(storage_err)?;
            result.transpose()
        })
    }

    /// Every simulation for a chip, newest first.
    pub fn list_by_chip(&self, chip_id: Uuid) -> Result<Vec<Simulation>, ChipwarmError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {SIMULATION_COLUMNS} FROM simulations WHERE chip_id = ?1
                 ORDER BY started_at DESC, rowid DESC"
            );
            let mut stmt = conn.prepare(&sql).map_err(storage_err)?;
            let rows = stmt
                .query_map(rusqlite::params![chip_id.to_string()], |row| {
                    Ok(row_to_simulation(row))
                })
                .map_err(storage_err)?;

            let mut sims = Vec::new();
            for row in rows {
                sims.push(row.map_err(storage_err)??);
            }
            Ok(sims)
        })
    }

    /// The chip's RUNNING simulation, if any.
    pub fn find_running_by_chip(&self, chip_id: Uuid) -> Result<Option<Simulation>, ChipwarmError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {SIMULATION_COLUMNS} FROM simulations
                 WHERE chip_id = ?1 AND status = 'RUNNING'
                 ORDER BY started_at DESC LIMIT 1"
            );
            let result = conn
                .query_row(&sql, rusqlite::params![chip_id.to_string()], |row| {
                    Ok(row_to_simulation(row))
                })
                .optional()
                .map_err(storage_err)?;
            result.transpose()
        })
    }

    /// Move a simulation from `from` to `to`, setting its end time.
    ///
    /// Returns false when the simulation is missing, is no longer in
    /// `from`, or the move would give its chip a second RUNNING simulation.
    pub fn transition(
        &self,
        id: Uuid,
        from: SimulationStatus,
        to: SimulationStatus,
        ended_at: Option<Timestamp>,
    ) -> Result<bool, ChipwarmError> {
        self.db.with_conn(|conn| {
            match conn.execute(
                "UPDATE simulations SET status = ?1, ended_at = ?2 WHERE id = ?3 AND status = ?4",
                rusqlite::params![
                    to.as_str(),
                    ended_at.map(|t| t.0),
                    id.to_string(),
                    from.as_str(),
                ],
            ) {
                Ok(changed) => Ok(changed > 0),
                Err(e) if is_constraint_violation(&e) => Ok(false),
                Err(e) => Err(ChipwarmError::Storage(format!(
                    "Failed to update simulation: {}",
                    e
                ))),
            }
        })
    }
}

fn row_to_simulation(row: &rusqlite::Row<'_>) -> Result<Simulation, ChipwarmError> {
    let id: String = row.get(0).map_err(storage_err)?;
    let chip_id: String = row.get(1).map_err(storage_err)?;
    let status: String = row.get(2).map_err(storage_err)?;
    let ended_at: Option<i64> = row.get(4).map_err(storage_err)?;

    Ok(Simulation {
        id: parse_uuid(&id)?,
        chip_id: parse_uuid(&chip_id)?,
        status: parse_enum(&status)?,
        started_at: Timestamp(row.get(3).map_err(storage_err)?),
        ended_at: ended_at.map(Timestamp),
    })
}

// =============================================================================
// Messages
// =============================================================================

/// Append-only repository for simulated messages.
pub struct MessageRepository {
    db: Arc<Database>,
}

impl MessageRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn append(&self, message: &Message) -> Result<(), ChipwarmError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, simulation_id, chip_id, direction, sender, recipient, content, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    message.id.to_string(),
                    message.simulation_id.to_string(),
                    message.chip_id.to_string(),
                    message.direction.as_str(),
                    message.sender,
                    message.recipient,
                    message.content,
                    message.timestamp.0,
                ],
            )
            .map_err(|e| ChipwarmError::Storage(format!("Failed to append message: {}", e)))?;
            Ok(())
        })
    }

    /// Messages for a simulation, timestamp ascending; insertion order breaks ties.
    pub fn list_by_simulation(&self, simulation_id: Uuid) -> Result<Vec<Message>, ChipwarmError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, simulation_id, chip_id, direction, sender, recipient, content, timestamp
                     FROM messages WHERE simulation_id = ?1
                     ORDER BY timestamp ASC, rowid ASC",
                )
                .map_err(storage_err)?;
            let rows = stmt
                .query_map(rusqlite::params![simulation_id.to_string()], |row| {
                    Ok(row_to_message(row))
                })
                .map_err(storage_err)?;

            let mut messages = Vec::new();
            for row in rows {
                messages.push(row.map_err(storage_err)??);
            }
            Ok(messages)
        })
    }

    pub fn count_by_simulation(&self, simulation_id: Uuid) -> Result<u64, ChipwarmError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM messages WHERE simulation_id = ?1",
                    rusqlite::params![simulation_id.to_string()],
                    |row| row.get(0),
                )
                .map_err(storage_err)?;
            Ok(count as u64)
        })
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<Message, ChipwarmError> {
    let id: String = row.get(0).map_err(storage_err)?;
    let simulation_id: String = row.get(1).map_err(storage_err)?;
    let chip_id: String = row.get(2).map_err(storage_err)?;
    let direction: String = row.get(3).map_err(storage_err)?;

    Ok(Message {
        id: parse_uuid(&id)?,
        simulation_id: parse_uuid(&simulation_id)?,
        chip_id: parse_uuid(&chip_id)?,
        direction: parse_enum::<Direction>(&direction)?,
        sender: row.get(4).map_err(storage_err)?,
        recipient: row.get(5).map_err(storage_err)?,
        content: row.get(6).map_err(storage_err)?,
        timestamp: Timestamp(row.get(7).map_err(storage_err)?),
    })
}

// =============================================================================
// Plans
// =============================================================================

const PLAN_COLUMNS: &str = "id, name, description, price_cents, duration_days, chip_count, \
                            has_ai, has_api, has_priority, owner_id, created_at";

/// Repository for the plan catalog and purchased plans.
pub struct PlanRepository {
    db: Arc<Database>,
}

impl PlanRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn create(&self, plan: &Plan) -> Result<(), ChipwarmError> {
        self.db.with_conn(|conn| insert_plan(conn, plan))
    }

    /// Insert `catalog` if no catalog plan exists yet. Returns how many
    /// plans were inserted.
    pub fn seed_catalog(&self, catalog: &[Plan]) -> Result<usize, ChipwarmError> {
        self.db.with_conn(|conn| {
            let existing: i64 = conn
                .query_row("SELECT COUNT(*) FROM plans WHERE owner_id IS NULL", [], |row| {
                    row.get(0)
                })
                .map_err(storage_err)?;
            if existing > 0 {
                return Ok(0);
            }
            for plan in catalog {
                insert_plan(conn, plan)?;
            }
            Ok(catalog.len())
        })
    }

    pub fn find_by_id(&self, id: Uuid) -> Result<Option<Plan>, ChipwarmError> {
        self.db.with_conn(|conn| {
            let sql = format!("SELECT {PLAN_COLUMNS} FROM plans WHERE id = ?1");
            let result = conn
                .query_row(&sql, rusqlite::params![id.to_string()], |row| {
                    Ok(row_to_plan(row))
                })
                .optional()
                .map_err(storage_err)?;
            result.transpose()
        })
    }

    /// Catalog plans, cheapest first.
    pub fn list_catalog(&self) -> Result<Vec<Plan>, ChipwarmError> {
        self.list(
            &format!(
                "SELECT {PLAN_COLUMNS} FROM plans WHERE owner_id IS NULL
                 ORDER BY price_cents ASC, rowid ASC"
            ),
            None,
        )
    }

    /// Plans bought by a user, oldest first.
    pub fn list_by_owner(&self, owner_id: Uuid) -> Result<Vec<Plan>, ChipwarmError> {
        self.list(
            &format!(
                "SELECT {PLAN_COLUMNS} FROM plans WHERE owner_id = ?1
                 ORDER BY created_at ASC, rowid ASC"
            ),
            Some(owner_id),
        )
    }

    fn list(&self, sql: &str, owner_id: Option<Uuid>) -> Result<Vec<Plan>, ChipwarmError> {
        self.db.with_conn(|conn| {
            let params: Vec<String> = owner_id.map(|id| id.to_string()).into_iter().collect();
            let mut stmt = conn.prepare(sql).map_err(storage_err)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(params.iter()), |row| {
                    Ok(row_to_plan(row))
                })
                .map_err(storage_err)?;

            let mut plans = Vec::new();
            for row in rows {
                plans.push(row.map_err(storage_err)??);
            }
            Ok(plans)
        })
    }
}

fn insert_plan(conn: &rusqlite::Connection, plan: &Plan) -> Result<(), ChipwarmError> {
    conn.execute(
        "INSERT INTO plans (id, name, description, price_cents, duration_days, chip_count,
                            has_ai, has_api, has_priority, owner_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        rusqlite::params![
            plan.id.to_string(),
            plan.name,
            plan.description,
            plan.price_cents,
            plan.duration_days,
            plan.chip_count,
            plan.has_ai as i32,
            plan.has_api as i32,
            plan.has_priority as i32,
            plan.owner_id.map(|id| id.to_string()),
            plan.created_at.0,
        ],
    )
    .map_err(|e| ChipwarmError::Storage(format!("Failed to save plan: {}", e)))?;
    Ok(())
}

fn row_to_plan(row: &rusqlite::Row<'_>) -> Result<Plan, ChipwarmError> {
    let id: String = row.get(0).map_err(storage_err)?;
    let has_ai: i64 = row.get(6).map_err(storage_err)?;
    let has_api: i64 = row.get(7).map_err(storage_err)?;
    let has_priority: i64 = row.get(8).map_err(storage_err)?;
    let owner_id: Option<String> = row.get(9).map_err(storage_err)?;

    Ok(Plan {
        id: parse_uuid(&id)?,
        name: row.get(1).map_err(storage_err)?,
        description: row.get(2).map_err(storage_err)?,
        price_cents: row.get(3).map_err(storage_err)?,
        duration_days: row.get(4).map_err(storage_err)?,
        chip_count: row.get(5).map_err(storage_err)?,
        has_ai: has_ai != 0,
        has_api: has_api != 0,
        has_priority: has_priority != 0,
        owner_id: owner_id.as_deref().map(parse_uuid).transpose()?,
        created_at: Timestamp(row.get(10).map_err(storage_err)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_db() -> Arc<Database> {
        Arc::new(Database::in_memory().unwrap())
    }

    fn make_user(db: &Arc<Database>) -> User {
        let user = User {
            id: Uuid::new_v4(),
            name: "ana".to_string(),
            api_token: Uuid::new_v4().simple().to_string(),
            created_at: Timestamp::now(),
        };
        UserRepository::new(db.clone()).create(&user).unwrap();
        user
    }

    fn make_chip(db: &Arc<Database>, owner: &User, phone: &str) -> Chip {
        let chip = Chip::new(phone, owner.id);
        ChipRepository::new(db.clone()).create(&chip).unwrap();
        chip
    }

    #[test]
    fn test_user_find_by_token() {
        let db = make_db();
        let user = make_user(&db);
        let repo = UserRepository::new(db);

        let found = repo.find_by_token(&user.api_token).unwrap().unwrap();
        assert_eq!(found, user);
        assert!(repo.find_by_token("nope").unwrap().is_none());
        assert_eq!(repo.find_by_id(user.id).unwrap().unwrap().name, "ana");
    }

    #[test]
    fn test_chip_create_and_find() {
        let db = make_db();
        let user = make_user(&db);
        let chip = make_chip(&db, &user, "5511999990001");
        let repo = ChipRepository::new(db);

        let found = repo.find_by_id(chip.id).unwrap().unwrap();
        assert_eq!(found.status, ChipStatus::Pending);
        assert!(!found.connected);
        assert_eq!(found.owner_id, user.id);

        let by_phone = repo.find_by_phone("5511999990001").unwrap().unwrap();
        assert_eq!(by_phone.id, chip.id);
        assert!(repo.find_by_id(Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn test_chip_duplicate_phone_rejected() {
        let db = make_db();
        let user = make_user(&db);
        make_chip(&db, &user, "5511999990002");
        let dup = Chip::new("5511999990002", user.id);
        assert!(ChipRepository::new(db).create(&dup).is_err());
    }

    #[test]
    fn test_chip_list_by_owner() {
        let db = make_db();
        let ana = make_user(&db);
        let bia = make_user(&db);
        make_chip(&db, &ana, "1");
        make_chip(&db, &ana, "2");
        make_chip(&db, &bia, "3");

        let repo = ChipRepository::new(db);
        assert_eq!(repo.list_by_owner(ana.id).unwrap().len(), 2);
        assert_eq!(repo.list_by_owner(bia.id).unwrap().len(), 1);
    }

    #[test]
    fn test_chip_update_connection_and_reset() {
        let db = make_db();
        let user = make_user(&db);
        let a = make_chip(&db, &user, "10");
        let b = make_chip(&db, &user, "11");
        let repo = ChipRepository::new(db);

        assert!(repo.update_connection(a.id, true, ChipStatus::Active).unwrap());
        assert!(repo.update_connection(b.id, true, ChipStatus::Active).unwrap());
        assert!(!repo.update_status(Uuid::new_v4(), ChipStatus::Paused).unwrap());

        let cleared = repo.reset_connected_flags().unwrap();
        assert_eq!(cleared, 2);

        let a = repo.find_by_id(a.id).unwrap().unwrap();
        assert!(!a.connected);
        assert_eq!(a.status, ChipStatus::Active);
    }

    #[test]
    fn test_simulation_lifecycle() {
        let db = make_db();
        let user = make_user(&db);
        let chip = make_chip(&db, &user, "20");
        let repo = SimulationRepository::new(db);

        let sim = Simulation::start(chip.id);
        repo.create(&sim).unwrap();
        assert_eq!(repo.find_running_by_chip(chip.id).unwrap().unwrap().id, sim.id);

        let end = Timestamp::now();
        assert!(!repo
            .transition(sim.id, SimulationStatus::Paused, SimulationStatus::Completed, Some(end))
            .unwrap());
        assert!(repo
            .transition(sim.id, SimulationStatus::Running, SimulationStatus::Completed, Some(end))
            .unwrap());

        let stored = repo.find_by_id(sim.id).unwrap().unwrap();
        assert_eq!(stored.status, SimulationStatus::Completed);
        assert_eq!(stored.ended_at, Some(end));
        assert!(repo.find_running_by_chip(chip.id).unwrap().is_none());
        assert_eq!(repo.list_by_chip(chip.id).unwrap().len(), 1);
    }

    #[test]
    fn test_messages_ordered_by_timestamp_then_insertion() {
        let db = make_db();
        let user = make_user(&db);
        let chip = make_chip(&db, &user, "30");
        let sim = Simulation::start(chip.id);
        SimulationRepository::new(db.clone()).create(&sim).unwrap();
        let repo = MessageRepository::new(db);

        let mut late = Message::new(sim.id, chip.id, Direction::Outbound, "bot", "c", "late");
        late.timestamp = Timestamp(2_000);
        let mut first = Message::new(sim.id, chip.id, Direction::Outbound, "bot", "c", "first");
        first.timestamp = Timestamp(1_000);
        let mut second = Message::new(sim.id, chip.id, Direction::Inbound, "c", "bot", "second");
        second.timestamp = Timestamp(1_000);

        repo.append(&late).unwrap();
        repo.append(&first).unwrap();
        repo.append(&second).unwrap();

        let listed: Vec<String> = repo
            .list_by_simulation(sim.id)
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(listed, vec!["first", "second", "late"]);
        assert_eq!(repo.count_by_simulation(sim.id).unwrap(), 3);
    }

    #[test]
    fn test_chip_delete_cascades_to_simulations() {
        let db = make_db();
        let user = make_user(&db);
        let chip = make_chip(&db, &user, "40");
        let sims = SimulationRepository::new(db.clone());
        let sim = Simulation::start(chip.id);
        sims.create(&sim).unwrap();

        assert!(ChipRepository::new(db).delete(chip.id).unwrap());
        assert!(sims.find_by_id(sim.id).unwrap().is_none());
    }

    #[test]
    fn test_create_if_idle_refuses_second_running() {
        let db = make_db();
        let user = make_user(&db);
        let chip = make_chip(&db, &user, "50");
        let repo = SimulationRepository::new(db);

        let first = Simulation::start(chip.id);
        assert!(repo.create_if_idle(&first).unwrap());
        let second = Simulation::start(chip.id);
        assert!(!repo.create_if_idle(&second).unwrap());
        assert!(repo.find_by_id(second.id).unwrap().is_none());

        // Once the first is paused the chip is idle again.
        assert!(repo
            .transition(first.id, SimulationStatus::Running, SimulationStatus::Paused, None)
            .unwrap());
        assert!(repo.create_if_idle(&second).unwrap());
    }

    #[test]
    fn test_transition_refuses_second_running() {
        let db = make_db();
        let user = make_user(&db);
        let chip = make_chip(&db, &user, "51");
        let repo = SimulationRepository::new(db);

        let paused = Simulation::start(chip.id);
        repo.create(&paused).unwrap();
        repo.transition(paused.id, SimulationStatus::Running, SimulationStatus::Paused, None)
            .unwrap();
        let running = Simulation::start(chip.id);
        repo.create(&running).unwrap();

        assert!(!repo
            .transition(paused.id, SimulationStatus::Paused, SimulationStatus::Running, None)
            .unwrap());
        assert_eq!(
            repo.find_by_id(paused.id).unwrap().unwrap().status,
            SimulationStatus::Paused
        );
    }

    #[test]
    fn test_completed_simulation_cannot_be_revived() {
        let db = make_db();
        let user = make_user(&db);
        let chip = make_chip(&db, &user, "52");
        let repo = SimulationRepository::new(db);
        let sim = Simulation::start(chip.id);
        repo.create(&sim).unwrap();
        let end = Timestamp::now();
        repo.transition(sim.id, SimulationStatus::Running, SimulationStatus::Completed, Some(end))
            .unwrap();

        assert!(!repo
            .transition(sim.id, SimulationStatus::Paused, SimulationStatus::Running, None)
            .unwrap());
        let stored = repo.find_by_id(sim.id).unwrap().unwrap();
        assert_eq!(stored.status, SimulationStatus::Completed);
        assert_eq!(stored.ended_at, Some(end));
    }

    #[test]
    fn test_user_replace_token() {
        let db = make_db();
        let user = make_user(&db);
        let repo = UserRepository::new(db);

        assert!(repo.replace_token(user.id, &user.api_token, "fresh").unwrap());
        assert!(repo.find_by_token(&user.api_token).unwrap().is_none());
        assert_eq!(repo.find_by_token("fresh").unwrap().unwrap().id, user.id);
        assert!(!repo.replace_token(user.id, &user.api_token, "again").unwrap());
    }

    #[test]
    fn test_plan_catalog_seeded_once() {
        let db = make_db();
        let repo = PlanRepository::new(db);

        assert_eq!(repo.seed_catalog(&Plan::default_catalog()).unwrap(), 4);
        assert_eq!(repo.seed_catalog(&Plan::default_catalog()).unwrap(), 0);

        let catalog = repo.list_catalog().unwrap();
        assert_eq!(catalog.len(), 4);
        assert!(catalog
            .windows(2)
            .all(|w| w[0].price_cents <= w[1].price_cents));
    }

    #[test]
    fn test_purchased_plans_listed_per_owner() {
        let db = make_db();
        let ana = make_user(&db);
        let bia = make_user(&db);
        let repo = PlanRepository::new(db);
        repo.seed_catalog(&Plan::default_catalog()).unwrap();
        let offer = repo.list_catalog().unwrap().remove(1);

        let bought = offer.purchased_by(ana.id);
        repo.create(&bought).unwrap();

        assert_eq!(repo.find_by_id(bought.id).unwrap().unwrap(), bought);
        assert_eq!(repo.list_by_owner(ana.id).unwrap(), vec![bought]);
        assert!(repo.list_by_owner(bia.id).unwrap().is_empty());
        assert_eq!(repo.list_catalog().unwrap().len(), 4);
    }
}
