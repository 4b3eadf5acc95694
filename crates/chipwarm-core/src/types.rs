use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Enums
// =============================================================================

/// Persisted lifecycle status of a chip.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChipStatus {
    /// Provisioned, or logged out; awaiting a handshake.
    Pending,
    /// Session confirmed, or a simulation is running.
    Active,
    /// Its simulation was paused by the owner.
    Paused,
    /// The transport reported the session gone.
    Disconnected,
}

impl ChipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChipStatus::Pending => "PENDING",
            ChipStatus::Active => "ACTIVE",
            ChipStatus::Paused => "PAUSED",
            ChipStatus::Disconnected => "DISCONNECTED",
        }
    }
}

impl fmt::Display for ChipStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChipStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ChipStatus::Pending),
            "ACTIVE" => Ok(ChipStatus::Active),
            "PAUSED" => Ok(ChipStatus::Paused),
            "DISCONNECTED" => Ok(ChipStatus::Disconnected),
            other => Err(format!("unknown chip status: {other}")),
        }
    }
}

/// Status of a simulation. COMPLETED is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SimulationStatus {
    Running,
    Paused,
    Completed,
}

impl SimulationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SimulationStatus::Running => "RUNNING",
            SimulationStatus::Paused => "PAUSED",
            SimulationStatus::Completed => "COMPLETED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SimulationStatus::Completed)
    }
}

impl fmt::Display for SimulationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SimulationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RUNNING" => Ok(SimulationStatus::Running),
            "PAUSED" => Ok(SimulationStatus::Paused),
            "COMPLETED" => Ok(SimulationStatus::Completed),
            other => Err(format!("unknown simulation status: {other}")),
        }
    }
}

/// Direction of a simulated message relative to the bot account.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    /// Bot -> contact.
    Outbound,
    /// Contact -> bot.
    Inbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Outbound => "OUTBOUND",
            Direction::Inbound => "INBOUND",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OUTBOUND" => Ok(Direction::Outbound),
            "INBOUND" => Ok(Direction::Inbound),
            other => Err(format!("unknown direction: {other}")),
        }
    }
}

/// Connection answer returned by a status query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

impl ConnectionState {
    pub fn from_flag(connected: bool) -> Self {
        if connected {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }
}

/// Where a status answer came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusSource {
    /// The live transport session answered.
    Live,
    /// The live check failed; the last-persisted flag was used.
    Persisted,
    /// No handle is registered in this process.
    Registry,
}

// =============================================================================
// Newtype Wrappers - Temporal
// =============================================================================

/// Unix timestamp in milliseconds since epoch.
///
/// Millisecond precision keeps two messages sent in the same tick ordered
/// without relying solely on insertion order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis())
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp_millis())
    }

    pub fn to_datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.0).unwrap_or_default()
    }
}

// =============================================================================
// Entities
// =============================================================================

/// An API user. Owns chips.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing)]
    pub api_token: String,
    pub created_at: Timestamp,
}

/// A messaging-network account provisioned for warming.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Chip {
    pub id: Uuid,
    pub phone_number: String,
    pub status: ChipStatus,
    /// True only while a live session is registered for this chip.
    pub connected: bool,
    pub owner_id: Uuid,
    pub created_at: Timestamp,
}

impl Chip {
    /// A freshly provisioned chip: PENDING and not connected.
    pub fn new(phone_number: impl Into<String>, owner_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            phone_number: phone_number.into(),
            status: ChipStatus::Pending,
            connected: false,
            owner_id,
            created_at: Timestamp::now(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Simulation {
    pub id: Uuid,
    pub chip_id: Uuid,
    pub status: SimulationStatus,
    pub started_at: Timestamp,
    pub ended_at: Option<Timestamp>,
}

impl Simulation {
    /// A simulation that starts RUNNING now.
    pub fn start(chip_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            chip_id,
            status: SimulationStatus::Running,
            started_at: Timestamp::now(),
            ended_at: None,
        }
    }
}

/// One simulated message. Append-only.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub simulation_id: Uuid,
    pub chip_id: Uuid,
    pub direction: Direction,
    pub sender: String,
    pub recipient: String,
    pub content: String,
    pub timestamp: Timestamp,
}

impl Message {
    pub fn new(
        simulation_id: Uuid,
        chip_id: Uuid,
        direction: Direction,
        sender: impl Into<String>,
        recipient: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            simulation_id,
            chip_id,
            direction,
            sender: sender.into(),
            recipient: recipient.into(),
            content: content.into(),
            timestamp: Timestamp::now(),
        }
    }
}

/// A subscription plan. Catalog plans have no owner; a purchase copies a
/// catalog plan into one owned by the buyer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    /// Price in cents.
    pub price_cents: i64,
    pub duration_days: u32,
    pub chip_count: u32,
    pub has_ai: bool,
    pub has_api: bool,
    pub has_priority: bool,
    pub owner_id: Option<Uuid>,
    pub created_at: Timestamp,
}

impl Plan {
    #[allow(clippy::too_many_arguments)]
    fn catalog(
        name: &str,
        description: &str,
        price_cents: i64,
        chip_count: u32,
        has_ai: bool,
        has_api: bool,
        has_priority: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: description.to_string(),
            price_cents,
            duration_days: 7,
            chip_count,
            has_ai,
            has_api,
            has_priority,
            owner_id: None,
            created_at: Timestamp::now(),
        }
    }

    /// The plans offered to every user.
    pub fn default_catalog() -> Vec<Plan> {
        vec![
            Plan::catalog("Chip Avulso", "7 dias de aquecimento", 1_200, 1, false, false, false),
            Plan::catalog("Pacote 5 chips", "7 dias por chip", 4_900, 5, false, false, false),
            Plan::catalog(
                "Pacote 10 chips",
                "7 dias por chip + IA liberada",
                8_900,
                10,
                true,
                false,
                false,
            ),
            Plan::catalog(
                "Pacote 50 chips",
                "7 dias por chip + IA + prioridade + API",
                39_700,
                50,
                true,
                true,
                true,
            ),
        ]
    }

    pub fn is_catalog(&self) -> bool {
        self.owner_id.is_none()
    }

    /// A fresh copy of this plan owned by `owner_id`.
    pub fn purchased_by(&self, owner_id: Uuid) -> Plan {
        Plan {
            id: Uuid::new_v4(),
            owner_id: Some(owner_id),
            created_at: Timestamp::now(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chip_status_serialization() {
        let json = serde_json::to_string(&ChipStatus::Disconnected).unwrap();
        assert_eq!(json, "\"DISCONNECTED\"");

        let parsed: ChipStatus = serde_json::from_str("\"PAUSED\"").unwrap();
        assert_eq!(parsed, ChipStatus::Paused);
    }

    #[test]
    fn test_chip_status_from_str() {
        for status in [
            ChipStatus::Pending,
            ChipStatus::Active,
            ChipStatus::Paused,
            ChipStatus::Disconnected,
        ] {
            assert_eq!(status.to_string().parse::<ChipStatus>().unwrap(), status);
        }
        assert!("active".parse::<ChipStatus>().is_err());
    }

    #[test]
    fn test_simulation_status_terminal() {
        assert!(SimulationStatus::Completed.is_terminal());
        assert!(!SimulationStatus::Running.is_terminal());
        assert!(!SimulationStatus::Paused.is_terminal());
    }

    #[test]
    fn test_simulation_status_from_str_unknown() {
        let err = "STOPPED".parse::<SimulationStatus>().unwrap_err();
        assert!(err.contains("STOPPED"));
    }

    #[test]
    fn test_direction_display() {
        assert_eq!(Direction::Outbound.to_string(), "OUTBOUND");
        assert_eq!("INBOUND".parse::<Direction>().unwrap(), Direction::Inbound);
    }

    #[test]
    fn test_status_source_serialization() {
        assert_eq!(serde_json::to_string(&StatusSource::Persisted).unwrap(), "\"persisted\"");
        assert_eq!(
            serde_json::to_string(&ConnectionState::from_flag(true)).unwrap(),
            "\"CONNECTED\""
        );
    }

    #[test]
    fn test_timestamp_millis_roundtrip() {
        let now = Utc::now();
        let ts = Timestamp::from_datetime(now);
        assert_eq!(ts.to_datetime().timestamp_millis(), now.timestamp_millis());
    }

    #[test]
    fn test_new_chip_is_pending_and_disconnected() {
        let owner = Uuid::new_v4();
        let chip = Chip::new("5511999990000", owner);
        assert_eq!(chip.status, ChipStatus::Pending);
        assert!(!chip.connected);
        assert_eq!(chip.owner_id, owner);
    }

    #[test]
    fn test_started_simulation_has_no_end() {
        let sim = Simulation::start(Uuid::new_v4());
        assert_eq!(sim.status, SimulationStatus::Running);
        assert!(sim.ended_at.is_none());
    }

    #[test]
    fn test_user_token_not_serialized() {
        let user = User {
            id: Uuid::new_v4(),
            name: "ana".to_string(),
            api_token: "secret".to_string(),
            created_at: Timestamp::now(),
        };
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("secret"));
        assert!(!json.contains("api_token"));
    }

    #[test]
    fn test_default_catalog() {
        let catalog = Plan::default_catalog();
        assert_eq!(catalog.len(), 4);
        assert!(catalog.iter().all(Plan::is_catalog));
        assert_eq!(catalog[0].price_cents, 1_200);
        assert!(catalog[3].has_priority);
    }

    #[test]
    fn test_plan_purchase_copies_terms() {
        let catalog = &Plan::default_catalog()[2];
        let buyer = Uuid::new_v4();
        let bought = catalog.purchased_by(buyer);

        assert_ne!(bought.id, catalog.id);
        assert_eq!(bought.owner_id, Some(buyer));
        assert!(!bought.is_catalog());
        assert_eq!(bought.name, catalog.name);
        assert_eq!(bought.chip_count, 10);
    }
}
