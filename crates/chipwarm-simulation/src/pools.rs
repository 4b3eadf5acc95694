use rand::seq::IndexedRandom;

use chipwarm_core::config::SimulationConfig;
use chipwarm_core::error::ChipwarmError;

/// Contacts and message templates a simulation draws from.
#[derive(Clone, Debug)]
pub struct MessagePools {
    contacts: Vec<String>,
    outbound: Vec<String>,
    replies: Vec<String>,
}

/// One tick's worth of randomly chosen content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Exchange {
    pub contact: String,
    pub outbound: String,
    pub reply: String,
}

impl MessagePools {
    pub fn new(
        contacts: Vec<String>,
        outbound: Vec<String>,
        replies: Vec<String>,
    ) -> Result<Self, ChipwarmError> {
        if contacts.is_empty() || outbound.is_empty() || replies.is_empty() {
            return Err(ChipwarmError::Config(
                "simulation contact and message pools must not be empty".to_string(),
            ));
        }
        Ok(Self {
            contacts,
            outbound,
            replies,
        })
    }

    pub fn from_config(config: &SimulationConfig) -> Result<Self, ChipwarmError> {
        Self::new(
            config.contacts.clone(),
            config.outbound_messages.clone(),
            config.reply_messages.clone(),
        )
    }

    /// Pick a contact, an outbound template and a reply uniformly at random.
    pub fn pick(&self) -> Exchange {
        let mut rng = rand::rng();
        Exchange {
            contact: choose(&self.contacts, &mut rng),
            outbound: choose(&self.outbound, &mut rng),
            reply: choose(&self.replies, &mut rng),
        }
    }
}

fn choose(pool: &[String], rng: &mut impl rand::Rng) -> String {
    pool.choose(rng).cloned().unwrap_or_default()
}
