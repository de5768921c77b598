use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

/// Exchange (topic) every vote message is published to.
pub const VOTES_TOPIC: &str = "votes";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Poll {
    pub id: String,
    pub title: String,
    pub options: Vec<String>,
    // option -> accumulated count
    pub results: BTreeMap<String, i64>,
    pub created_at: DateTime<Utc>,
}

/// Body of an administrative poll creation.
#[derive(Debug, Clone, Deserialize)]
pub struct NewPoll {
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    pub options: Vec<String>,
}

/// One event delivered by the external stream.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VoteEvent {
    pub text: String,
}

impl NewPoll {
    /// Checks the invariants a poll must hold before it is stored.
    ///
    /// Options must be non-blank and unique ignoring case, since the ingestor
    /// matches them case-insensitively.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(id) = &self.id {
            if id.trim().is_empty() || id.contains('/') {
                return Err(format!("invalid poll id: {:?}", id));
            }
        }
        if self.title.trim().is_empty() {
            return Err("title must not be empty".to_string());
        }
        if self.options.is_empty() {
            return Err("a poll needs at least one option".to_string());
        }

        let mut seen = HashSet::new();
        for option in &self.options {
            if option.trim().is_empty() {
                return Err("options must not be blank".to_string());
            }
            if option.trim() != option {
                return Err(format!("option {:?} has surrounding whitespace", option));
            }
            if !seen.insert(option.to_lowercase()) {
                return Err(format!("duplicate option: {}", option));
            }
        }
        Ok(())
    }
}

impl Poll {
    pub fn new(new_poll: NewPoll) -> Self {
        let results = new_poll
            .options
            .iter()
            .map(|option| (option.clone(), 0))
            .collect();

        Self {
            id: new_poll.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            title: new_poll.title,
            options: new_poll.options,
            results,
            created_at: Utc::now(),
        }
    }
}
