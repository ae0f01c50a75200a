use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::definition::{LineItem, RecurrenceDefinition, Status};
use crate::engine::schedule::{Cadence, EndCondition};
use crate::error::{RecurError, Result};

/// One entry of definitions.toml. The table name is the definition id;
/// runtime state (occurrence counter, Ended/Failing transitions) lives in
/// state.toml, never here.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DefinitionConfig {
    pub client: String,
    pub anchor: NaiveDate,
    pub cadence: Cadence,
    #[serde(default)]
    pub end: EndCondition,
    #[serde(default)]
    pub paused: bool,
    pub items: Vec<LineItem>,
}

impl DefinitionConfig {
    pub fn validate(&self, id: &str) -> Result<()> {
        if let Err(reason) = self.cadence.validate() {
            return Err(RecurError::InvalidDefinition {
                id: id.to_string(),
                reason,
            });
        }
        if self.items.is_empty() {
            return Err(RecurError::InvalidDefinition {
                id: id.to_string(),
                reason: "line-item template is empty".to_string(),
            });
        }
        if let Some(item) = self.items.iter().find(|item| item.quantity.is_sign_negative()) {
            return Err(RecurError::InvalidDefinition {
                id: id.to_string(),
                reason: format!("negative quantity on item '{}'", item.description),
            });
        }
        Ok(())
    }

    /// Merge configured cadence with runtime state into the engine's view.
    /// An engine-written status (Ended/Failing) wins over the config's
    /// paused flag; a missing cached next-due instant is recomputed.
    pub fn assemble(
        &self,
        id: &str,
        status_override: Option<Status>,
        occurrences_generated: u32,
        cached_next_due: Option<DateTime<Utc>>,
    ) -> RecurrenceDefinition {
        let status = match status_override {
            Some(status) => status,
            None if self.paused => Status::Paused,
            None => Status::Active,
        };
        let mut definition = RecurrenceDefinition {
            id: id.to_string(),
            client_id: self.client.clone(),
            cadence: self.cadence.clone(),
            anchor: self.anchor.and_time(NaiveTime::MIN).and_utc(),
            end: self.end.clone(),
            items: self.items.clone(),
            status,
            occurrences_generated,
            next_due_at: None,
        };
        definition.next_due_at = if definition.status == Status::Ended {
            None
        } else {
            cached_next_due.or_else(|| definition.recompute_next_due())
        };
        definition
    }
}
