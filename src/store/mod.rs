mod file;
mod memory;

pub use file::{FileStore, InvoiceRecord};
pub use memory::{FailMode, MemoryStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::definition::{RecurrenceDefinition, Status};
use crate::invoice::InvoiceCommand;

pub type InvoiceId = String;

/// Failures at the storage boundary. `Unavailable` and `Timeout` are
/// transient: the occurrence stays due and is retried on the next tick.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("corrupt store state: {0}")]
    Corrupt(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Payment parameters of the billed client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientTerms {
    pub currency: String,
    pub payment_terms_days: u32,
}

/// Proof that one occurrence was materialized. Append-only; never mutated
/// or deleted. (definition_id, occurrence_index) is the idempotency key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationLogEntry {
    pub definition_id: String,
    pub occurrence_index: u32,
    pub generated_at: DateTime<Utc>,
    pub invoice_id: InvoiceId,
}

/// Partial update of a definition's mutable fields. `None` leaves a field
/// untouched; `next_due_at: Some(None)` clears the cached instant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DefinitionUpdate {
    pub status: Option<Status>,
    pub occurrences_generated: Option<u32>,
    pub next_due_at: Option<Option<DateTime<Utc>>>,
}

/// Result of the atomic generation commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Invoice created, log entry appended, definition advanced.
    Committed(InvoiceId),
    /// The idempotency key already existed; nothing was written. Carries
    /// the invoice produced by the earlier winner.
    DuplicateOccurrence(InvoiceId),
}

/// The data-access collaborator. Everything the engine knows about
/// persistence goes through this trait; implementations must make
/// `commit_generation` a single atomic, conflict-detecting unit, because
/// the generation log's uniqueness key is the engine's only concurrency
/// control — redundant scheduler instances may race on the same occurrence.
pub trait RecurrenceStore: Send + Sync {
    /// Definitions with status Active and next_due_at <= as_of. Re-querying
    /// always reflects the store's current truth, never a cached snapshot.
    fn load_active_definitions(
        &self,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<RecurrenceDefinition>, StoreError>;

    /// `None` when the client no longer exists (a permanent, human-fixable
    /// condition, not a transient one).
    fn load_client(&self, client_id: &str) -> Result<Option<ClientTerms>, StoreError>;

    fn find_generation(
        &self,
        definition_id: &str,
        occurrence_index: u32,
    ) -> Result<Option<GenerationLogEntry>, StoreError>;

    fn count_generations(&self, definition_id: &str) -> Result<u32, StoreError>;

    /// Atomically: create the invoice, append the generation log entry,
    /// and apply `update` (counter + next_due_at + status) — all or
    /// nothing. A duplicate idempotency key is reported, never silently
    /// ignored, and leaves the store untouched. The store assigns the
    /// invoice id.
    fn commit_generation(
        &self,
        command: &InvoiceCommand,
        update: &DefinitionUpdate,
    ) -> Result<CommitOutcome, StoreError>;

    /// Non-transactional definition update (Ended / Failing transitions).
    fn update_definition(
        &self,
        definition_id: &str,
        update: &DefinitionUpdate,
    ) -> Result<(), StoreError>;

    /// Read side of the log, for reporting. Ordered by occurrence index.
    fn generation_log(&self, definition_id: &str)
        -> Result<Vec<GenerationLogEntry>, StoreError>;
}
