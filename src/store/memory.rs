use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::definition::RecurrenceDefinition;
use crate::invoice::InvoiceCommand;
use crate::store::{
    ClientTerms, CommitOutcome, DefinitionUpdate, GenerationLogEntry, InvoiceId, RecurrenceStore,
    StoreError,
};

/// Simulated failure injected before any observable effect, so a failed
/// call never leaves partial state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailMode {
    #[default]
    None,
    Unavailable,
    Timeout,
}

#[derive(Default)]
struct Inner {
    definitions: BTreeMap<String, RecurrenceDefinition>,
    clients: BTreeMap<String, ClientTerms>,
    log: BTreeMap<(String, u32), GenerationLogEntry>,
    invoices: BTreeMap<InvoiceId, InvoiceCommand>,
    invoice_seq: u32,
    fail_mode: FailMode,
}

/// In-memory store. The single mutex makes every commit an atomic
/// conditional write: the duplicate check and the inserts happen under one
/// lock, the same guarantee a relational unique constraint provides.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_client(&self, id: &str, terms: ClientTerms) {
        self.lock().clients.insert(id.to_string(), terms);
    }

    pub fn remove_client(&self, id: &str) {
        self.lock().clients.remove(id);
    }

    pub fn insert_definition(&self, definition: RecurrenceDefinition) {
        self.lock()
            .definitions
            .insert(definition.id.clone(), definition);
    }

    pub fn definition(&self, id: &str) -> Option<RecurrenceDefinition> {
        self.lock().definitions.get(id).cloned()
    }

    pub fn invoice_count(&self) -> usize {
        self.lock().invoices.len()
    }

    pub fn invoice(&self, id: &str) -> Option<InvoiceCommand> {
        self.lock().invoices.get(id).cloned()
    }

    /// Make every subsequent store call fail until cleared.
    pub fn set_fail_mode(&self, mode: FailMode) {
        self.lock().fail_mode = mode;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Lock poisoning only happens if a test panicked mid-call.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn guard(&self) -> Result<std::sync::MutexGuard<'_, Inner>, StoreError> {
        let inner = self.lock();
        match inner.fail_mode {
            FailMode::None => Ok(inner),
            FailMode::Unavailable => {
                Err(StoreError::Unavailable("simulated outage".to_string()))
            }
            FailMode::Timeout => Err(StoreError::Timeout(Duration::from_secs(5))),
        }
    }
}

fn apply_update(definition: &mut RecurrenceDefinition, update: &DefinitionUpdate) {
    if let Some(status) = update.status {
        definition.status = status;
    }
    if let Some(count) = update.occurrences_generated {
        definition.occurrences_generated = count;
    }
    if let Some(next_due) = update.next_due_at {
        definition.next_due_at = next_due;
    }
}

impl RecurrenceStore for MemoryStore {
    fn load_active_definitions(
        &self,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<RecurrenceDefinition>, StoreError> {
        let inner = self.guard()?;
        Ok(inner
            .definitions
            .values()
            .filter(|def| def.is_due(as_of))
            .cloned()
            .collect())
    }

    fn load_client(&self, client_id: &str) -> Result<Option<ClientTerms>, StoreError> {
        Ok(self.guard()?.clients.get(client_id).cloned())
    }

    fn find_generation(
        &self,
        definition_id: &str,
        occurrence_index: u32,
    ) -> Result<Option<GenerationLogEntry>, StoreError> {
        Ok(self
            .guard()?
            .log
            .get(&(definition_id.to_string(), occurrence_index))
            .cloned())
    }

    fn count_generations(&self, definition_id: &str) -> Result<u32, StoreError> {
        let inner = self.guard()?;
        Ok(inner
            .log
            .keys()
            .filter(|(id, _)| id.as_str() == definition_id)
            .count() as u32)
    }

    fn commit_generation(
        &self,
        command: &InvoiceCommand,
        update: &DefinitionUpdate,
    ) -> Result<CommitOutcome, StoreError> {
        let mut inner = self.guard()?;

        let key = (command.definition_id.clone(), command.occurrence_index);
        if let Some(existing) = inner.log.get(&key) {
            return Ok(CommitOutcome::DuplicateOccurrence(
                existing.invoice_id.clone(),
            ));
        }

        if !inner.definitions.contains_key(&command.definition_id) {
            return Err(StoreError::Corrupt(format!(
                "definition {} missing from store",
                command.definition_id
            )));
        }

        // All checks passed; apply the whole unit under the lock.
        inner.invoice_seq += 1;
        let invoice_id = format!("inv-{:05}", inner.invoice_seq);

        inner.log.insert(
            key,
            GenerationLogEntry {
                definition_id: command.definition_id.clone(),
                occurrence_index: command.occurrence_index,
                generated_at: command.generated_at,
                invoice_id: invoice_id.clone(),
            },
        );
        inner.invoices.insert(invoice_id.clone(), command.clone());
        if let Some(definition) = inner.definitions.get_mut(&command.definition_id) {
            apply_update(definition, update);
        }

        Ok(CommitOutcome::Committed(invoice_id))
    }

    fn update_definition(
        &self,
        definition_id: &str,
        update: &DefinitionUpdate,
    ) -> Result<(), StoreError> {
        let mut inner = self.guard()?;
        match inner.definitions.get_mut(definition_id) {
            Some(definition) => {
                apply_update(definition, update);
                Ok(())
            }
            None => Err(StoreError::Corrupt(format!(
                "definition {definition_id} missing from store"
            ))),
        }
    }

    fn generation_log(
        &self,
        definition_id: &str,
    ) -> Result<Vec<GenerationLogEntry>, StoreError> {
        let inner = self.guard()?;
        Ok(inner
            .log
            .values()
            .filter(|entry| entry.definition_id == definition_id)
            .cloned()
            .collect())
    }
}
