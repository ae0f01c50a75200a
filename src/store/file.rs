use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::config::{Client, Config, DefinitionConfig};
use crate::definition::{RecurrenceDefinition, Status};
use crate::invoice::{format_invoice_number, InvoiceCommand};
use crate::store::{
    ClientTerms, CommitOutcome, DefinitionUpdate, GenerationLogEntry, RecurrenceStore, StoreError,
};

/// TOML-file-backed store rooted at a config directory.
///
/// Clients and definitions are user-edited config (clients.toml,
/// definitions.toml); everything the engine writes goes to state.toml,
/// replaced atomically via write-to-temp-then-rename. Every read goes back
/// to the files, so re-querying always reflects current truth. The write
/// lock serializes commits between this process's workers; the rename plus
/// the duplicate check under the lock make each commit all-or-nothing.
pub struct FileStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct EngineState {
    #[serde(default)]
    counter: Counter,
    #[serde(default)]
    definitions: BTreeMap<String, DefinitionState>,
    #[serde(default)]
    log: Vec<GenerationLogEntry>,
    #[serde(default)]
    invoices: Vec<InvoiceRecord>,
}

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
struct Counter {
    last_year: u32,
    last_number: u32,
}

/// Engine-owned runtime state of one definition.
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
struct DefinitionState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status: Option<Status>,
    #[serde(default)]
    occurrences_generated: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    next_due_at: Option<DateTime<Utc>>,
}

/// Summary of a created invoice, kept for listing and audit.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct InvoiceRecord {
    pub id: String,
    pub definition: String,
    pub client: String,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub currency: String,
    pub total: Decimal,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn read_required<T: DeserializeOwned>(&self, name: &str) -> Result<T, StoreError> {
        let path = self.dir.join(name);
        if !path.exists() {
            return Err(StoreError::Unavailable(format!(
                "{} not found",
                path.display()
            )));
        }
        let content = fs::read_to_string(&path)?;
        toml::from_str(&content)
            .map_err(|e| StoreError::Corrupt(format!("{}: {e}", path.display())))
    }

    fn load_settings(&self) -> Result<Config, StoreError> {
        self.read_required("config.toml")
    }

    fn load_clients(&self) -> Result<BTreeMap<String, Client>, StoreError> {
        self.read_required("clients.toml")
    }

    fn load_definition_configs(&self) -> Result<BTreeMap<String, DefinitionConfig>, StoreError> {
        self.read_required("definitions.toml")
    }

    /// state.toml starts empty; a missing file is a fresh engine.
    fn load_state(&self) -> Result<EngineState, StoreError> {
        let path = self.dir.join("state.toml");
        if !path.exists() {
            return Ok(EngineState::default());
        }
        let content = fs::read_to_string(&path)?;
        toml::from_str(&content)
            .map_err(|e| StoreError::Corrupt(format!("{}: {e}", path.display())))
    }

    fn write_state(&self, state: &EngineState) -> Result<(), StoreError> {
        let content = toml::to_string_pretty(state)
            .map_err(|e| StoreError::Corrupt(format!("state.toml: {e}")))?;
        let tmp = self.dir.join("state.toml.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, self.dir.join("state.toml"))?;
        Ok(())
    }

    fn assemble(&self, id: &str, config: &DefinitionConfig, state: &EngineState) -> RecurrenceDefinition {
        match state.definitions.get(id) {
            Some(def_state) => config.assemble(
                id,
                def_state.status,
                def_state.occurrences_generated,
                def_state.next_due_at,
            ),
            None => config.assemble(id, None, 0, None),
        }
    }

    /// Every definition regardless of status, for listing.
    pub fn load_all_definitions(&self) -> Result<Vec<RecurrenceDefinition>, StoreError> {
        let configs = self.load_definition_configs()?;
        let state = self.load_state()?;
        Ok(configs
            .iter()
            .map(|(id, config)| self.assemble(id, config, &state))
            .collect())
    }

    pub fn load_definition(&self, id: &str) -> Result<Option<RecurrenceDefinition>, StoreError> {
        let configs = self.load_definition_configs()?;
        let state = self.load_state()?;
        Ok(configs
            .get(id)
            .map(|config| self.assemble(id, config, &state)))
    }

    pub fn invoices(&self) -> Result<Vec<InvoiceRecord>, StoreError> {
        Ok(self.load_state()?.invoices)
    }

    pub fn full_log(&self) -> Result<Vec<GenerationLogEntry>, StoreError> {
        Ok(self.load_state()?.log)
    }

    /// The number the next created invoice will carry, given the year it
    /// would be generated in.
    pub fn next_invoice_number(&self, year: u32) -> Result<String, StoreError> {
        let config = self.load_settings()?;
        let state = self.load_state()?;
        let seq = next_seq(&state.counter, year);
        Ok(format_invoice_number(
            &config.invoice.number_format,
            year,
            seq,
        ))
    }
}

fn next_seq(counter: &Counter, year: u32) -> u32 {
    if counter.last_year == year {
        counter.last_number + 1
    } else {
        1 // Reset for new year
    }
}

fn apply_update(state: &mut DefinitionState, update: &DefinitionUpdate) {
    if let Some(status) = update.status {
        state.status = Some(status);
    }
    if let Some(count) = update.occurrences_generated {
        state.occurrences_generated = count;
    }
    if let Some(next_due) = update.next_due_at {
        state.next_due_at = next_due;
    }
}

impl RecurrenceStore for FileStore {
    fn load_active_definitions(
        &self,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<RecurrenceDefinition>, StoreError> {
        Ok(self
            .load_all_definitions()?
            .into_iter()
            .filter(|definition| definition.is_due(as_of))
            .collect())
    }

    fn load_client(&self, client_id: &str) -> Result<Option<ClientTerms>, StoreError> {
        let config = self.load_settings()?;
        Ok(self
            .load_clients()?
            .get(client_id)
            .map(|client| client.terms(&config.invoice.currency)))
    }

    fn find_generation(
        &self,
        definition_id: &str,
        occurrence_index: u32,
    ) -> Result<Option<GenerationLogEntry>, StoreError> {
        Ok(self.load_state()?.log.into_iter().find(|entry| {
            entry.definition_id == definition_id && entry.occurrence_index == occurrence_index
        }))
    }

    fn count_generations(&self, definition_id: &str) -> Result<u32, StoreError> {
        Ok(self
            .load_state()?
            .log
            .iter()
            .filter(|entry| entry.definition_id == definition_id)
            .count() as u32)
    }

    fn commit_generation(
        &self,
        command: &InvoiceCommand,
        update: &DefinitionUpdate,
    ) -> Result<CommitOutcome, StoreError> {
        let _guard = match self.write_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let config = self.load_settings()?;
        let mut state = self.load_state()?;

        if let Some(existing) = state.log.iter().find(|entry| {
            entry.definition_id == command.definition_id
                && entry.occurrence_index == command.occurrence_index
        }) {
            return Ok(CommitOutcome::DuplicateOccurrence(
                existing.invoice_id.clone(),
            ));
        }

        let year = command.generated_at.year() as u32;
        let seq = next_seq(&state.counter, year);
        let invoice_id = format_invoice_number(&config.invoice.number_format, year, seq);

        state.counter = Counter {
            last_year: year,
            last_number: seq,
        };
        state.log.push(GenerationLogEntry {
            definition_id: command.definition_id.clone(),
            occurrence_index: command.occurrence_index,
            generated_at: command.generated_at,
            invoice_id: invoice_id.clone(),
        });
        state.invoices.push(InvoiceRecord {
            id: invoice_id.clone(),
            definition: command.definition_id.clone(),
            client: command.client_id.clone(),
            issue_date: command.issue_date,
            due_date: command.due_date,
            currency: command.currency.clone(),
            total: command.total,
        });
        apply_update(
            state.definitions.entry(command.definition_id.clone()).or_default(),
            update,
        );

        // Single rename makes the whole unit visible at once (or not at all).
        self.write_state(&state)?;
        Ok(CommitOutcome::Committed(invoice_id))
    }

    fn update_definition(
        &self,
        definition_id: &str,
        update: &DefinitionUpdate,
    ) -> Result<(), StoreError> {
        let _guard = match self.write_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut state = self.load_state()?;
        apply_update(
            state.definitions.entry(definition_id.to_string()).or_default(),
            update,
        );
        self.write_state(&state)
    }

    fn generation_log(
        &self,
        definition_id: &str,
    ) -> Result<Vec<GenerationLogEntry>, StoreError> {
        let mut entries: Vec<_> = self
            .load_state()?
            .log
            .into_iter()
            .filter(|entry| entry.definition_id == definition_id)
            .collect();
        entries.sort_by_key(|entry| entry.occurrence_index);
        Ok(entries)
    }
}
