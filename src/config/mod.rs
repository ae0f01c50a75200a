mod client;
mod definitions;
mod settings;

pub use client::Client;
pub use definitions::DefinitionConfig;
pub use settings::{Config, InvoiceConfig, SchedulerSettings};

use directories::ProjectDirs;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{RecurError, Result};

/// Get the config directory path (~/.recur/ or XDG config)
pub fn config_dir() -> Result<PathBuf> {
    if let Some(proj_dirs) = ProjectDirs::from("", "", "recur") {
        return Ok(proj_dirs.config_dir().to_path_buf());
    }

    // Fallback to ~/.recur/
    let home = std::env::var_os("HOME").map(PathBuf::from).ok_or_else(|| {
        RecurError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Could not determine home directory",
        ))
    })?;

    Ok(home.join(".recur"))
}

fn load_toml<T: DeserializeOwned>(path: PathBuf) -> Result<T> {
    if !path.exists() {
        return Err(RecurError::ConfigFileNotFound(path));
    }
    let content = fs::read_to_string(&path)?;
    toml::from_str(&content).map_err(|e| RecurError::ConfigParse { path, source: e })
}

/// Load the main config.toml
pub fn load_config(config_dir: &Path) -> Result<Config> {
    load_toml(config_dir.join("config.toml"))
}

/// Load clients.toml as a map keyed by client id
pub fn load_clients(config_dir: &Path) -> Result<BTreeMap<String, Client>> {
    load_toml(config_dir.join("clients.toml"))
}

/// Load definitions.toml as a map keyed by definition id, validating each
/// entry before it reaches the engine.
pub fn load_definitions(config_dir: &Path) -> Result<BTreeMap<String, DefinitionConfig>> {
    let definitions: BTreeMap<String, DefinitionConfig> =
        load_toml(config_dir.join("definitions.toml"))?;
    for (id, definition) in &definitions {
        definition.validate(id)?;
    }
    Ok(definitions)
}

/// Template content for config.toml
pub const CONFIG_TEMPLATE: &str = r#"[invoice]
number_format = "INV-{year}-{seq:04}"  # e.g., INV-2026-0001
currency = "USD"

[scheduler]
tick_period_secs = 60
workers = 4
"#;

/// Template content for clients.toml
pub const CLIENTS_TEMPLATE: &str = r#"# Define your clients here. The table name (e.g., [acme]) is the client
# identifier referenced from definitions.toml.
#
# `currency` is optional and falls back to the default in config.toml.

[example-client]
name = "Example Client Inc."
email = "jane@example.com"
currency = "USD"
payment_terms_days = 30
"#;

/// Template content for definitions.toml
pub const DEFINITIONS_TEMPLATE: &str = r#"# Recurring invoice definitions. The table name (e.g., [monthly-retainer])
# is the definition identifier.
#
# cadence.kind: daily | weekly | monthly | yearly
#   daily:   every
#   weekly:  every, weekday (monday..sunday)
#   monthly: every, day_of_month (clamped to shorter months)
#   yearly:  every, month, day
#
# end.kind: never | after_count (count = N) | on_or_before (date = "YYYY-MM-DD")
#
# Set `paused = true` to suspend a definition; it resumes at its next
# un-generated occurrence, not at the day you unpause it.

[monthly-retainer]
client = "example-client"
anchor = "2026-01-31"

[monthly-retainer.cadence]
kind = "monthly"
every = 1
day_of_month = 31

[monthly-retainer.end]
kind = "never"

[[monthly-retainer.items]]
description = "Monthly Retainer"
quantity = "1"
unit_price = "1500.00"
tax_rate = "0.0"
"#;
