use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub invoice: InvoiceConfig,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct InvoiceConfig {
    pub number_format: String,
    pub currency: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SchedulerSettings {
    #[serde(default = "default_tick_period_secs")]
    pub tick_period_secs: u64,
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick_period_secs: default_tick_period_secs(),
            workers: default_workers(),
        }
    }
}

fn default_tick_period_secs() -> u64 {
    60
}

fn default_workers() -> usize {
    4
}
