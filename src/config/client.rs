use serde::{Deserialize, Serialize};

use crate::store::ClientTerms;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Client {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    /// Falls back to the default currency from config.toml when unset.
    #[serde(default)]
    pub currency: Option<String>,
    pub payment_terms_days: u32,
}

impl Client {
    pub fn terms(&self, default_currency: &str) -> ClientTerms {
        ClientTerms {
            currency: self
                .currency
                .clone()
                .unwrap_or_else(|| default_currency.to_string()),
            payment_terms_days: self.payment_terms_days,
        }
    }
}
