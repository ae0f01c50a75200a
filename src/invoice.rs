use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::definition::RecurrenceDefinition;
use crate::store::ClientTerms;

/// A materialized line: template values plus the extended amount.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvoiceLine {
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub tax_rate: Decimal,
    pub amount: Decimal,
}

/// The invoice-creation command handed to the store. The core never
/// delivers or renders invoices; this is its only output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvoiceCommand {
    pub definition_id: String,
    pub occurrence_index: u32,
    pub client_id: String,
    pub currency: String,
    /// The computed occurrence date, NOT the tick's as-of date. A series
    /// generated late is still dated when it was scheduled.
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub lines: Vec<InvoiceLine>,
    pub subtotal: Decimal,
    pub tax_total: Decimal,
    pub total: Decimal,
    pub generated_at: DateTime<Utc>,
}

/// Build the invoice-creation command for one occurrence from the
/// definition's line-item template and the client's payment terms.
pub fn materialize(
    definition: &RecurrenceDefinition,
    client: &ClientTerms,
    issue_date: NaiveDate,
    generated_at: DateTime<Utc>,
) -> InvoiceCommand {
    let lines: Vec<InvoiceLine> = definition
        .items
        .iter()
        .map(|item| InvoiceLine {
            description: item.description.clone(),
            quantity: item.quantity,
            unit_price: item.unit_price,
            tax_rate: item.tax_rate,
            amount: item.quantity * item.unit_price,
        })
        .collect();

    let subtotal: Decimal = lines.iter().map(|line| line.amount).sum();
    let tax_total: Decimal = lines.iter().map(|line| line.amount * line.tax_rate).sum();

    let due_date = issue_date
        .checked_add_signed(Duration::days(i64::from(client.payment_terms_days)))
        .unwrap_or(issue_date);

    InvoiceCommand {
        definition_id: definition.id.clone(),
        occurrence_index: definition.occurrences_generated,
        client_id: definition.client_id.clone(),
        currency: client.currency.clone(),
        issue_date,
        due_date,
        lines,
        subtotal,
        tax_total,
        total: subtotal + tax_total,
        generated_at,
    }
}

/// Format invoice number from template
pub fn format_invoice_number(format: &str, year: u32, seq: u32) -> String {
    format
        .replace("{year}", &year.to_string())
        .replace("{seq:04}", &format!("{:04}", seq))
        .replace("{seq:05}", &format!("{:05}", seq))
        .replace("{seq:03}", &format!("{:03}", seq))
}
