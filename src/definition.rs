use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::engine::schedule::{compute_occurrence, Cadence, EndCondition, Occurrence};

/// One line of the invoice template. Money and quantities are fixed-point
/// decimals so repeated occurrences never accumulate rounding drift.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    #[serde(default)]
    pub tax_rate: Decimal,
}

/// Lifecycle state of a recurring definition.
///
/// Active -> Paused -> Active transitions are user-driven. Ended is
/// irreversible once the end condition is satisfied. Failing marks a
/// definition rejected by a business rule; it is excluded from selection
/// until someone reactivates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Active,
    Paused,
    Failing,
    Ended,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Active => "active",
            Status::Paused => "paused",
            Status::Failing => "failing",
            Status::Ended => "ended",
        };
        f.write_str(name)
    }
}

/// A recurring invoice series: cadence plus line-item template for one
/// client. `next_due_at` is derived state, always recomputable from
/// anchor + cadence + occurrences_generated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurrenceDefinition {
    pub id: String,
    pub client_id: String,
    pub cadence: Cadence,
    /// The instant the series conceptually starts. All occurrences are
    /// computed relative to it, never to prior generation times.
    pub anchor: DateTime<Utc>,
    #[serde(default)]
    pub end: EndCondition,
    pub items: Vec<LineItem>,
    pub status: Status,
    pub occurrences_generated: u32,
    pub next_due_at: Option<DateTime<Utc>>,
}

impl RecurrenceDefinition {
    /// Date of the `index`-th occurrence, or end of series.
    pub fn occurrence(&self, index: u32) -> Occurrence {
        compute_occurrence(&self.cadence, &self.end, self.anchor.date_naive(), index)
    }

    /// Instant of the `index`-th occurrence: the occurrence date at the
    /// anchor's time of day, in the definition's fixed UTC calendar.
    /// `None` means the series has no occurrence at that index.
    pub fn occurrence_instant(&self, index: u32) -> Option<DateTime<Utc>> {
        match self.occurrence(index) {
            Occurrence::Scheduled(date) => Some(instant_on(date, self.anchor)),
            Occurrence::EndOfSeries => None,
        }
    }

    /// The cached next-due instant for the current occurrence count,
    /// recomputed from scratch.
    pub fn recompute_next_due(&self) -> Option<DateTime<Utc>> {
        self.occurrence_instant(self.occurrences_generated)
    }

    pub fn is_due(&self, as_of: DateTime<Utc>) -> bool {
        self.status == Status::Active && self.next_due_at.is_some_and(|due| due <= as_of)
    }
}

fn instant_on(date: NaiveDate, anchor: DateTime<Utc>) -> DateTime<Utc> {
    date.and_time(anchor.time()).and_utc()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn definition(anchor: DateTime<Utc>) -> RecurrenceDefinition {
        RecurrenceDefinition {
            id: "retainer".to_string(),
            client_id: "acme".to_string(),
            cadence: Cadence::Monthly {
                every: 1,
                day_of_month: 31,
            },
            anchor,
            end: EndCondition::Never,
            items: vec![LineItem {
                description: "Retainer".to_string(),
                quantity: dec!(1),
                unit_price: dec!(1500.00),
                tax_rate: dec!(0),
            }],
            status: Status::Active,
            occurrences_generated: 0,
            next_due_at: None,
        }
    }

    #[test]
    fn occurrence_instant_keeps_anchor_time_of_day() {
        let anchor = Utc.with_ymd_and_hms(2024, 1, 31, 9, 30, 0).unwrap();
        let def = definition(anchor);
        assert_eq!(
            def.occurrence_instant(1),
            Some(Utc.with_ymd_and_hms(2024, 2, 29, 9, 30, 0).unwrap())
        );
    }

    #[test]
    fn due_only_when_active_and_past_next_due() {
        let anchor = Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap();
        let mut def = definition(anchor);
        def.next_due_at = def.recompute_next_due();
        assert!(def.is_due(Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap()));
        assert!(!def.is_due(Utc.with_ymd_and_hms(2024, 1, 30, 23, 59, 59).unwrap()));

        def.status = Status::Paused;
        assert!(!def.is_due(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()));
    }
}
