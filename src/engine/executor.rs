use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::definition::{RecurrenceDefinition, Status};
use crate::engine::schedule::Occurrence;
use crate::invoice::materialize;
use crate::store::{CommitOutcome, DefinitionUpdate, InvoiceId, RecurrenceStore, StoreError};

/// Expected outcomes of processing one due definition. End-of-series and
/// duplicate detection are outcomes, not errors: callers must handle them
/// explicitly instead of catching an exception they could ignore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    /// Invoice created and schedule advanced.
    Generated(InvoiceId),
    /// This occurrence was already materialized (crash-then-retry, or a
    /// concurrent scheduler instance won the race).
    AlreadyGenerated(InvoiceId),
    /// The end condition is satisfied; the definition is now Ended.
    Ended,
}

#[derive(Error, Debug)]
pub enum GenerateError {
    /// Store/network failure. Nothing was advanced; the occurrence stays
    /// due and is retried on the next tick, indefinitely.
    #[error("transient store failure: {0}")]
    Transient(#[from] StoreError),

    /// Business-rule rejection. The definition is flagged Failing and
    /// excluded from selection until a human intervenes; the occurrence is
    /// NOT marked generated, so it cannot silently vanish.
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// The generation log and the definition's counter disagree. Must
    /// never be swallowed.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

/// Process one due definition: materialize its next occurrence exactly
/// once and advance the schedule, all within a single store transaction.
///
/// The occurrence index is the count of previously generated occurrences,
/// never a function of `as_of`, so retries and long pauses cannot drift
/// the series.
pub fn generate<S: RecurrenceStore + ?Sized>(
    store: &S,
    definition: &RecurrenceDefinition,
    as_of: DateTime<Utc>,
) -> Result<GenerationOutcome, GenerateError> {
    let index = definition.occurrences_generated;

    let issue_date = match definition.occurrence(index) {
        Occurrence::Scheduled(date) => date,
        Occurrence::EndOfSeries => {
            store.update_definition(
                &definition.id,
                &DefinitionUpdate {
                    status: Some(Status::Ended),
                    next_due_at: Some(None),
                    ..Default::default()
                },
            )?;
            return Ok(GenerationOutcome::Ended);
        }
    };

    // Idempotency guard: a logged occurrence is never materialized twice.
    if let Some(existing) = store.find_generation(&definition.id, index)? {
        return Ok(GenerationOutcome::AlreadyGenerated(existing.invoice_id));
    }

    let logged = store.count_generations(&definition.id)?;
    if logged != index {
        // A concurrent scheduler committing this very occurrence between
        // the two reads is the one benign explanation; anything else is
        // a counter/log mismatch.
        if let Some(existing) = store.find_generation(&definition.id, index)? {
            return Ok(GenerationOutcome::AlreadyGenerated(existing.invoice_id));
        }
        return Err(GenerateError::InvariantViolation(format!(
            "definition {}: {logged} log entries but occurrences_generated = {index}",
            definition.id
        )));
    }

    let Some(client) = store.load_client(&definition.client_id)? else {
        store.update_definition(
            &definition.id,
            &DefinitionUpdate {
                status: Some(Status::Failing),
                ..Default::default()
            },
        )?;
        return Err(GenerateError::Permanent(format!(
            "client {} not found",
            definition.client_id
        )));
    };

    let command = materialize(definition, &client, issue_date, as_of);

    // Advance the schedule as part of the same commit. If the series is
    // exhausted after this occurrence, end it here so it is never
    // selected again.
    let mut update = DefinitionUpdate {
        occurrences_generated: Some(index + 1),
        ..Default::default()
    };
    match definition.occurrence_instant(index + 1) {
        Some(next_due) => update.next_due_at = Some(Some(next_due)),
        None => {
            update.next_due_at = Some(None);
            update.status = Some(Status::Ended);
        }
    }

    match store.commit_generation(&command, &update)? {
        CommitOutcome::Committed(invoice_id) => Ok(GenerationOutcome::Generated(invoice_id)),
        // Lost the race against a concurrent scheduler; same as a retry.
        CommitOutcome::DuplicateOccurrence(invoice_id) => {
            Ok(GenerationOutcome::AlreadyGenerated(invoice_id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::LineItem;
    use crate::engine::schedule::{Cadence, EndCondition};
    use crate::engine::selector::select_due;
    use crate::store::{ClientTerms, FailMode, MemoryStore};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn seeded(end: EndCondition) -> (MemoryStore, RecurrenceDefinition) {
        let store = MemoryStore::new();
        store.insert_client(
            "acme",
            ClientTerms {
                currency: "USD".to_string(),
                payment_terms_days: 30,
            },
        );
        let mut definition = RecurrenceDefinition {
            id: "retainer".to_string(),
            client_id: "acme".to_string(),
            cadence: Cadence::Monthly {
                every: 1,
                day_of_month: 31,
            },
            anchor: Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap(),
            end,
            items: vec![LineItem {
                description: "Retainer".to_string(),
                quantity: dec!(1),
                unit_price: dec!(1500.00),
                tax_rate: dec!(0),
            }],
            status: Status::Active,
            occurrences_generated: 0,
            next_due_at: None,
        };
        definition.next_due_at = definition.recompute_next_due();
        store.insert_definition(definition.clone());
        (store, definition)
    }

    fn as_of(year: i32, month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, 12, 0, 0).unwrap()
    }

    #[test]
    fn generates_once_then_reports_duplicate() {
        let (store, definition) = seeded(EndCondition::Never);
        let now = as_of(2024, 2, 1);

        let first = generate(&store, &definition, now).unwrap();
        let GenerationOutcome::Generated(invoice_id) = first.clone() else {
            panic!("expected Generated, got {first:?}");
        };

        // Retry with the stale snapshot (crash before the caller saw the
        // commit): exactly one invoice, same id.
        let second = generate(&store, &definition, now).unwrap();
        assert_eq!(second, GenerationOutcome::AlreadyGenerated(invoice_id));
        assert_eq!(store.invoice_count(), 1);

        let advanced = store.definition("retainer").unwrap();
        assert_eq!(advanced.occurrences_generated, 1);
        assert_eq!(
            advanced.next_due_at,
            Some(Utc.with_ymd_and_hms(2024, 2, 29, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn concurrent_generation_produces_exactly_one_invoice() {
        let (store, definition) = seeded(EndCondition::Never);
        let now = as_of(2024, 2, 1);

        let (left, right) = std::thread::scope(|scope| {
            let a = scope.spawn(|| generate(&store, &definition, now).unwrap());
            let b = scope.spawn(|| generate(&store, &definition, now).unwrap());
            (a.join().unwrap(), b.join().unwrap())
        });

        let outcomes = [left, right];
        let generated: Vec<&InvoiceId> = outcomes
            .iter()
            .filter_map(|o| match o {
                GenerationOutcome::Generated(id) => Some(id),
                _ => None,
            })
            .collect();
        let duplicates: Vec<&InvoiceId> = outcomes
            .iter()
            .filter_map(|o| match o {
                GenerationOutcome::AlreadyGenerated(id) => Some(id),
                _ => None,
            })
            .collect();

        assert_eq!(generated.len(), 1, "exactly one winner");
        assert_eq!(duplicates.len(), 1, "exactly one loser");
        assert_eq!(generated[0], duplicates[0], "loser sees the winner's invoice");
        assert_eq!(store.invoice_count(), 1);
    }

    #[test]
    fn after_count_generates_exactly_k_then_ends() {
        let (store, _) = seeded(EndCondition::AfterCount { count: 3 });
        let now = as_of(2024, 12, 1);

        let mut generated = 0;
        loop {
            let definition = store.definition("retainer").unwrap();
            match generate(&store, &definition, now).unwrap() {
                GenerationOutcome::Generated(_) => generated += 1,
                GenerationOutcome::Ended => break,
                GenerationOutcome::AlreadyGenerated(_) => panic!("nothing retried here"),
            }
        }

        assert_eq!(generated, 3);
        assert_eq!(store.invoice_count(), 3);
        let ended = store.definition("retainer").unwrap();
        assert_eq!(ended.status, Status::Ended);
        assert_eq!(ended.next_due_at, None);

        // The commit of occurrence 2 already ended the series, so a later
        // direct call still reports Ended without touching the log.
        let again = generate(&store, &ended, now).unwrap();
        assert_eq!(again, GenerationOutcome::Ended);
        assert_eq!(store.invoice_count(), 3);
    }

    #[test]
    fn on_or_before_never_generates_past_the_bound() {
        let bound = chrono::NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();
        let (store, _) = seeded(EndCondition::OnOrBefore { date: bound });
        let now = as_of(2025, 1, 1);

        let mut issue_dates = Vec::new();
        loop {
            let definition = store.definition("retainer").unwrap();
            match generate(&store, &definition, now).unwrap() {
                GenerationOutcome::Generated(id) => {
                    issue_dates.push(store.invoice(&id).unwrap().issue_date);
                }
                GenerationOutcome::Ended => break,
                GenerationOutcome::AlreadyGenerated(_) => panic!("nothing retried here"),
            }
        }

        assert_eq!(issue_dates.len(), 3); // Jan 31, Feb 29, Mar 31
        assert!(issue_dates.iter().all(|date| *date <= bound));
    }

    #[test]
    fn missing_client_marks_failing_without_consuming_the_occurrence() {
        let (store, definition) = seeded(EndCondition::Never);
        store.remove_client("acme");
        let now = as_of(2024, 2, 1);

        let result = generate(&store, &definition, now);
        assert!(matches!(result, Err(GenerateError::Permanent(_))));
        assert_eq!(store.invoice_count(), 0);
        assert_eq!(store.count_generations("retainer").unwrap(), 0);

        let flagged = store.definition("retainer").unwrap();
        assert_eq!(flagged.status, Status::Failing);
        assert_eq!(flagged.occurrences_generated, 0, "occurrence not consumed");
        assert!(select_due(&store, now).unwrap().is_empty(), "excluded from selection");
    }

    #[test]
    fn transient_failure_changes_nothing_and_retry_succeeds() {
        let (store, definition) = seeded(EndCondition::Never);
        let now = as_of(2024, 2, 1);

        store.set_fail_mode(FailMode::Timeout);
        let result = generate(&store, &definition, now);
        assert!(matches!(result, Err(GenerateError::Transient(_))));

        store.set_fail_mode(FailMode::None);
        assert_eq!(store.invoice_count(), 0);
        assert_eq!(store.definition("retainer").unwrap(), definition);
        // Still due, so the next tick retries and succeeds.
        assert_eq!(select_due(&store, now).unwrap().len(), 1);
        assert!(matches!(
            generate(&store, &definition, now).unwrap(),
            GenerationOutcome::Generated(_)
        ));
    }

    #[test]
    fn counter_log_mismatch_is_an_invariant_violation() {
        let (store, mut definition) = seeded(EndCondition::Never);
        definition.occurrences_generated = 2; // tampered: log is empty
        store.insert_definition(definition.clone());
        let now = as_of(2024, 12, 1);

        let result = generate(&store, &definition, now);
        assert!(matches!(result, Err(GenerateError::InvariantViolation(_))));
        assert_eq!(store.invoice_count(), 0);
    }

    #[test]
    fn paused_series_resumes_at_next_ungenerated_occurrence() {
        let (store, definition) = seeded(EndCondition::Never);

        // Generate January, then pause for months.
        let first = generate(&store, &definition, as_of(2024, 2, 1)).unwrap();
        assert!(matches!(first, GenerationOutcome::Generated(_)));
        store.update_definition(
            "retainer",
            &DefinitionUpdate {
                status: Some(Status::Paused),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(select_due(&store, as_of(2024, 8, 1)).unwrap().is_empty());

        // Reactivate in August: the next occurrence is February's, dated
        // February, not "today".
        store.update_definition(
            "retainer",
            &DefinitionUpdate {
                status: Some(Status::Active),
                ..Default::default()
            },
        )
        .unwrap();
        let resumed = store.definition("retainer").unwrap();
        let outcome = generate(&store, &resumed, as_of(2024, 8, 1)).unwrap();
        let GenerationOutcome::Generated(id) = outcome else {
            panic!("expected Generated");
        };
        let invoice = store.invoice(&id).unwrap();
        assert_eq!(invoice.occurrence_index, 1);
        assert_eq!(
            invoice.issue_date,
            chrono::NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()
        );
    }
}
