use chrono::{DateTime, Utc};

use crate::definition::RecurrenceDefinition;
use crate::store::{RecurrenceStore, StoreError};

/// Definitions due as of `as_of`, in deterministic processing order:
/// ascending next-due instant, ties broken by definition id. Side-effect
/// free; calling it again reflects the store's current truth, so a
/// restarted tick is always safe.
pub fn select_due<S: RecurrenceStore + ?Sized>(
    store: &S,
    as_of: DateTime<Utc>,
) -> Result<Vec<RecurrenceDefinition>, StoreError> {
    let mut due: Vec<RecurrenceDefinition> = store
        .load_active_definitions(as_of)?
        .into_iter()
        .filter(|definition| definition.is_due(as_of))
        .collect();
    due.sort_by(|a, b| {
        a.next_due_at
            .cmp(&b.next_due_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    Ok(due)
}
