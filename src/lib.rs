pub mod config;
pub mod definition;
pub mod engine;
pub mod error;
pub mod invoice;
pub mod store;

pub use definition::{LineItem, RecurrenceDefinition, Status};
pub use engine::{
    compute_occurrence, generate, select_due, Cadence, EndCondition, GenerateError,
    GenerationOutcome, Occurrence, Scheduler, SchedulerConfig, ShutdownHandle, TickReport,
    Weekday,
};
pub use error::{RecurError, Result};
pub use invoice::{InvoiceCommand, InvoiceLine};
pub use store::{
    ClientTerms, CommitOutcome, DefinitionUpdate, FileStore, GenerationLogEntry, InvoiceId,
    MemoryStore, RecurrenceStore, StoreError,
};
