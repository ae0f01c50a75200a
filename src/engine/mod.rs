pub mod executor;
pub mod schedule;
pub mod scheduler;
pub mod selector;

pub use executor::{generate, GenerateError, GenerationOutcome};
pub use schedule::{compute_occurrence, Cadence, EndCondition, Occurrence, Weekday};
pub use scheduler::{Scheduler, SchedulerConfig, ShutdownHandle, TickReport};
pub use selector::select_due;
