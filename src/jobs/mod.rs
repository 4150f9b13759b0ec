//! Background job infrastructure: progress tracking, the leased worker pool, and single-flight
//! coordination of duplicate requests.

mod progress;
mod scheduler;
mod single_flight;

pub use progress::{ProgressTracker, TrackedState, TrackerError};
pub use scheduler::{
    CancelFlag, Job, JobContext, JobError, Lease, Scheduler, SchedulerError, SchedulerSettings,
};
pub use single_flight::SingleFlight;
