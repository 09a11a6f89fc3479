pub mod maintenance;
pub mod memory;
pub mod model;
pub mod repo;
pub mod retry;
pub mod runner;
pub mod step;
pub mod tracker;

pub use maintenance::{Maintenance, MaintenanceReport};
pub use memory::MemoryJobTracker;
pub use model::{JobRecord, JobStatus};
pub use repo::JobsRepo;
pub use runner::{JobRunner, Processed};
pub use step::{SavedTracksStep, Step, StepOutcome, StepRegistry, SAVED_TRACKS_JOB};
pub use tracker::JobTracker;
