pub mod dispatcher;
pub mod executor;

pub use dispatcher::{submit_job, JobDispatcher};
pub use executor::{JobExecutor, ModeExecutor, ProcessingError};
