pub mod config;
pub mod job;
pub mod result;

pub use config::RunnerConfig;
pub use job::{Job, JobLogEntry, NewJob, ResultCode};
pub use result::{JobResult, RETRY_DELAY_HEADER};
