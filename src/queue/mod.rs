pub mod manager;

pub use manager::{Job, JobManager};
