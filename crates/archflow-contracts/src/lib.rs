pub mod classify;
pub mod credentials;
pub mod errors;
pub mod events;
pub mod media;
pub mod models;
pub mod runs;

pub use errors::{ErrorCategory, JobError};
