//! Types shared between the formflow crates: submissions, dispatch states and
//! the logging setup.

pub mod logging;
pub mod status;
pub mod submission;

pub use status::{DispatchId, DispatchState};
pub use submission::{FieldValue, Payload, Submission};
pub use tracing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
}
