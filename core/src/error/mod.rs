#[allow(clippy::module_inception)]
pub mod error;
pub mod plan;
pub mod transport;

pub use error::{ConfigError, RunError};
pub use plan::PlanError;
pub use transport::{CancelCause, TransportError};
