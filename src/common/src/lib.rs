pub mod config;
pub mod error;
pub mod flight;
pub mod retry;
pub mod shutdown;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{Error, ErrorKind, Result};
pub use flight::{FlightContext, FlightInput, Step, StepResult};
pub use retry::RetryPolicy;
pub use shutdown::{ShutdownController, ShutdownSignal};
