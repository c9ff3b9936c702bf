mod error;
mod phase;
mod shutdown;

pub mod prelude {
    pub use crate::error::ErrorKind;
    pub use crate::phase::{Phase, RunPhase};
    pub use crate::shutdown::{DelegatedShutdownListener, ShutdownHandle, ShutdownSignalError};
}
