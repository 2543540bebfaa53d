//! Errors reported to callers of the engine

use crate::{backend::driver::DriverError, device::DisplayHandle, layer::LayerHandle};

/// Errors thrown by the [`Composer`](crate::device::Composer) interface
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The display handle is unknown
    #[error("Unknown display `{0:?}`")]
    BadDisplay(DisplayHandle),
    /// The layer handle is unknown, or the display has no layers (`None`)
    #[error("Unknown layer `{0:?}` or empty layer set")]
    BadLayer(Option<LayerHandle>),
    /// The requested configuration cannot be realized
    #[error("Bad configuration: {0}")]
    BadConfig(&'static str),
    /// Hardware resources could not be acquired
    #[error("Hardware resources are unavailable")]
    NoResources,
    /// The requested feature is deliberately not implemented
    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),
    /// The driver reported a fault that could not be recovered locally
    #[error("The driver reported an error")]
    Driver(#[from] DriverError),
    /// A background thread could not be started
    #[error("Failed to spawn the {name} thread")]
    Thread {
        /// Name of the thread
        name: &'static str,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
    /// An event source could not be inserted into the event loop
    #[error("Failed to insert an event source into the event loop")]
    EventLoop(#[source] calloop::Error),
}

/// Successful outcome of a validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidateStatus {
    /// Every layer gets the composition kind the client requested
    None,
    /// Some layers get a different composition kind than requested
    HasChanges {
        /// Number of layers with a changed composition kind
        changed: usize,
    },
}
