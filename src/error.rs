//! Internal error taxonomy.
//!
//! Entry points visible to the loader must return raw `vk::Result` codes,
//! so every variant here knows how to degrade into one at the boundary.
//! Driver results are always propagated verbatim.

use ash::vk;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LayerError {
    /// The loader did not hand us a layer link-info chain. Nothing can be
    /// forwarded without it.
    #[error("loader link info missing from create-info chain")]
    MissingLinkInfo,

    /// The next element of the dispatch chain does not expose a symbol we
    /// require.
    #[error("dispatch chain is missing required symbol {0}")]
    MissingSymbol(&'static str),

    /// The same opaque handle was registered twice.
    #[error("{0} handle already registered")]
    DuplicateHandle(&'static str),

    /// A handle was used before it was registered (or after removal).
    #[error("unknown {0} handle")]
    UnknownHandle(&'static str),

    /// The downstream driver failed; carried verbatim.
    #[error("driver returned {0:?}")]
    Driver(vk::Result),
}

impl LayerError {
    /// The `vk::Result` this error surfaces as at an entry point.
    pub fn as_vk(&self) -> vk::Result {
        match self {
            LayerError::Driver(result) => *result,
            _ => vk::Result::ERROR_INITIALIZATION_FAILED,
        }
    }
}

impl From<LayerError> for vk::Result {
    fn from(err: LayerError) -> Self {
        err.as_vk()
    }
}
