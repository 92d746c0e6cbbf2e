//! Error types for the audio capture and analysis pipeline.

use thiserror::Error;

/// Failures raised by the capture/analysis chain and device catalog.
///
/// `DeviceUnavailable` and `NoDefaultDevice` are recoverable: callers retry on
/// a poll while the visualization keeps rendering the last published buffer.
/// `ElementLinkFailed` is fatal to `start()` only.
#[derive(Debug, Error)]
pub enum AudioError {
    /// The requested capture device could not be opened.
    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),

    /// No default output monitor is configured yet. Retry later.
    #[error("no default capture device")]
    NoDefaultDevice,

    /// The capture -> analysis stages could not be connected.
    #[error("failed to link pipeline stages: {0}")]
    ElementLinkFailed(String),

    /// An analysis tick arrived without a well-formed magnitude list.
    #[error("malformed analysis message: {0}")]
    MalformedAnalysisMessage(String),
}
