use kakiko_core::converter::ConversionOutcome;
use tokio::sync::oneshot;

/// A unit of work sent to a conversion worker.
#[derive(Debug)]
pub enum WorkRequest {
    /// Run the converter on `mml` and reply with the outcome.
    Convert {
        mml: String,
        response: oneshot::Sender<ConversionOutcome>,
    },
    /// Stop the worker after acknowledging on `response`.
    Shutdown { response: oneshot::Sender<()> },
}
