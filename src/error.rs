use crate::model::ResponseData;

/// Errors produced by the core engine.
///
/// Parse and configuration errors surface directly to the caller. Probe-time
/// transport and validation failures inside a minimization batch are folded
/// into the per-field outcome instead (the field is kept), with two
/// exceptions: the original-request probe aborts the batch with
/// [`Error::OriginalFailed`], and cancellation always aborts with
/// [`Error::Cancelled`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("validation config error: {0}")]
    ConfigRejected(String),

    #[error("expression error: {0}")]
    Expression(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("unknown encoding '{0}'")]
    UnknownCodec(String),

    #[error("original request failed validation: {message}")]
    OriginalFailed {
        message: String,
        response: Option<Box<ResponseData>>,
    },

    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    pub(crate) fn original_failed(message: impl Into<String>) -> Self {
        Error::OriginalFailed {
            message: message.into(),
            response: None,
        }
    }
}
