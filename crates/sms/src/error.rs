use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Neither text nor a media url was given.
    #[error("nothing to send")]
    NothingToSend,

    #[error("sms account not configured: {reason}")]
    NotConfigured { reason: String },

    /// The platform API answered with a non-success status.
    #[error("sms api returned {status}: {body}")]
    Provider { status: u16, body: String },

    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn not_configured(reason: impl Into<String>) -> Self {
        Self::NotConfigured {
            reason: reason.into(),
        }
    }
}

impl courier_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

courier_common::impl_context!();
