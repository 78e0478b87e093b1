use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The agent observed the cancellation signal and unwound.
    #[error("run cancelled")]
    Cancelled,

    #[error("agent run failed: {message}")]
    Agent { message: String },

    #[error("{message}")]
    Message { message: String },

    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn agent(message: impl std::fmt::Display) -> Self {
        Self::Agent {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn message(message: impl std::fmt::Display) -> Self {
        Self::Message {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
