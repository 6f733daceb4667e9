use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Message(String),

    #[error("webhook request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The sink answered with a non-success status after all retries.
    #[error("webhook returned status {0}")]
    Status(u16),
}

impl wagate_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message(message)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

wagate_common::impl_context!();
