use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("session is not connected")]
    NotConnected,

    #[error("device is not logged in")]
    NotLoggedIn,

    #[error("session is already connected")]
    AlreadyConnected,

    #[error("upstream operation timed out")]
    Timeout,

    /// The upstream accepted the request and said no.
    #[error("rejected by upstream: {0}")]
    Rejected(String),

    #[error("{0}")]
    Protocol(String),
}

impl wagate_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Protocol(message)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

wagate_common::impl_context!();
