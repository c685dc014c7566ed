use loadline_backend::BackendError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Not signed in")]
    NotSignedIn,

    #[error("Conversation view has shut down")]
    ViewClosed,

    /// Backend failures are passed through as reported.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

pub type Result<T> = std::result::Result<T, ChatError>;
