use chicken_transport::TransportError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Unknown session: {0}")]
    UnknownSession(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
