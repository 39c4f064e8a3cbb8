use thiserror::Error;

use agora_net::NetError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Network error: {0}")]
    Net(#[from] NetError),

    #[error("Not authenticated")]
    NotAuthenticated,
}

pub type Result<T> = std::result::Result<T, ClientError>;
