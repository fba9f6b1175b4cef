use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid params: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid leader ID: {0:?}")]
    InvalidLeaderId(String),
}
