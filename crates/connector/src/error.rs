use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConnectorError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    #[error("timed out after {0} ms")]
    Timeout(u64),
}

impl ConnectorError {
    /// Auth rejections are terminal; everything else is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ConnectorError::AuthFailed(_))
    }
}

/// Error returned by a subscriber handler. Logged, never propagated.
#[derive(Error, Debug)]
#[error("handler failed: {0}")]
pub struct HandlerError(pub Box<dyn std::error::Error + Send + Sync>);

impl HandlerError {
    pub fn msg(msg: impl Into<String>) -> Self {
        Self(msg.into().into())
    }
}

#[derive(Error, Debug)]
pub enum ResolverError {
    #[error("unsupported source: {0}")]
    UnsupportedSource(String),
    #[error("missing key: {0}")]
    MissingKey(String),
}
