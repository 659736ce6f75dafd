use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("decode response: {0}")]
    Decode(String),
    #[error("{operation} failed after {attempts} attempt(s): {last}")]
    Exhausted {
        operation: String,
        attempts: u32,
        #[source]
        last: Box<ProviderError>,
    },
    #[error("operation cancelled")]
    Cancelled,
}

impl ProviderError {
    pub fn is_cancelled(&self) -> bool {
        match self {
            ProviderError::Cancelled => true,
            ProviderError::Exhausted { last, .. } => last.is_cancelled(),
            _ => false,
        }
    }

    /// Client errors other than rate limiting will not succeed on a retry.
    pub fn is_retryable(&self) -> bool {
        if self.is_cancelled() {
            return false;
        }
        match self.status() {
            Some(status) => !(400..500).contains(&status) || status == 429,
            None => true,
        }
    }

    /// HTTP status reported by the provider, if the failure came from one.
    pub fn status(&self) -> Option<u16> {
        match self {
            ProviderError::Api { status, .. } => Some(*status),
            ProviderError::Exhausted { last, .. } => last.status(),
            _ => None,
        }
    }
}
