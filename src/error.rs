//! Error types for Nerd Muffin

use thiserror::Error;

/// Result type alias for Nerd Muffin operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Nerd Muffin
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    /// Upstream answered 429.
    #[error("Rate limited by completion service: {0}")]
    RateLimited(String),

    /// Upstream answered 503.
    #[error("Completion service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Generic server-side fault from the completion service.
    #[error("Completion service API error: {0}")]
    Api(String),

    /// Any other completion failure (bad request, malformed reply, ...).
    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Image generation error: {0}")]
    Image(#[from] ImageError),

    #[error("Settings store error: {0}")]
    Store(#[from] redis::RedisError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Discord error: {0}")]
    Discord(#[from] serenity::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the completion call that produced this error is worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::RateLimited(_) | Error::ServiceUnavailable(_) | Error::Api(_)
        )
    }

    /// Whether this error comes from the settings store.
    pub fn is_store(&self) -> bool {
        matches!(self, Error::Store(_))
    }
}

/// Failures reported by the image generation service.
#[derive(Error, Debug)]
pub enum ImageError {
    #[error("image generation denied: {0}")]
    Denied(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("session expired")]
    SessionExpired,

    #[error("image service returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("image transport failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl ImageError {
    /// Per-item failures that leave a hole in the batch instead of aborting it.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ImageError::Denied(_) | ImageError::Unauthorized(_) | ImageError::SessionExpired
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classes() {
        assert!(Error::RateLimited("slow down".into()).is_transient());
        assert!(Error::ServiceUnavailable("503".into()).is_transient());
        assert!(Error::Api("500".into()).is_transient());
        assert!(!Error::Llm("bad request".into()).is_transient());
        assert!(!Error::Config("missing".into()).is_transient());
    }

    #[test]
    fn test_permanent_image_errors() {
        assert!(ImageError::Denied("nsfw".into()).is_permanent());
        assert!(ImageError::SessionExpired.is_permanent());
        assert!(!ImageError::Api { status: 500, body: String::new() }.is_permanent());
    }
}
