/// Engine-wide error type. Navigation catches all of these and materializes
/// an error page instead of crashing the window.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("tls error: {0}")]
    Tls(String),

    #[error("cache corruption: {0}")]
    CacheCorruption(String),

    #[error("script error: {0}")]
    Script(String),

    #[error("blocked by content security policy: {0}")]
    CspViolation(String),

    #[error("profile error: {0}")]
    Profile(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Short kind tag used on generated error pages.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidUrl(_) => "invalid url",
            Error::UnsupportedScheme(_) => "unsupported scheme",
            Error::Network(_) => "network error",
            Error::Protocol(_) => "protocol error",
            Error::Tls(_) => "tls error",
            Error::CacheCorruption(_) => "cache corruption",
            Error::Script(_) => "script error",
            Error::CspViolation(_) => "csp violation",
            Error::Profile(_) => "profile error",
            Error::Io(_) => "io error",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
