use life_core::ConfigError;
use thiserror::Error;

/// Failures on the async session surface. Engine and lifecycle operations
/// never fail; they reject or no-op instead.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session has been destroyed")]
    SessionClosed,
    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, SessionError>;
