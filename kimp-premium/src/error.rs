use serde::{Deserialize, Serialize};
use thiserror::Error;

/// All errors generated in `kimp-premium`.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, Error)]
pub enum PremiumError {
    #[error("I/O error writing {path}: {error}")]
    Io { path: String, error: String },

    #[error("failed to serialise {0}")]
    Serialise(String),
}

impl PremiumError {
    pub fn io(path: &std::path::Path, error: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            error: error.to_string(),
        }
    }
}

impl From<serde_json::Error> for PremiumError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialise(error.to_string())
    }
}
