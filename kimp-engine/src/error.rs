use kimp_data::error::DataError;
use std::path::PathBuf;
use thiserror::Error;

/// All errors that can stop the engine from starting.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to read symbols file {path}: {error}")]
    SymbolsFile { path: PathBuf, error: String },

    #[error("symbol universe is empty")]
    EmptyUniverse,

    #[error("engine already started")]
    AlreadyStarted,

    #[error("data: {0}")]
    Data(#[from] DataError),
}

impl EngineError {
    pub(crate) fn symbols_file(path: impl Into<PathBuf>, error: impl std::fmt::Display) -> Self {
        Self::SymbolsFile {
            path: path.into(),
            error: error.to_string(),
        }
    }
}
