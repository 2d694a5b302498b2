use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    FireBulk(#[from] fire_bulk::FireBulkError),

    #[error("Cannot determine a database location; pass --db")]
    NoDatabasePath,

    #[error("Failed to write '{path}': {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode output: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to install Ctrl-C handler: {0}")]
    Signal(#[from] ctrlc::Error),

    #[error("Failed to start progress thread: {0}")]
    Thread(std::io::Error),
}

impl CliError {
    /// Shorthand for converting any library error through the umbrella type.
    pub fn lib<E: Into<fire_bulk::FireBulkError>>(err: E) -> Self {
        CliError::FireBulk(err.into())
    }
}
