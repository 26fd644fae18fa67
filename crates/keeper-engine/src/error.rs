use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine program could not be started.
    #[error("failed to start engine '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("engine process error: {0}")]
    Process(#[from] std::io::Error),

    /// Terminated by a signal, so there is no exit code.
    #[error("engine was terminated without an exit code")]
    Killed,
}

pub type Result<T> = std::result::Result<T, EngineError>;
