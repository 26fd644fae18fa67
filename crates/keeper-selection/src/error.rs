use thiserror::Error;

use crate::types::NodeId;

#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    /// A lazy loader could not list a node's children.
    #[error("Failed to load children of {path}: {message}")]
    Load { path: String, message: String },
}

pub type Result<T> = std::result::Result<T, SelectionError>;
