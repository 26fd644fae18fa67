//! `keeper-selection`: tri-state selection over disks, volumes, folders and
//! Hyper-V machines.
//!
//! Nodes live in an arena owned by [`tree::SelectionTree`]; parents own their
//! children by index and children point back with a plain index. Checking a
//! node pushes the value down to every loaded descendant, then recomputes
//! each ancestor from its children.

pub mod error;
pub mod inventory;
pub mod loader;
pub mod tree;
pub mod types;

pub use error::{Result, SelectionError};
pub use inventory::{DeviceInventory, DiskInfo, VmInfo, VolumeInfo};
pub use loader::fs_children;
pub use tree::{Selection, SelectionTree};
pub use types::{CheckState, Node, NodeId, NodeKind, NodeSpec};
