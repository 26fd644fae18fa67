use serde::{Deserialize, Serialize};
use std::fmt;

/// Index of a node in its [`SelectionTree`](crate::tree::SelectionTree).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Check box state. `Indeterminate` is only ever computed from children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckState {
    Checked,
    Unchecked,
    Indeterminate,
}

impl CheckState {
    pub fn from_bool(checked: bool) -> Self {
        if checked {
            CheckState::Checked
        } else {
            CheckState::Unchecked
        }
    }

    /// State of a parent given its children's states: all checked, all
    /// unchecked, or a mix. `None` when there are no children.
    pub fn combine<I>(children: I) -> Option<Self>
    where
        I: IntoIterator<Item = CheckState>,
    {
        let mut iter = children.into_iter();
        let first = iter.next()?;
        if first == CheckState::Indeterminate {
            return Some(CheckState::Indeterminate);
        }
        for state in iter {
            if state != first {
                return Some(CheckState::Indeterminate);
            }
        }
        Some(first)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Disk,
    Volume,
    Folder,
    File,
    HyperVSystem,
    HyperVVolume,
}

/// Descriptive attributes of a node, as supplied by enumeration or a loader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub name: String,
    /// Path or identifier handed to the engine. Empty for placeholders.
    pub path: String,
    pub kind: NodeKind,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub is_boot_volume: bool,
    #[serde(default)]
    pub is_server: bool,
    /// Informational entry such as "(Volume not accessible)".
    #[serde(default)]
    pub placeholder: bool,
    /// Children can be loaded on expansion.
    #[serde(default)]
    pub expandable: bool,
}

impl NodeSpec {
    pub fn new(name: impl Into<String>, path: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            kind,
            size: None,
            is_boot_volume: false,
            is_server: false,
            placeholder: false,
            expandable: false,
        }
    }

    pub fn placeholder(message: impl Into<String>) -> Self {
        Self {
            placeholder: true,
            ..Self::new(message, "", NodeKind::Folder)
        }
    }

    pub fn with_size(mut self, bytes: u64) -> Self {
        self.size = Some(bytes);
        self
    }

    pub fn boot_volume(mut self) -> Self {
        self.is_boot_volume = true;
        self
    }

    pub fn server(mut self) -> Self {
        self.is_server = true;
        self
    }

    pub fn expandable(mut self) -> Self {
        self.expandable = true;
        self
    }
}

/// One arena slot.
#[derive(Debug, Clone)]
pub struct Node {
    pub spec: NodeSpec,
    pub state: CheckState,
    pub expanded: bool,
    /// Children come from a loader on first expansion.
    pub lazy: bool,
    /// The loader has run.
    pub loaded: bool,
    pub(crate) children: Vec<NodeId>,
    pub(crate) parent: Option<NodeId>,
}

impl Node {
    pub(crate) fn new(spec: NodeSpec, state: CheckState, parent: Option<NodeId>, lazy: bool) -> Self {
        Self {
            spec,
            state,
            expanded: false,
            lazy,
            loaded: false,
            children: Vec::new(),
            parent,
        }
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// A lazy node whose loader has not run yet.
    pub fn needs_load(&self) -> bool {
        self.lazy && !self.loaded
    }
}
