use tracing::{debug, warn};

use crate::{
    error::{Result, SelectionError},
    types::{CheckState, Node, NodeId, NodeKind, NodeSpec},
};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// What a fully or partly checked tree asks to back up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    /// Paths of the topmost fully checked disks, volumes, folders and files.
    pub sources: Vec<String>,
    /// Names of fully checked Hyper-V machines.
    pub hyperv_machines: Vec<String>,
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty() && self.hyperv_machines.is_empty()
    }
}

/// Arena-backed tri-state selection tree.
///
/// Single-threaded: every mutation takes `&mut self` and finishes before it
/// returns.
#[derive(Debug, Clone, Default)]
pub struct SelectionTree {
    nodes: Vec<Node>,
    roots: Vec<NodeId>,
}

impl SelectionTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(id.0).ok_or(SelectionError::UnknownNode(id))
    }

    pub fn state(&self, id: NodeId) -> Result<CheckState> {
        Ok(self.node(id)?.state)
    }

    pub fn children(&self, id: NodeId) -> Result<&[NodeId]> {
        Ok(self.node(id)?.children())
    }

    pub fn parent(&self, id: NodeId) -> Result<Option<NodeId>> {
        Ok(self.node(id)?.parent)
    }

    pub fn add_root(&mut self, spec: NodeSpec) -> NodeId {
        self.insert_root(spec, false)
    }

    pub fn add_lazy_root(&mut self, spec: NodeSpec) -> NodeId {
        self.insert_root(spec, true)
    }

    /// Append a child. It takes the parent's binary state (unchecked under an
    /// indeterminate parent) and the parent chain is recomputed.
    pub fn add_child(&mut self, parent: NodeId, spec: NodeSpec) -> Result<NodeId> {
        self.attach(parent, spec, false)
    }

    pub fn add_lazy_child(&mut self, parent: NodeId, spec: NodeSpec) -> Result<NodeId> {
        self.attach(parent, spec, true)
    }

    /// User check or uncheck. Forces every loaded descendant to the same value,
    /// then recomputes each ancestor. Returns the nodes whose state changed.
    pub fn set_checked(&mut self, id: NodeId, checked: bool) -> Result<Vec<NodeId>> {
        self.node(id)?;
        let value = CheckState::from_bool(checked);
        let mut changed = Vec::new();

        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let node = &mut self.nodes[current.0];
            if node.state != value {
                node.state = value;
                changed.push(current);
            }
            stack.extend(node.children.iter().rev().copied());
        }

        if let Some(parent) = self.nodes[id.0].parent {
            changed.extend(self.recompute_upward(parent)?);
        }
        Ok(changed)
    }

    /// A click on the check box: a checked node unchecks, anything else checks.
    pub fn toggle(&mut self, id: NodeId) -> Result<Vec<NodeId>> {
        let checked = self.state(id)? != CheckState::Checked;
        self.set_checked(id, checked)
    }

    /// Recompute `id` and then each of its ancestors from their children.
    /// Nodes without children keep their state. Returns the nodes that changed.
    pub fn recompute_upward(&mut self, id: NodeId) -> Result<Vec<NodeId>> {
        self.node(id)?;
        let mut changed = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let combined = {
                let node = &self.nodes[current.0];
                CheckState::combine(node.children.iter().map(|c| self.nodes[c.0].state))
            };
            let node = &mut self.nodes[current.0];
            if let Some(state) = combined {
                if node.state != state {
                    node.state = state;
                    changed.push(current);
                }
            }
            cursor = node.parent;
        }
        Ok(changed)
    }

    /// Expand a node. The first expansion of a lazy node runs `loader` once;
    /// the new children take the node's state before its ancestors are
    /// recomputed. A failing loader leaves a single error placeholder.
    pub fn expand<F>(&mut self, id: NodeId, loader: F) -> Result<Vec<NodeId>>
    where
        F: FnOnce(&NodeSpec) -> Result<Vec<NodeSpec>>,
    {
        let node = self.node(id)?;
        if !node.needs_load() {
            self.nodes[id.0].expanded = true;
            return Ok(Vec::new());
        }

        let specs = match loader(&node.spec) {
            Ok(specs) => specs,
            Err(e) => {
                warn!(path = %node.spec.path, "could not load children: {e}");
                vec![NodeSpec::placeholder(format!("(Error: {e})"))]
            }
        };
        debug!(path = %node.spec.path, count = specs.len(), "children loaded");

        let inherited = self.inherited_state(id);
        let mut added = Vec::with_capacity(specs.len());
        for spec in specs {
            let lazy = spec.expandable;
            let child = self.push_node(Node::new(spec, inherited, Some(id), lazy));
            self.nodes[id.0].children.push(child);
            added.push(child);
        }

        let node = &mut self.nodes[id.0];
        node.loaded = true;
        node.expanded = true;
        self.recompute_upward(id)?;
        Ok(added)
    }

    pub fn collapse(&mut self, id: NodeId) -> Result<()> {
        self.node(id)?;
        self.nodes[id.0].expanded = false;
        Ok(())
    }

    /// Every node with children holds exactly the state its children imply.
    pub fn is_consistent(&self) -> bool {
        self.nodes.iter().all(|node| {
            match CheckState::combine(node.children.iter().map(|c| self.nodes[c.0].state)) {
                Some(expected) => expected == node.state,
                None => true,
            }
        })
    }

    /// `name (X.XX GB) [Boot Volume] [Windows Server]`, with each part only when it
    /// applies.
    pub fn display_name(&self, id: NodeId) -> Result<String> {
        let spec = &self.node(id)?.spec;
        let mut name = spec.name.clone();
        if let Some(size) = spec.size.filter(|s| *s > 0) {
            name.push_str(&format!(" ({:.2} GB)", size as f64 / BYTES_PER_GB));
        }
        if spec.is_boot_volume {
            name.push_str(" [Boot Volume]");
        }
        if spec.is_server {
            name.push_str(" [Windows Server]");
        }
        Ok(name)
    }

    /// Collect the checked selection. A fully checked node contributes itself
    /// and hides its descendants; partly checked nodes are descended into.
    /// Hyper-V machines are backed up whole, so a machine with any checked
    /// volume contributes its name and its volumes never become sources.
    pub fn selection(&self) -> Selection {
        let mut selection = Selection::default();
        let mut stack: Vec<NodeId> = self.roots.iter().rev().copied().collect();

        while let Some(id) = stack.pop() {
            let node = &self.nodes[id.0];
            match node.state {
                CheckState::Unchecked => {}
                CheckState::Indeterminate if node.spec.kind == NodeKind::HyperVSystem => {
                    selection.hyperv_machines.push(node.spec.path.clone());
                }
                CheckState::Indeterminate => {
                    stack.extend(node.children.iter().rev().copied());
                }
                CheckState::Checked => {
                    if node.spec.placeholder || node.spec.path.is_empty() {
                        continue;
                    }
                    match node.spec.kind {
                        NodeKind::HyperVSystem => selection.hyperv_machines.push(node.spec.path.clone()),
                        NodeKind::HyperVVolume => {}
                        _ => selection.sources.push(node.spec.path.clone()),
                    }
                }
            }
        }
        selection
    }

    fn attach(&mut self, parent: NodeId, spec: NodeSpec, lazy: bool) -> Result<NodeId> {
        self.node(parent)?;
        let state = self.inherited_state(parent);
        let id = self.push_node(Node::new(spec, state, Some(parent), lazy));
        self.nodes[parent.0].children.push(id);
        self.recompute_upward(parent)?;
        Ok(id)
    }

    fn insert_root(&mut self, spec: NodeSpec, lazy: bool) -> NodeId {
        let id = self.push_node(Node::new(spec, CheckState::Unchecked, None, lazy));
        self.roots.push(id);
        id
    }

    fn push_node(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    fn inherited_state(&self, parent: NodeId) -> CheckState {
        match self.nodes[parent.0].state {
            CheckState::Checked => CheckState::Checked,
            _ => CheckState::Unchecked,
        }
    }
}
