use serde::{Deserialize, Serialize};

use crate::{
    error::Result,
    tree::SelectionTree,
    types::{NodeKind, NodeSpec},
};

/// Raw device listing produced by the platform's enumeration tooling.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInventory {
    #[serde(default)]
    pub disks: Vec<DiskInfo>,
    #[serde(default)]
    pub hyperv_machines: Vec<VmInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskInfo {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub volumes: Vec<VolumeInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeInfo {
    pub name: String,
    /// Mount point or volume identifier.
    pub path: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub is_boot_volume: bool,
    /// Holds a server operating system.
    #[serde(default)]
    pub is_server: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmInfo {
    pub name: String,
    #[serde(default)]
    pub volumes: Vec<VolumeInfo>,
}

impl VolumeInfo {
    fn spec(&self, kind: NodeKind) -> NodeSpec {
        let mut spec = NodeSpec::new(&self.name, &self.path, kind);
        spec.size = self.size;
        spec.is_boot_volume = self.is_boot_volume;
        spec.is_server = self.is_server;
        spec
    }
}

impl SelectionTree {
    /// Build the top of the tree from an inventory: disks with their volumes
    /// (folders load on expansion), then Hyper-V machines with their volumes.
    pub fn from_inventory(inventory: &DeviceInventory) -> Result<Self> {
        let mut tree = SelectionTree::new();

        for disk in &inventory.disks {
            let mut spec = NodeSpec::new(&disk.name, &disk.path, NodeKind::Disk);
            spec.size = disk.size;
            let disk_id = tree.add_root(spec);
            for volume in &disk.volumes {
                tree.add_lazy_child(disk_id, volume.spec(NodeKind::Volume).expandable())?;
            }
        }

        for vm in &inventory.hyperv_machines {
            let vm_id = tree.add_root(NodeSpec::new(
                format!("Hyper-V: {}", vm.name),
                &vm.name,
                NodeKind::HyperVSystem,
            ));
            for volume in &vm.volumes {
                tree.add_child(vm_id, volume.spec(NodeKind::HyperVVolume))?;
            }
        }

        Ok(tree)
    }
}
