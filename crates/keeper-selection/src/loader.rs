use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use tracing::debug;

use crate::{
    error::{Result, SelectionError},
    types::{NodeKind, NodeSpec},
};

/// Folder loader for [`SelectionTree::expand`](crate::tree::SelectionTree::expand).
///
/// Lists the directories of `parent.path` followed by its files, each group
/// sorted by name. Non-empty directories are expandable. A missing or
/// unreadable path yields one placeholder entry instead of an error.
pub fn fs_children(parent: &NodeSpec) -> Result<Vec<NodeSpec>> {
    if parent.path.is_empty() {
        return Ok(vec![NodeSpec::placeholder("(Volume not accessible)")]);
    }

    let root = Path::new(&parent.path);
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Ok(vec![NodeSpec::placeholder("(Volume not accessible)")]);
        }
        Err(e) if e.kind() == ErrorKind::PermissionDenied => {
            return Ok(vec![NodeSpec::placeholder("(Access Denied)")]);
        }
        Err(e) => {
            return Err(SelectionError::Load {
                path: parent.path.clone(),
                message: e.to_string(),
            })
        }
    };

    let mut folders = Vec::new();
    let mut files = Vec::new();
    for entry in entries.filter_map(|e| e.ok()) {
        let name = entry.file_name().to_string_lossy().into_owned();
        let path = entry.path().to_string_lossy().into_owned();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };

        if file_type.is_dir() {
            let mut spec = NodeSpec::new(name, path, NodeKind::Folder);
            if has_entries(&entry.path()) {
                spec = spec.expandable();
            }
            folders.push(spec);
        } else {
            let mut spec = NodeSpec::new(name, path, NodeKind::File);
            spec.size = entry.metadata().ok().map(|m| m.len());
            files.push(spec);
        }
    }

    folders.sort_by(|a, b| a.name.cmp(&b.name));
    files.sort_by(|a, b| a.name.cmp(&b.name));
    debug!(path = %parent.path, folders = folders.len(), files = files.len(), "listed folder");

    folders.extend(files);
    Ok(folders)
}

fn has_entries(dir: &Path) -> bool {
    fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::SelectionTree;
    use crate::types::CheckState;

    fn volume(path: &Path) -> NodeSpec {
        NodeSpec::new("V:", path.to_string_lossy(), NodeKind::Volume).expandable()
    }

    #[test]
    fn lists_folders_then_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("zeta")).unwrap();
        fs::create_dir(dir.path().join("alpha")).unwrap();
        fs::write(dir.path().join("alpha").join("inner.txt"), b"x").unwrap();
        fs::write(dir.path().join("b.txt"), b"hello").unwrap();
        fs::write(dir.path().join("a.txt"), b"").unwrap();

        let children = fs_children(&volume(dir.path())).unwrap();
        let names: Vec<&str> = children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta", "a.txt", "b.txt"]);

        assert!(children[0].expandable);
        assert!(!children[1].expandable);
        assert_eq!(children[3].kind, NodeKind::File);
        assert_eq!(children[3].size, Some(5));
        assert_eq!(
            children[0].path,
            dir.path().join("alpha").to_string_lossy()
        );
    }

    #[test]
    fn missing_path_gives_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let children = fs_children(&volume(&dir.path().join("gone"))).unwrap();
        assert_eq!(children.len(), 1);
        assert!(children[0].placeholder);
        assert_eq!(children[0].name, "(Volume not accessible)");
    }

    #[test]
    fn expanding_checked_volume_checks_loaded_folders() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("docs")).unwrap();
        fs::write(dir.path().join("docs").join("a.txt"), b"a").unwrap();

        let mut tree = SelectionTree::new();
        let vol = tree.add_lazy_root(volume(dir.path()));
        tree.set_checked(vol, true).unwrap();

        let added = tree.expand(vol, fs_children).unwrap();
        let docs = added[0];
        assert_eq!(tree.state(docs).unwrap(), CheckState::Checked);

        let files = tree.expand(docs, fs_children).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(tree.state(files[0]).unwrap(), CheckState::Checked);

        tree.set_checked(files[0], false).unwrap();
        assert_eq!(tree.state(vol).unwrap(), CheckState::Unchecked);
        assert!(tree.is_consistent());
    }
}
