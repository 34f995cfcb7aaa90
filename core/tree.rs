//! Tree nodes as returned by the scanner, and the arena the caller keeps as
//! its snapshot of everything fetched so far.

use crate::error::{AppError, Result};
use crate::paths::{ROOT_KEY, normalize_key};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    pub path: String,
    pub name: String,
    pub is_dir: bool,
    /// `None` when the entry count is unknown.
    pub children_count: Option<usize>,
    pub ignored_by_gitignore: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default)]
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    /// Root placeholder whose children have not been fetched.
    pub fn unexpanded_root() -> Self {
        Self {
            path: ROOT_KEY.to_string(),
            name: String::new(),
            is_dir: true,
            children_count: None,
            ignored_by_gitignore: false,
            size: None,
            children: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownNode {
    pub path: String,
    pub name: String,
    pub is_dir: bool,
    pub children_count: Option<usize>,
    pub ignored_by_gitignore: bool,
    pub size: Option<u64>,
    /// Child keys in scanner order; `None` until a listing was attached.
    children: Option<Vec<String>>,
}

impl KnownNode {
    fn from_tree_node(node: &TreeNode) -> Self {
        Self {
            path: node.path.clone(),
            name: node.name.clone(),
            is_dir: node.is_dir,
            children_count: node.children_count,
            ignored_by_gitignore: node.ignored_by_gitignore,
            size: node.size,
            children: None,
        }
    }
}

/// Arena of known nodes keyed by normalized relative path. Attaching a
/// listing is a local map update.
#[derive(Debug, Clone)]
pub struct KnownTree {
    nodes: IndexMap<String, KnownNode>,
}

impl KnownTree {
    pub fn from_root(root: &TreeNode) -> Self {
        let mut tree = Self {
            nodes: IndexMap::new(),
        };
        let mut root_node = KnownNode::from_tree_node(root);
        root_node.path = ROOT_KEY.to_string();
        root_node.is_dir = true;
        tree.nodes.insert(ROOT_KEY.to_string(), root_node);
        if !root.children.is_empty() {
            tree.insert_children(ROOT_KEY, &root.children);
        }
        tree
    }

    /// Replaces the listing of `dir`. Previously attached descendants that
    /// are no longer listed are dropped.
    pub fn attach_children(&mut self, dir: &str, children: &[TreeNode]) -> Result<()> {
        let key = dir_key(dir);
        match self.nodes.get(&key) {
            Some(node) if node.is_dir => {}
            _ => return Err(AppError::DirPathNotDir { path: key }),
        }
        self.remove_descendants(&key);
        self.insert_children(&key, children);
        log::trace!("Attached {} children under {}", children.len(), key);
        Ok(())
    }

    pub fn get(&self, path: &str) -> Option<&KnownNode> {
        self.nodes.get(&dir_key(path))
    }

    pub fn root(&self) -> Option<&KnownNode> {
        self.nodes.get(ROOT_KEY)
    }

    /// Children of `path` in scanner order; empty when unfetched.
    pub fn children_of(&self, path: &str) -> Vec<&KnownNode> {
        self.nodes
            .get(&dir_key(path))
            .and_then(|node| node.children.as_ref())
            .map(|keys| keys.iter().filter_map(|k| self.nodes.get(k)).collect())
            .unwrap_or_default()
    }

    /// A directory counts as expanded once a listing was attached or it is
    /// known to be empty.
    pub fn is_expanded(&self, path: &str) -> bool {
        self.nodes
            .get(&dir_key(path))
            .is_some_and(|node| node.children.is_some() || node.children_count == Some(0))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn to_tree_node(&self) -> TreeNode {
        self.build_tree_node(ROOT_KEY)
            .unwrap_or_else(TreeNode::unexpanded_root)
    }

    fn build_tree_node(&self, key: &str) -> Option<TreeNode> {
        let node = self.nodes.get(key)?;
        let children = node
            .children
            .as_ref()
            .map(|keys| keys.iter().filter_map(|k| self.build_tree_node(k)).collect())
            .unwrap_or_default();
        Some(TreeNode {
            path: node.path.clone(),
            name: node.name.clone(),
            is_dir: node.is_dir,
            children_count: node.children_count,
            ignored_by_gitignore: node.ignored_by_gitignore,
            size: node.size,
            children,
        })
    }

    fn insert_children(&mut self, parent: &str, children: &[TreeNode]) {
        let mut keys = Vec::with_capacity(children.len());
        for child in children {
            let key = normalize_key(&child.path);
            let mut known = KnownNode::from_tree_node(child);
            known.path = key.clone();
            self.nodes.insert(key.clone(), known);
            if child.is_dir && !child.children.is_empty() {
                self.insert_children(&key, &child.children);
            }
            keys.push(key);
        }
        if let Some(node) = self.nodes.get_mut(parent) {
            node.children_count = Some(keys.len());
            node.children = Some(keys);
        }
    }

    fn remove_descendants(&mut self, key: &str) {
        let old = self.nodes.get_mut(key).and_then(|node| node.children.take());
        for child in old.unwrap_or_default() {
            self.remove_descendants(&child);
            self.nodes.swap_remove(&child);
        }
    }
}

fn dir_key(path: &str) -> String {
    let key = normalize_key(path);
    if key.is_empty() {
        ROOT_KEY.to_string()
    } else {
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str, size: u64) -> TreeNode {
        TreeNode {
            path: path.to_string(),
            name: path.rsplit('/').next().unwrap_or(path).to_string(),
            is_dir: false,
            children_count: None,
            ignored_by_gitignore: false,
            size: Some(size),
            children: Vec::new(),
        }
    }

    fn dir(path: &str, count: Option<usize>) -> TreeNode {
        TreeNode {
            is_dir: true,
            size: None,
            children_count: count,
            ..file(path, 0)
        }
    }

    fn root_with(children: Vec<TreeNode>) -> TreeNode {
        TreeNode {
            children_count: Some(children.len()),
            children,
            ..TreeNode::unexpanded_root()
        }
    }

    #[test]
    fn root_listing_is_expanded_but_children_are_not() {
        let tree = KnownTree::from_root(&root_with(vec![
            dir("src", Some(2)),
            dir("empty", Some(0)),
            file("a.txt", 10),
        ]));
        assert!(tree.is_expanded("."));
        assert!(!tree.is_expanded("src"));
        assert!(tree.is_expanded("empty"));
        let names: Vec<&str> = tree.children_of(".").iter().map(|n| n.path.as_str()).collect();
        assert_eq!(names, vec!["src", "empty", "a.txt"]);
    }

    #[test]
    fn attach_children_replaces_previous_listing() {
        let mut tree = KnownTree::from_root(&root_with(vec![dir("src", Some(2))]));
        tree.attach_children("src", &[file("src/a.rs", 1), file("src/b.rs", 2)])
            .unwrap();
        assert_eq!(tree.children_of("src").len(), 2);

        tree.attach_children("./src/", &[file("src/c.rs", 3)]).unwrap();
        assert_eq!(tree.children_of("src").len(), 1);
        assert!(tree.get("src/a.rs").is_none());
        assert_eq!(tree.get("src").unwrap().children_count, Some(1));
    }

    #[test]
    fn attach_children_rejects_unknown_and_file_paths() {
        let mut tree = KnownTree::from_root(&root_with(vec![file("a.txt", 1)]));
        assert!(tree.attach_children("a.txt", &[]).is_err());
        assert!(tree.attach_children("missing", &[]).is_err());
    }

    #[test]
    fn to_tree_node_rebuilds_nested_structure() {
        let mut tree = KnownTree::from_root(&root_with(vec![dir("src", Some(1))]));
        tree.attach_children("src", &[file("src/main.rs", 5)]).unwrap();
        let rebuilt = tree.to_tree_node();
        assert_eq!(rebuilt.children.len(), 1);
        assert_eq!(rebuilt.children[0].children[0].path, "src/main.rs");

        let again = KnownTree::from_root(&rebuilt);
        assert_eq!(again.len(), tree.len());
        assert!(again.is_expanded("src"));
    }
}
