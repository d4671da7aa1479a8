//! Rebuilds folder/file hierarchies from the flat path lists peers advertise.
//!
//! Nodes live in an arena with explicit child lists, so building, walking and
//! flattening never recurse and deep nesting cannot exhaust the stack.

use indextree::{Arena, NodeEdge, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Owned view of one node, as handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathNode {
    pub name: String,
    pub is_file: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<PathNode>>,
}

impl PathNode {
    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_file: true,
            children: None,
        }
    }

    pub fn folder(name: impl Into<String>, children: Vec<PathNode>) -> Self {
        Self {
            name: name.into(),
            is_file: false,
            children: Some(children),
        }
    }
}

/// One line of a depth-first listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeRow {
    pub id: NodeId,
    pub name: String,
    pub path: String,
    pub depth: usize,
    pub is_file: bool,
}

#[derive(Debug, Clone)]
struct Segment {
    name: String,
    is_file: bool,
}

/// A forest built from one snapshot of paths. Rebuilding from a new snapshot
/// yields a new forest; an existing one is never patched.
#[derive(Debug, Clone)]
pub struct PathForest {
    arena: Arena<Segment>,
    root: NodeId,
}

/// Builds the forest for `paths`, keeping the order in which names first
/// appear. Empty segments are dropped, so blank entries contribute nothing.
///
/// A segment is a file only while no other path continues past it. When a
/// name is both a terminal segment and a prefix of a deeper path it becomes
/// a folder, whichever order the two paths arrive in.
pub fn build<I, S>(paths: I) -> PathForest
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut arena = Arena::new();
    let root = arena.new_node(Segment {
        name: String::new(),
        is_file: false,
    });
    let mut lookup: HashMap<(NodeId, String), NodeId> = HashMap::new();

    for path in paths {
        let segments: Vec<&str> = path
            .as_ref()
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect();

        let mut parent = root;
        for (depth, segment) in segments.iter().enumerate() {
            let terminal = depth + 1 == segments.len();
            let key = (parent, (*segment).to_string());

            parent = if let Some(&existing) = lookup.get(&key) {
                if !terminal {
                    if let Some(node) = arena.get_mut(existing) {
                        node.get_mut().is_file = false;
                    }
                }
                existing
            } else {
                let created = arena.new_node(Segment {
                    name: key.1.clone(),
                    is_file: terminal,
                });
                parent.append(created, &mut arena);
                lookup.insert(key, created);
                created
            };
        }
    }

    PathForest { arena, root }
}

impl PathForest {
    pub fn is_empty(&self) -> bool {
        self.root.children(&self.arena).next().is_none()
    }

    /// Number of nodes, files and folders alike.
    pub fn len(&self) -> usize {
        self.root.descendants(&self.arena).count() - 1
    }

    pub fn roots(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.root.children(&self.arena)
    }

    pub fn children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        id.children(&self.arena)
    }

    pub fn name(&self, id: NodeId) -> Option<&str> {
        self.segment(id).map(|segment| segment.name.as_str())
    }

    pub fn is_file(&self, id: NodeId) -> bool {
        self.segment(id).is_some_and(|segment| segment.is_file)
    }

    /// Slash-joined path from the top of the forest down to `id`.
    pub fn path_of(&self, id: NodeId) -> String {
        let mut names: Vec<&str> = id
            .ancestors(&self.arena)
            .filter(|ancestor| *ancestor != self.root)
            .filter_map(|ancestor| self.name(ancestor))
            .collect();
        names.reverse();
        names.join("/")
    }

    pub fn find(&self, path: &str) -> Option<NodeId> {
        let mut current = self.root;
        let mut matched = false;
        for segment in path.split('/').filter(|segment| !segment.is_empty()) {
            current = current
                .children(&self.arena)
                .find(|child| self.name(*child) == Some(segment))?;
            matched = true;
        }
        matched.then_some(current)
    }

    /// Full paths of every folder, in pre-order.
    pub fn folders(&self) -> Vec<String> {
        self.rows()
            .into_iter()
            .filter(|row| !row.is_file)
            .map(|row| row.path)
            .collect()
    }

    /// Depth-first listing of the whole forest, parents before children.
    pub fn rows(&self) -> Vec<TreeRow> {
        let mut rows = Vec::new();
        let mut trail: Vec<String> = Vec::new();

        for edge in self.root.traverse(&self.arena) {
            match edge {
                NodeEdge::Start(id) if id != self.root => {
                    let Some(segment) = self.segment(id) else {
                        continue;
                    };
                    trail.push(segment.name.clone());
                    rows.push(TreeRow {
                        id,
                        name: segment.name.clone(),
                        path: trail.join("/"),
                        depth: trail.len() - 1,
                        is_file: segment.is_file,
                    });
                }
                NodeEdge::End(id) if id != self.root => {
                    trail.pop();
                }
                _ => {}
            }
        }

        rows
    }

    /// Converts the arena into the owned nested form.
    pub fn to_nodes(&self) -> Vec<PathNode> {
        let mut stack: Vec<Vec<PathNode>> = Vec::new();

        for edge in self.root.traverse(&self.arena) {
            match edge {
                NodeEdge::Start(_) => stack.push(Vec::new()),
                NodeEdge::End(id) => {
                    let children = stack.pop().unwrap_or_default();
                    if id == self.root {
                        return children;
                    }
                    let Some(segment) = self.segment(id) else {
                        continue;
                    };
                    let node = if segment.is_file {
                        PathNode::file(segment.name.clone())
                    } else {
                        PathNode::folder(segment.name.clone(), children)
                    };
                    if let Some(siblings) = stack.last_mut() {
                        siblings.push(node);
                    }
                }
            }
        }

        Vec::new()
    }

    fn segment(&self, id: NodeId) -> Option<&Segment> {
        self.arena.get(id).map(|node| node.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input_builds_empty_forest() {
        let forest = build(Vec::<String>::new());
        assert!(forest.is_empty());
        assert_eq!(forest.len(), 0);
        assert!(forest.to_nodes().is_empty());
    }

    #[test]
    fn test_siblings_share_parent_in_input_order() {
        let forest = build(["a/b", "a/c"]);
        assert_eq!(
            forest.to_nodes(),
            vec![PathNode::folder(
                "a",
                vec![PathNode::file("b"), PathNode::file("c")]
            )]
        );
    }

    #[test]
    fn test_order_is_insertion_not_sorted() {
        let forest = build(["zeta.txt", "alpha/one", "beta.txt"]);
        let names: Vec<&str> = forest.roots().filter_map(|id| forest.name(id)).collect();
        assert_eq!(names, vec!["zeta.txt", "alpha", "beta.txt"]);
    }

    #[test]
    fn test_file_extended_by_later_path_becomes_folder() {
        let expected = vec![PathNode::folder(
            "a",
            vec![PathNode::folder("b", vec![PathNode::file("c")])],
        )];

        assert_eq!(build(["a/b", "a/b/c"]).to_nodes(), expected);
        assert_eq!(build(["a/b/c", "a/b"]).to_nodes(), expected);
    }

    #[test]
    fn test_blank_and_slashy_entries_are_filtered() {
        let forest = build(["", "/", "docs//readme.txt", "/docs/guide/", "notes/"]);
        assert_eq!(
            forest.to_nodes(),
            vec![
                PathNode::folder(
                    "docs",
                    vec![PathNode::file("readme.txt"), PathNode::file("guide")]
                ),
                PathNode::file("notes"),
            ]
        );
    }

    #[test]
    fn test_duplicate_paths_do_not_duplicate_nodes() {
        let forest = build(["docs/readme.txt", "docs/readme.txt"]);
        assert_eq!(forest.len(), 2);
    }

    #[test]
    fn test_find_and_path_of() {
        let forest = build(["docs/guides/setup.md", "docs/readme.txt"]);

        let setup = forest.find("docs/guides/setup.md").unwrap();
        assert!(forest.is_file(setup));
        assert_eq!(forest.path_of(setup), "docs/guides/setup.md");

        let guides = forest.find("/docs/guides/").unwrap();
        assert!(!forest.is_file(guides));
        assert_eq!(forest.children(guides).count(), 1);

        assert!(forest.find("docs/missing").is_none());
        assert!(forest.find("").is_none());
    }

    #[test]
    fn test_rows_and_folders() {
        let forest = build(["docs/guides/setup.md", "docs/readme.txt", "todo.txt"]);

        let rows: Vec<(String, usize, bool)> = forest
            .rows()
            .into_iter()
            .map(|row| (row.path, row.depth, row.is_file))
            .collect();
        assert_eq!(
            rows,
            vec![
                ("docs".to_string(), 0, false),
                ("docs/guides".to_string(), 1, false),
                ("docs/guides/setup.md".to_string(), 2, true),
                ("docs/readme.txt".to_string(), 1, true),
                ("todo.txt".to_string(), 0, true),
            ]
        );
        assert_eq!(forest.folders(), vec!["docs", "docs/guides"]);
    }

    #[test]
    fn test_deep_nesting_walks_without_recursion() {
        let deep = vec!["d"; 5_000].join("/");
        let forest = build([deep.as_str()]);

        let rows = forest.rows();
        assert_eq!(rows.len(), 5_000);
        assert_eq!(rows.last().map(|row| row.depth), Some(4_999));
        assert!(rows.last().is_some_and(|row| row.is_file));
    }
}
