// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2025 Brian Hetro <whee@smaertness.net>

//! The conversation tree.
//!
//! An export stores a conversation as a flat table of nodes; each node names
//! its parent and its children by id. Editing a prompt or regenerating an
//! answer forks the tree, so a conversation holds every branch ever written,
//! and nothing in the export guarantees the links are consistent.
//!
//! [`NodeTable`] owns every node in an arena and resolves the id links into
//! [`NodeId`] indices. Traversals track visited nodes, so malformed exports
//! with cycles or dangling ids still terminate.

use crate::parser::{Message, deserialize_lenient_message};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};

/// Index of a node inside its [`NodeTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    /// Returns the arena position.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// One entry of a conversation's node table.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Node {
    /// Node identifier (the key in the export's `mapping`).
    #[serde(default)]
    pub id: String,

    /// The message at this node; the root usually has none.
    #[serde(default, deserialize_with = "deserialize_lenient_message")]
    pub message: Option<Message>,

    /// Parent id as recorded in the export.
    #[serde(default)]
    pub parent: Option<String>,

    /// Child ids as recorded in the export.
    #[serde(default)]
    pub children: Vec<String>,

    #[serde(skip)]
    parent_link: Option<NodeId>,

    #[serde(skip)]
    child_links: Vec<NodeId>,
}

impl Node {
    /// Creates an unlinked node.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        message: Option<Message>,
        parent: Option<String>,
        children: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            message,
            parent,
            children,
            parent_link: None,
            child_links: Vec::new(),
        }
    }

    /// Returns the linked parent, if the link pass established one.
    #[must_use]
    pub const fn parent_link(&self) -> Option<NodeId> {
        self.parent_link
    }

    /// Returns the linked children in export order.
    #[must_use]
    pub fn child_links(&self) -> &[NodeId] {
        &self.child_links
    }

    /// Returns `true` if this node has no linked children.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.child_links.is_empty()
    }

    /// Sort key used by [`NodeTable::full_order`].
    ///
    /// Nodes without a message or a creation time sort as timestamp 0.
    fn sort_key(&self) -> (i64, &str) {
        let millis = self
            .message
            .as_ref()
            .and_then(|m| m.create_time)
            .map_or(0, |t| t.timestamp_millis());
        (millis, self.id.as_str())
    }
}

/// Arena owning every node of a conversation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodeTable {
    nodes: Vec<Node>,
    index: HashMap<String, NodeId>,
}

impl NodeTable {
    /// Builds a table from nodes and links it.
    ///
    /// When two nodes share an id, the later one wins.
    #[must_use]
    pub fn new(nodes: impl IntoIterator<Item = Node>) -> Self {
        let mut table = Self::default();
        for node in nodes {
            if let Some(&existing) = table.index.get(&node.id) {
                tracing::debug!(id = %node.id, "duplicate node id, replacing earlier node");
                table.nodes[existing.0] = node;
            } else {
                table.index.insert(node.id.clone(), NodeId(table.nodes.len()));
                table.nodes.push(node);
            }
        }
        table.link();
        table
    }

    /// Resolves child ids into bidirectional arena links.
    ///
    /// Ids missing from the table are skipped. Existing links are cleared
    /// first, so running this again yields the same links.
    pub fn link(&mut self) {
        for node in &mut self.nodes {
            node.parent_link = None;
            node.child_links.clear();
        }

        for parent in 0..self.nodes.len() {
            let child_ids = self.nodes[parent].children.clone();
            for child_id in &child_ids {
                let Some(&child) = self.index.get(child_id) else {
                    tracing::debug!(
                        parent = %self.nodes[parent].id,
                        child = %child_id,
                        "child id not in node table"
                    );
                    continue;
                };
                if self.nodes[parent].child_links.contains(&child) {
                    continue;
                }
                self.nodes[parent].child_links.push(child);
                self.nodes[child.0].parent_link = Some(NodeId(parent));
            }
        }
    }

    /// Number of nodes in the table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if the table holds no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the node at `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` came from another table.
    #[must_use]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    /// Looks up a node by its export id.
    #[must_use]
    pub fn lookup(&self, id: &str) -> Option<NodeId> {
        self.index.get(id).copied()
    }

    /// Looks up a node by its export id and returns it.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Node> {
        self.lookup(id).map(|id| self.node(id))
    }

    /// Iterates over all nodes in arena order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().enumerate().map(|(i, node)| (NodeId(i), node))
    }

    /// Returns the parent of `id`.
    ///
    /// Falls back to the recorded parent id when no child list pointed here.
    #[must_use]
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        let node = self.node(id);
        node.parent_link
            .or_else(|| node.parent.as_deref().and_then(|p| self.lookup(p)))
    }

    /// Returns the path from the root to `current`, in chronological order.
    ///
    /// This is the single branch the ChatGPT UI displays. An unknown
    /// `current` id yields an empty path; a cycle stops the walk at the
    /// first repeated node.
    #[must_use]
    pub fn active_branch(&self, current: &str) -> Vec<NodeId> {
        let mut path = Vec::new();
        let mut visited = HashSet::new();
        let mut cursor = self.lookup(current);

        while let Some(id) = cursor {
            if !visited.insert(id) {
                tracing::debug!(node = %self.node(id).id, "cycle in parent links");
                break;
            }
            path.push(id);
            cursor = self.parent(id);
        }

        path.reverse();
        path
    }

    /// Returns every node exactly once, depth first.
    ///
    /// Roots and siblings are visited in ascending (creation time, id) order.
    /// Nodes that no root reaches (for instance, members of a parent cycle)
    /// are appended afterwards in the same order, each followed by its own
    /// unvisited descendants.
    #[must_use]
    pub fn full_order(&self) -> Vec<NodeId> {
        let mut sorted: Vec<NodeId> = (0..self.nodes.len()).map(NodeId).collect();
        sorted.sort_by(|a, b| self.node(*a).sort_key().cmp(&self.node(*b).sort_key()));

        let mut order = Vec::with_capacity(self.nodes.len());
        let mut visited = HashSet::with_capacity(self.nodes.len());

        for &root in sorted.iter().filter(|id| self.node(**id).parent_link.is_none()) {
            self.visit_depth_first(root, &mut visited, &mut order);
        }

        for &id in &sorted {
            if !visited.contains(&id) {
                tracing::debug!(node = %self.node(id).id, "node unreachable from any root");
                self.visit_depth_first(id, &mut visited, &mut order);
            }
        }

        order
    }

    fn visit_depth_first(
        &self,
        start: NodeId,
        visited: &mut HashSet<NodeId>,
        order: &mut Vec<NodeId>,
    ) {
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            order.push(id);

            let mut children: Vec<NodeId> = self
                .node(id)
                .child_links
                .iter()
                .copied()
                .filter(|child| !visited.contains(child))
                .collect();
            // Reverse so the smallest key is popped first.
            children.sort_by(|a, b| self.node(*b).sort_key().cmp(&self.node(*a).sort_key()));
            stack.extend(children);
        }
    }
}
