// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2025 Brian Hetro <whee@smaertness.net>

//! Conversations and the metadata derived from them.
//!
//! A [`Conversation`] owns its [`NodeTable`]. Two enumerations are offered:
//! a hidden-inclusive one, used for metadata that lives in internal messages
//! (model detection, custom instructions, citation sources), and a visible
//! one filtered through [`crate::visibility`], used for everything a reader
//! sees (rendering, counts, text aggregation).

use crate::citations::CitationMap;
use crate::content;
use crate::parser::{CanvasDocument, Message, Role, get_string, timestamp_from_value};
use crate::tree::{Node, NodeId, NodeTable};
use crate::visibility;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Base of the link to a conversation in the ChatGPT web app.
pub const CHAT_URL_BASE: &str = "https://chat.openai.com/c/";

/// A single ChatGPT conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    /// Conversation title.
    pub title: String,

    /// When the conversation was started.
    pub create_time: DateTime<Utc>,

    /// When the conversation was last updated.
    pub update_time: DateTime<Utc>,

    /// Every node of every branch.
    pub nodes: NodeTable,

    /// Id of the node the UI last showed.
    pub current_node: String,

    /// Stable conversation identifier.
    pub conversation_id: String,

    /// Whether the user starred the conversation.
    pub is_starred: Option<bool>,

    /// Voice mode descriptor: a voice name or an object.
    pub voice: Option<serde_json::Value>,

    /// Plugins enabled for the conversation.
    pub plugin_ids: Vec<String>,
}

impl<'de> Deserialize<'de> for Conversation {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error;

        let value = serde_json::Value::deserialize(deserializer)?;

        let instant = |key: &'static str| {
            value
                .get(key)
                .and_then(timestamp_from_value)
                .ok_or_else(|| D::Error::missing_field(key))
        };
        let create_time = instant("create_time")?;
        let update_time = instant("update_time").unwrap_or(create_time);

        let conversation_id = get_string(&value, &["conversation_id"])
            .or_else(|| get_string(&value, &["id"]))
            .ok_or_else(|| D::Error::missing_field("conversation_id"))?;

        let mapping = value
            .get("mapping")
            .and_then(serde_json::Value::as_object)
            .ok_or_else(|| D::Error::missing_field("mapping"))?;
        let mut nodes = Vec::with_capacity(mapping.len());
        for (key, raw) in mapping {
            let mut node: Node = serde_json::from_value(raw.clone()).map_err(D::Error::custom)?;
            key.clone_into(&mut node.id);
            nodes.push(node);
        }

        let plugin_ids = value
            .get("plugin_ids")
            .and_then(serde_json::Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|id| id.as_str().map(str::to_owned))
            .collect();

        Ok(Self {
            title: get_string(&value, &["title"]).unwrap_or_else(|| "untitled".to_owned()),
            create_time,
            update_time,
            nodes: NodeTable::new(nodes),
            current_node: get_string(&value, &["current_node"]).unwrap_or_default(),
            conversation_id,
            is_starred: value.get("is_starred").and_then(serde_json::Value::as_bool),
            voice: value.get("voice").filter(|v| !v.is_null()).cloned(),
            plugin_ids,
        })
    }
}

/// A message node yielded by the conversation enumerations.
#[derive(Debug, Clone, Copy)]
pub struct MessageNode<'a> {
    /// Arena position of the node.
    pub id: NodeId,
    /// The node itself.
    pub node: &'a Node,
    /// The node's message.
    pub message: &'a Message,
}

/// Which traversal a conversation is rendered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderOrder {
    /// Every branch, depth first (see [`NodeTable::full_order`]).
    #[default]
    Full,
    /// Only the branch ending at the current node.
    ActiveBranch,
}

impl Conversation {
    /// Creates a conversation from its parts and links the node table.
    #[must_use]
    pub fn new(
        title: impl Into<String>,
        create_time: DateTime<Utc>,
        nodes: impl IntoIterator<Item = Node>,
        current_node: impl Into<String>,
        conversation_id: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            create_time,
            update_time: create_time,
            nodes: NodeTable::new(nodes),
            current_node: current_node.into(),
            conversation_id: conversation_id.into(),
            is_starred: None,
            voice: None,
            plugin_ids: Vec::new(),
        }
    }

    /// Returns the node ids in the requested order.
    #[must_use]
    pub fn ordered_nodes(&self, order: RenderOrder) -> Vec<NodeId> {
        match order {
            RenderOrder::Full => self.nodes.full_order(),
            RenderOrder::ActiveBranch => self.nodes.active_branch(&self.current_node),
        }
    }

    /// Returns the nodes carrying a message, hidden ones included.
    pub fn message_nodes(&self, order: RenderOrder) -> impl Iterator<Item = MessageNode<'_>> {
        self.ordered_nodes(order).into_iter().filter_map(move |id| {
            let node = self.nodes.node(id);
            node.message
                .as_ref()
                .map(|message| MessageNode { id, node, message })
        })
    }

    /// Returns the nodes carrying a visible message.
    pub fn visible_message_nodes(
        &self,
        order: RenderOrder,
    ) -> impl Iterator<Item = MessageNode<'_>> {
        self.message_nodes(order)
            .filter(|n| !visibility::is_hidden(n.message))
    }

    /// Returns messages by the given roles, in full order.
    ///
    /// An empty `roles` slice means user messages only.
    #[must_use]
    pub fn messages_by_author(&self, roles: &[Role], include_hidden: bool) -> Vec<&Message> {
        let roles = if roles.is_empty() { &[Role::User][..] } else { roles };
        self.message_nodes(RenderOrder::Full)
            .map(|n| n.message)
            .filter(|m| roles.contains(&m.author.role))
            .filter(|m| include_hidden || !visibility::is_hidden(m))
            .collect()
    }

    /// Link to the conversation in the ChatGPT web app.
    #[must_use]
    pub fn url(&self) -> String {
        format!("{CHAT_URL_BASE}{}", self.conversation_id)
    }

    /// Model of the first assistant message that names one.
    ///
    /// Hidden messages count: the first assistant reply is often an
    /// internal tool call.
    #[must_use]
    pub fn model(&self) -> Option<&str> {
        self.message_nodes(RenderOrder::Full)
            .filter(|n| n.message.author.role == Role::Assistant)
            .find_map(|n| n.message.metadata.model_slug.as_deref())
    }

    /// Sorted, unique content types of the visible messages.
    #[must_use]
    pub fn content_types(&self) -> Vec<String> {
        self.visible_message_nodes(RenderOrder::Full)
            .map(|n| n.message.content.content_type.as_str().to_owned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Sorted, unique plugin namespaces invoked by visible tool messages.
    #[must_use]
    pub fn plugins(&self) -> Vec<String> {
        self.messages_by_author(&[Role::Tool], false)
            .into_iter()
            .filter_map(|m| m.metadata.invoked_plugin.as_ref()?.namespace.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Custom instructions the conversation ran with.
    ///
    /// Taken from the first user-authored system message, hidden or not.
    #[must_use]
    pub fn custom_instructions(&self) -> Option<&BTreeMap<String, String>> {
        self.message_nodes(RenderOrder::Full)
            .map(|n| n.message)
            .filter(|m| m.author.role == Role::System && m.metadata.is_user_system_message)
            .find_map(|m| m.metadata.user_context_message_data.as_ref())
    }

    /// Counts visible messages by the given roles (user only when empty).
    #[must_use]
    pub fn message_count(&self, roles: &[Role]) -> usize {
        self.messages_by_author(roles, false).len()
    }

    /// Counts message nodes without children (branch endpoints).
    #[must_use]
    pub fn leaf_count(&self) -> usize {
        self.message_nodes(RenderOrder::Full)
            .filter(|n| n.node.is_leaf())
            .count()
    }

    /// Creation times of visible messages by the given roles.
    #[must_use]
    pub fn timestamps(&self, roles: &[Role]) -> Vec<DateTime<Utc>> {
        self.messages_by_author(roles, false)
            .into_iter()
            .filter_map(|m| m.create_time)
            .collect()
    }

    /// Plain text of visible messages by the given roles, one per line.
    #[must_use]
    pub fn plaintext(&self, roles: &[Role]) -> String {
        self.messages_by_author(roles, false)
            .into_iter()
            .filter_map(|m| content::message_text(m).ok())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Search results citable from this conversation's messages.
    #[must_use]
    pub fn citation_map(&self) -> CitationMap {
        CitationMap::from_conversation(self)
    }

    /// Canvas documents created anywhere in the conversation.
    #[must_use]
    pub fn canvas_documents(&self) -> Vec<CanvasDocument> {
        self.message_nodes(RenderOrder::Full)
            .filter_map(|n| content::canvas_document(n.message))
            .collect()
    }
}

/// Merges `incoming` into `existing`, keeping the newer copy of each id.
///
/// Conversations are compared by `update_time`. The result is sorted by
/// creation time, oldest first.
#[must_use]
pub fn merge_conversations(
    existing: Vec<Conversation>,
    incoming: Vec<Conversation>,
) -> Vec<Conversation> {
    let mut merged: HashMap<String, Conversation> = HashMap::new();
    for conversation in existing.into_iter().chain(incoming) {
        match merged.get(&conversation.conversation_id) {
            Some(kept) if kept.update_time >= conversation.update_time => {}
            _ => {
                merged.insert(conversation.conversation_id.clone(), conversation);
            }
        }
    }

    let mut conversations: Vec<Conversation> = merged.into_values().collect();
    conversations.sort_by(|a, b| {
        a.create_time
            .cmp(&b.create_time)
            .then_with(|| a.conversation_id.cmp(&b.conversation_id))
    });
    conversations
}

/// Custom instructions of one conversation, as written to disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CustomInstructionsEntry {
    /// Title of the conversation.
    pub chat_title: String,
    /// Link to the conversation.
    pub chat_link: String,
    /// When the conversation was started.
    pub time: DateTime<Utc>,
    /// The instructions payload.
    pub custom_instructions: BTreeMap<String, String>,
}

/// Collects the custom instructions of every conversation that has them.
#[must_use]
pub fn collect_custom_instructions(conversations: &[Conversation]) -> Vec<CustomInstructionsEntry> {
    conversations
        .iter()
        .filter_map(|c| {
            let instructions = c.custom_instructions().filter(|i| !i.is_empty())?;
            Some(CustomInstructionsEntry {
                chat_title: c.title.clone(),
                chat_link: c.url(),
                time: c.create_time,
                custom_instructions: instructions.clone(),
            })
        })
        .collect()
}
