// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2025 Brian Hetro <whee@smaertness.net>

//! JSON parsing for ChatGPT conversation exports.
//!
//! This module handles deserialization of the `conversations.json` file found
//! in a ChatGPT data export. The file is an array of conversations; each
//! conversation stores its messages as a flat `mapping` of node id to node,
//! where every node points at its parent and lists its children.
//!
//! # Format Overview
//!
//! A message carries:
//! - An author (role plus an optional tool name such as `browser`)
//! - A polymorphic `content` object keyed by `content_type`
//! - A `metadata` object (model slug, citations, attachments, ...)
//! - A `recipient` naming the tool a message is addressed to, or `all`
//!
//! # Example
//!
//! ```
//! use chatgpt_md::parser::parse_export;
//!
//! let json = r#"[{
//!     "title": "Greetings",
//!     "create_time": 1733356800.0,
//!     "update_time": 1733356900.0,
//!     "current_node": "b",
//!     "conversation_id": "abc",
//!     "mapping": {
//!         "a": { "id": "a", "message": null, "parent": null, "children": ["b"] },
//!         "b": {
//!             "id": "b",
//!             "parent": "a",
//!             "children": [],
//!             "message": {
//!                 "id": "b",
//!                 "author": { "role": "user" },
//!                 "content": { "content_type": "text", "parts": ["Hello"] }
//!             }
//!         }
//!     }
//! }]"#;
//!
//! let conversations = parse_export(json).unwrap();
//! assert_eq!(conversations.len(), 1);
//! assert_eq!(conversations[0].title, "Greetings");
//! ```

use crate::conversation::Conversation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::collections::BTreeMap;
use std::fmt;

/// Error type for JSON parsing failures.
#[derive(Debug, Snafu)]
pub enum ParseError {
    /// Failed to parse JSON content.
    #[snafu(display("failed to parse JSON: {source}"))]
    Json {
        /// The underlying JSON parsing error.
        source: serde_json::Error,
    },

    /// The document is valid JSON but neither a conversation nor a list of them.
    #[snafu(display("expected a conversation object or an array of conversations"))]
    UnexpectedShape,
}

/// The role of a message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The human side of the conversation.
    User,
    /// The model.
    Assistant,
    /// System prompts and custom instructions.
    System,
    /// Output of a tool (browser, code interpreter, image generation, ...).
    Tool,
    /// Output of a legacy function call.
    Function,
}

impl Role {
    /// Returns the role name as it appears in the export.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
            Self::Tool => "tool",
            Self::Function => "function",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The author of a message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Author {
    /// Who produced the message.
    pub role: Role,

    /// Tool name for tool messages (e.g., "browser", "dalle.text2im").
    #[serde(default)]
    pub name: Option<String>,
}

/// A single message carried by a conversation node.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Message {
    /// Message identifier.
    pub id: String,

    /// Who wrote the message.
    pub author: Author,

    /// When the message was created, if recorded.
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub create_time: Option<DateTime<Utc>>,

    /// When the message was last updated, if recorded.
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub update_time: Option<DateTime<Utc>>,

    /// The message payload.
    pub content: Content,

    /// Completion status (e.g., "`finished_successfully`").
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: String,

    /// Whether this message ended the assistant's turn.
    #[serde(default)]
    pub end_turn: Option<bool>,

    /// Sampling weight assigned by the exporter.
    #[serde(default = "default_weight")]
    pub weight: f64,

    /// Auxiliary information about the message.
    #[serde(default, deserialize_with = "null_as_default")]
    pub metadata: Metadata,

    /// The tool a message is addressed to, or "all" for the user.
    #[serde(default)]
    pub recipient: Option<String>,
}

const fn default_weight() -> f64 {
    1.0
}

/// Recipient marking a message as a canvas document creation call.
pub const DOCUMENT_CREATION_RECIPIENT: &str = "canmore.create_textdoc";

impl Message {
    /// Returns the author's tool name, if any.
    #[must_use]
    pub fn author_name(&self) -> Option<&str> {
        self.author.name.as_deref()
    }

    /// Returns the recipient, if any.
    #[must_use]
    pub fn recipient(&self) -> Option<&str> {
        self.recipient.as_deref()
    }

    /// Returns `true` if this message creates a canvas document.
    #[must_use]
    pub fn is_document_creation(&self) -> bool {
        self.recipient() == Some(DOCUMENT_CREATION_RECIPIENT)
    }
}

/// The content-type tag of a message payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContentType {
    /// Plain conversational text.
    Text,
    /// Text mixed with images and other attachments.
    MultimodalText,
    /// Code-interpreter input.
    Code,
    /// Code-interpreter output.
    ExecutionOutput,
    /// A quoted excerpt of a browsed page.
    TetherQuote,
    /// Legacy browsing status display.
    TetherBrowsingDisplay,
    /// Raw scraped page text.
    SonicWebpage,
    /// Internal error report.
    SystemError,
    /// Reasoning thought fragments.
    Thoughts,
    /// Reasoning summary ("Thought for 5 seconds").
    ReasoningRecap,
    /// Custom instructions context.
    UserEditableContext,
    /// Any tag not listed above, kept verbatim.
    Other(String),
}

impl ContentType {
    /// Returns the tag as it appears in the export.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Text => "text",
            Self::MultimodalText => "multimodal_text",
            Self::Code => "code",
            Self::ExecutionOutput => "execution_output",
            Self::TetherQuote => "tether_quote",
            Self::TetherBrowsingDisplay => "tether_browsing_display",
            Self::SonicWebpage => "sonic_webpage",
            Self::SystemError => "system_error",
            Self::Thoughts => "thoughts",
            Self::ReasoningRecap => "reasoning_recap",
            Self::UserEditableContext => "user_editable_context",
            Self::Other(tag) => tag,
        }
    }
}

impl From<&str> for ContentType {
    fn from(tag: &str) -> Self {
        match tag {
            "text" => Self::Text,
            "multimodal_text" => Self::MultimodalText,
            "code" => Self::Code,
            "execution_output" => Self::ExecutionOutput,
            "tether_quote" => Self::TetherQuote,
            "tether_browsing_display" => Self::TetherBrowsingDisplay,
            "sonic_webpage" => Self::SonicWebpage,
            "system_error" => Self::SystemError,
            "thoughts" => Self::Thoughts,
            "reasoning_recap" => Self::ReasoningRecap,
            "user_editable_context" => Self::UserEditableContext,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message payload: its content-type tag and the one body it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Content {
    /// The content-type tag.
    pub content_type: ContentType,

    /// The interpreted payload.
    pub body: ContentBody,
}

impl Content {
    /// Builds a plain `text` content with a single string part.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content_type: ContentType::Text,
            body: ContentBody::Parts(vec![Part::Text(text.into())]),
        }
    }
}

/// The shape a message payload takes.
///
/// The decoder picks exactly one shape per message: non-empty `parts` win,
/// then the tag-specific payloads (quote, recap, thoughts), then `text`, then
/// `result`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentBody {
    /// Ordered list of parts.
    Parts(Vec<Part>),
    /// A single text field (code, execution output, scraped pages, ...).
    Text(String),
    /// A tool result field.
    Result(String),
    /// A quoted source excerpt.
    Quote(Quote),
    /// A reasoning recap line.
    Recap(String),
    /// Reasoning thought fragments.
    Thoughts(Vec<Thought>),
    /// Nothing interpretable.
    Empty,
}

/// A quoted excerpt of a source (`tether_quote`).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Quote {
    /// The quoted text.
    pub text: String,
    /// Title of the source page.
    pub title: Option<String>,
    /// Domain of the source page.
    pub domain: Option<String>,
    /// URL of the source page.
    pub url: Option<String>,
}

/// A reasoning fragment of a `thoughts` payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Thought {
    /// One-line summary of the fragment.
    pub summary: Option<String>,
    /// Full text of the fragment.
    pub content: Option<String>,
}

/// One element of a `parts` list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    /// A bare string.
    Text(String),
    /// An object wrapping text: `{"text": "..."}`.
    TextObject(String),
    /// An image pointer (`image_asset_pointer`), prefix still attached.
    Image {
        /// Raw asset pointer, e.g. `file-service://file-abc`.
        asset_pointer: String,
    },
    /// A structured document descriptor (`{name, content, type?}`).
    Document(CanvasDocument),
    /// Web search results carried inline.
    SearchResults(Vec<SearchEntry>),
    /// Anything else; contributes nothing.
    Other,
}

/// A canvas document created by the assistant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CanvasDocument {
    /// Document name.
    pub name: String,
    /// MIME-like document type (e.g., "code/python"), if given.
    #[serde(rename = "type")]
    pub doc_type: Option<String>,
    /// Full document text.
    pub content: String,
}

/// A web search result that can be cited by later messages.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SearchEntry {
    /// The turn the search ran in.
    pub turn_index: Option<u32>,
    /// Reference kind (e.g., "search", "news").
    pub ref_type: Option<String>,
    /// Position of the result within its turn.
    pub ref_index: Option<u32>,
    /// Page title.
    pub title: Option<String>,
    /// Page URL.
    pub url: Option<String>,
}

/// An index-anchored citation span from `metadata.citations`.
///
/// Indices count characters, not bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CitationSpan {
    /// First character replaced.
    pub start: usize,
    /// One past the last character replaced.
    pub end: usize,
    /// Source title.
    pub title: Option<String>,
    /// Source URL.
    pub url: Option<String>,
}

/// A file attached to a message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Attachment {
    /// Asset identifier.
    pub id: String,
    /// Original file name.
    pub name: Option<String>,
    /// MIME type.
    pub mime_type: Option<String>,
}

/// The plugin or tool namespace a message invoked.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InvokedPlugin {
    /// Plugin namespace (e.g., "`web_pilot`").
    pub namespace: Option<String>,
}

/// Message metadata.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Metadata {
    /// Model that produced the message (e.g., "gpt-4o").
    pub model_slug: Option<String>,

    /// Plugin invoked by a tool message.
    pub invoked_plugin: Option<InvokedPlugin>,

    /// Marks a system message authored by the user (custom instructions).
    pub is_user_system_message: bool,

    /// Marks a message the ChatGPT UI never shows.
    pub is_visually_hidden: bool,

    /// Custom instructions payload (`about_user_message`, `about_model_message`).
    pub user_context_message_data: Option<BTreeMap<String, String>>,

    /// Index-anchored citation spans.
    pub citations: Vec<CitationSpan>,

    /// Search results attached through metadata, flattened.
    pub search_results: Vec<SearchEntry>,

    /// Attached files.
    pub attachments: Vec<Attachment>,
}

impl<'de> Deserialize<'de> for Content {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        let content_type = ContentType::from(get_str(&value, &["content_type"]).unwrap_or("text"));

        let parts: Vec<Part> = value
            .get("parts")
            .and_then(serde_json::Value::as_array)
            .map(|parts| parts.iter().map(parse_part).collect())
            .unwrap_or_default();

        let body = if !parts.is_empty() {
            ContentBody::Parts(parts)
        } else if content_type == ContentType::TetherQuote {
            ContentBody::Quote(Quote {
                text: get_string(&value, &["text"]).unwrap_or_default(),
                title: get_string(&value, &["title"]),
                domain: get_string(&value, &["domain"]),
                url: get_string(&value, &["url"]),
            })
        } else if let Some(recap) = (content_type == ContentType::ReasoningRecap)
            .then(|| get_string(&value, &["content"]))
            .flatten()
        {
            ContentBody::Recap(recap)
        } else if let Some(thoughts) = value.get("thoughts").and_then(serde_json::Value::as_array) {
            ContentBody::Thoughts(
                thoughts
                    .iter()
                    .map(|t| Thought {
                        summary: get_string(t, &["summary"]),
                        content: get_string(t, &["content"]),
                    })
                    .collect(),
            )
        } else if let Some(text) = get_string(&value, &["text"]) {
            ContentBody::Text(text)
        } else if let Some(result) = get_string(&value, &["result"]) {
            ContentBody::Result(result)
        } else {
            ContentBody::Empty
        };

        Ok(Self { content_type, body })
    }
}

/// Interprets one entry of a `parts` array.
fn parse_part(value: &serde_json::Value) -> Part {
    if let Some(text) = value.as_str() {
        return Part::Text(text.to_owned());
    }
    if !value.is_object() {
        return Part::Other;
    }

    if get_str(value, &["content_type"]) == Some("image_asset_pointer") {
        return Part::Image {
            asset_pointer: get_string(value, &["asset_pointer"]).unwrap_or_default(),
        };
    }

    match get_str(value, &["type"]) {
        Some("search_result") => return Part::SearchResults(vec![parse_search_entry(value)]),
        Some("search_result_group") => {
            return Part::SearchResults(parse_search_entries(value.get("entries")));
        }
        _ => {}
    }

    if let Some(document) = parse_document(value) {
        return Part::Document(document);
    }

    match value.get("text") {
        Some(serde_json::Value::String(text)) => Part::TextObject(text.clone()),
        Some(serde_json::Value::Null) | None => Part::Other,
        Some(other) => Part::TextObject(other.to_string()),
    }
}

/// Reads a `{name, content, type?}` document descriptor.
///
/// Both `name` and `content` must be non-empty strings.
pub(crate) fn parse_document(value: &serde_json::Value) -> Option<CanvasDocument> {
    let name = get_str(value, &["name"]).filter(|s| !s.is_empty())?;
    let content = get_str(value, &["content"]).filter(|s| !s.is_empty())?;
    Some(CanvasDocument {
        name: name.to_owned(),
        doc_type: get_string(value, &["type"]),
        content: content.to_owned(),
    })
}

fn parse_search_entries(entries: Option<&serde_json::Value>) -> Vec<SearchEntry> {
    entries
        .and_then(serde_json::Value::as_array)
        .into_iter()
        .flatten()
        .map(parse_search_entry)
        .collect()
}

fn parse_search_entry(value: &serde_json::Value) -> SearchEntry {
    let ref_id = value.get("ref_id");
    let index = |key: &str| {
        ref_id
            .and_then(|r| r.get(key))
            .and_then(serde_json::Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
    };
    SearchEntry {
        turn_index: index("turn_index"),
        ref_type: ref_id.and_then(|r| get_string(r, &["ref_type"])),
        ref_index: index("ref_index"),
        title: get_string(value, &["title"]),
        url: get_string(value, &["url"]),
    }
}

impl<'de> Deserialize<'de> for Metadata {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        if !value.is_object() {
            return Ok(Self::default());
        }

        let invoked_plugin = value
            .get("invoked_plugin")
            .filter(|p| p.is_object())
            .map(|p| InvokedPlugin {
                namespace: get_string(p, &["namespace"]),
            });

        let user_context_message_data = value
            .get("user_context_message_data")
            .and_then(serde_json::Value::as_object)
            .map(|data| {
                data.iter()
                    .filter_map(|(k, v)| Some((k.clone(), v.as_str()?.to_owned())))
                    .collect()
            });

        let search_results = value
            .get("search_result_groups")
            .and_then(serde_json::Value::as_array)
            .into_iter()
            .flatten()
            .flat_map(|group| parse_search_entries(group.get("entries")))
            .collect();

        Ok(Self {
            model_slug: get_string(&value, &["model_slug"]),
            invoked_plugin,
            is_user_system_message: get_bool(&value, "is_user_system_message"),
            is_visually_hidden: get_bool(&value, "is_visually_hidden_from_conversation"),
            user_context_message_data,
            citations: extract_citations(&value),
            search_results,
            attachments: extract_attachments(&value),
        })
    }
}

/// Extracts index-anchored citations from `metadata.citations`.
fn extract_citations(value: &serde_json::Value) -> Vec<CitationSpan> {
    let index = |c: &serde_json::Value, key: &str| {
        c.get(key)
            .and_then(serde_json::Value::as_u64)
            .and_then(|n| usize::try_from(n).ok())
    };

    value
        .get("citations")
        .and_then(serde_json::Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|c| {
            Some(CitationSpan {
                start: index(c, "start_ix")?,
                end: index(c, "end_ix")?,
                title: get_string(c, &["metadata", "title"]),
                url: get_string(c, &["metadata", "url"]),
            })
        })
        .collect()
}

/// Extracts attachment descriptors from `metadata.attachments`.
fn extract_attachments(value: &serde_json::Value) -> Vec<Attachment> {
    value
        .get("attachments")
        .and_then(serde_json::Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|a| {
            Some(Attachment {
                id: get_string(a, &["id"]).filter(|id| !id.is_empty())?,
                name: get_string(a, &["name"]),
                mime_type: get_string(a, &["mime_type"]).or_else(|| get_string(a, &["mimeType"])),
            })
        })
        .collect()
}

/// Deserializes an optional instant given as epoch seconds or RFC 3339 text.
pub(crate) fn deserialize_timestamp<'de, D>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(timestamp_from_value))
}

/// Interprets a JSON value as an instant.
pub(crate) fn timestamp_from_value(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::Number(n) => {
            let secs = n.as_f64()?;
            #[allow(clippy::cast_possible_truncation)]
            let millis = (secs * 1000.0).round() as i64;
            DateTime::from_timestamp_millis(millis)
        }
        serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        _ => None,
    }
}

/// Treats an explicit `null` like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Deserializes a message, logging and discarding it when it is unreadable.
///
/// A single malformed message must not take its whole conversation down.
pub(crate) fn deserialize_lenient_message<'de, D>(
    deserializer: D,
) -> Result<Option<Message>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let Some(value) = Option::<serde_json::Value>::deserialize(deserializer)? else {
        return Ok(None);
    };
    match serde_json::from_value(value) {
        Ok(message) => Ok(Some(message)),
        Err(error) => {
            tracing::warn!(%error, "dropping unreadable message");
            Ok(None)
        }
    }
}

/// Navigates a JSON path and returns the string value at the end.
///
/// # Arguments
///
/// * `value` - The root JSON value to navigate from
/// * `path` - A sequence of keys to follow through the JSON structure
pub(crate) fn get_str<'a>(value: &'a serde_json::Value, path: &[&str]) -> Option<&'a str> {
    let mut current = value;
    for key in path {
        current = current.get(*key)?;
    }
    current.as_str()
}

/// Like [`get_str`] but returns an owned `String`.
pub(crate) fn get_string(value: &serde_json::Value, path: &[&str]) -> Option<String> {
    get_str(value, path).map(str::to_owned)
}

fn get_bool(value: &serde_json::Value, key: &str) -> bool {
    value
        .get(key)
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false)
}

/// Parses an export into its conversations.
///
/// This is the main entry point for parsing. It accepts the contents of
/// `conversations.json` (an array) as well as a single conversation object.
/// Conversations that cannot be decoded are logged and skipped so one broken
/// record does not lose the rest of the archive.
///
/// # Errors
///
/// Returns an error if the input is not JSON, or is JSON of another shape.
///
/// # Example
///
/// ```
/// use chatgpt_md::parser::parse_export;
///
/// let conversations = parse_export("[]").unwrap();
/// assert!(conversations.is_empty());
/// ```
pub fn parse_export(json_str: &str) -> Result<Vec<Conversation>, ParseError> {
    let value: serde_json::Value = serde_json::from_str(json_str).context(JsonSnafu)?;

    let records = match value {
        serde_json::Value::Array(records) => records,
        record @ serde_json::Value::Object(_) => vec![record],
        _ => return UnexpectedShapeSnafu.fail(),
    };

    let mut conversations = Vec::with_capacity(records.len());
    for (index, record) in records.into_iter().enumerate() {
        let title = get_string(&record, &["title"]);
        match serde_json::from_value::<Conversation>(record) {
            Ok(conversation) => conversations.push(conversation),
            Err(error) => {
                tracing::warn!(
                    index,
                    title = title.as_deref().unwrap_or_default(),
                    %error,
                    "skipping unreadable conversation"
                );
            }
        }
    }
    Ok(conversations)
}

/// Parses a single conversation object.
///
/// # Errors
///
/// Returns an error if the JSON is malformed or lacks required fields.
pub fn parse_conversation(json_str: &str) -> Result<Conversation, ParseError> {
    serde_json::from_str(json_str).context(JsonSnafu)
}
