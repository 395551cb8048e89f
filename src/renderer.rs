// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2025 Brian Hetro <whee@smaertness.net>

//! Markdown rendering for parsed ChatGPT conversations.
//!
//! This module transforms a [`Conversation`] into a readable Markdown
//! document. The output is deterministic: the same conversation and options
//! always produce the same bytes.
//!
//! # Output Format
//!
//! The rendered Markdown includes:
//! - A YAML frontmatter block with the enabled [`FrontmatterField`]s
//! - One section per visible message, headed by the author header
//!   (`# Me`, `# ChatGPT`, ...)
//! - Optional timestamps, image links, and Obsidian navigation links
//! - A `---` rule between sections
//!
//! # Example
//!
//! ```
//! use chatgpt_md::parser::parse_conversation;
//! use chatgpt_md::renderer::{RenderOptions, render_markdown};
//!
//! let json = r#"{
//!     "title": "Greetings",
//!     "create_time": 1733356800.0,
//!     "current_node": "b",
//!     "conversation_id": "abc",
//!     "mapping": {
//!         "a": {
//!             "parent": null, "children": ["b"],
//!             "message": {
//!                 "id": "a", "author": {"role": "user"},
//!                 "content": {"content_type": "text", "parts": ["Hello!"]}
//!             }
//!         },
//!         "b": {
//!             "parent": "a", "children": [],
//!             "message": {
//!                 "id": "b", "author": {"role": "assistant"},
//!                 "content": {"content_type": "text", "parts": ["Hi there!"]}
//!             }
//!         }
//!     }
//! }"#;
//!
//! let conversation = parse_conversation(json).unwrap();
//! let markdown = render_markdown(&conversation, &RenderOptions::default());
//!
//! assert!(markdown.starts_with("---\ntitle: Greetings\n"));
//! assert!(markdown.contains("# Me\n\nHello!"));
//! assert!(markdown.contains("# ChatGPT\n\nHi there!"));
//! ```

use crate::citations::{CitationMap, LinkFlavor, resolve_citations};
use crate::content::{self, ImageRef};
use crate::conversation::{Conversation, MessageNode, RenderOrder};
use crate::parser::{CanvasDocument, Role};
use crate::tree::NodeId;
use chrono::NaiveDate;
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use regex::Regex;
use serde_yaml::{Mapping, Value};
use snafu::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

/// Rule placed between message sections.
pub const SECTION_SEPARATOR: &str = "\n\n---\n\n";

/// Characters escaped in image link targets. `/` is kept so relative paths
/// stay readable.
const LINK_PATH: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'(')
    .add(b')')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

static TAG_UNSAFE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9/_\-]+").expect("tag pattern is valid"));

/// Markdown dialect of the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Flavor {
    /// Plain CommonMark.
    #[default]
    Standard,
    /// Obsidian: block ids on headers, parent/child navigation links and
    /// wiki-style citation links.
    Obsidian,
}

impl Flavor {
    const fn link_flavor(self) -> LinkFlavor {
        match self {
            Self::Standard => LinkFlavor::Standard,
            Self::Obsidian => LinkFlavor::Wiki,
        }
    }
}

/// Section headers per author role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorHeaders {
    /// Header for user-authored system messages (custom instructions).
    pub system: String,
    /// Header for user messages.
    pub user: String,
    /// Header for assistant messages.
    pub assistant: String,
    /// Header for tool and function output.
    pub tool: String,
}

impl Default for AuthorHeaders {
    fn default() -> Self {
        Self {
            system: "### System".into(),
            user: "# Me".into(),
            assistant: "# ChatGPT".into(),
            tool: "### Tool output".into(),
        }
    }
}

impl AuthorHeaders {
    /// Returns the header for a role.
    #[must_use]
    pub fn for_role(&self, role: Role) -> &str {
        match role {
            Role::System => &self.system,
            Role::User => &self.user,
            Role::Assistant => &self.assistant,
            Role::Tool | Role::Function => &self.tool,
        }
    }

    /// Returns the header slot for a role, for overriding.
    pub fn for_role_mut(&mut self, role: Role) -> &mut String {
        match role {
            Role::System => &mut self.system,
            Role::User => &mut self.user,
            Role::Assistant => &mut self.assistant,
            Role::Tool | Role::Function => &mut self.tool,
        }
    }
}

/// A frontmatter field. Fields are emitted in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FrontmatterField {
    /// Conversation title.
    Title,
    /// `chatgpt` plus the plugin namespaces, normalized as tags.
    Tags,
    /// Link to the conversation in the web app.
    ChatLink,
    /// Creation time (RFC 3339).
    CreateTime,
    /// Last update time (RFC 3339).
    UpdateTime,
    /// Model slug, or null.
    Model,
    /// Plugin namespaces invoked by tools.
    UsedPlugins,
    /// Visible user and assistant messages.
    MessageCount,
    /// Content types of visible messages.
    ContentTypes,
    /// Custom instructions payload, or null.
    CustomInstructions,
    /// Whether the conversation is starred.
    IsStarred,
    /// Voice mode descriptor.
    Voice,
}

impl FrontmatterField {
    /// Every field, in output order.
    pub const ALL: [Self; 12] = [
        Self::Title,
        Self::Tags,
        Self::ChatLink,
        Self::CreateTime,
        Self::UpdateTime,
        Self::Model,
        Self::UsedPlugins,
        Self::MessageCount,
        Self::ContentTypes,
        Self::CustomInstructions,
        Self::IsStarred,
        Self::Voice,
    ];

    /// Returns the YAML key of the field.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::Tags => "tags",
            Self::ChatLink => "chat_link",
            Self::CreateTime => "create_time",
            Self::UpdateTime => "update_time",
            Self::Model => "model",
            Self::UsedPlugins => "used_plugins",
            Self::MessageCount => "message_count",
            Self::ContentTypes => "content_types",
            Self::CustomInstructions => "custom_instructions",
            Self::IsStarred => "is_starred",
            Self::Voice => "voice",
        }
    }
}

impl fmt::Display for FrontmatterField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a frontmatter field name is not recognized.
#[derive(Debug, Snafu)]
#[snafu(display("unknown frontmatter field: {name}"))]
pub struct UnknownField {
    name: String,
}

impl FromStr for FrontmatterField {
    type Err = UnknownField;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        Self::ALL
            .into_iter()
            .find(|f| f.as_str() == name)
            .context(UnknownFieldSnafu { name })
    }
}

/// The set of frontmatter fields to emit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontmatterFields(BTreeSet<FrontmatterField>);

impl Default for FrontmatterFields {
    /// Everything except tags, the starred flag and the voice descriptor.
    fn default() -> Self {
        Self::all()
            .without(FrontmatterField::Tags)
            .without(FrontmatterField::IsStarred)
            .without(FrontmatterField::Voice)
    }
}

impl FrontmatterFields {
    /// No fields: the document gets no frontmatter.
    #[must_use]
    pub fn none() -> Self {
        Self(BTreeSet::new())
    }

    /// Every field.
    #[must_use]
    pub fn all() -> Self {
        Self(FrontmatterField::ALL.into_iter().collect())
    }

    /// Adds a field.
    #[must_use]
    pub fn with(mut self, field: FrontmatterField) -> Self {
        self.0.insert(field);
        self
    }

    /// Removes a field.
    #[must_use]
    pub fn without(mut self, field: FrontmatterField) -> Self {
        self.0.remove(&field);
        self
    }

    /// Returns `true` if the field is enabled.
    #[must_use]
    pub fn contains(&self, field: FrontmatterField) -> bool {
        self.0.contains(&field)
    }

    /// Returns `true` if no field is enabled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates the enabled fields in output order.
    pub fn iter(&self) -> impl Iterator<Item = FrontmatterField> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<FrontmatterField> for FrontmatterFields {
    fn from_iter<I: IntoIterator<Item = FrontmatterField>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Configuration options for Markdown rendering.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RenderOptions {
    /// Which nodes to render: every branch, or only the active one.
    pub order: RenderOrder,

    /// Markdown dialect.
    pub flavor: Flavor,

    /// Section headers per author role.
    pub headers: AuthorHeaders,

    /// Frontmatter fields to emit.
    pub frontmatter: FrontmatterFields,

    /// Whether each section shows when its message was sent.
    ///
    /// The first message and any message on a new day show the full date;
    /// others show the time only.
    pub show_timestamps: bool,

    /// Whether to rewrite `\[ \]` and `\( \)` math delimiters to dollars.
    pub latex_dollars: bool,
}

/// Maps image assets to the link target written into the document.
///
/// Implemented for closures taking the asset id and its display name. A
/// `None` result omits the image link.
pub trait AssetResolver {
    /// Returns the relative path to link for an asset, if it is available.
    fn resolve(&self, asset_id: &str, name: Option<&str>) -> Option<String>;
}

impl<F> AssetResolver for F
where
    F: Fn(&str, Option<&str>) -> Option<String>,
{
    fn resolve(&self, asset_id: &str, name: Option<&str>) -> Option<String> {
        self(asset_id, name)
    }
}

/// A resolver that knows no assets; image links are omitted.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAssets;

impl AssetResolver for NoAssets {
    fn resolve(&self, _asset_id: &str, _name: Option<&str>) -> Option<String> {
        None
    }
}

/// A rendered conversation and the side artifacts it references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedConversation {
    /// The Markdown document.
    pub markdown: String,
    /// Every image asset referenced by a rendered message, by asset id,
    /// with its display name when known.
    pub assets: BTreeMap<String, Option<String>>,
    /// Canvas documents created in the conversation.
    pub documents: Vec<CanvasDocument>,
}

/// Renders a conversation as Markdown without resolving images.
#[must_use]
pub fn render_markdown(conversation: &Conversation, opts: &RenderOptions) -> String {
    render_conversation(conversation, opts, &NoAssets).markdown
}

/// Renders a conversation as Markdown.
///
/// This is the main entry point for rendering. Citations are resolved
/// against the conversation's [`CitationMap`]; images are linked through
/// `resolver`.
#[must_use]
pub fn render_conversation(
    conversation: &Conversation,
    opts: &RenderOptions,
    resolver: &impl AssetResolver,
) -> RenderedConversation {
    let citations = conversation.citation_map();
    let nodes: Vec<MessageNode<'_>> = conversation.visible_message_nodes(opts.order).collect();
    let mut renderer = SectionRenderer {
        conversation,
        opts,
        resolver,
        citations: &citations,
        rendered: nodes.iter().map(|node| node.id).collect(),
        last_date: None,
        assets: BTreeMap::new(),
    };

    let sections: Vec<String> = nodes.into_iter().map(|node| renderer.section(node)).collect();

    let mut markdown = render_frontmatter(conversation, &opts.frontmatter);
    if !sections.is_empty() {
        if !markdown.is_empty() {
            markdown.push('\n');
        }
        markdown.push_str(&sections.join(SECTION_SEPARATOR));
        markdown.push('\n');
    }

    tracing::debug!(
        conversation = %conversation.conversation_id,
        sections = sections.len(),
        "rendered conversation"
    );

    RenderedConversation {
        markdown,
        assets: renderer.assets,
        documents: conversation.canvas_documents(),
    }
}

struct SectionRenderer<'a, R> {
    conversation: &'a Conversation,
    opts: &'a RenderOptions,
    resolver: &'a R,
    citations: &'a CitationMap,
    /// Nodes that get a section; navigation links only point at these.
    rendered: HashSet<NodeId>,
    last_date: Option<NaiveDate>,
    assets: BTreeMap<String, Option<String>>,
}

impl<R: AssetResolver> SectionRenderer<'_, R> {
    fn section(&mut self, node: MessageNode<'_>) -> String {
        let message = node.message;
        let obsidian = self.opts.flavor == Flavor::Obsidian;
        let mut blocks = Vec::new();

        let mut header = self.opts.headers.for_role(message.author.role).to_owned();
        if obsidian {
            header.push_str(" ^");
            header.push_str(&block_id(&node.node.id));
            if let Some(parent) = self.rendered_parent(node.id) {
                header.push_str(&format!(
                    "\n[⬆️](#^{})",
                    block_id(&self.conversation.nodes.node(parent).id)
                ));
            }
        }
        blocks.push(header);

        if self.opts.show_timestamps
            && let Some(time) = message.create_time
        {
            let date = time.date_naive();
            let format = if self.last_date == Some(date) {
                "*%H:%M UTC*"
            } else {
                "*%Y-%m-%d %H:%M UTC*"
            };
            blocks.push(time.format(format).to_string());
            self.last_date = Some(date);
        }

        let text = self.text(node);
        if !text.is_empty() {
            blocks.push(text);
        }

        let images = self.image_links(&content::message_images(message));
        if !images.is_empty() {
            blocks.push(images);
        }

        if obsidian {
            let children = self.rendered_children(node.id);
            if let Some(links) = child_links(self.conversation, &children) {
                blocks.push(links);
            }
        }

        blocks.join("\n\n")
    }

    fn text(&self, node: MessageNode<'_>) -> String {
        let message = node.message;
        let text = content::message_text(message).unwrap_or_else(|error| {
            tracing::debug!(%error, "rendering message without text");
            String::new()
        });
        let text = resolve_citations(
            &text,
            message,
            self.citations,
            self.opts.flavor.link_flavor(),
        );
        let mut text = close_code_blocks(&text);
        if self.opts.latex_dollars {
            text = replace_latex_delimiters(&text);
        }
        text.trim_end().to_owned()
    }

    fn image_links(&mut self, images: &[ImageRef]) -> String {
        images
            .iter()
            .filter_map(|image| {
                self.assets
                    .entry(image.asset_id.clone())
                    .or_insert_with(|| image.name.clone());
                let Some(path) = self.resolver.resolve(&image.asset_id, image.name.as_deref())
                else {
                    tracing::debug!(asset = %image.asset_id, "image asset not found");
                    return None;
                };
                Some(format!("![Image]({})", utf8_percent_encode(&path, LINK_PATH)))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Nearest ancestor that has a section.
    fn rendered_parent(&self, id: NodeId) -> Option<NodeId> {
        let nodes = &self.conversation.nodes;
        let mut seen = HashSet::from([id]);
        let mut current = nodes.parent(id)?;
        loop {
            if !seen.insert(current) {
                return None;
            }
            if self.is_rendered(current) {
                return Some(current);
            }
            current = nodes.parent(current)?;
        }
    }

    /// Nearest descendants that have a section, in child order.
    fn rendered_children(&self, id: NodeId) -> Vec<NodeId> {
        let nodes = &self.conversation.nodes;
        let mut seen = HashSet::from([id]);
        let mut found = Vec::new();
        let mut stack: Vec<NodeId> = nodes.node(id).child_links().iter().rev().copied().collect();

        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            if self.is_rendered(current) {
                found.push(current);
            } else {
                stack.extend(nodes.node(current).child_links().iter().rev().copied());
            }
        }
        found
    }

    fn is_rendered(&self, id: NodeId) -> bool {
        self.rendered.contains(&id)
    }
}

/// Obsidian block ids allow letters, digits and dashes only.
fn block_id(node_id: &str) -> String {
    node_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect()
}

fn child_links(conversation: &Conversation, children: &[NodeId]) -> Option<String> {
    let id = |child: NodeId| block_id(&conversation.nodes.node(child).id);
    match children {
        [] => None,
        [only] => Some(format!("[⬇️](#^{})", id(*only))),
        many => Some(
            many.iter()
                .enumerate()
                .map(|(i, child)| format!("[{} ⬇️](#^{})", i + 1, id(*child)))
                .collect::<Vec<_>>()
                .join(" | "),
        ),
    }
}

/// Renders the YAML frontmatter block, fenced by `---` lines.
///
/// Returns an empty string when no field is enabled.
#[must_use]
pub fn render_frontmatter(conversation: &Conversation, fields: &FrontmatterFields) -> String {
    if fields.is_empty() {
        return String::new();
    }

    let strings =
        |items: Vec<String>| Value::Sequence(items.into_iter().map(Value::String).collect());

    let mut map = Mapping::new();
    for field in fields.iter() {
        let value = match field {
            FrontmatterField::Title => Value::String(conversation.title.clone()),
            FrontmatterField::Tags => strings(tags(conversation)),
            FrontmatterField::ChatLink => Value::String(conversation.url()),
            FrontmatterField::CreateTime => Value::String(conversation.create_time.to_rfc3339()),
            FrontmatterField::UpdateTime => Value::String(conversation.update_time.to_rfc3339()),
            FrontmatterField::Model => conversation
                .model()
                .map_or(Value::Null, |m| Value::String(m.to_owned())),
            FrontmatterField::UsedPlugins => strings(conversation.plugins()),
            FrontmatterField::MessageCount => {
                Value::from(conversation.message_count(&[Role::User, Role::Assistant]))
            }
            FrontmatterField::ContentTypes => strings(conversation.content_types()),
            FrontmatterField::CustomInstructions => {
                conversation.custom_instructions().map_or(Value::Null, |data| {
                    Value::Mapping(
                        data.iter()
                            .map(|(k, v)| (Value::String(k.clone()), Value::String(v.clone())))
                            .collect(),
                    )
                })
            }
            FrontmatterField::IsStarred => conversation.is_starred.map_or(Value::Null, Value::Bool),
            FrontmatterField::Voice => match &conversation.voice {
                Some(voice) => serde_yaml::to_value(voice).unwrap_or_else(|error| {
                    tracing::debug!(%error, "voice descriptor not representable");
                    Value::Null
                }),
                None => Value::Null,
            },
        };
        map.insert(Value::String(field.as_str().to_owned()), value);
    }

    match serde_yaml::to_string(&map) {
        Ok(body) => format!("---\n{body}---\n"),
        Err(error) => {
            tracing::warn!(
                conversation = %conversation.conversation_id,
                %error,
                "failed to write frontmatter"
            );
            String::new()
        }
    }
}

/// `chatgpt` plus the plugin namespaces, lowercased with unsafe runs
/// replaced by `-`.
fn tags(conversation: &Conversation) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for raw in std::iter::once("chatgpt".to_owned()).chain(conversation.plugins()) {
        let lowered = raw.trim().to_lowercase();
        let tag = TAG_UNSAFE.replace_all(&lowered, "-");
        let tag = tag.trim_matches('-');
        if !tag.is_empty() && !tags.iter().any(|t| t == tag) {
            tags.push(tag.to_owned());
        }
    }
    tags
}

/// Appends a closing fence if the text ends inside a fenced code block.
///
/// Fences follow CommonMark: three or more backticks or tildes, indented at
/// most three spaces. A block is closed by a fence of the same character
/// that is at least as long and carries no info string.
#[must_use]
pub fn close_code_blocks(text: &str) -> String {
    let mut open: Option<(char, usize)> = None;

    for line in text.lines() {
        let Some((ch, len, rest)) = fence(line) else {
            continue;
        };
        match open {
            None => open = Some((ch, len)),
            Some((open_ch, open_len))
                if ch == open_ch && len >= open_len && rest.trim().is_empty() =>
            {
                open = None;
            }
            Some(_) => {}
        }
    }

    let mut out = text.to_owned();
    if let Some((ch, len)) = open {
        tracing::debug!("closing unterminated code fence");
        if !out.ends_with('\n') {
            out.push('\n');
        }
        out.extend(std::iter::repeat_n(ch, len));
    }
    out
}

/// Splits a fence line into its character, run length, and info string.
fn fence(line: &str) -> Option<(char, usize, &str)> {
    let body = line.trim_start_matches(' ');
    if line.len() - body.len() > 3 {
        return None;
    }
    let ch = body.chars().next().filter(|c| *c == '`' || *c == '~')?;
    let rest = body.trim_start_matches(ch);
    let len = body.len() - rest.len();
    if len < 3 || (ch == '`' && rest.contains('`')) {
        return None;
    }
    Some((ch, len, rest))
}

/// Rewrites `\[ \]` to `$$` and `\( \)` to `$`.
#[must_use]
pub fn replace_latex_delimiters(text: &str) -> String {
    text.replace("\\[", "$$")
        .replace("\\]", "$$")
        .replace("\\(", "$")
        .replace("\\)", "$")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{
        Attachment, CitationSpan, ContentBody, ContentType, DOCUMENT_CREATION_RECIPIENT, Part,
        SearchEntry,
    };
    use crate::test_support::{base_time, chain, message, parts_message, text_message, tool_message};
    use crate::tree::Node;
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    fn no_frontmatter() -> RenderOptions {
        RenderOptions {
            frontmatter: FrontmatterFields::none(),
            ..Default::default()
        }
    }

    #[test]
    fn renders_round_trip_conversation() {
        let conversation = chain(vec![
            text_message(Role::User, "Hello"),
            text_message(Role::Assistant, "Hi there!"),
        ]);
        let output = render_markdown(&conversation, &no_frontmatter());

        assert_eq!(output, "# Me\n\nHello\n\n---\n\n# ChatGPT\n\nHi there!\n");
        assert_eq!(output.matches("\n---\n").count(), 1);
    }

    #[test]
    fn skips_hidden_messages() {
        let mut system = text_message(Role::System, "You are ChatGPT");
        system.metadata.is_visually_hidden = true;
        let conversation = chain(vec![
            system,
            text_message(Role::User, "Hello"),
            tool_message(
                "web.run",
                ContentType::Text,
                ContentBody::Parts(vec![Part::Text("raw".into())]),
            ),
            text_message(Role::Assistant, "Hi"),
        ]);
        let output = render_markdown(&conversation, &no_frontmatter());

        assert!(!output.contains("You are ChatGPT"));
        assert!(!output.contains("raw"));
        assert_eq!(output.matches("---").count(), 1);
    }

    #[test]
    fn empty_conversation_renders_only_frontmatter() {
        let conversation = chain(vec![]);
        let output = render_markdown(&conversation, &RenderOptions::default());

        assert!(output.starts_with("---\ntitle: Test chat\n"));
        assert!(output.ends_with("---\n"));
        assert_eq!(render_markdown(&conversation, &no_frontmatter()), "");
    }

    #[test]
    fn uses_custom_author_headers() {
        let conversation = chain(vec![text_message(Role::User, "Hello")]);
        let mut opts = no_frontmatter();
        *opts.headers.for_role_mut(Role::User) = "## You".into();

        assert_eq!(render_markdown(&conversation, &opts), "## You\n\nHello\n");
    }

    #[test]
    fn tool_and_function_share_the_tool_header() {
        let headers = AuthorHeaders::default();
        assert_eq!(headers.for_role(Role::Tool), "### Tool output");
        assert_eq!(headers.for_role(Role::Function), "### Tool output");
        assert_eq!(headers.for_role(Role::System), "### System");
    }

    #[test]
    fn active_branch_renders_selected_path_only() {
        let user = text_message(Role::User, "Question");
        let mut first = text_message(Role::Assistant, "First answer");
        first.create_time = Some(base_time() + Duration::minutes(2));
        let mut second = text_message(Role::Assistant, "Second answer");
        second.create_time = Some(base_time() + Duration::minutes(3));

        let nodes = vec![
            Node::new("u", Some(user), None, vec!["a1".into(), "a2".into()]),
            Node::new("a1", Some(first), Some("u".into()), vec![]),
            Node::new("a2", Some(second), Some("u".into()), vec![]),
        ];
        let conversation = Conversation::new("Branches", base_time(), nodes, "a2", "c");

        let full = render_markdown(&conversation, &no_frontmatter());
        assert!(full.contains("First answer"));
        assert!(full.find("First answer") < full.find("Second answer"));

        let active = render_markdown(
            &conversation,
            &RenderOptions {
                order: RenderOrder::ActiveBranch,
                ..no_frontmatter()
            },
        );
        assert!(!active.contains("First answer"));
        assert!(active.contains("Question"));
        assert!(active.contains("Second answer"));
    }

    #[test]
    fn shows_date_on_first_message_and_date_change() {
        let mut first = text_message(Role::User, "one");
        first.create_time = Some(base_time() + Duration::hours(23));
        let mut second = text_message(Role::Assistant, "two");
        second.create_time = Some(base_time() + Duration::hours(23) + Duration::minutes(30));
        let mut third = text_message(Role::User, "three");
        third.create_time = Some(base_time() + Duration::hours(24) + Duration::minutes(5));

        let conversation = chain(vec![first, second, third]);
        let output = render_markdown(
            &conversation,
            &RenderOptions {
                show_timestamps: true,
                ..no_frontmatter()
            },
        );

        assert!(output.contains("# Me\n\n*2024-12-05 23:00 UTC*\n\none"));
        assert!(output.contains("# ChatGPT\n\n*23:30 UTC*\n\ntwo"));
        assert!(output.contains("# Me\n\n*2024-12-06 00:05 UTC*\n\nthree"));
    }

    #[test]
    fn resolves_citations_in_sections() {
        let mut search = tool_message("web.run", ContentType::Text, ContentBody::Empty);
        search.metadata.search_results = vec![SearchEntry {
            turn_index: Some(0),
            ref_type: Some("search".into()),
            ref_index: Some(0),
            title: Some("Rust".into()),
            url: Some("https://rust-lang.org".into()),
        }];
        let mut answer = text_message(
            Role::Assistant,
            "Rust is great.\u{E200}cite\u{E202}turn0search0\u{E201} Indeed.",
        );
        answer.metadata.citations = vec![CitationSpan {
            start: 8,
            end: 13,
            title: Some("great".into()),
            url: Some("https://g".into()),
        }];

        let conversation = chain(vec![text_message(Role::User, "Is Rust good?"), search, answer]);
        let output = render_markdown(&conversation, &no_frontmatter());

        let expected = "Rust is [great](https://g).[Rust](https://rust-lang.org) Indeed.";
        assert!(output.contains(expected));
    }

    #[test]
    fn obsidian_flavor_adds_block_ids_and_navigation() {
        let conversation = chain(vec![
            text_message(Role::User, "Hello"),
            text_message(Role::Assistant, "Hi there!"),
        ]);
        let output = render_markdown(
            &conversation,
            &RenderOptions {
                flavor: Flavor::Obsidian,
                ..no_frontmatter()
            },
        );

        assert_eq!(
            output,
            "# Me ^n1\n\nHello\n\n[⬇️](#^n2)\n\n---\n\n# ChatGPT ^n2\n[⬆️](#^n1)\n\nHi there!\n"
        );
    }

    #[test]
    fn obsidian_navigation_skips_hidden_nodes() {
        let conversation = chain(vec![
            text_message(Role::User, "Hello"),
            tool_message(
                "bio",
                ContentType::Text,
                ContentBody::Parts(vec![Part::Text("memo".into())]),
            ),
            text_message(Role::Assistant, "Hi"),
        ]);
        let output = render_markdown(
            &conversation,
            &RenderOptions {
                flavor: Flavor::Obsidian,
                ..no_frontmatter()
            },
        );

        assert!(output.contains("[⬇️](#^n3)"));
        assert!(output.contains("[⬆️](#^n1)"));
        assert!(!output.contains("n2"));
    }

    #[test]
    fn numbers_multiple_child_links() {
        let conversation = Conversation::new(
            "Branches",
            base_time(),
            vec![
                Node::new(
                    "u",
                    Some(text_message(Role::User, "Q")),
                    None,
                    vec!["a".into(), "b".into()],
                ),
                Node::new("a", Some(text_message(Role::Assistant, "A")), Some("u".into()), vec![]),
                Node::new("b", Some(text_message(Role::Assistant, "B")), Some("u".into()), vec![]),
            ],
            "b",
            "c",
        );
        let output = render_markdown(
            &conversation,
            &RenderOptions {
                flavor: Flavor::Obsidian,
                ..no_frontmatter()
            },
        );

        assert!(output.contains("[1 ⬇️](#^a) | [2 ⬇️](#^b)"));
    }

    #[test]
    fn active_branch_links_only_rendered_sections() {
        let conversation = Conversation::new(
            "Branches",
            base_time(),
            vec![
                Node::new(
                    "u",
                    Some(text_message(Role::User, "Q")),
                    None,
                    vec!["a".into(), "b".into()],
                ),
                Node::new(
                    "a",
                    Some(text_message(Role::Assistant, "A")),
                    Some("u".into()),
                    vec![],
                ),
                Node::new(
                    "b",
                    Some(text_message(Role::Assistant, "B")),
                    Some("u".into()),
                    vec![],
                ),
            ],
            "b",
            "c",
        );
        let output = render_markdown(
            &conversation,
            &RenderOptions {
                order: RenderOrder::ActiveBranch,
                flavor: Flavor::Obsidian,
                ..no_frontmatter()
            },
        );

        assert_eq!(
            output,
            "# Me ^u\n\nQ\n\n[⬇️](#^b)\n\n---\n\n# ChatGPT ^b\n[⬆️](#^u)\n\nB\n"
        );
        assert!(!output.contains("#^a"));
    }

    #[test]
    fn standard_flavor_has_no_block_ids() {
        let conversation = chain(vec![
            text_message(Role::User, "Hello"),
            text_message(Role::Assistant, "Hi"),
        ]);
        let output = render_markdown(&conversation, &no_frontmatter());

        assert!(!output.contains('^'));
        assert!(!output.contains("⬆️"));
    }

    #[test]
    fn links_resolved_images_and_reports_assets() {
        let mut msg = parts_message(
            Role::User,
            vec![
                Part::Image {
                    asset_pointer: "file-service://file-a".into(),
                },
                Part::Image {
                    asset_pointer: "file-service://file-missing".into(),
                },
                Part::Text("Look".into()),
            ],
        );
        msg.metadata.attachments = vec![Attachment {
            id: "file-a".into(),
            name: Some("my cat.png".into()),
            mime_type: Some("image/png".into()),
        }];
        let conversation = chain(vec![msg]);

        let resolver = |id: &str, name: Option<&str>| {
            (id == "file-a").then(|| format!("assets/{}", name.unwrap_or(id)))
        };
        let rendered = render_conversation(&conversation, &no_frontmatter(), &resolver);

        assert_eq!(rendered.markdown, "# Me\n\nLook\n\n![Image](assets/my%20cat.png)\n");
        assert_eq!(
            rendered.assets,
            BTreeMap::from([
                ("file-a".to_owned(), Some("my cat.png".to_owned())),
                ("file-missing".to_owned(), None),
            ])
        );
    }

    #[test]
    fn image_only_message_is_rendered() {
        let conversation = chain(vec![parts_message(
            Role::User,
            vec![Part::Image {
                asset_pointer: "sediment://file_1".into(),
            }],
        )]);
        let rendered = render_conversation(
            &conversation,
            &no_frontmatter(),
            &|id: &str, _: Option<&str>| Some(format!("assets/{id}.png")),
        );

        assert_eq!(rendered.markdown, "# Me\n\n![Image](assets/file_1.png)\n");
    }

    #[test]
    fn reports_canvas_documents() {
        let mut call = message(
            Role::Assistant,
            ContentType::Text,
            ContentBody::Parts(vec![Part::Text(
                r#"{"name": "notes", "type": "document/markdown", "content": "Hi"}"#.into(),
            )]),
        );
        call.recipient = Some(DOCUMENT_CREATION_RECIPIENT.into());
        let conversation = chain(vec![text_message(Role::User, "Write notes"), call]);

        let rendered = render_conversation(&conversation, &no_frontmatter(), &NoAssets);
        assert_eq!(rendered.documents.len(), 1);
        assert_eq!(rendered.documents[0].name, "notes");
        assert_eq!(rendered.documents[0].extension(), ".md");
    }

    #[test]
    fn closes_unterminated_fence() {
        assert_eq!(close_code_blocks("```python\ncode"), "```python\ncode\n```");
        assert_eq!(close_code_blocks("```python\ncode\n"), "```python\ncode\n```");
    }

    #[test]
    fn leaves_balanced_fences_alone() {
        let text = "```rust\nfn main() {}\n```\n\ntext";
        assert_eq!(close_code_blocks(text), text);
        assert_eq!(close_code_blocks("no code"), "no code");
    }

    #[test]
    fn fence_closing_respects_character_and_length() {
        assert_eq!(close_code_blocks("````md\n```\ninner"), "````md\n```\ninner\n````");
        assert_eq!(close_code_blocks("~~~\n```\n"), "~~~\n```\n~~~");
        assert_eq!(close_code_blocks("```\n``` rust\n"), "```\n``` rust\n```");
        assert_eq!(close_code_blocks("    ```\nindented code"), "    ```\nindented code");
    }

    #[test]
    fn unclosed_fence_in_message_is_closed() {
        let conversation = chain(vec![text_message(Role::Assistant, "```python\ncode")]);
        let output = render_markdown(&conversation, &no_frontmatter());
        assert_eq!(output, "# ChatGPT\n\n```python\ncode\n```\n");
    }

    #[test]
    fn rewrites_latex_delimiters_when_enabled() {
        assert_eq!(replace_latex_delimiters(r"\[x^2\] and \(y\)"), "$$x^2$$ and $y$");

        let conversation = chain(vec![text_message(Role::Assistant, r"Area: \(\pi r^2\)")]);
        let plain = render_markdown(&conversation, &no_frontmatter());
        assert!(plain.contains(r"\(\pi r^2\)"));

        let dollars = render_markdown(
            &conversation,
            &RenderOptions {
                latex_dollars: true,
                ..no_frontmatter()
            },
        );
        assert!(dollars.contains(r"Area: $\pi r^2$"));
    }

    #[test]
    fn renders_default_frontmatter() {
        let mut assistant = text_message(Role::Assistant, "Hi");
        assistant.metadata.model_slug = Some("gpt-4o".into());
        let conversation = chain(vec![text_message(Role::User, "Hello"), assistant]);

        let header = render_frontmatter(&conversation, &FrontmatterFields::default());

        let expected = "---\ntitle: Test chat\nchat_link: https://chat.openai.com/c/conv-1\n";
        assert!(header.starts_with(expected));
        assert!(header.contains("create_time: "));
        assert!(header.contains("2024-12-05T00:00:00+00:00"));
        assert!(header.contains("model: gpt-4o\n"));
        assert!(header.contains("used_plugins: []\n"));
        assert!(header.contains("message_count: 2\n"));
        assert!(header.contains("content_types:\n- text\n"));
        assert!(header.contains("custom_instructions: null\n"));
        assert!(!header.contains("tags"));
        assert!(!header.contains("is_starred"));
        assert!(header.ends_with("\n---\n"));
    }

    #[test]
    fn frontmatter_fields_are_selectable() {
        let mut conversation = chain(vec![text_message(Role::User, "Hello")]);
        conversation.is_starred = Some(true);
        conversation.voice = Some(serde_json::json!("juniper"));

        let fields: FrontmatterFields = [
            FrontmatterField::Voice,
            FrontmatterField::IsStarred,
            FrontmatterField::Title,
        ]
        .into_iter()
        .collect();
        let header = render_frontmatter(&conversation, &fields);

        assert_eq!(header, "---\ntitle: Test chat\nis_starred: true\nvoice: juniper\n---\n");
        assert_eq!(render_frontmatter(&conversation, &FrontmatterFields::none()), "");
    }

    #[test]
    fn tags_include_normalized_plugins() {
        let mut tool = tool_message(
            "plugin",
            ContentType::Text,
            ContentBody::Parts(vec![Part::Text("out".into())]),
        );
        tool.metadata.invoked_plugin = Some(crate::parser::InvokedPlugin {
            namespace: Some("Web Pilot!".into()),
        });
        let conversation = chain(vec![text_message(Role::User, "Hello"), tool]);

        let fields = FrontmatterFields::none().with(FrontmatterField::Tags);
        let header = render_frontmatter(&conversation, &fields);
        assert_eq!(header, "---\ntags:\n- chatgpt\n- web-pilot\n---\n");
    }

    #[test]
    fn parses_field_names() {
        assert_eq!("chat_link".parse::<FrontmatterField>().unwrap(), FrontmatterField::ChatLink);
        assert_eq!(" model ".parse::<FrontmatterField>().unwrap(), FrontmatterField::Model);
        assert!("nope".parse::<FrontmatterField>().is_err());
        for field in FrontmatterField::ALL {
            assert_eq!(field.as_str().parse::<FrontmatterField>().unwrap(), field);
        }
    }
}
