// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2025 Brian Hetro <whee@smaertness.net>

//! Citation resolution.
//!
//! Assistant replies cite sources in two ways:
//!
//! - **Index-anchored**: `metadata.citations` lists character spans of the
//!   text to replace with a link.
//! - **Token-anchored**: the text embeds runs like
//!   `\u{E200}cite\u{E202}turn0search3\u{E202}turn0news1\u{E201}`, whose keys
//!   refer to search results recorded anywhere in the conversation, often in
//!   a hidden tool message. Those results are collected into a
//!   [`CitationMap`].
//!
//! Index-anchored spans are resolved first, against the text they were
//! computed for; token runs second.

use crate::conversation::{Conversation, RenderOrder};
use crate::parser::{CitationSpan, ContentBody, Message, Part, SearchEntry};
use regex::{Captures, Regex};
use snafu::prelude::*;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

/// Opens a token citation run.
pub const CITE_START: char = '\u{E200}';
/// Closes a token citation run.
pub const CITE_END: char = '\u{E201}';
/// Separates the keys of a token citation run.
pub const CITE_SEPARATOR: char = '\u{E202}';

static TOKEN_RUN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new("\u{E200}cite((?:\u{E202}[^\u{E200}\u{E201}\u{E202}]*)+)\u{E201}")
        .expect("token citation pattern is valid")
});

static KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^turn(\d+)([A-Za-z_]+)(\d+)$").expect("citation key pattern is valid")
});

/// How links are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkFlavor {
    /// `[title](url)`.
    #[default]
    Standard,
    /// `[[[title](url)]]`, for wiki-style note tools.
    Wiki,
}

/// Formats a link from whatever parts are available.
///
/// Empty strings count as missing. Without a URL the title is returned
/// bare; without either the result is empty.
#[must_use]
pub fn format_link(title: Option<&str>, url: Option<&str>, flavor: LinkFlavor) -> String {
    let title = title.filter(|t| !t.is_empty());
    let url = url.filter(|u| !u.is_empty());

    let link = match (title, url) {
        (Some(title), Some(url)) => format!("[{title}]({url})"),
        (None, Some(url)) => format!("[Source]({url})"),
        (Some(title), None) => title.to_owned(),
        (None, None) => return String::new(),
    };

    match flavor {
        LinkFlavor::Standard => link,
        LinkFlavor::Wiki => format!("[[{link}]]"),
    }
}

/// Error returned when a citation key is malformed.
#[derive(Debug, Snafu)]
#[snafu(display("invalid citation key: {key:?}"))]
pub struct InvalidCitationKey {
    key: String,
}

/// Identifies a search result: turn, reference kind and position.
///
/// Written as `turn{turn}{kind}{index}`, e.g. `turn0search18`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CitationKey {
    /// Turn the search ran in.
    pub turn: u32,
    /// Reference kind ("search", "news", ...).
    pub kind: String,
    /// Position within the turn.
    pub index: u32,
}

impl CitationKey {
    /// Builds the key of a search entry, if the entry carries one.
    ///
    /// A missing reference kind defaults to `search`.
    #[must_use]
    pub fn from_entry(entry: &SearchEntry) -> Option<Self> {
        Some(Self {
            turn: entry.turn_index?,
            kind: entry.ref_type.clone().unwrap_or_else(|| "search".to_owned()),
            index: entry.ref_index?,
        })
    }
}

impl fmt::Display for CitationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "turn{}{}{}", self.turn, self.kind, self.index)
    }
}

impl FromStr for CitationKey {
    type Err = InvalidCitationKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidCitationKeySnafu { key: s }.build();
        let caps = KEY.captures(s).ok_or_else(invalid)?;
        Ok(Self {
            turn: caps[1].parse().map_err(|_| invalid())?,
            kind: caps[2].to_owned(),
            index: caps[3].parse().map_err(|_| invalid())?,
        })
    }
}

/// Where a citation points.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CitationSource {
    /// Page title.
    pub title: Option<String>,
    /// Page URL.
    pub url: Option<String>,
}

/// Search results of a conversation, by citation key.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CitationMap {
    sources: BTreeMap<CitationKey, CitationSource>,
}

impl CitationMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Collects every search result of a conversation, hidden messages
    /// included.
    ///
    /// Messages are scanned in full order; a key defined twice keeps the
    /// later definition.
    #[must_use]
    pub fn from_conversation(conversation: &Conversation) -> Self {
        let mut map = Self::new();
        for node in conversation.message_nodes(RenderOrder::Full) {
            map.extend_from_message(node.message);
        }
        map
    }

    /// Adds the search results carried by one message.
    pub fn extend_from_message(&mut self, message: &Message) {
        if let ContentBody::Parts(parts) = &message.content.body {
            for part in parts {
                if let Part::SearchResults(entries) = part {
                    entries.iter().for_each(|e| self.insert_entry(e));
                }
            }
        }
        message
            .metadata
            .search_results
            .iter()
            .for_each(|e| self.insert_entry(e));
    }

    fn insert_entry(&mut self, entry: &SearchEntry) {
        let Some(key) = CitationKey::from_entry(entry) else {
            tracing::debug!(
                title = entry.title.as_deref().unwrap_or_default(),
                "search result without reference id"
            );
            return;
        };
        self.insert(
            key,
            CitationSource {
                title: entry.title.clone(),
                url: entry.url.clone(),
            },
        );
    }

    /// Records a source, replacing any earlier one under the same key.
    pub fn insert(&mut self, key: CitationKey, source: CitationSource) {
        self.sources.insert(key, source);
    }

    /// Looks up a source.
    #[must_use]
    pub fn get(&self, key: &CitationKey) -> Option<&CitationSource> {
        self.sources.get(key)
    }

    /// Number of known sources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Returns `true` if no sources are known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Replaces character spans of `text` with links.
///
/// Spans are applied from the end of the text backwards so earlier indices
/// stay valid. Spans that are inverted, out of bounds or that overlap a
/// span already applied are skipped.
#[must_use]
pub fn resolve_index_citations(text: &str, spans: &[CitationSpan], flavor: LinkFlavor) -> String {
    if spans.is_empty() {
        return text.to_owned();
    }

    let mut chars: Vec<char> = text.chars().collect();
    let mut ordered: Vec<&CitationSpan> = spans.iter().collect();
    ordered.sort_by(|a, b| b.start.cmp(&a.start).then_with(|| b.end.cmp(&a.end)));

    let len = chars.len();
    // Start of the leftmost region replaced so far.
    let mut floor = len;
    for span in ordered {
        if span.start >= span.end || span.end > len {
            tracing::debug!(
                start = span.start,
                end = span.end,
                len,
                "skipping out-of-bounds citation"
            );
            continue;
        }
        if span.end > floor {
            tracing::debug!(
                start = span.start,
                end = span.end,
                "skipping overlapping citation"
            );
            continue;
        }
        let link = format_link(span.title.as_deref(), span.url.as_deref(), flavor);
        chars.splice(span.start..span.end, link.chars());
        floor = span.start;
    }

    chars.into_iter().collect()
}

/// Replaces token citation runs with links from `map`.
///
/// Keys of a run become adjacent links. Unknown or malformed keys are
/// dropped; a run with no known key disappears entirely.
#[must_use]
pub fn resolve_token_citations(text: &str, map: &CitationMap, flavor: LinkFlavor) -> String {
    if !text.contains(CITE_START) {
        return text.to_owned();
    }

    TOKEN_RUN
        .replace_all(text, |caps: &Captures<'_>| {
            caps[1]
                .split(CITE_SEPARATOR)
                .filter(|key| !key.is_empty())
                .filter_map(|key| {
                    let source = key.parse::<CitationKey>().ok().and_then(|k| map.get(&k));
                    if source.is_none() {
                        tracing::debug!(key, "dropping unknown citation");
                    }
                    source
                })
                .map(|source| format_link(source.title.as_deref(), source.url.as_deref(), flavor))
                .collect::<String>()
        })
        .into_owned()
}

/// Resolves both citation kinds in the text of `message`.
#[must_use]
pub fn resolve_citations(
    text: &str,
    message: &Message,
    map: &CitationMap,
    flavor: LinkFlavor,
) -> String {
    let text = resolve_index_citations(text, &message.metadata.citations, flavor);
    resolve_token_citations(&text, map, flavor)
}
