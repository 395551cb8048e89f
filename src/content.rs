// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2025 Brian Hetro <whee@smaertness.net>

//! Extracting displayable content from messages.
//!
//! Message payloads come in several shapes (see [`ContentBody`]). This module
//! turns each shape into Markdown text and pulls out the side artifacts a
//! message references: images and canvas documents.

use crate::parser::{
    Attachment, CanvasDocument, ContentBody, Message, Part, Quote, Thought, parse_document,
};
use snafu::prelude::*;
use std::path::Path;

/// Error type for content extraction.
#[derive(Debug, Snafu)]
pub enum ContentError {
    /// The message has no field that yields text.
    #[snafu(display("no valid content found in message {message_id}"))]
    NoContent {
        /// Id of the offending message.
        message_id: String,
    },
}

/// An image referenced by a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    /// Asset id with any URI scheme removed (e.g., "file-abc123").
    pub asset_id: String,
    /// File name to use for the asset, when the export recorded one.
    pub name: Option<String>,
}

/// URI schemes prefixed to image asset pointers.
const ASSET_SCHEMES: [&str; 2] = ["file-service://", "sediment://"];

const IMAGE_EXTENSIONS: [&str; 9] = [
    "png", "jpg", "jpeg", "gif", "webp", "bmp", "svg", "tiff", "heic",
];

/// Returns the text of a message.
///
/// Parts are concatenated; quotes, reasoning recaps and thoughts get their
/// own formatting; a bare `text` or `result` field is used as is. Canvas
/// creation calls render their document as a labeled block.
///
/// # Errors
///
/// Returns [`ContentError::NoContent`] when the message carries nothing
/// interpretable. Callers usually treat that as empty text.
pub fn message_text(message: &Message) -> Result<String, ContentError> {
    let document_call = message.is_document_creation();

    match &message.content.body {
        ContentBody::Parts(parts) if !parts.is_empty() => Ok(parts
            .iter()
            .filter_map(|part| part_text(part, document_call))
            .collect()),
        ContentBody::Quote(quote) => Ok(render_quote(quote)),
        ContentBody::Recap(recap) => Ok(recap.clone()),
        ContentBody::Thoughts(thoughts) => Ok(render_thoughts(thoughts)),
        ContentBody::Text(text) => Ok(if document_call {
            document_from_json(text).map_or_else(|| text.clone(), |doc| document_block(&doc))
        } else {
            text.clone()
        }),
        ContentBody::Result(result) => Ok(result.clone()),
        ContentBody::Parts(_) | ContentBody::Empty => NoContentSnafu {
            message_id: &message.id,
        }
        .fail(),
    }
}

/// Returns `true` if the message has non-blank text.
///
/// Extraction failures count as blank.
#[must_use]
pub fn has_text(message: &Message) -> bool {
    message_text(message).is_ok_and(|text| !text.trim().is_empty())
}

fn part_text(part: &Part, document_call: bool) -> Option<String> {
    match part {
        Part::Text(text) => {
            if document_call && let Some(doc) = document_from_json(text) {
                return Some(document_block(&doc));
            }
            Some(text.clone())
        }
        Part::Document(doc) if document_call => Some(document_block(doc)),
        Part::TextObject(text) => Some(text.clone()),
        Part::Document(_) | Part::Image { .. } | Part::SearchResults(_) | Part::Other => None,
    }
}

/// Renders a canvas document as a labeled Markdown block.
#[must_use]
pub fn document_block(doc: &CanvasDocument) -> String {
    format!("### Canvas: {}\n\n{}", doc.name, doc.content)
}

/// Parses a string holding a JSON document descriptor.
fn document_from_json(text: &str) -> Option<CanvasDocument> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    parse_document(&value)
}

/// Renders a quoted source as a blockquote with an attribution line.
fn render_quote(quote: &Quote) -> String {
    let text = quote.text.trim();
    if text.is_empty() {
        return String::new();
    }

    let mut out = text
        .lines()
        .map(|line| format!("> {line}"))
        .collect::<Vec<_>>()
        .join("\n");

    let attribution = match (&quote.title, &quote.domain, &quote.url) {
        (Some(title), _, Some(url)) => Some(format!("[{title}]({url})")),
        (None, Some(domain), Some(url)) => Some(format!("[{domain}]({url})")),
        (None, None, Some(url)) => Some(format!("<{url}>")),
        _ => None,
    };
    if let Some(attribution) = attribution {
        out.push_str("\n> — ");
        out.push_str(&attribution);
    }
    out
}

/// Joins the summaries of reasoning fragments, one per line.
fn render_thoughts(thoughts: &[Thought]) -> String {
    thoughts
        .iter()
        .filter_map(|t| t.summary.as_deref())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Returns the images referenced by a message.
///
/// Image pointer parts come first, in order, then image attachments whose
/// id was not already seen. Ids are unique in the result.
#[must_use]
pub fn message_images(message: &Message) -> Vec<ImageRef> {
    let mut images: Vec<ImageRef> = Vec::new();

    if let ContentBody::Parts(parts) = &message.content.body {
        for part in parts {
            let Part::Image { asset_pointer } = part else {
                continue;
            };
            let asset_id = strip_asset_scheme(asset_pointer);
            if !asset_id.is_empty() && !images.iter().any(|i| i.asset_id == asset_id) {
                images.push(ImageRef {
                    asset_id: asset_id.to_owned(),
                    name: None,
                });
            }
        }
    }

    for attachment in message.metadata.attachments.iter().filter(|a| is_image(a)) {
        match images.iter_mut().find(|i| i.asset_id == attachment.id) {
            Some(existing) => {
                if existing.name.is_none() {
                    existing.name.clone_from(&attachment.name);
                }
            }
            None => images.push(ImageRef {
                asset_id: attachment.id.clone(),
                name: attachment.name.clone(),
            }),
        }
    }

    images
}

fn strip_asset_scheme(pointer: &str) -> &str {
    ASSET_SCHEMES
        .iter()
        .find_map(|scheme| pointer.strip_prefix(scheme))
        .unwrap_or(pointer)
}

fn is_image(attachment: &Attachment) -> bool {
    if attachment
        .mime_type
        .as_deref()
        .is_some_and(|mime| mime.starts_with("image/"))
    {
        return true;
    }
    attachment
        .name
        .as_deref()
        .and_then(|name| Path::new(name).extension()?.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

/// Returns the canvas document a message created, if any.
///
/// Only canvas creation calls qualify. Parts are scanned in order; a part
/// may hold the descriptor as an object or as a JSON string. A bare `text`
/// payload is tried as well.
#[must_use]
pub fn canvas_document(message: &Message) -> Option<CanvasDocument> {
    if !message.is_document_creation() {
        return None;
    }

    match &message.content.body {
        ContentBody::Parts(parts) => parts.iter().find_map(|part| match part {
            Part::Document(doc) => Some(doc.clone()),
            Part::Text(text) => document_from_json(text),
            _ => None,
        }),
        ContentBody::Text(text) => document_from_json(text),
        _ => None,
    }
}

impl CanvasDocument {
    /// File extension for the document's type, `.txt` when unknown.
    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self.doc_type.as_deref() {
            Some("code/html") => ".html",
            Some("code/python") => ".py",
            Some("code/javascript" | "code/react") => ".js",
            Some("code/typescript") => ".ts",
            Some("code/css") => ".css",
            Some("code/json") => ".json",
            Some("code/bash" | "code/shell") => ".sh",
            Some("code/rust") => ".rs",
            Some("document/markdown") => ".md",
            _ => ".txt",
        }
    }
}
