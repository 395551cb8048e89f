// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2025 Brian Hetro <whee@smaertness.net>

//! Deciding which messages a reader gets to see.
//!
//! Exports are full of plumbing: tool calls, scraped pages, memory updates,
//! reasoning traces. None of it belongs in the rendered document, but some
//! of it (citation sources, custom instructions) still feeds metadata, so
//! hidden messages are filtered at enumeration time rather than dropped.

use crate::content;
use crate::parser::{ContentType, Message, Role};

/// Internal tools whose output is never shown.
const HIDDEN_TOOLS: [&str; 3] = ["bio", "web.run", "web.search"];

/// Recipients an assistant message may address and still be shown.
const VISIBLE_RECIPIENTS: [&str; 2] = ["all", "python"];

/// Whether a message is shown, and if not, why.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// Rendered.
    Visible,
    /// Suppressed.
    Hidden(HiddenReason),
}

/// The rule that hid a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HiddenReason {
    /// No text and no images.
    Empty,
    /// Flagged hidden by the export itself.
    VisuallyHidden,
    /// A system prompt the user did not write.
    SystemPrompt,
    /// Output of an internal tool (memory, web search).
    InternalTool,
    /// Browser output other than a quote.
    BrowserNoise,
    /// Image generation chatter without an image.
    ImagePrompt,
    /// Code interpreter input.
    CodeInput,
    /// An assistant call addressed to a tool.
    ToolCall,
    /// Scraped pages, errors, status displays, reasoning traces.
    InternalContent,
}

/// Classifies a message.
///
/// Cheap metadata checks run first; text extraction only when nothing else
/// decided.
#[must_use]
pub fn visibility(message: &Message) -> Visibility {
    match hidden_reason(message) {
        Some(reason) => Visibility::Hidden(reason),
        None => Visibility::Visible,
    }
}

/// Returns `true` if the message is excluded from rendered output.
#[must_use]
pub fn is_hidden(message: &Message) -> bool {
    matches!(visibility(message), Visibility::Hidden(_))
}

fn hidden_reason(message: &Message) -> Option<HiddenReason> {
    let content_type = &message.content.content_type;

    if message.metadata.is_visually_hidden {
        return Some(HiddenReason::VisuallyHidden);
    }
    if is_internal_content(content_type) {
        return Some(HiddenReason::InternalContent);
    }

    match message.author.role {
        Role::System if !message.metadata.is_user_system_message => {
            return Some(HiddenReason::SystemPrompt);
        }
        Role::Tool => match message.author_name() {
            Some(name) if HIDDEN_TOOLS.contains(&name) => return Some(HiddenReason::InternalTool),
            Some("browser") if *content_type != ContentType::TetherQuote => {
                return Some(HiddenReason::BrowserNoise);
            }
            Some("dalle.text2im")
                if *content_type == ContentType::Text
                    && content::message_images(message).is_empty() =>
            {
                return Some(HiddenReason::ImagePrompt);
            }
            _ => {}
        },
        Role::Assistant => {
            if *content_type == ContentType::Code {
                return Some(HiddenReason::CodeInput);
            }
            if message
                .recipient()
                .filter(|r| !r.is_empty())
                .is_some_and(|r| !VISIBLE_RECIPIENTS.contains(&r))
            {
                return Some(HiddenReason::ToolCall);
            }
        }
        _ => {}
    }

    if !content::has_text(message) && content::message_images(message).is_empty() {
        return Some(HiddenReason::Empty);
    }
    None
}

const fn is_internal_content(content_type: &ContentType) -> bool {
    matches!(
        content_type,
        ContentType::SonicWebpage
            | ContentType::SystemError
            | ContentType::TetherBrowsingDisplay
            | ContentType::Thoughts
            | ContentType::ReasoningRecap
    )
}
