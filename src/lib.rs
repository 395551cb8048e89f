// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2025 Brian Hetro <whee@smaertness.net>

//! Convert ChatGPT conversation exports to Markdown.
//!
//! This crate provides parsing and rendering functionality for transforming
//! the `conversations.json` file of a ChatGPT data export into readable
//! Markdown documents.
//!
//! # Overview
//!
//! Each exported conversation is a tree: editing a prompt or regenerating a
//! reply forks a new branch. This crate:
//!
//! 1. Parses the JSON structure into typed Rust representations
//! 2. Links the node tree and orders it, either the active branch or every
//!    branch depth first
//! 3. Resolves message content, hides internal messages, and resolves
//!    citations
//! 4. Renders a Markdown document with YAML frontmatter
//!
//! # Example
//!
//! ```no_run
//! use chatgpt_md::{parser, renderer};
//! use chatgpt_md::conversation::RenderOrder;
//!
//! let json = std::fs::read_to_string("conversations.json").unwrap();
//! let conversations = parser::parse_export(&json).unwrap();
//!
//! let opts = renderer::RenderOptions {
//!     order: RenderOrder::ActiveBranch,
//!     show_timestamps: true,
//!     ..Default::default()
//! };
//!
//! for conversation in &conversations {
//!     let markdown = renderer::render_markdown(conversation, &opts);
//!     println!("{markdown}");
//! }
//! ```
//!
//! # Modules
//!
//! - [`parser`]: JSON parsing and type definitions for the export format
//! - [`tree`]: Node table, linking, and traversal orders
//! - [`conversation`]: Conversations and their derived metadata
//! - [`content`]: Message text, images, and canvas documents
//! - [`visibility`]: Which messages are shown
//! - [`citations`]: Citation links
//! - [`renderer`]: Markdown generation with configurable output options

#![deny(missing_docs)]

pub mod citations;
pub mod content;
pub mod conversation;
pub mod parser;
pub mod renderer;
pub mod tree;
pub mod visibility;

#[cfg(test)]
mod test_support;
