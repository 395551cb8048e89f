// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2025 Brian Hetro <whee@smaertness.net>

//! Builders shared by the unit tests.

use crate::conversation::Conversation;
use crate::parser::{Author, Content, ContentBody, ContentType, Message, Metadata, Part, Role};
use crate::tree::Node;
use chrono::{DateTime, Duration, Utc};

/// 2024-12-05 00:00:00 UTC.
pub fn base_time() -> DateTime<Utc> {
    DateTime::from_timestamp(1_733_356_800, 0).unwrap()
}

pub fn message(role: Role, content_type: ContentType, body: ContentBody) -> Message {
    Message {
        id: "m".into(),
        author: Author { role, name: None },
        create_time: None,
        update_time: None,
        content: Content { content_type, body },
        status: "finished_successfully".into(),
        end_turn: None,
        weight: 1.0,
        metadata: Metadata::default(),
        recipient: Some("all".into()),
    }
}

pub fn parts_message(role: Role, parts: Vec<Part>) -> Message {
    message(role, ContentType::Text, ContentBody::Parts(parts))
}

pub fn text_message(role: Role, text: &str) -> Message {
    parts_message(role, vec![Part::Text(text.into())])
}

pub fn tool_message(name: &str, content_type: ContentType, body: ContentBody) -> Message {
    let mut msg = message(Role::Tool, content_type, body);
    msg.author.name = Some(name.into());
    msg
}

/// Builds a single-branch conversation: an empty root followed by one node
/// per message, a minute apart. Node and message ids are `n1`, `n2`, ...
pub fn chain(messages: Vec<Message>) -> Conversation {
    let count = messages.len();
    let mut nodes = vec![Node::new(
        "root",
        None,
        None,
        if count > 0 { vec!["n1".into()] } else { vec![] },
    )];

    for (i, mut msg) in messages.into_iter().enumerate() {
        let n = i + 1;
        let id = format!("n{n}");
        msg.id.clone_from(&id);
        if msg.create_time.is_none() {
            msg.create_time = Some(base_time() + Duration::minutes(i64::try_from(n).unwrap()));
        }
        let parent = if n == 1 { "root".to_owned() } else { format!("n{}", n - 1) };
        let children = if n < count { vec![format!("n{}", n + 1)] } else { vec![] };
        nodes.push(Node::new(id, Some(msg), Some(parent), children));
    }

    let current = if count == 0 { "root".to_owned() } else { format!("n{count}") };
    Conversation::new("Test chat", base_time(), nodes, current, "conv-1")
}
