// Copyright (C) 2024-2025 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of redk.
//
// redk is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// redk is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with redk.  If not,
// see <http://www.gnu.org/licenses/>.

//! Direct-message scenarios

use std::sync::Arc;

use libtest_mimic::Failed;
use redk::{
    entities::{ConversationSummary, Username},
    redk::Redk,
};

use crate::{check, unique_user};

/// Both participants see the same conversation, and reading it clears the reader's unread count
pub async fn symmetric_conversation(redk: Arc<Redk>) -> Result<(), Failed> {
    let a = unique_user(&redk, "dm-a").await?;
    let b = unique_user(&redk, "dm-b").await?;

    redk.conversations.send(&a, &b, "hi b").await?;
    redk.conversations.send(&b, &a, "hi a").await?;
    redk.conversations.send(&a, &b, "how are you?").await?;

    let from_a = redk.conversations.get_conversation(&a, &b, 50, false).await?;
    let from_b = redk.conversations.get_conversation(&b, &a, 50, false).await?;
    check(
        from_a.iter().map(|m| m.id()).collect::<Vec<_>>()
            == from_b.iter().map(|m| m.id()).collect::<Vec<_>>(),
        "the participants see different conversations",
    )?;
    check(
        from_a.iter().map(|m| m.content()).collect::<Vec<_>>()
            == vec!["hi b", "hi a", "how are you?"],
        format!("messages out of order: {:?}", from_a),
    )?;

    let unread = |summaries: &[ConversationSummary], other: &Username| {
        summaries
            .iter()
            .find(|s| &s.username == other)
            .map(|s| s.unread_count)
    };
    let summaries = redk.conversations.list_conversations(&b).await?;
    check(unread(&summaries, &a) == Some(2), "b should have two unread")?;

    let read = redk.conversations.get_conversation(&b, &a, 50, true).await?;
    check(
        read.iter().filter(|m| m.receiver() == &b).all(|m| m.read()),
        "marking read left b's messages unread",
    )?;
    let summaries = redk.conversations.list_conversations(&b).await?;
    check(unread(&summaries, &a) == Some(0), "b should have none unread")?;
    let summaries = redk.conversations.list_conversations(&a).await?;
    check(unread(&summaries, &b) == Some(1), "a should have one unread")?;

    // Talking to oneself is refused
    check(
        redk.conversations.send(&a, &a, "hello me").await.is_err(),
        "a self-conversation was accepted",
    )
}
