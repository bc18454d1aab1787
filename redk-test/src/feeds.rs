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

//! Feed assembly & invalidation scenarios

use std::sync::Arc;

use libtest_mimic::Failed;
use redk::{entities::FeedMode, redk::Redk};

use crate::{check, unique_user};

/// A feed picks up a new followee's posts as soon as the follow lands
pub async fn follow_refreshes_feed(redk: Arc<Redk>) -> Result<(), Failed> {
    let alice = unique_user(&redk, "alice").await?;
    let bob = unique_user(&redk, "bob").await?;

    let mine = redk
        .social
        .create_post(&alice, "first post!", ["intro"])
        .await?;
    let theirs = redk
        .social
        .create_post(&bob, "hello from bob", Vec::<String>::new())
        .await?;

    let feed = redk.feeds.get_feed(&alice, FeedMode::All, 10).await?;
    check(
        feed.iter().map(|p| p.id()).collect::<Vec<_>>() == vec![mine.id()],
        format!("expected only alice's post before following; got {:?}", feed),
    )?;
    // Again, this time from the cache
    let cached = redk.feeds.get_feed(&alice, FeedMode::All, 10).await?;
    check(cached == feed, "the cached feed differs from the assembled one")?;

    redk.social.follow(&alice, &bob).await?;

    let feed = redk.feeds.get_feed(&alice, FeedMode::All, 10).await?;
    check(
        feed.iter().map(|p| p.id()).collect::<Vec<_>>() == vec![theirs.id(), mine.id()],
        format!("expected bob's post then alice's after following; got {:?}", feed),
    )?;

    let feed = redk.feeds.get_feed(&alice, FeedMode::Following, 10).await?;
    check(
        feed.iter().all(|p| p.author() == &bob),
        "the following feed contains a post not by a followee",
    )?;
    let feed = redk.feeds.get_feed(&alice, FeedMode::SelfOnly, 10).await?;
    check(
        feed.iter().all(|p| p.author() == &alice) && feed.len() == 1,
        "the self feed should hold exactly alice's post",
    )?;

    // A new post of alice's own shows up right away, even in the feed that was just cached
    let feed = redk.feeds.get_feed(&alice, FeedMode::All, 10).await?;
    check(feed.len() == 2, "the (all, 10) feed should be cached with two posts")?;
    let second = redk
        .social
        .create_post(&alice, "second post", Vec::<String>::new())
        .await?;
    let feed = redk.feeds.get_feed(&alice, FeedMode::All, 10).await?;
    check(
        feed.iter().map(|p| p.id()).collect::<Vec<_>>()
            == vec![second.id(), theirs.id(), mine.id()],
        format!("expected alice's newest post at the head of her feed; got {:?}", feed),
    )
}
