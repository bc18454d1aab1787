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

//! Likes & trending scenarios

use std::sync::Arc;

use libtest_mimic::Failed;
use redk::redk::Redk;

use crate::{check, unique_user};

/// Five distinct likers leave a post at five likes, no matter how often they repeat themselves
pub async fn five_likes(redk: Arc<Redk>) -> Result<(), Failed> {
    let author = unique_user(&redk, "author").await?;
    let post = redk
        .social
        .create_post(&author, "like this", ["trending"])
        .await?;

    let mut likers = Vec::new();
    for i in 0..5 {
        let liker = unique_user(&redk, &format!("liker{}", i)).await?;
        let res = redk.engagement.like(&post.id(), &liker).await?;
        check(!res.already_liked, "a first like was reported as a repeat")?;
        check(
            res.count == i + 1,
            format!("after {} likes the count was {}", i + 1, res.count),
        )?;
        likers.push(liker);
    }

    // Repeats are no-ops
    let res = redk.engagement.like(&post.id(), &likers[0]).await?;
    check(res.already_liked && res.count == 5, "a repeated like moved the count")?;
    check(redk.engagement.like_count(&post.id()).await? == 5, "count != 5")?;
    check(
        redk.engagement.has_liked(&post.id(), &likers[4]).await?,
        "a liker isn't recorded as having liked",
    )?;
    let mut expected = likers.clone();
    expected.sort();
    check(
        redk.engagement.liked_by(&post.id()).await? == expected,
        "liked_by doesn't list the five likers",
    )?;

    let trending = redk.engagement.get_trending(100).await?;
    let entry = trending.iter().find(|t| t.post.id() == post.id());
    check(
        matches!(entry, Some(t) if t.score == 5),
        format!("expected the post trending with a score of 5; got {:?}", entry),
    )?;

    // Unlike, twice
    let res = redk.engagement.unlike(&post.id(), &likers[0]).await?;
    check(!res.not_liked && res.count == 4, "unlike didn't take")?;
    let res = redk.engagement.unlike(&post.id(), &likers[0]).await?;
    check(res.not_liked && res.count == 4, "a repeated unlike moved the count")
}
