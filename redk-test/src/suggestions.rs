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

//! Follow-suggestion scenarios

use std::sync::Arc;

use libtest_mimic::Failed;
use redk::{recommend::FALLBACK_REASON, redk::Redk};

use crate::{check, unique_user};

/// a follows b follows c: c is suggested to a through b
pub async fn two_hops(redk: Arc<Redk>) -> Result<(), Failed> {
    let a = unique_user(&redk, "hop-a").await?;
    let b = unique_user(&redk, "hop-b").await?;
    let c = unique_user(&redk, "hop-c").await?;
    redk.social.follow(&a, &b).await?;
    redk.social.follow(&b, &c).await?;

    let suggestions = redk.recommender.get_suggestions(&a, 10).await?;
    check(
        suggestions.len() == 1,
        format!("expected exactly one suggestion; got {:?}", suggestions),
    )?;
    let s = &suggestions[0];
    check(s.username == c, format!("expected {}; got {}", c, s.username))?;
    check(s.mutual_connections == 1, "expected one mutual connection")?;
    check(s.followers_count == 1 && s.posts_count == 0, "wrong counts")?;
    check(s.score == 5.0, format!("expected a score of 5; got {}", s.score))?;
    check(s.reason.is_none(), "a graph suggestion carries a fallback reason")?;

    // Following c drops the suggestion (though c may still turn up in a fallback sample)
    redk.social.follow(&a, &c).await?;
    let suggestions = redk.recommender.get_suggestions(&a, 10).await?;
    check(
        suggestions
            .iter()
            .all(|s| s.username != c || s.reason.is_some()),
        "a followee is still suggested",
    )
}

/// A user with no graph to speak of gets sampled suggestions, never themselves
pub async fn fallback(redk: Arc<Redk>) -> Result<(), Failed> {
    let loner = unique_user(&redk, "loner").await?;
    unique_user(&redk, "someone").await?;
    let suggestions = redk.recommender.get_suggestions(&loner, 5).await?;
    check(!suggestions.is_empty(), "no fallback suggestions")?;
    check(
        suggestions
            .iter()
            .all(|s| s.username != loner && s.reason.as_deref() == Some(FALLBACK_REASON)),
        format!("bad fallback suggestions: {:?}", suggestions),
    )
}
