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

//! # The redk Integration Tests
//!
//! Each scenario here drives a [Redk] instance through one of its public operations end-to-end,
//! the way a front-end would, and checks what comes back. The scenarios know nothing about the
//! adapters beneath; the test programs in `tests/` each build a [Redk] on some set of stores and
//! run every scenario against it:
//!
//! - `in-memory` runs on the in-process mocks & needs nothing
//! - `live` runs on whatever the file named by `REDK_TEST_CONFIG` points at (a ScyllaDB cluster & a
//!   Redis cluster, say); without one, its tests are reported as ignored
//!
//! Since the live stores outlast a test run, scenarios never assume they're starting from empty
//! stores. Every user they create gets a fresh, random name from [unique_user].
//!
//! [Redk]: redk::redk::Redk
//!
//! Code relating to the test framework itself (the fixture & test registry) lives in
//! `tests/common`; the scenarios live here so that every test program can share them.

use libtest_mimic::Failed;
use redk::{
    entities::{UserEmail, Username},
    redk::Redk,
};
use uuid::Uuid;

pub mod conversations;
pub mod feeds;
pub mod likes;
pub mod suggestions;

/// Create a user named `prefix` plus a random suffix
pub async fn unique_user(redk: &Redk, prefix: &str) -> Result<Username, Failed> {
    let username = Username::new(&format!(
        "{}-{}",
        prefix,
        &Uuid::new_v4().simple().to_string()[..12]
    ))?;
    redk.social
        .create_user(
            &username,
            &UserEmail::new(&format!("{}@example.com", username))?,
            None,
            None,
        )
        .await?;
    Ok(username)
}

/// Fail the test with `msg` unless `cond` holds
pub fn check(cond: bool, msg: impl Into<String>) -> Result<(), Failed> {
    if cond { Ok(()) } else { Err(msg.into().into()) }
}
