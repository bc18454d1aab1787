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


//! # in-memory
//!
//! Integration tests run against a redk built on the in-process stores.

use std::{io, sync::Arc};

use itertools::Itertools;
use libtest_mimic::{Arguments, Trial};
use snafu::{prelude::*, Snafu};
use tokio::runtime::Runtime;
use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt};

use redk::{fabric::Ttls, metrics::Instruments, redk::Redk};

use common::{Configuration, RedkTest};

mod common;

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("Error obtaining test configuration: {source}"))]
    Configuration { source: common::Error },
    #[snafu(display("Failed to parse RUST_LOG: {source}"))]
    Filter {
        source: tracing_subscriber::filter::FromEnvError,
    },
    #[snafu(display("Failed to set the global tracing subscriber: {source}"))]
    SetGlobalDefault {
        source: tracing::subscriber::SetGlobalDefaultError,
    },
    #[snafu(display("Failed to build a Tokio runtime: {source}"))]
    Runtime { source: std::io::Error },
}

type Result<T> = std::result::Result<T, Error>;

fn main() -> Result<()> {
    // libtest-mimic wants synchronous tests; keep a handle on our own runtime to drive them
    let rt = Arc::new(Runtime::new().context(RuntimeSnafu)?);

    let config = Configuration::new().context(ConfigurationSnafu)?;
    let args = Arguments::from_args();

    if config.logging {
        let filter = EnvFilter::builder()
            .with_default_directive(config.level().into())
            .from_env()
            .context(FilterSnafu)?;
        tracing::subscriber::set_global_default(
            Registry::default()
                .with(fmt::Layer::default().compact().with_writer(io::stdout))
                .with(filter),
        )
        .context(SetGlobalDefaultSnafu)?;
    }

    // The mocks need no setup or teardown; just build the engines over a fresh set of stores.
    let (redk, _stores) = rt.block_on(async {
        Redk::in_memory(Ttls::default(), Arc::new(Instruments::new("redk-test")))
    });
    let redk = Arc::new(redk);

    let conclusion = libtest_mimic::run(
        &args,
        inventory::iter::<RedkTest>
            .into_iter()
            .sorted_by_key(|t| t.name)
            .map(|test| {
                Trial::test(test.name, {
                    let rt = rt.clone();
                    let redk = redk.clone();
                    move || rt.block_on(async { (test.test_fn)(redk).await })
                })
            })
            .collect(),
    );

    conclusion.exit();
}
