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

//! # redk metrics
//!
//! redk counts things with [OpenTelemetry]. Instruments are meant to be built once & re-used, but
//! keeping a field per counter on some state struct gets old fast, and a central list of metric
//! names invites two call sites to claim the same name without noticing.
//!
//! [OpenTelemetry]: https://docs.rs/opentelemetry/latest/opentelemetry/index.html
//!
//! Instead, each module registers the names it uses with David Tolnay's [inventory] crate:
//!
//! ```ignore
//! inventory::submit! { metrics::Registration::new("feed.cache.hits") }
//! ```
//!
//! An [Instruments] instance, built once at startup, walks the inventory, checks for clashes &
//! builds every counter up-front. At the collection site:
//!
//! ```ignore
//! counter_add!(self.instruments, "feed.cache.hits", 1, &[]);
//! ```
//!
//! Looking up a name that was never registered is a logic error, and panics.

use std::collections::{HashMap, HashSet, hash_map::Entry};

use opentelemetry::{KeyValue, global, metrics::Counter};

/// A registered metric name; submit these with [inventory::submit!]
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Registration {
    name: &'static str,
}

impl Registration {
    pub const fn new(name: &'static str) -> Registration {
        Registration { name }
    }
    pub fn name(&self) -> &'static str {
        self.name
    }
}

inventory::collect!(Registration);

/// Panic if any metric name has been registered twice
pub fn check_metric_registrations() {
    let mut names: HashSet<&'static str> = HashSet::new();
    IntoIterator::into_iter(inventory::iter::<Registration>).for_each(|reg| {
        if !names.insert(reg.name()) {
            panic!("The metric name {} was registered twice", reg.name());
        }
    });
}

/// Container for OTel instruments
pub struct Instruments {
    meter: opentelemetry::metrics::Meter,
    map: HashMap<&'static str, Counter<u64>>,
}

impl Instruments {
    pub fn new(prefix: &'static str) -> Instruments {
        let meter = global::meter(prefix);
        let mut map = HashMap::new();
        // Building everything up-front means `add` only needs `&self`, so an `Instruments` can
        // live behind an `Arc`.
        IntoIterator::into_iter(inventory::iter::<Registration>).for_each(|reg| {
            match map.entry(reg.name()) {
                Entry::Occupied(_) => panic!("The metric name {} was used twice", reg.name()),
                Entry::Vacant(vacant) => {
                    vacant.insert(meter.u64_counter(reg.name()).build());
                }
            }
        });
        Instruments { meter, map }
    }
    pub fn meter(&self) -> &opentelemetry::metrics::Meter {
        &self.meter
    }
    /// Increment the counter named `name`; panics if `name` was never registered
    pub fn add(&self, name: &str, count: u64, attributes: &[KeyValue]) {
        match self.map.get(name) {
            Some(counter) => counter.add(count, attributes),
            None => panic!("{} does not name a counter", name),
        }
    }
}

impl std::fmt::Debug for Instruments {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instruments")
            .field("counters", &self.map.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[macro_export]
macro_rules! counter_add {
    ($instr:expr, $name:expr, $count:expr, $attrs:expr) => {
        $instr.add($name, $count, $attrs);
    };
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_registrations() {
        check_metric_registrations();
        let instruments = Instruments::new("redk-test");
        // Registered by the feed engine
        instruments.add("feed.cache.hits", 1, &[]);
    }

    #[test]
    #[should_panic]
    fn test_unregistered() {
        Instruments::new("redk-test").add("no.such.counter", 1, &[]);
    }
}
