// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Counting allocator with `criterion` integration.
//!
//! Condition evaluation on the stateless path should not allocate at
//! all, so the interesting number is usually zero.

use super::MeasurementInfo;
use criterion::Criterion;
use criterion::Throughput;
use criterion::measurement::Measurement;
use criterion::measurement::ValueFormatter;
use std::alloc::GlobalAlloc;
use std::alloc::Layout;
use std::alloc::System;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

#[global_allocator]
static BENCH_ALLOC: TrackedAlloc = TrackedAlloc::new();

// Criterion runs one benchmark at a time, so there's no need for
// per-thread tracking.
struct TrackedAlloc {
    allocs: AtomicU64,
    bytes: AtomicU64,
}

impl TrackedAlloc {
    const fn new() -> Self {
        Self { allocs: AtomicU64::new(0), bytes: AtomicU64::new(0) }
    }
}

unsafe impl GlobalAlloc for TrackedAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.allocs.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(layout.size() as u64, Ordering::Relaxed);
        unsafe { System.alloc(layout) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe { System.dealloc(ptr, layout) }
    }
}

struct UnitFormatter(&'static str);

impl ValueFormatter for UnitFormatter {
    fn scale_values(&self, _typical: f64, _values: &mut [f64]) -> &'static str {
        self.0
    }

    fn scale_throughputs(
        &self,
        _typical: f64,
        _throughput: &Throughput,
        _values: &mut [f64],
    ) -> &'static str {
        self.0
    }

    fn scale_for_machines(&self, _values: &mut [f64]) -> &'static str {
        self.0
    }
}

macro_rules! alloc_measure {
    ($(#[$attr:meta])* $name:ident, $counter:ident, $label:literal, $unit:literal) => {
        $(#[$attr])*
        pub struct $name;

        impl Measurement for $name {
            type Intermediate = u64;
            type Value = u64;

            fn start(&self) -> Self::Intermediate {
                BENCH_ALLOC.$counter.load(Ordering::Relaxed)
            }

            fn end(&self, i: Self::Intermediate) -> Self::Value {
                BENCH_ALLOC.$counter.load(Ordering::Relaxed) - i
            }

            fn add(&self, v1: &Self::Value, v2: &Self::Value) -> Self::Value {
                v1 + v2
            }

            fn zero(&self) -> Self::Value {
                0
            }

            fn to_f64(&self, value: &Self::Value) -> f64 {
                *value as f64
            }

            fn formatter(&self) -> &dyn ValueFormatter {
                &UnitFormatter($unit)
            }
        }

        impl MeasurementInfo for $name {
            fn label() -> &'static str {
                $label
            }
        }
    };
}

alloc_measure!(
    /// The number of discrete allocations.
    Allocs,
    allocs,
    "alloc_ct",
    ""
);

alloc_measure!(
    /// The number of bytes allocated.
    BytesAlloced,
    bytes,
    "alloc_sz",
    "B"
);

/// Create a new [`Criterion`] instance tuned for measuring allocation
/// info.
pub fn new_crit<M: Measurement>(m: M) -> Criterion<M> {
    Criterion::default()
        .with_measurement(m)
        .sample_size(10)
        .warm_up_time(Duration::from_nanos(1))
        .measurement_time(Duration::from_micros(10))
        .nresamples(1)
        .without_plots()
}
