// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Providers allow the engine to work in different contexts by
//! allowing implementations of core services to be plugged in. The
//! simulation workers in the controller log through slog, unit tests
//! log with `println!`, and a no_std consumer brings its own. If a
//! service doesn't have at least two obvious implementations, it
//! probably doesn't need to be a provider.

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::fmt;
use core::fmt::Display;

/// The set of providers handed to the stateful pieces of the engine.
#[derive(Clone)]
pub struct Providers {
    pub log: Arc<dyn LogProvider>,
}

impl Providers {
    pub fn new(log: Box<dyn LogProvider>) -> Self {
        Self { log: Arc::from(log) }
    }
}

/// A logging provider provides the means to log messages to some
/// destination based on the context in which the engine is running.
///
/// Logging levels are provided by [`LogLevel`]. These levels will map
/// to the underlying provider with varying degrees of success.
pub trait LogProvider: Send + Sync {
    /// Log a message at the specified level.
    fn log(&self, level: LogLevel, msg: &str);
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogLevel {
    Note,
    Warn,
    Error,
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let level_s = match self {
            Self::Note => "[NOTE]",
            Self::Warn => "[WARN]",
            Self::Error => "[ERROR]",
        };
        write!(f, "{level_s}")
    }
}

/// Discard everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullLog;

impl LogProvider for NullLog {
    fn log(&self, _level: LogLevel, _msg: &str) {}
}

cfg_if! {
    if #[cfg(feature = "std")] {
        use slog::Drain;

        #[derive(Clone, Copy)]
        pub struct PrintlnLog;

        impl LogProvider for PrintlnLog {
            fn log(&self, level: LogLevel, msg: &str) {
                println!("{level} {msg}");
            }
        }

        /// Route engine log messages into a [`slog::Logger`].
        #[derive(Clone)]
        pub struct SlogLog {
            log: slog::Logger,
        }

        impl SlogLog {
            pub fn new(log: slog::Logger) -> Self {
                Self { log }
            }

            /// Build a logger writing to the terminal through an
            /// asynchronous drain, with filtering controlled by the
            /// `RUST_LOG` environment variable.
            pub fn term() -> Self {
                let decorator = slog_term::TermDecorator::new().build();
                let drain = slog_term::FullFormat::new(decorator).build().fuse();
                let drain = slog_envlogger::new(drain);
                let drain = slog_async::Async::new(drain).build().fuse();
                Self { log: slog::Logger::root(drain, slog::o!("unit" => "vrn")) }
            }

            pub fn logger(&self) -> &slog::Logger {
                &self.log
            }
        }

        impl LogProvider for SlogLog {
            fn log(&self, level: LogLevel, msg: &str) {
                match level {
                    LogLevel::Note => slog::info!(self.log, "{}", msg),
                    LogLevel::Warn => slog::warn!(self.log, "{}", msg),
                    LogLevel::Error => slog::error!(self.log, "{}", msg),
                }
            }
        }

        impl Default for Providers {
            fn default() -> Self {
                Self { log: Arc::new(PrintlnLog) }
            }
        }
    }
}
