//! Watchpost - remote monitoring agent core
//!
//! Watchpost turns a set of declared health checks into a stream of
//! Checkmk-agent-compatible output records. It does not implement any
//! specific check; it implements the machinery around one: scheduling
//! strategy evaluation, datasource dependency resolution, deduplicated
//! asynchronous execution, result caching, hostname resolution, and wire
//! serialization.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::collections::BTreeSet;
//! use std::sync::Arc;
//!
//! use watchpost::app::{Environment, Watchpost};
//! use watchpost::cache::{Cache, InMemoryStorage};
//! use watchpost::check::{Check, CheckFunction};
//! use watchpost::result::{CheckResult, RawCheckOutput};
//!
//! # async fn run() {
//! let app = Watchpost::new("linux", Cache::new(Arc::new(InMemoryStorage::new())), "prod");
//! app.register_environment(Environment::new("prod"));
//! app.register_check(Check::new(
//!     "ping",
//!     CheckFunction::sync(|_ctx| Ok(RawCheckOutput::Single(CheckResult::ok("pong")))),
//!     BTreeSet::from(["prod".to_string()]),
//! ));
//!
//! let output = app.run_checks_once().await;
//! println!("{}", String::from_utf8_lossy(&output));
//! # }
//! ```

pub mod app;
pub mod cache;
pub mod check;
pub mod datasource;
pub mod error;
pub mod executor;
pub mod hostname;
#[cfg(feature = "server")]
pub mod http;
#[cfg(feature = "cli")]
pub mod cli;
pub mod result;
pub mod scheduling;
pub mod telemetry;
pub mod version;

pub use error::{Result, WatchpostError};
