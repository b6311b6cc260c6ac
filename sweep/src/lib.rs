//! Parameter-sweep expansion and resumable trial dispatch.
//!
//! A sweep starts from one base configuration, grows it into an ordered list
//! of trial configurations, and runs each in its own directory under a
//! results root. A run is complete once its directory carries a `_SUCCESS`
//! marker next to the `args.json` snapshot, which makes re-running a sweep
//! skip finished work.
//!
//! - **[`core`]**: Pure value types and expansion primitives. No I/O.
//! - **[`io`]**: Results-root layout, completion scans, plan files, and
//!   child process execution.
//!
//! [`expand::ConfigSpace`] builds the configuration list;
//! [`dispatch::Dispatcher`] runs it through a [`schedule::Schedule`], each
//! configuration becoming one [`job::Job`].

pub mod core;
pub mod dispatch;
pub mod exit_codes;
pub mod expand;
pub mod io;
pub mod job;
pub mod logging;
pub mod schedule;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
