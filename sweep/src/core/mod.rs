//! Deterministic, pure logic shared by the expander and dispatcher.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! configurations and return deterministic outputs suitable for tests.

pub mod expand;
pub mod run_id;
pub mod space;
pub mod types;
