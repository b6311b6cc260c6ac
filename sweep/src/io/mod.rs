//! Side-effecting helpers: results-root layout, completion scans, plan files,
//! and process execution.

pub mod entrypoint;
pub mod layout;
pub mod oracle;
pub mod plan;
pub mod process;
