//! Stable exit codes shared by the `sweep` and `analyze` binaries.

/// Command succeeded; every dispatched run completed.
pub const OK: i32 = 0;
/// Invalid plan, unusable results root, or another error before dispatch.
pub const INVALID: i32 = 1;
/// `sweep run` finished without every run completing (failed, timed out or
/// cancelled), or `analyze clean` could not delete some directory.
pub const FAILURES: i32 = 2;
