//! Process exit codes. Scripts and CI jobs branch on these.

pub const SUCCESS: i32 = 0;
pub const FILES_FAILED: i32 = 1; // At least one file failed, or `check` found plain traces
pub const INTERNAL_ERROR: i32 = 2; // Bad arguments or unreadable directory
