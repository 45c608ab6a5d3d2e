//! Usage: Cross-cutting utilities shared across modules (low-level helpers, pure logic).

pub(crate) mod ids;
pub(crate) mod mutex_ext;
pub(crate) mod time;
