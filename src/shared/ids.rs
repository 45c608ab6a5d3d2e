//! Usage: Process-unique session identifiers (`{unix_seconds}-{seq}`).

use std::sync::atomic::{AtomicU64, Ordering};

use super::time::now_unix_seconds;

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(1);

pub(crate) fn new_session_id() -> String {
    let ts = now_unix_seconds();
    let seq = SESSION_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{ts}-{seq}")
}
