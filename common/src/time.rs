//! Monotonic wall-clock helpers. Ephemeral accounts stamp `last_txn_time`
//! in nanoseconds for pruning; this module isolates the one clock read so
//! tests can't accidentally depend on wall-clock ordering across threads.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current time in nanoseconds since the Unix epoch. Never returns 0,
/// which is reserved to mark a free account slot (spec §6: "a record
/// whose last_txn_time == 0 is considered free").
pub fn now_ns() -> u64 {
    let ns = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_nanos() as u64;
    ns.max(1)
}
