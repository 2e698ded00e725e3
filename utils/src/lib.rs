use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::SystemTime,
};

static LAST_ISSUED_MS: AtomicU64 = AtomicU64::new(0);

pub fn get_epoch_time_in_ms() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("SystemTime before UNIX EPOCH")
        .as_millis() as u64
}

/// Epoch milliseconds that never go backwards within this process, even if
/// the wall clock is stepped back.
pub fn get_monotonic_epoch_time_in_ms() -> u64 {
    let now = get_epoch_time_in_ms();
    let previous = LAST_ISSUED_MS.fetch_max(now, Ordering::AcqRel);
    previous.max(now)
}
