use std::sync::OnceLock;
use std::time::Instant;

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Milliseconds since an arbitrary, process-local epoch captured on first
/// use. Monotonic for the lifetime of the process (`Instant` already
/// guarantees this on every platform the standard library supports), so the
/// wraparound concerns that apply to a 32-bit millisecond counter do not
/// apply here: the domain is widened to 64 bits internally, while the public
/// delay parameter stays a `u32` of milliseconds, matching the original
/// contract.
pub fn now_ms() -> u64 {
    let epoch = EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::now_ms;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn advances_monotonically() {
        let a = now_ms();
        thread::sleep(Duration::from_millis(20));
        let b = now_ms();
        assert!(b > a);
    }
}
