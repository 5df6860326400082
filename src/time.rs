use std::sync::OnceLock;
use std::time::Instant;

static START: OnceLock<Instant> = OnceLock::new();

/// Milliseconds on a monotonic clock, relative to first call.
///
/// `last_active`/idle-timeout comparisons only ever care about deltas, so
/// an arbitrary epoch is fine; `Instant` sidesteps wall-clock jumps the
/// way `CLOCK_MONOTONIC` does in the original.
pub fn ms() -> u32 {
    let start = START.get_or_init(Instant::now);
    start.elapsed().as_millis() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_nondecreasing() {
        let a = ms();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let b = ms();
        assert!(b >= a);
    }
}
