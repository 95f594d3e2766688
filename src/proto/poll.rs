//! Busy-polling on shared memory.
//!
//! A one-sided write raises no event on the side it lands on, so the
//! receiver spins on bytes of its own buffer. Every spin here runs against a
//! [`PollBudget`] and turns into a [`PollTimeout`] once the budget is spent.

use std::time::Duration;

use quanta::Instant;
use thiserror::Error;

use crate::rdma::buf::RegionBuf;

/// Spins after which a still-spinning loop logs a warning.
#[cfg(feature = "warned_spin")]
const WARN_SPINS: u64 = 1 << 24;

/// Bound on a single spin loop. The loop gives up at whichever limit it
/// reaches first; at least one limit is always set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBudget {
    spins: Option<u64>,
    timeout: Option<Duration>,
}

impl PollBudget {
    /// Give up after `spins` unsuccessful checks.
    pub const fn spins(spins: u64) -> Self {
        Self {
            spins: Some(spins),
            timeout: None,
        }
    }

    /// Give up after `timeout` of wall-clock time.
    pub const fn timeout(timeout: Duration) -> Self {
        Self {
            spins: None,
            timeout: Some(timeout),
        }
    }
}

/// A spin loop ran out of budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("gave up polling after {spins} spins ({elapsed:?})")]
pub struct PollTimeout {
    pub spins: u64,
    pub elapsed: Duration,
}

/// Call `probe` until it yields a value, calling `relax` between attempts.
pub fn spin_until<T>(
    budget: PollBudget,
    mut relax: impl FnMut(),
    mut probe: impl FnMut() -> Option<T>,
) -> Result<T, PollTimeout> {
    let start = Instant::now();
    let mut spins = 0u64;
    loop {
        if let Some(v) = probe() {
            return Ok(v);
        }
        spins += 1;

        let over_spins = budget.spins.is_some_and(|limit| spins >= limit);
        let over_time = budget.timeout.is_some_and(|limit| start.elapsed() >= limit);
        if over_spins || over_time {
            return Err(PollTimeout {
                spins,
                elapsed: start.elapsed(),
            });
        }

        #[cfg(feature = "warned_spin")]
        if spins == WARN_SPINS {
            log::warn!("ibcached: still spinning after {} iterations", spins);
        }
        relax();
    }
}

/// Wait until the byte at `offset` differs from `empty`, and return it.
pub fn await_change(
    buf: &RegionBuf,
    offset: usize,
    empty: u8,
    budget: PollBudget,
    relax: impl FnMut(),
) -> Result<u8, PollTimeout> {
    spin_until(budget, relax, || {
        buf.load(offset).ok().filter(|&b| b != empty)
    })
}

/// Whether the byte at `last` has caught up with the sentinel at `sentinel`.
#[inline]
pub fn landed(buf: &RegionBuf, sentinel: usize, last: usize) -> bool {
    match (buf.load(sentinel), buf.load(last)) {
        (Ok(expected), Ok(found)) => expected == found,
        _ => false,
    }
}

/// Wait until the message whose sentinel sits at `sentinel` and whose final
/// byte sits at `last` has fully landed.
pub fn await_landing(
    buf: &RegionBuf,
    sentinel: usize,
    last: usize,
    budget: PollBudget,
    relax: impl FnMut(),
) -> Result<(), PollTimeout> {
    spin_until(budget, relax, || landed(buf, sentinel, last).then_some(()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn spin_budget_is_enforced() {
        let relaxed = Cell::new(0);
        let err = spin_until(PollBudget::spins(10), || relaxed.set(relaxed.get() + 1), || None::<()>)
            .unwrap_err();
        assert_eq!(err.spins, 10);
        assert_eq!(relaxed.get(), 9);
    }

    #[test]
    fn time_budget_is_enforced() {
        let err = spin_until(
            PollBudget::timeout(Duration::from_millis(5)),
            std::hint::spin_loop,
            || None::<()>,
        )
        .unwrap_err();
        assert!(err.elapsed >= Duration::from_millis(5));
    }

    #[test]
    fn probe_value_is_returned() {
        let mut n = 0;
        let got = spin_until(PollBudget::spins(100), || {}, || {
            n += 1;
            (n == 3).then_some(n * 10)
        });
        assert_eq!(got, Ok(30));
    }

    #[test]
    fn change_is_observed_during_relax() {
        let buf = RegionBuf::new(4);
        buf.fill(0xff);
        let writer = buf.clone();
        let op = await_change(&buf, 0, 0xff, PollBudget::spins(5), || {
            writer.store(0, 0x02).unwrap();
        });
        assert_eq!(op, Ok(0x02));
    }

    #[test]
    fn sentinel_alone_never_passes() {
        let buf = RegionBuf::new(16);
        buf.write(0, &[0x01, 1, 0, 0, 0, 2, 0x5a, b'k', 0x11, 0x5a]).unwrap();
        assert!(landed(&buf, 6, 9));

        // Only the sentinel slot changes: the true last byte still lags.
        buf.store(6, 0x77).unwrap();
        assert!(!landed(&buf, 6, 9));
        assert!(await_landing(&buf, 6, 9, PollBudget::spins(1000), || {}).is_err());
        assert!(!landed(&buf, 6, 99));
    }
}
