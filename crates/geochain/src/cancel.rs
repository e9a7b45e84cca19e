//! Cooperative cancellation.
//!
//! Long loops poll a [`Cancellable`] and bail out with [`Cancelled`], which
//! callers propagate with `?`. Output produced before the trip stays valid.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use thiserror::Error;

/// Hot loops poll once per this many iterations.
pub const CANCEL_CHECK_INTERVAL: u32 = 256;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("query cancelled")]
pub struct Cancelled;

pub trait Cancellable {
    fn is_cancelled(&self) -> bool;
}

/// Shared flag set from another thread to stop a running query.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

impl Cancellable for CancelFlag {
    fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NeverCancelled;

impl Cancellable for NeverCancelled {
    fn is_cancelled(&self) -> bool {
        false
    }
}

pub fn bail_if_cancelled(cancellable: &dyn Cancellable) -> Result<(), Cancelled> {
    if cancellable.is_cancelled() {
        Err(Cancelled)
    } else {
        Ok(())
    }
}

/// Counts iterations and polls the cancellable every
/// [`CANCEL_CHECK_INTERVAL`] ticks.
#[derive(Debug, Default)]
pub struct CancelPoller {
    counter: u32,
}

impl CancelPoller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tick(&mut self, cancellable: &dyn Cancellable) -> Result<(), Cancelled> {
        self.counter = self.counter.wrapping_add(1);
        if self.counter % CANCEL_CHECK_INTERVAL == 0 {
            bail_if_cancelled(cancellable)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    struct CountingCancellable {
        polls: Cell<u32>,
    }

    impl Cancellable for CountingCancellable {
        fn is_cancelled(&self) -> bool {
            self.polls.set(self.polls.get() + 1);
            true
        }
    }

    #[test]
    fn test_flag_is_shared_between_clones() {
        let flag = CancelFlag::new();
        let other = flag.clone();
        assert!(bail_if_cancelled(&other).is_ok());
        flag.cancel();
        assert_eq!(bail_if_cancelled(&other), Err(Cancelled));
        flag.reset();
        assert!(!other.is_cancelled());
    }

    #[test]
    fn test_poller_checks_every_interval() {
        let cancellable = CountingCancellable { polls: Cell::new(0) };
        let mut poller = CancelPoller::new();
        for _ in 0..CANCEL_CHECK_INTERVAL - 1 {
            assert!(poller.tick(&cancellable).is_ok());
        }
        assert_eq!(cancellable.polls.get(), 0);
        assert_eq!(poller.tick(&cancellable), Err(Cancelled));
        assert_eq!(cancellable.polls.get(), 1);
    }

    #[test]
    fn test_cancelled_message() {
        assert_eq!(Cancelled.to_string(), "query cancelled");
    }
}
