use core::{
    future::{poll_fn, Future},
    task::Poll,
};

use portable_atomic::{AtomicU8, Ordering};

use atomic_waker::AtomicWaker;

use crate::tx_desc::AccessCategory;

/// A set of access categories, encoded as a bitmask.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AcMask(pub u8);
impl AcMask {
    pub const ALL: AcMask = AcMask(0b1111);

    pub const fn contains(&self, ac: AccessCategory) -> bool {
        self.0 & (1 << ac as u8) != 0
    }
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }
    /// The contained access categories, highest priority first.
    pub fn iter(self) -> impl Iterator<Item = AccessCategory> {
        AccessCategory::ALL
            .into_iter()
            .filter(move |ac| self.contains(*ac))
    }
}

/// Signals the TX queue drainer, that access categories need to be scheduled.
///
/// Signals for the same access category coalesce until the drainer picks them up.
pub struct TxqSignal {
    pending: AtomicU8,
    waker: AtomicWaker,
}
impl TxqSignal {
    pub const fn new() -> Self {
        Self {
            pending: AtomicU8::new(0),
            waker: AtomicWaker::new(),
        }
    }
    /// Mark `ac` as pending.
    pub fn signal(&self, ac: AccessCategory) {
        self.pending.fetch_or(1 << ac as u8, Ordering::Release);
        self.waker.wake();
    }
    /// Mark every access category as pending.
    pub fn signal_all(&self) {
        self.pending.fetch_or(AcMask::ALL.0, Ordering::Release);
        self.waker.wake();
    }
    /// Drop all pending signals.
    pub fn reset(&self) {
        self.pending.store(0, Ordering::Relaxed);
    }
    /// Take the currently pending access categories without waiting.
    pub fn take(&self) -> AcMask {
        AcMask(self.pending.swap(0, Ordering::Acquire))
    }
    /// Asynchronously wait for at least one access category to become pending.
    pub fn wait(&self) -> impl Future<Output = AcMask> + use<'_> {
        poll_fn(|cx| {
            let pending = self.take();
            if pending.is_empty() {
                self.waker.register(cx.waker());
                // A signal may have raced with the registration.
                let pending = self.take();
                if pending.is_empty() {
                    Poll::Pending
                } else {
                    Poll::Ready(pending)
                }
            } else {
                Poll::Ready(pending)
            }
        })
    }
}
