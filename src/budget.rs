//! Per DMA channel transmit credits.

use portable_atomic::{AtomicU32, Ordering};

use crate::tx_desc::DmaChannel;

/// The number of frames each DMA channel can still accept.
///
/// Credits are consumed by the scheduler when a frame is submitted and released by the
/// completion path, once the hardware is done with it. The counters never underflow.
pub struct TxResourceBudget {
    credits: [AtomicU32; DmaChannel::COUNT],
}
impl TxResourceBudget {
    pub fn new(initial: u32) -> Self {
        Self {
            credits: core::array::from_fn(|_| AtomicU32::new(initial)),
        }
    }
    /// Credits currently available on `ch_dma`.
    pub fn available(&self, ch_dma: DmaChannel) -> u32 {
        self.credits[ch_dma.index()].load(Ordering::Acquire)
    }
    /// Return `count` credits to `ch_dma`.
    pub fn release(&self, ch_dma: DmaChannel, count: u32) {
        if count == 0 {
            return;
        }
        let _ = self.credits[ch_dma.index()].fetch_update(
            Ordering::AcqRel,
            Ordering::Acquire,
            |credits| Some(credits.saturating_add(count)),
        );
    }
    /// Take up to `count` credits from `ch_dma`, returning how many were taken.
    pub fn consume(&self, ch_dma: DmaChannel, count: u32) -> u32 {
        match self.credits[ch_dma.index()].fetch_update(
            Ordering::AcqRel,
            Ordering::Acquire,
            |credits| Some(credits.saturating_sub(count)),
        ) {
            Ok(previous) | Err(previous) => previous.min(count),
        }
    }
    /// Reset every channel to `credits`.
    pub fn reset(&self, credits: u32) {
        for counter in self.credits.iter() {
            counter.store(credits, Ordering::Release);
        }
    }
}
