//! TX queue scheduling and block ack aggregation.
//!
//! The scheduler drains the software TX queues of the network stack into the hardware, bounded
//! by the credits of the DMA channel each queue maps to. Before a data frame is submitted, it is
//! checked for aggregation eligibility. Queues that carry enough traffic, but don't aggregate yet,
//! are put on a pending list, which a background worker drains by asking the peer for a block ack
//! session.

use core::cell::RefCell;

use alloc::{
    collections::{BTreeMap, VecDeque},
    vec::Vec,
};
use embassy_sync::{blocking_mutex, channel::Channel};

use crate::{
    hci::{BaSession, Hci, KeyStore, PeerInfo, TxqId, TxqSource},
    tx_desc::{ch_dma_for_tid, AccessCategory, AmpduParams, TxFrame},
    Device, DefaultRawMutex,
};

/// Identifies the aggregation state of a single peer and TID.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TxqKey {
    pub mac_id: u8,
    pub tid: u8,
}

/// Aggregation state of a single peer and TID.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AggregationState {
    /// A block ack session is established.
    pub enabled: bool,
    /// The peer refused aggregation. Cleared when the peer disconnects.
    pub blocked: bool,
    /// The queue is on the pending list.
    pub pending: bool,
    /// Buffer size negotiated for the session.
    pub agg_num: u8,
    /// Eligible frames seen since the last negotiation attempt.
    frames: u32,
}

/// Session state changes reported by the network stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AmpduAction {
    /// The TX session is operational with the negotiated buffer size.
    TxOperational { buf_size: u8 },
    /// The TX session was torn down.
    TxStop,
}

/// Messages to the background block ack worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BaWork {
    /// Attempt to start a session for every pending queue.
    Start,
}

#[derive(Default)]
struct BaState {
    pending: VecDeque<TxqKey>,
    agg: BTreeMap<TxqKey, AggregationState>,
    /// Bumped every time a peer disconnects. Negotiation results from an older generation are
    /// discarded.
    generation: BTreeMap<u8, u32>,
}
impl BaState {
    fn generation(&self, mac_id: u8) -> u32 {
        self.generation.get(&mac_id).copied().unwrap_or_default()
    }
}

/// The outcome of the aggregation check for a single frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AggCheck {
    /// The frame must not be aggregated.
    Ineligible,
    /// The queue aggregates, the frame was flagged.
    Aggregate,
    /// The frame was counted towards the negotiation threshold.
    Counted,
    /// The queue was put on the pending list.
    Proposed,
}

/// Tracks aggregation state and the queues pending negotiation.
pub struct AggregationController {
    state: blocking_mutex::Mutex<DefaultRawMutex, RefCell<BaState>>,
    work: Channel<DefaultRawMutex, BaWork, 1>,
    trigger_frames: u32,
}
impl AggregationController {
    pub fn new(trigger_frames: u32) -> Self {
        Self {
            state: blocking_mutex::Mutex::new(RefCell::new(BaState::default())),
            work: Channel::new(),
            trigger_frames: trigger_frames.max(1),
        }
    }
    /// Decide whether `frame`, dequeued from `txq`, is sent as part of an A-MPDU.
    pub fn check_agg(&self, txq: TxqId, frame: &mut TxFrame, peer: Option<&PeerInfo>) -> AggCheck {
        if AccessCategory::from_tid(frame.tid) == AccessCategory::Voice || frame.eapol {
            return AggCheck::Ineligible;
        }
        let (Some(mac_id), Some(_)) = (txq.mac_id, peer) else {
            return AggCheck::Ineligible;
        };
        let key = TxqKey {
            mac_id,
            tid: txq.tid,
        };
        let proposed = self.state.lock(|state| {
            let mut state = state.borrow_mut();
            let state = &mut *state;
            let agg = state.agg.entry(key).or_default();
            if agg.blocked {
                return AggCheck::Ineligible;
            }
            if agg.enabled {
                frame.ampdu = true;
                return AggCheck::Aggregate;
            }
            if agg.pending {
                return AggCheck::Counted;
            }
            agg.frames += 1;
            if agg.frames < self.trigger_frames {
                return AggCheck::Counted;
            }
            agg.frames = 0;
            agg.pending = true;
            state.pending.push_back(key);
            AggCheck::Proposed
        });
        if proposed == AggCheck::Proposed {
            // A full channel means the worker hasn't run yet and will pick this up too.
            let _ = self.work.try_send(BaWork::Start);
        }
        proposed
    }
    /// Attempt to start a block ack session for every pending queue.
    ///
    /// Every queue is attempted exactly once and removed from the pending list, regardless of the
    /// outcome. Returns the number of attempts made.
    ///
    /// Sessions are started outside of the lock, since the network stack may report the outcome
    /// synchronously. A peer disconnecting in the meantime invalidates the outcome of its
    /// attempts.
    pub fn ba_work(&self, sessions: &mut impl BaSession) -> usize {
        let pending: Vec<(TxqKey, u32)> = self.state.lock(|state| {
            let mut state = state.borrow_mut();
            let state = &mut *state;
            let pending = core::mem::take(&mut state.pending);
            pending
                .into_iter()
                .map(|key| {
                    if let Some(agg) = state.agg.get_mut(&key) {
                        agg.pending = false;
                    }
                    (key, state.generation(key.mac_id))
                })
                .collect()
        });
        let mut attempts = 0;
        for (key, generation) in pending {
            let Some(peer) = sessions.peer(key.mac_id) else {
                warn!("Cannot start BA without peer, mac id {}.", key.mac_id);
                continue;
            };
            attempts += 1;
            let Err(err) = sessions.start_tx_ba_session(&peer, key.tid) else {
                debug!("Requested BA session for mac id {} tid {}.", key.mac_id, key.tid);
                continue;
            };
            warn!(
                "Failed to setup BA session for mac id {} tid {}: {:?}",
                key.mac_id,
                key.tid,
                err
            );
            if err.blocks_queue() {
                self.state.lock(|state| {
                    let mut state = state.borrow_mut();
                    if state.generation(key.mac_id) != generation {
                        debug!("Mac id {} disconnected during BA setup.", key.mac_id);
                        return;
                    }
                    if let Some(agg) = state.agg.get_mut(&key) {
                        agg.blocked = true;
                    }
                });
            }
        }
        attempts
    }
    /// Wait for the scheduler to request negotiation.
    pub async fn wait_work(&self) -> BaWork {
        self.work.receive().await
    }
    /// Apply a session state change.
    pub fn ampdu_action(&self, key: TxqKey, action: AmpduAction) {
        self.state.lock(|state| {
            let mut state = state.borrow_mut();
            let agg = state.agg.entry(key).or_default();
            match action {
                AmpduAction::TxOperational { buf_size } => {
                    agg.enabled = true;
                    agg.agg_num = buf_size;
                }
                AmpduAction::TxStop => {
                    agg.enabled = false;
                    agg.agg_num = 0;
                }
            }
        })
    }
    /// The negotiated buffer size of `key`, zero if none was negotiated.
    pub fn agg_num(&self, key: TxqKey) -> u8 {
        self.state.lock(|state| {
            state
                .borrow()
                .agg
                .get(&key)
                .map(|agg| agg.agg_num)
                .unwrap_or_default()
        })
    }
    /// A snapshot of the aggregation state of `key`.
    pub fn state(&self, key: TxqKey) -> AggregationState {
        self.state.lock(|state| {
            state
                .borrow()
                .agg
                .get(&key)
                .copied()
                .unwrap_or_default()
        })
    }
    /// Whether `key` is on the pending list.
    pub fn is_pending(&self, key: TxqKey) -> bool {
        self.state
            .lock(|state| state.borrow().pending.contains(&key))
    }
    /// Remove every queue of `mac_id` from the pending list and lift its blocks.
    pub fn free_sta_pending_ba(&self, mac_id: u8) {
        self.state.lock(|state| {
            let mut state = state.borrow_mut();
            state.pending.retain(|key| key.mac_id != mac_id);
            let generation = state.generation.entry(mac_id).or_default();
            *generation = generation.wrapping_add(1);
            for (_, agg) in state.agg.range_mut(Self::sta_range(mac_id)) {
                agg.pending = false;
                agg.blocked = false;
                agg.frames = 0;
            }
        })
    }
    /// Forget all aggregation state of `mac_id`.
    pub fn remove_sta(&self, mac_id: u8) {
        self.state.lock(|state| {
            let mut state = state.borrow_mut();
            state.pending.retain(|key| key.mac_id != mac_id);
            state.agg.retain(|key, _| key.mac_id != mac_id);
        })
    }
    /// Forget everything.
    pub fn reset(&self) {
        self.state.lock(|state| *state.borrow_mut() = BaState::default());
        while self.work.try_receive().is_ok() {}
    }
    fn sta_range(mac_id: u8) -> core::ops::RangeInclusive<TxqKey> {
        TxqKey { mac_id, tid: 0 }..=TxqKey {
            mac_id,
            tid: u8::MAX,
        }
    }
}

impl Device {
    fn check_and_reclaim_tx_resource(&self, hci: &mut impl Hci, tid: u8) -> u32 {
        let ch_dma = ch_dma_for_tid(tid);
        self.budget.release(ch_dma, hci.reclaim_credits(ch_dma));
        self.budget.available(ch_dma)
    }
    /// Push up to `frame_cnt` frames of `txq` to the hardware, returning how many were submitted.
    fn txq_push(
        &self,
        txq: TxqId,
        frame_cnt: usize,
        txqs: &mut impl TxqSource,
        hci: &mut impl Hci,
        keys: &impl KeyStore,
    ) -> usize {
        let peer = txq.mac_id.and_then(|mac_id| txqs.peer(mac_id));
        let mut submitted = 0;
        for _ in 0..frame_cnt {
            let Some(mut frame) = txqs.dequeue(txq) else {
                debug!("Dequeued no frame from txq {:?}.", txq);
                break;
            };
            self.agg.check_agg(txq, &mut frame, peer.as_ref());
            let ampdu = peer.map(|peer| AmpduParams {
                agg_num: self.agg.agg_num(TxqKey {
                    mac_id: peer.mac_id,
                    tid: txq.tid,
                }),
                ampdu_factor: peer.ampdu_factor,
                ampdu_density: peer.ampdu_density,
            });
            let desc_info = match self.tx_desc_info(&frame, peer.as_ref(), ampdu, keys) {
                Ok(desc_info) => desc_info,
                Err(err) => {
                    warn!(
                        "Dropping frame for txq {:?}, tid {}: {:?}",
                        txq,
                        frame.tid,
                        err
                    );
                    continue;
                }
            };
            if let Err(err) = self.tx_submit(hci, &desc_info, &frame.data) {
                warn!("Failed to push txq {:?}: {:?}", txq, err);
                break;
            }
            submitted += 1;
        }
        submitted
    }
    /// Run one scheduling round over every queue of `ac`.
    ///
    /// Returns the number of frames submitted.
    pub fn txq_schedule(
        &self,
        ac: AccessCategory,
        txqs: &mut impl TxqSource,
        hci: &mut impl Hci,
        keys: &impl KeyStore,
    ) -> usize {
        let mut total = 0;
        txqs.schedule_start(ac);
        while let Some(txq) = txqs.next_txq(ac) {
            let tx_resource = self.check_and_reclaim_tx_resource(hci, txq.tid);
            let frame_cnt = txqs.depth(txq).min(tx_resource as usize);
            let submitted = self.txq_push(txq, frame_cnt, txqs, hci, keys);
            txqs.return_txq(txq);
            if submitted != 0 {
                hci.notify_drain(ch_dma_for_tid(txq.tid));
            }
            total += submitted;
        }
        txqs.schedule_end(ac);
        total
    }
    /// Run a scheduling round for every access category, highest priority first.
    pub fn txq_schedule_all(
        &self,
        txqs: &mut impl TxqSource,
        hci: &mut impl Hci,
        keys: &impl KeyStore,
    ) -> usize {
        AccessCategory::ALL
            .into_iter()
            .map(|ac| self.txq_schedule(ac, txqs, hci, keys))
            .sum()
    }
    /// Run the block ack worker once.
    pub fn ba_work(&self, sessions: &mut impl BaSession) -> usize {
        self.agg.ba_work(sessions)
    }
    /// Apply a block ack session state change reported by the network stack.
    pub fn ampdu_action(&self, key: TxqKey, action: AmpduAction) {
        debug!("AMPDU action {:?} for mac id {} tid {}.", action, key.mac_id, key.tid);
        self.agg.ampdu_action(key, action);
    }
}
