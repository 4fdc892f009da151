//! PTT tracking: who is transmitting on which channel
//!
//! The tracker is a passive record of concurrent speakers. Requests and
//! releases flip membership in per-channel sets and append to a bounded
//! history; priority is logged but never affects a transition.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::Serialize;

use crate::error::BackendResult;
use crate::types::{channel_index, now_ts, tablet_index, ChannelId, TabletId, NUM_CHANNELS};

/// Oldest history entries are discarded past this count.
pub const PTT_HISTORY_CAP: usize = 10_000;

/// Transmission state of a (tablet, channel) pair or of a whole channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PttState {
    Idle,
    Active,
}

impl std::fmt::Display for PttState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PttState::Idle => write!(f, "IDLE"),
            PttState::Active => write!(f, "ACTIVE"),
        }
    }
}

/// What a history entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PttAction {
    Request,
    Release,
}

/// One append-only history record.
#[derive(Debug, Clone, Serialize)]
pub struct PttEvent {
    pub ts: f64,
    pub tablet_id: TabletId,
    pub channel: ChannelId,
    pub action: PttAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
}

/// State of one channel: active or idle, with the speakers sorted.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelPtt {
    pub channel: ChannelId,
    pub state: PttState,
    pub active_tablets: Vec<TabletId>,
}

/// Point-in-time view over all channels.
#[derive(Debug, Clone, Serialize)]
pub struct PttSnapshot {
    pub ts: f64,
    pub channels: BTreeMap<ChannelId, Vec<TabletId>>,
}

/// Tracks the set of transmitting tablets per channel.
pub struct PttTracker {
    active: [BTreeSet<TabletId>; NUM_CHANNELS],
    history: VecDeque<PttEvent>,
}

impl PttTracker {
    pub fn new() -> Self {
        Self {
            active: std::array::from_fn(|_| BTreeSet::new()),
            history: VecDeque::new(),
        }
    }

    /// Mark a tablet as transmitting on a channel.
    ///
    /// Re-requesting while already active leaves the set unchanged but
    /// still appends a history record. Always returns [`PttState::Active`].
    pub fn request(
        &mut self,
        tablet: TabletId,
        channel: ChannelId,
        priority: i32,
    ) -> BackendResult<PttState> {
        let c = channel_index(channel)?;
        tablet_index(tablet)?;

        self.active[c].insert(tablet);
        self.log(tablet, channel, PttAction::Request, Some(priority));
        Ok(PttState::Active)
    }

    /// Mark a tablet as no longer transmitting on a channel.
    ///
    /// Releasing while not active is a no-op on the set but still logs.
    /// Always returns [`PttState::Idle`].
    pub fn release(&mut self, tablet: TabletId, channel: ChannelId) -> BackendResult<PttState> {
        let c = channel_index(channel)?;
        tablet_index(tablet)?;

        self.active[c].remove(&tablet);
        self.log(tablet, channel, PttAction::Release, None);
        Ok(PttState::Idle)
    }

    /// Current state of one channel with its sorted speaker list.
    pub fn channel_state(&self, channel: ChannelId) -> BackendResult<ChannelPtt> {
        let c = channel_index(channel)?;
        let active_tablets: Vec<TabletId> = self.active[c].iter().copied().collect();
        Ok(ChannelPtt {
            channel,
            state: if active_tablets.is_empty() {
                PttState::Idle
            } else {
                PttState::Active
            },
            active_tablets,
        })
    }

    /// Sorted list of channels a tablet is transmitting on.
    pub fn tablet_channels(&self, tablet: TabletId) -> BackendResult<Vec<ChannelId>> {
        tablet_index(tablet)?;
        Ok((0..NUM_CHANNELS)
            .filter(|&c| self.active[c].contains(&tablet))
            .map(|c| c + 1)
            .collect())
    }

    /// Point-in-time view over every channel.
    pub fn snapshot(&self) -> PttSnapshot {
        PttSnapshot {
            ts: now_ts(),
            channels: (0..NUM_CHANNELS)
                .map(|c| (c + 1, self.active[c].iter().copied().collect()))
                .collect(),
        }
    }

    /// History records, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &PttEvent> {
        self.history.iter()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    fn log(
        &mut self,
        tablet: TabletId,
        channel: ChannelId,
        action: PttAction,
        priority: Option<i32>,
    ) {
        if self.history.len() == PTT_HISTORY_CAP {
            self.history.pop_front();
        }
        self.history.push_back(PttEvent {
            ts: now_ts(),
            tablet_id: tablet,
            channel,
            action,
            priority,
        });
    }
}

impl Default for PttTracker {
    fn default() -> Self {
        Self::new()
    }
}
