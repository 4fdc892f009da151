//! Mix configuration: routing matrices, mutes, headroom
//!
//! Gains are stored as dense fixed-size arrays rather than sparse maps:
//! with 4 channels and 16 tablets the full state is a few hundred bytes,
//! reads are wait-free, and a tick snapshot is a plain copy. An absent
//! routing entry is encoded as gain 0.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{BackendError, BackendResult};
use crate::types::{
    channel_index, tablet_index, ChannelId, TabletId, NUM_CHANNELS, NUM_TABLETS,
};

/// Default uniform routing gain applied at construction.
pub const DEFAULT_ROUTING_GAIN_DB: f32 = -12.0;

/// Default pre-limiter headroom.
pub const DEFAULT_HEADROOM_DB: f32 = 12.0;

/// Largest accepted headroom value.
pub const MAX_HEADROOM_DB: f32 = 60.0;

/// A sparse gain update: outer key is the row id, inner key the column id.
/// Entries not mentioned keep their current value; gain 0 deletes an entry.
pub type MatrixUpdate = BTreeMap<usize, BTreeMap<usize, f32>>;

/// Convert a dB value to a linear gain factor.
#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Routing and level state observed by the mixer.
///
/// Mutators validate every id and gain before touching any state, so a
/// rejected call leaves the configuration exactly as it was. `snapshot()`
/// hands the engine a by-value copy; mutations between ticks never affect
/// a tick already in flight.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MixConfig {
    /// `uplink[c][t]`: gain for tablet t summed into channel c
    uplink: [[f32; NUM_TABLETS]; NUM_CHANNELS],
    /// `downlink[t][c]`: gain for channel c summed into tablet t's output
    downlink: [[f32; NUM_CHANNELS]; NUM_TABLETS],
    tablet_mute: [bool; NUM_TABLETS],
    channel_mute: [bool; NUM_CHANNELS],
    headroom_db: f32,
}

impl MixConfig {
    /// Uniform routing at [`DEFAULT_ROUTING_GAIN_DB`], no mutes,
    /// [`DEFAULT_HEADROOM_DB`] of headroom.
    pub fn new() -> Self {
        let g = db_to_linear(DEFAULT_ROUTING_GAIN_DB);
        Self {
            uplink: [[g; NUM_TABLETS]; NUM_CHANNELS],
            downlink: [[g; NUM_CHANNELS]; NUM_TABLETS],
            tablet_mute: [false; NUM_TABLETS],
            channel_mute: [false; NUM_CHANNELS],
            headroom_db: DEFAULT_HEADROOM_DB,
        }
    }

    /// Populate every uplink and downlink entry with the linear equivalent
    /// of `gain_db` and clear all mutes.
    pub fn set_uniform_routing(&mut self, gain_db: f32) -> BackendResult<()> {
        if !gain_db.is_finite() {
            return Err(BackendError::BadGain(gain_db));
        }
        let g = db_to_linear(gain_db);
        self.uplink = [[g; NUM_TABLETS]; NUM_CHANNELS];
        self.downlink = [[g; NUM_CHANNELS]; NUM_TABLETS];
        self.tablet_mute = [false; NUM_TABLETS];
        self.channel_mute = [false; NUM_CHANNELS];
        Ok(())
    }

    /// Apply a combined partial update. All three parts are validated
    /// before any of them is applied; on error nothing changes.
    pub fn merge(
        &mut self,
        uplink: Option<&MatrixUpdate>,
        downlink: Option<&MatrixUpdate>,
        headroom_db: Option<f32>,
    ) -> BackendResult<()> {
        if let Some(update) = uplink {
            Self::validate_update(update, channel_index, tablet_index)?;
        }
        if let Some(update) = downlink {
            Self::validate_update(update, tablet_index, channel_index)?;
        }
        if let Some(h) = headroom_db {
            Self::validate_headroom(h)?;
        }

        if let Some(update) = uplink {
            for (&channel, row) in update {
                let c = channel_index(channel)?;
                for (&tablet, &gain) in row {
                    self.uplink[c][tablet_index(tablet)?] = gain;
                }
            }
        }
        if let Some(update) = downlink {
            for (&tablet, row) in update {
                let t = tablet_index(tablet)?;
                for (&channel, &gain) in row {
                    self.downlink[t][channel_index(channel)?] = gain;
                }
            }
        }
        if let Some(h) = headroom_db {
            self.headroom_db = h;
        }
        Ok(())
    }

    /// Partial merge of the uplink matrix (channel -> tablet -> gain).
    pub fn merge_uplink(&mut self, update: &MatrixUpdate) -> BackendResult<()> {
        self.merge(Some(update), None, None)
    }

    /// Partial merge of the downlink matrix (tablet -> channel -> gain).
    pub fn merge_downlink(&mut self, update: &MatrixUpdate) -> BackendResult<()> {
        self.merge(None, Some(update), None)
    }

    pub fn set_tablet_mute(&mut self, tablet: TabletId, mute: bool) -> BackendResult<()> {
        self.tablet_mute[tablet_index(tablet)?] = mute;
        Ok(())
    }

    pub fn set_channel_mute(&mut self, channel: ChannelId, mute: bool) -> BackendResult<()> {
        self.channel_mute[channel_index(channel)?] = mute;
        Ok(())
    }

    pub fn set_headroom_db(&mut self, headroom_db: f32) -> BackendResult<()> {
        Self::validate_headroom(headroom_db)?;
        self.headroom_db = headroom_db;
        Ok(())
    }

    /// Immutable copy for one engine tick.
    #[inline]
    pub fn snapshot(&self) -> MixConfig {
        *self
    }

    pub fn headroom_db(&self) -> f32 {
        self.headroom_db
    }

    /// Headroom as the linear attenuation applied to every channel sum.
    #[inline]
    pub fn headroom_linear(&self) -> f32 {
        db_to_linear(-self.headroom_db)
    }

    /// Uplink gain by 1-based ids.
    pub fn uplink_gain(&self, channel: ChannelId, tablet: TabletId) -> BackendResult<f32> {
        Ok(self.uplink[channel_index(channel)?][tablet_index(tablet)?])
    }

    /// Downlink gain by 1-based ids.
    pub fn downlink_gain(&self, tablet: TabletId, channel: ChannelId) -> BackendResult<f32> {
        Ok(self.downlink[tablet_index(tablet)?][channel_index(channel)?])
    }

    pub fn tablet_mute(&self, tablet: TabletId) -> BackendResult<bool> {
        Ok(self.tablet_mute[tablet_index(tablet)?])
    }

    pub fn channel_mute(&self, channel: ChannelId) -> BackendResult<bool> {
        Ok(self.channel_mute[channel_index(channel)?])
    }

    // Raw-index accessors for the tick inner loops.

    #[inline]
    pub(crate) fn uplink_at(&self, c: usize, t: usize) -> f32 {
        self.uplink[c][t]
    }

    #[inline]
    pub(crate) fn downlink_at(&self, t: usize, c: usize) -> f32 {
        self.downlink[t][c]
    }

    #[inline]
    pub(crate) fn tablet_muted(&self, t: usize) -> bool {
        self.tablet_mute[t]
    }

    #[inline]
    pub(crate) fn channel_muted(&self, c: usize) -> bool {
        self.channel_mute[c]
    }

    fn validate_headroom(headroom_db: f32) -> BackendResult<()> {
        if !headroom_db.is_finite() || !(0.0..=MAX_HEADROOM_DB).contains(&headroom_db) {
            return Err(BackendError::BadHeadroom(headroom_db));
        }
        Ok(())
    }

    fn validate_update(
        update: &MatrixUpdate,
        row_index: fn(usize) -> BackendResult<usize>,
        col_index: fn(usize) -> BackendResult<usize>,
    ) -> BackendResult<()> {
        for (&row, cols) in update {
            row_index(row)?;
            for (&col, &gain) in cols {
                col_index(col)?;
                if !gain.is_finite() || gain < 0.0 {
                    return Err(BackendError::BadGain(gain));
                }
            }
        }
        Ok(())
    }
}

impl Default for MixConfig {
    fn default() -> Self {
        Self::new()
    }
}
