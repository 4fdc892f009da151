//! Level metering: linear RMS accumulation and dBFS conversion
//!
//! Tablet meters track what each tablet sends (its input frame); channel
//! meters track what the bus actually carries (the post-limiter output).
//! That asymmetry is deliberate: operator-facing tablet meters should not
//! move when routing changes.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::types::{ChannelId, TabletId, NUM_CHANNELS, NUM_TABLETS};

/// RMS values below this report the floor.
pub const MIN_RMS: f32 = 1e-12;

/// Reported level for unheard silence, in dBFS.
pub const DB_FLOOR: f32 = -240.0;

/// Convert a linear RMS value to dBFS, clamped to [`DB_FLOOR`].
pub fn dbfs(rms: f32) -> f32 {
    if rms < MIN_RMS {
        return DB_FLOOR;
    }
    (20.0 * rms.log10()).max(DB_FLOOR)
}

/// Published level record: dBFS per tablet and per channel, keyed by id.
#[derive(Debug, Clone, Serialize)]
pub struct VuLevels {
    pub tablets: BTreeMap<TabletId, f32>,
    pub channels: BTreeMap<ChannelId, f32>,
}

/// Per-stream meter state, updated once per tick.
///
/// Levels pass through an optional one-pole smoother in the dB domain:
/// `db = alpha * db_new + (1 - alpha) * db_prev`. The default alpha of 1.0
/// disables smoothing; slower ballistics belong to consumers of the feed.
#[derive(Debug, Clone)]
pub struct VuMeter {
    tablet_rms: [f32; NUM_TABLETS],
    channel_rms: [f32; NUM_CHANNELS],
    tablet_db: [f32; NUM_TABLETS],
    channel_db: [f32; NUM_CHANNELS],
    alpha: f32,
}

impl VuMeter {
    pub fn new() -> Self {
        Self {
            tablet_rms: [0.0; NUM_TABLETS],
            channel_rms: [0.0; NUM_CHANNELS],
            tablet_db: [DB_FLOOR; NUM_TABLETS],
            channel_db: [DB_FLOOR; NUM_CHANNELS],
            alpha: 1.0,
        }
    }

    /// Set the one-pole smoothing coefficient, clamped to (0, 1].
    pub fn set_smoothing(&mut self, alpha: f32) {
        self.alpha = if alpha.is_finite() {
            alpha.clamp(0.01, 1.0)
        } else {
            1.0
        };
    }

    pub(crate) fn set_tablet_rms(&mut self, t: usize, rms: f32) {
        self.tablet_rms[t] = rms;
        self.tablet_db[t] = self.smooth(self.tablet_db[t], dbfs(rms));
    }

    pub(crate) fn set_channel_rms(&mut self, c: usize, rms: f32) {
        self.channel_rms[c] = rms;
        self.channel_db[c] = self.smooth(self.channel_db[c], dbfs(rms));
    }

    #[inline]
    fn smooth(&self, prev: f32, db: f32) -> f32 {
        self.alpha * db + (1.0 - self.alpha) * prev
    }

    /// Last-tick linear RMS for a tablet (0-based index).
    pub(crate) fn tablet_rms(&self, t: usize) -> f32 {
        self.tablet_rms[t]
    }

    /// Last-tick linear RMS for a channel (0-based index).
    pub(crate) fn channel_rms(&self, c: usize) -> f32 {
        self.channel_rms[c]
    }

    /// Current levels in dBFS, keyed by 1-based id.
    pub fn levels_db(&self) -> VuLevels {
        VuLevels {
            tablets: (0..NUM_TABLETS)
                .map(|t| (t + 1, self.tablet_db[t]))
                .collect(),
            channels: (0..NUM_CHANNELS)
                .map(|c| (c + 1, self.channel_db[c]))
                .collect(),
        }
    }
}

impl Default for VuMeter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dbfs_floor_is_exact() {
        assert_eq!(dbfs(0.0), -240.0);
        assert_eq!(dbfs(1e-13), -240.0);
        assert_eq!(dbfs(f32::MIN_POSITIVE), -240.0);
    }

    #[test]
    fn test_dbfs_reference_points() {
        assert!(dbfs(1.0).abs() < 1e-5);
        assert!((dbfs(0.5) - (-6.0206)).abs() < 1e-3);
        assert!((dbfs(0.1) - (-20.0)).abs() < 1e-3);
    }

    #[test]
    fn test_meter_starts_at_floor() {
        let meter = VuMeter::new();
        let levels = meter.levels_db();
        assert_eq!(levels.tablets.len(), NUM_TABLETS);
        assert_eq!(levels.channels.len(), NUM_CHANNELS);
        assert!(levels.tablets.values().all(|&db| db == -240.0));
        assert!(levels.channels.values().all(|&db| db == -240.0));
    }

    #[test]
    fn test_unsmoothed_meter_tracks_instantly() {
        let mut meter = VuMeter::new();
        meter.set_tablet_rms(0, 1.0);
        let levels = meter.levels_db();
        assert!(levels.tablets[&1].abs() < 1e-5);
    }

    #[test]
    fn test_smoothing_blends_toward_new_level() {
        let mut meter = VuMeter::new();
        meter.set_smoothing(0.5);

        // From the floor toward 0 dBFS: first update lands halfway.
        meter.set_channel_rms(0, 1.0);
        let db = meter.levels_db().channels[&1];
        assert!((db - (-120.0)).abs() < 1e-3);

        meter.set_channel_rms(0, 1.0);
        let db = meter.levels_db().channels[&1];
        assert!((db - (-60.0)).abs() < 1e-3);
    }
}
