//! Mixer engine: the per-tick DSP between tablets and channels
//!
//! Each tick runs against a single configuration snapshot:
//!
//! 1. **Uplink.** Every channel sums the unmuted tablet inputs weighted by
//!    its uplink row, attenuates the sum by the configured headroom, and
//!    passes it through the soft limiter. The limited frame becomes the
//!    channel output and feeds the channel meter.
//! 2. **Downlink.** Every tablet sums the unmuted, limited channel
//!    outputs weighted by its downlink row. The tablet meter reflects
//!    the tablet's own input frame, not its mix.
//!
//! The limiter is `tanh`: stateless, unity slope at zero, asymptotic at
//! full scale, so nominal levels pass untouched and hot sums cannot clip.
//! All buffers are allocated at construction; a tick performs no
//! allocation and no I/O.

use crate::engine::config::MixConfig;
use crate::engine::vu::VuMeter;
use crate::pcm;
use crate::types::{Frame, NUM_CHANNELS, NUM_TABLETS};

/// The mixing engine: stream buffers plus meter state.
///
/// Input buffers hold the most recent push per stream and are reused as-is
/// when a producer skips a tick. Output buffers are rewritten every tick.
pub struct MixerEngine {
    tablet_in: [Frame; NUM_TABLETS],
    tablet_out: [Frame; NUM_TABLETS],
    channel_in: [Frame; NUM_CHANNELS],
    channel_out: [Frame; NUM_CHANNELS],
    vu: VuMeter,
}

impl MixerEngine {
    pub fn new() -> Self {
        Self {
            tablet_in: std::array::from_fn(|_| Frame::silence()),
            tablet_out: std::array::from_fn(|_| Frame::silence()),
            channel_in: std::array::from_fn(|_| Frame::silence()),
            channel_out: std::array::from_fn(|_| Frame::silence()),
            vu: VuMeter::new(),
        }
    }

    /// Replace tablet `t`'s input frame (0-based index, validated upstream).
    pub fn push_tablet_pcm(&mut self, t: usize, frame: &[i16]) {
        pcm::from_pcm16(frame, self.tablet_in[t].as_mut_slice());
    }

    /// Replace channel `c`'s external input frame.
    pub fn push_channel_pcm(&mut self, c: usize, frame: &[i16]) {
        pcm::from_pcm16(frame, self.channel_in[c].as_mut_slice());
    }

    /// Copy tablet `t`'s current output frame as PCM.
    pub fn pull_tablet_pcm(&self, t: usize, out: &mut [i16]) {
        pcm::to_pcm16(self.tablet_out[t].as_slice(), out);
    }

    /// Copy channel `c`'s current output frame as PCM.
    pub fn pull_channel_pcm(&self, c: usize, out: &mut [i16]) {
        pcm::to_pcm16(self.channel_out[c].as_slice(), out);
    }

    /// Run one mixing step against a configuration snapshot.
    pub fn tick(&mut self, config: &MixConfig) {
        let attenuation = config.headroom_linear();

        // Uplink: tablets into channel buses.
        for c in 0..NUM_CHANNELS {
            let out = &mut self.channel_out[c];
            out.fill_silence();

            if !config.channel_muted(c) {
                for t in 0..NUM_TABLETS {
                    if config.tablet_muted(t) {
                        continue;
                    }
                    let w = config.uplink_at(c, t);
                    if w != 0.0 {
                        out.add_scaled(&self.tablet_in[t], w);
                    }
                }
            }

            for y in out.as_mut_slice() {
                *y = (*y * attenuation).tanh();
            }
            let rms = out.rms();
            self.vu.set_channel_rms(c, rms);
        }

        // Downlink: channel buses into tablet outputs.
        for t in 0..NUM_TABLETS {
            let out = &mut self.tablet_out[t];
            out.fill_silence();

            if !config.tablet_muted(t) {
                for c in 0..NUM_CHANNELS {
                    if config.channel_muted(c) {
                        continue;
                    }
                    let w = config.downlink_at(t, c);
                    if w != 0.0 {
                        out.add_scaled(&self.channel_out[c], w);
                    }
                }
            }

            let rms = self.tablet_in[t].rms();
            self.vu.set_tablet_rms(t, rms);
        }
    }

    pub fn vu(&self) -> &VuMeter {
        &self.vu
    }

    pub fn vu_mut(&mut self) -> &mut VuMeter {
        &mut self.vu
    }

    #[cfg(test)]
    fn channel_out(&self, c: usize) -> &Frame {
        &self.channel_out[c]
    }

    #[cfg(test)]
    fn tablet_out(&self, t: usize) -> &Frame {
        &self.tablet_out[t]
    }
}

impl Default for MixerEngine {
    fn default() -> Self {
        Self::new()
    }
}
