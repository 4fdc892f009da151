//! Control facade: the thread-safe surface of the audio backend
//!
//! One [`AudioBackend`] is constructed at process start and shared between
//! the periodic tick thread and any number of control callers. Locking
//! follows a single-writer-per-resource discipline: the mix configuration,
//! the engine buffers, and the PTT tracker each sit behind their own short
//! mutex, and `tick()` copies the configuration snapshot before releasing
//! the config lock, so no lock is ever held across the DSP work of another
//! resource or across an external call.

use parking_lot::Mutex;
use serde::Serialize;

use crate::config::{ConfigMismatch, EngineConfig};
use crate::engine::config::{MatrixUpdate, MixConfig};
use crate::engine::mixer::MixerEngine;
use crate::engine::vu::VuLevels;
use crate::error::{BackendError, BackendResult};
use crate::events::{BackendEvent, EventBus, EventSender};
use crate::pcm;
use crate::ptt::{ChannelPtt, PttSnapshot, PttState, PttTracker};
use crate::types::{
    channel_index, now_ts, tablet_index, ChannelId, TabletId, FRAME_SIZE, NUM_CHANNELS,
    NUM_TABLETS, SAMPLE_RATE,
};

/// Health record published on the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct HealthRecord {
    pub status: &'static str,
    pub ts: f64,
    pub num_channels: usize,
    pub num_tablets: usize,
    pub fs: u32,
    pub frame_size: usize,
    pub config: EngineConfig,
}

/// Full state record: levels, routing configuration, and PTT view.
/// Each section is internally consistent at its own capture point.
#[derive(Debug, Clone, Serialize)]
pub struct StateRecord {
    pub ts: f64,
    pub vu_db: VuLevels,
    pub config: MixConfig,
    pub ptt: PttSnapshot,
}

/// Response to a PTT request or release.
#[derive(Debug, Clone, Serialize)]
pub struct PttResponse {
    pub tablet_id: TabletId,
    pub channel: ChannelId,
    pub ptt_state: PttState,
    pub channel_state: ChannelPtt,
    pub tablet_channels: Vec<ChannelId>,
}

/// The backend object graph: mix configuration, engine, PTT tracker, and
/// the event bus they publish to.
pub struct AudioBackend {
    config: Mutex<MixConfig>,
    engine: Mutex<MixerEngine>,
    ptt: Mutex<PttTracker>,
    engine_config: Mutex<EngineConfig>,
    bus: EventBus,
    events: EventSender,
}

impl AudioBackend {
    /// Build the backend and apply the initial engine configuration.
    ///
    /// An invalid headroom in the initial config is logged and ignored;
    /// the backend comes up on its defaults in that case.
    pub fn new(engine_config: EngineConfig) -> Self {
        let bus = EventBus::default();
        let events = bus.sender();
        let backend = Self {
            config: Mutex::new(MixConfig::new()),
            engine: Mutex::new(MixerEngine::new()),
            ptt: Mutex::new(PttTracker::new()),
            engine_config: Mutex::new(EngineConfig::default()),
            bus,
            events,
        };
        if let Err(e) = backend.reload_config(engine_config) {
            log::warn!("initial engine config rejected: {}, using defaults", e);
        }
        backend
    }

    /// Receiver side of the event bus.
    pub fn subscribe(&self) -> crossbeam::channel::Receiver<BackendEvent> {
        self.bus.subscribe()
    }

    /// Publisher handle, for components that emit alongside the backend.
    pub fn event_sender(&self) -> EventSender {
        self.events.clone()
    }

    // ------------------------------------------------------------------
    // Frame I/O
    // ------------------------------------------------------------------

    /// Replace tablet `tablet`'s input frame with one frame of PCM.
    pub fn push_tablet_frame_pcm16(&self, tablet: TabletId, pcm: &[i16]) -> BackendResult<()> {
        let t = tablet_index(tablet)?;
        Self::check_frame_len(pcm.len())?;
        self.engine.lock().push_tablet_pcm(t, pcm);
        Ok(())
    }

    /// Replace channel `channel`'s external input frame.
    pub fn push_channel_frame_pcm16(&self, channel: ChannelId, pcm: &[i16]) -> BackendResult<()> {
        let c = channel_index(channel)?;
        Self::check_frame_len(pcm.len())?;
        self.engine.lock().push_channel_pcm(c, pcm);
        Ok(())
    }

    /// Copy tablet `tablet`'s current output frame into `out`.
    pub fn pull_tablet_frame_pcm16(&self, tablet: TabletId, out: &mut [i16]) -> BackendResult<()> {
        let t = tablet_index(tablet)?;
        Self::check_frame_len(out.len())?;
        self.engine.lock().pull_tablet_pcm(t, out);
        Ok(())
    }

    /// Copy channel `channel`'s current output frame into `out`.
    pub fn pull_channel_frame_pcm16(&self, channel: ChannelId, out: &mut [i16]) -> BackendResult<()> {
        let c = channel_index(channel)?;
        Self::check_frame_len(out.len())?;
        self.engine.lock().pull_channel_pcm(c, out);
        Ok(())
    }

    /// Replace tablet `tablet`'s input frame from little-endian wire
    /// bytes, as received by the transport.
    pub fn push_tablet_frame_bytes(&self, tablet: TabletId, bytes: &[u8]) -> BackendResult<()> {
        let t = tablet_index(tablet)?;
        Self::check_wire_len(bytes.len())?;
        let mut frame = [0i16; FRAME_SIZE];
        pcm::pcm16_from_le_bytes(bytes, &mut frame);
        self.engine.lock().push_tablet_pcm(t, &frame);
        Ok(())
    }

    /// Replace channel `channel`'s external input frame from little-endian
    /// wire bytes.
    pub fn push_channel_frame_bytes(&self, channel: ChannelId, bytes: &[u8]) -> BackendResult<()> {
        let c = channel_index(channel)?;
        Self::check_wire_len(bytes.len())?;
        let mut frame = [0i16; FRAME_SIZE];
        pcm::pcm16_from_le_bytes(bytes, &mut frame);
        self.engine.lock().push_channel_pcm(c, &frame);
        Ok(())
    }

    /// Copy tablet `tablet`'s current output frame as little-endian wire
    /// bytes.
    pub fn pull_tablet_frame_bytes(&self, tablet: TabletId, out: &mut [u8]) -> BackendResult<()> {
        let t = tablet_index(tablet)?;
        Self::check_wire_len(out.len())?;
        let mut frame = [0i16; FRAME_SIZE];
        self.engine.lock().pull_tablet_pcm(t, &mut frame);
        pcm::pcm16_to_le_bytes(&frame, out);
        Ok(())
    }

    /// Copy channel `channel`'s current output frame as little-endian wire
    /// bytes.
    pub fn pull_channel_frame_bytes(&self, channel: ChannelId, out: &mut [u8]) -> BackendResult<()> {
        let c = channel_index(channel)?;
        Self::check_wire_len(out.len())?;
        let mut frame = [0i16; FRAME_SIZE];
        self.engine.lock().pull_channel_pcm(c, &mut frame);
        pcm::pcm16_to_le_bytes(&frame, out);
        Ok(())
    }

    /// Run one mixing step.
    ///
    /// The configuration is snapshotted at entry; mutations that land
    /// during the tick apply to the next one.
    pub fn tick(&self) {
        let snapshot = self.config.lock().snapshot();
        self.engine.lock().tick(&snapshot);
    }

    // ------------------------------------------------------------------
    // Mix configuration
    // ------------------------------------------------------------------

    /// Reset all routing to a uniform gain and clear mutes.
    pub fn set_uniform_routing(&self, gain_db: f32) -> BackendResult<()> {
        self.config.lock().set_uniform_routing(gain_db)?;
        log::info!("routing reset to uniform {} dB", gain_db);
        self.events.publish(BackendEvent::RoutingReset { gain_db });
        Ok(())
    }

    /// Apply a combined partial update of uplink, downlink, and headroom.
    /// Validated as a whole: on error nothing changes.
    pub fn update_matrix(
        &self,
        uplink: Option<&MatrixUpdate>,
        downlink: Option<&MatrixUpdate>,
        headroom_db: Option<f32>,
    ) -> BackendResult<()> {
        self.config.lock().merge(uplink, downlink, headroom_db)?;
        log::info!(
            "mixing matrix updated (uplink: {}, downlink: {}, headroom: {:?})",
            uplink.is_some(),
            downlink.is_some(),
            headroom_db
        );
        self.events.publish(BackendEvent::MatrixUpdated {
            uplink_changed: uplink.is_some(),
            downlink_changed: downlink.is_some(),
            headroom_changed: headroom_db.is_some(),
        });
        Ok(())
    }

    /// Partial merge of the uplink matrix.
    pub fn merge_uplink(&self, update: &MatrixUpdate) -> BackendResult<()> {
        self.update_matrix(Some(update), None, None)
    }

    /// Partial merge of the downlink matrix.
    pub fn merge_downlink(&self, update: &MatrixUpdate) -> BackendResult<()> {
        self.update_matrix(None, Some(update), None)
    }

    pub fn set_tablet_mute(&self, tablet: TabletId, mute: bool) -> BackendResult<()> {
        self.config.lock().set_tablet_mute(tablet, mute)?;
        log::info!("tablet {} mute set to {}", tablet, mute);
        self.events.publish(BackendEvent::TabletMuteSet { tablet, mute });
        Ok(())
    }

    pub fn set_channel_mute(&self, channel: ChannelId, mute: bool) -> BackendResult<()> {
        self.config.lock().set_channel_mute(channel, mute)?;
        log::info!("channel {} mute set to {}", channel, mute);
        self.events.publish(BackendEvent::ChannelMuteSet { channel, mute });
        Ok(())
    }

    pub fn set_headroom_db(&self, headroom_db: f32) -> BackendResult<()> {
        self.update_matrix(None, None, Some(headroom_db))
    }

    /// Current mix configuration (a copy).
    pub fn mix_config(&self) -> MixConfig {
        self.config.lock().snapshot()
    }

    /// Apply a reloaded engine configuration.
    ///
    /// `headroom_db` is applied live; `fs`/`frame_size` cannot change at
    /// runtime, so disagreements are returned (and published as warning
    /// events) while processing continues on the compiled constants.
    pub fn reload_config(&self, engine_config: EngineConfig) -> BackendResult<Vec<ConfigMismatch>> {
        self.config.lock().set_headroom_db(engine_config.headroom_db)?;

        let mismatches = engine_config.mismatches();
        for mismatch in &mismatches {
            log::warn!("{}", mismatch);
            self.events.publish(BackendEvent::ConfigMismatch(*mismatch));
        }

        *self.engine_config.lock() = engine_config;
        log::info!("engine config reloaded: {:?}", engine_config);
        self.events.publish(BackendEvent::ConfigReloaded {
            config: engine_config,
        });
        Ok(mismatches)
    }

    // ------------------------------------------------------------------
    // PTT
    // ------------------------------------------------------------------

    /// Mark a tablet as transmitting on a channel.
    pub fn ptt_request(
        &self,
        tablet: TabletId,
        channel: ChannelId,
        priority: i32,
    ) -> BackendResult<PttResponse> {
        let response = {
            let mut ptt = self.ptt.lock();
            let state = ptt.request(tablet, channel, priority)?;
            PttResponse {
                tablet_id: tablet,
                channel,
                ptt_state: state,
                channel_state: ptt.channel_state(channel)?,
                tablet_channels: ptt.tablet_channels(tablet)?,
            }
        };
        log::info!(
            "ptt request: tablet {} on channel {} (priority {}), now active: {:?}",
            tablet,
            channel,
            priority,
            response.channel_state.active_tablets
        );
        self.events.publish(BackendEvent::PttRequested {
            tablet,
            channel,
            priority,
            active_tablets: response.channel_state.active_tablets.clone(),
        });
        Ok(response)
    }

    /// Mark a tablet as no longer transmitting on a channel.
    pub fn ptt_release(&self, tablet: TabletId, channel: ChannelId) -> BackendResult<PttResponse> {
        let response = {
            let mut ptt = self.ptt.lock();
            let state = ptt.release(tablet, channel)?;
            PttResponse {
                tablet_id: tablet,
                channel,
                ptt_state: state,
                channel_state: ptt.channel_state(channel)?,
                tablet_channels: ptt.tablet_channels(tablet)?,
            }
        };
        log::info!(
            "ptt release: tablet {} on channel {}, still active: {:?}",
            tablet,
            channel,
            response.channel_state.active_tablets
        );
        self.events.publish(BackendEvent::PttReleased {
            tablet,
            channel,
            active_tablets: response.channel_state.active_tablets.clone(),
        });
        Ok(response)
    }

    pub fn ptt_channel_state(&self, channel: ChannelId) -> BackendResult<ChannelPtt> {
        self.ptt.lock().channel_state(channel)
    }

    pub fn ptt_tablet_channels(&self, tablet: TabletId) -> BackendResult<Vec<ChannelId>> {
        self.ptt.lock().tablet_channels(tablet)
    }

    /// Atomic view of every channel's speakers.
    pub fn ptt_snapshot(&self) -> PttSnapshot {
        self.ptt.lock().snapshot()
    }

    // ------------------------------------------------------------------
    // Levels and records
    // ------------------------------------------------------------------

    /// Levels from the most recently completed tick.
    pub fn vu_levels_db(&self) -> VuLevels {
        self.engine.lock().vu().levels_db()
    }

    /// Set the meter smoothing coefficient (1.0 disables smoothing).
    pub fn set_vu_smoothing(&self, alpha: f32) {
        self.engine.lock().vu_mut().set_smoothing(alpha);
    }

    /// Publish the current levels onto the event bus.
    pub fn publish_vu(&self) {
        self.events.publish(BackendEvent::VuLevels {
            ts: now_ts(),
            vu_db: self.vu_levels_db(),
        });
    }

    /// Assemble the full state record.
    pub fn state_snapshot(&self) -> StateRecord {
        StateRecord {
            ts: now_ts(),
            vu_db: self.vu_levels_db(),
            config: self.mix_config(),
            ptt: self.ptt_snapshot(),
        }
    }

    /// Assemble the health record.
    pub fn health(&self) -> HealthRecord {
        HealthRecord {
            status: "ok",
            ts: now_ts(),
            num_channels: NUM_CHANNELS,
            num_tablets: NUM_TABLETS,
            fs: SAMPLE_RATE,
            frame_size: FRAME_SIZE,
            config: *self.engine_config.lock(),
        }
    }

    #[inline]
    fn check_frame_len(len: usize) -> BackendResult<()> {
        if len != FRAME_SIZE {
            return Err(BackendError::BadFrameLength {
                expected: FRAME_SIZE,
                got: len,
            });
        }
        Ok(())
    }

    /// Byte payloads must carry exactly one frame; `got` reports the
    /// complete samples in the payload.
    #[inline]
    fn check_wire_len(len: usize) -> BackendResult<()> {
        if len != pcm::FRAME_BYTES {
            return Err(BackendError::BadFrameLength {
                expected: FRAME_SIZE,
                got: len / 2,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn sine_pcm(amplitude: f32) -> Vec<i16> {
        let mut float = vec![0.0f32; FRAME_SIZE];
        for (i, x) in float.iter_mut().enumerate() {
            *x = amplitude
                * (2.0 * std::f32::consts::PI * 1000.0 * i as f32 / SAMPLE_RATE as f32).sin();
        }
        let mut out = vec![0i16; FRAME_SIZE];
        crate::pcm::to_pcm16(&float, &mut out);
        out
    }

    #[test]
    fn test_push_tick_pull() {
        let backend = AudioBackend::new(EngineConfig::default());
        backend.push_tablet_frame_pcm16(1, &sine_pcm(0.5)).unwrap();
        backend.tick();

        let mut out = vec![0i16; FRAME_SIZE];
        backend.pull_channel_frame_pcm16(1, &mut out).unwrap();
        assert!(out.iter().any(|&s| s != 0));

        // Tablet 1 hears the channel bus carrying its own signal.
        backend.pull_tablet_frame_pcm16(1, &mut out).unwrap();
        assert!(out.iter().any(|&s| s != 0));
    }

    #[test]
    fn test_wire_byte_push_and_pull() {
        let backend = AudioBackend::new(EngineConfig::default());

        let frame = sine_pcm(0.5);
        let mut bytes = vec![0u8; pcm::FRAME_BYTES];
        pcm::pcm16_to_le_bytes(&frame, &mut bytes);
        backend.push_tablet_frame_bytes(1, &bytes).unwrap();
        backend.tick();

        // The byte pull matches the i16 pull, sample for sample.
        let mut wire = vec![0u8; pcm::FRAME_BYTES];
        backend.pull_channel_frame_bytes(1, &mut wire).unwrap();
        let mut decoded = vec![0i16; FRAME_SIZE];
        pcm::pcm16_from_le_bytes(&wire, &mut decoded);

        let mut direct = vec![0i16; FRAME_SIZE];
        backend.pull_channel_frame_pcm16(1, &mut direct).unwrap();
        assert_eq!(decoded, direct);
        assert!(direct.iter().any(|&s| s != 0));

        // Payloads that are not exactly one frame are rejected.
        let short = vec![0u8; pcm::FRAME_BYTES - 2];
        assert_eq!(
            backend.push_tablet_frame_bytes(1, &short),
            Err(BackendError::BadFrameLength {
                expected: FRAME_SIZE,
                got: FRAME_SIZE - 1,
            })
        );
        let odd = vec![0u8; pcm::FRAME_BYTES + 1];
        assert!(backend.push_channel_frame_bytes(1, &odd).is_err());
        let mut long = vec![0u8; pcm::FRAME_BYTES + 2];
        assert!(backend.pull_tablet_frame_bytes(1, &mut long).is_err());
    }

    #[test]
    fn test_frame_length_validation() {
        let backend = AudioBackend::new(EngineConfig::default());
        let short = vec![0i16; FRAME_SIZE - 1];
        assert_eq!(
            backend.push_tablet_frame_pcm16(1, &short),
            Err(BackendError::BadFrameLength {
                expected: FRAME_SIZE,
                got: FRAME_SIZE - 1,
            })
        );
        let mut long = vec![0i16; FRAME_SIZE + 1];
        assert!(backend.pull_channel_frame_pcm16(1, &mut long).is_err());
    }

    #[test]
    fn test_bad_ids_rejected_everywhere() {
        let backend = AudioBackend::new(EngineConfig::default());
        let frame = vec![0i16; FRAME_SIZE];
        assert!(backend.push_tablet_frame_pcm16(0, &frame).is_err());
        assert!(backend.push_tablet_frame_pcm16(NUM_TABLETS + 1, &frame).is_err());
        assert!(backend.push_channel_frame_pcm16(NUM_CHANNELS + 1, &frame).is_err());
        assert!(backend.set_tablet_mute(17, true).is_err());
        assert!(backend.ptt_request(1, 9, 1).is_err());
    }

    #[test]
    fn test_rejected_headroom_leaves_state_unchanged() {
        let backend = AudioBackend::new(EngineConfig::default());
        let before = backend.mix_config().headroom_db();
        assert!(matches!(
            backend.set_headroom_db(-1.0),
            Err(BackendError::BadHeadroom(_))
        ));
        assert_eq!(backend.mix_config().headroom_db(), before);
    }

    #[test]
    fn test_ptt_flow_and_events() {
        let backend = AudioBackend::new(EngineConfig::default());
        let rx = backend.subscribe();
        // Drain construction-time events.
        while rx.try_recv().is_ok() {}

        let response = backend.ptt_request(3, 1, 2).unwrap();
        assert_eq!(response.ptt_state, PttState::Active);
        assert_eq!(response.channel_state.active_tablets, vec![3]);
        assert_eq!(response.tablet_channels, vec![1]);

        match rx.try_recv().unwrap() {
            BackendEvent::PttRequested {
                tablet,
                channel,
                priority,
                active_tablets,
            } => {
                assert_eq!((tablet, channel, priority), (3, 1, 2));
                assert_eq!(active_tablets, vec![3]);
            }
            other => panic!("unexpected event {:?}", other),
        }

        let response = backend.ptt_release(3, 1).unwrap();
        assert_eq!(response.ptt_state, PttState::Idle);
        assert!(response.channel_state.active_tablets.is_empty());
        assert!(response.tablet_channels.is_empty());
    }

    #[test]
    fn test_state_snapshot_serializes() {
        let backend = AudioBackend::new(EngineConfig::default());
        backend.push_tablet_frame_pcm16(2, &sine_pcm(0.3)).unwrap();
        backend.tick();
        backend.ptt_request(2, 1, 1).unwrap();

        let state = backend.state_snapshot();
        assert_eq!(state.vu_db.tablets.len(), NUM_TABLETS);
        assert_eq!(state.ptt.channels[&1], vec![2]);
        assert!(state.ts > 0.0);

        // The record must serialize for the transport layer.
        let yaml = serde_yaml::to_string(&state).unwrap();
        assert!(yaml.contains("vu_db"));
        assert!(yaml.contains("headroom_db"));
    }

    #[test]
    fn test_health_record() {
        let backend = AudioBackend::new(EngineConfig::default());
        let health = backend.health();
        assert_eq!(health.status, "ok");
        assert_eq!(health.num_channels, NUM_CHANNELS);
        assert_eq!(health.num_tablets, NUM_TABLETS);
        assert_eq!(health.fs, SAMPLE_RATE);
        assert_eq!(health.frame_size, FRAME_SIZE);
    }

    #[test]
    fn test_reload_reports_mismatches_and_applies_headroom() {
        let backend = AudioBackend::new(EngineConfig::default());
        let mismatches = backend
            .reload_config(EngineConfig {
                fs: 48_000,
                frame_size: FRAME_SIZE,
                headroom_db: 6.0,
            })
            .unwrap();
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].field, "fs");
        assert_eq!(backend.mix_config().headroom_db(), 6.0);
        // The engine keeps reporting its compiled constants.
        assert_eq!(backend.health().fs, SAMPLE_RATE);
    }

    #[test]
    fn test_config_changes_land_on_next_tick() {
        let backend = AudioBackend::new(EngineConfig::default());
        backend.push_tablet_frame_pcm16(1, &sine_pcm(0.5)).unwrap();
        backend.tick();
        let before = backend.vu_levels_db().channels[&1];

        backend.set_channel_mute(1, true).unwrap();
        // The completed tick's levels are unaffected by the late mutation.
        assert_eq!(backend.vu_levels_db().channels[&1], before);

        backend.tick();
        assert_eq!(backend.vu_levels_db().channels[&1], -240.0);
    }

    #[test]
    fn test_snapshot_atomicity_under_concurrency() {
        let backend = Arc::new(AudioBackend::new(EngineConfig::default()));
        let writer = {
            let backend = Arc::clone(&backend);
            std::thread::spawn(move || {
                for i in 0..500 {
                    let tablet = (i % NUM_TABLETS) + 1;
                    backend.ptt_request(tablet, 1, 1).unwrap();
                    backend.ptt_release(tablet, 1).unwrap();
                }
            })
        };

        for _ in 0..200 {
            let snap = backend.ptt_snapshot();
            assert_eq!(snap.channels.len(), NUM_CHANNELS);
            for tablets in snap.channels.values() {
                // Sorted, deduplicated, and in range: no torn view.
                assert!(tablets.windows(2).all(|w| w[0] < w[1]));
                assert!(tablets.iter().all(|&t| (1..=NUM_TABLETS).contains(&t)));
            }
        }
        writer.join().unwrap();
        assert!(backend.ptt_snapshot().channels[&1].is_empty());
    }
}
