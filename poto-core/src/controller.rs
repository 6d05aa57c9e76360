//! # Playback Controller
//!
//! Owns transport state, the playlist, the seek reconciler and stall
//! recovery. Lives on the UI thread: commands arrive as direct calls or as
//! [`Command`]s through a [`ControllerHandle`], engine traffic arrives as
//! [`EngineMessage`]s, and everything the UI needs to know goes out as
//! [`Notification`]s.
//!
//! ```text
//!   UI ──Command──►┌────────────────────┐──Notification──► UI
//!                  │ PlaybackController │
//! Engine ──msg────►│  playlist · state  │──load/play/seek/reset──► Engine
//!                  │  reconciler · recovery
//!                  └────────────────────┘
//! ```
//!
//! [`pump`](PlaybackController::pump) must be called regularly (once per UI
//! frame); it drains both queues and fires the recovery timer.

use crossbeam_channel::{Receiver, Sender};
use std::fmt;
use std::time::Instant;

use crate::config::EngineConfig;
use crate::engine::{create_engine, EngineEvent, EngineMessage, PlaybackEngine};
use crate::error::{EngineError, EngineResult};
use crate::media::MediaReference;
use crate::playlist::Playlist;
use crate::position::PlaybackPosition;
use crate::reconcile::{PositionReconciler, SeekRequest, SeekVerdict, SLIDER_MAX};
use crate::recovery::{RecoveryPhase, StallRecovery, StallTrigger, TriggerOutcome};

const BUFFERING_ERROR: &str = "Buffering error detected. Resetting buffer.";

// ============================================================================
// Transport
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    #[default]
    Stopped,
    Playing,
    Paused,
    Error,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stopped => "Stopped",
            Self::Playing => "Playing",
            Self::Paused => "Paused",
            Self::Error => "Error",
        };
        f.write_str(name)
    }
}

/// Which transport controls the UI should enable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransportAffordances {
    pub play: bool,
    pub pause: bool,
    pub stop: bool,
    pub previous: bool,
    pub next: bool,
}

impl TransportAffordances {
    pub fn compute(state: TransportState, playlist_len: usize, position_ms: u64) -> Self {
        Self {
            play: playlist_len > 0 && state != TransportState::Playing,
            pause: state == TransportState::Playing,
            stop: state != TransportState::Stopped,
            previous: position_ms > 0,
            next: playlist_len > 1,
        }
    }
}

// ============================================================================
// Messages
// ============================================================================

/// Outbound events for the UI
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    TransportStateChanged {
        state: TransportState,
        affordances: TransportAffordances,
    },
    PositionChanged(u64),
    DurationChanged(u64),
    StatusMessage(String),
    MediaChanged(MediaReference),
    EndOfMedia,
}

/// Inbound UI commands
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Open(MediaReference),
    Play,
    Pause,
    Stop,
    Next,
    Previous,
    /// Slider value, 0-1000
    SetPosition(u32),
    /// Percent, 0-100
    SetVolume(u32),
    SetMuted(bool),
    ToggleMute,
    Shutdown,
}

/// Cloneable sender for [`Command`]s, processed on the next `pump`
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    tx: Sender<Command>,
}

impl ControllerHandle {
    /// Queue a command. Returns false once the controller is gone.
    pub fn send(&self, command: Command) -> bool {
        self.tx.send(command).is_ok()
    }
}

// ============================================================================
// Controller
// ============================================================================

pub struct PlaybackController {
    engine: Box<dyn PlaybackEngine>,
    engine_rx: Receiver<EngineMessage>,
    commands_tx: Sender<Command>,
    commands_rx: Receiver<Command>,
    notify_tx: Sender<Notification>,
    playlist: Playlist,
    state: TransportState,
    position: PlaybackPosition,
    reconciler: PositionReconciler,
    recovery: StallRecovery,
    config: EngineConfig,
    volume: u32,
    muted: bool,
}

impl PlaybackController {
    /// Wrap an engine. Returns the controller and the notification stream.
    pub fn new(
        engine: Box<dyn PlaybackEngine>,
        engine_rx: Receiver<EngineMessage>,
        config: EngineConfig,
    ) -> (Self, Receiver<Notification>) {
        let (notify_tx, notify_rx) = crossbeam_channel::unbounded();
        let (commands_tx, commands_rx) = crossbeam_channel::unbounded();
        let volume = config.initial_volume.min(100);

        let mut controller = Self {
            engine,
            engine_rx,
            commands_tx,
            commands_rx,
            notify_tx,
            playlist: Playlist::new(),
            state: TransportState::Stopped,
            position: PlaybackPosition::default(),
            reconciler: PositionReconciler::new(config.seek_tolerance_ms),
            recovery: StallRecovery::new(config.recovery_delay(), config.max_recovery_attempts),
            config,
            volume,
            muted: false,
        };
        controller.engine.set_volume(volume as f64 / 100.0);
        (controller, notify_rx)
    }

    /// Build the engine `config` selects and wrap it.
    pub fn from_config(config: EngineConfig) -> EngineResult<(Self, Receiver<Notification>)> {
        let (engine, engine_rx) = create_engine(&config)?;
        Ok(Self::new(engine, engine_rx, config))
    }

    pub fn handle(&self) -> ControllerHandle {
        ControllerHandle {
            tx: self.commands_tx.clone(),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn playlist(&self) -> &Playlist {
        &self.playlist
    }

    pub fn position(&self) -> PlaybackPosition {
        self.position
    }

    pub fn volume(&self) -> u32 {
        self.volume
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn engine(&self) -> &dyn PlaybackEngine {
        self.engine.as_ref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn recovery_phase(&self) -> RecoveryPhase {
        self.recovery.phase()
    }

    pub fn affordances(&self) -> TransportAffordances {
        TransportAffordances::compute(
            self.state,
            self.playlist.len(),
            self.position.current_ms(),
        )
    }

    // ========================================================================
    // Transport
    // ========================================================================

    /// Stop whatever plays, append `media` to the playlist and play it.
    pub fn open(&mut self, media: impl Into<MediaReference>) -> EngineResult<()> {
        let media = media.into();
        tracing::info!("Opening {}", media);
        self.force_stop();

        let previous = self.playlist.current_index();
        self.playlist.push_current(media.clone());
        if let Err(e) = self.load_and_play(&media) {
            self.playlist.rollback_push(previous);
            return Err(self.fail_load(&media, e));
        }
        self.notify(Notification::MediaChanged(media));
        Ok(())
    }

    pub fn play(&mut self) -> EngineResult<()> {
        if self.state == TransportState::Playing {
            return Ok(());
        }
        if !self.engine.is_loaded() {
            let media = self.playlist.current().cloned().ok_or(EngineError::NoMedia)?;
            self.recovery.cancel();
            return self
                .load_and_play(&media)
                .map_err(|e| self.fail_load(&media, e));
        }
        self.engine.play()?;
        self.set_state(TransportState::Playing);
        Ok(())
    }

    pub fn pause(&mut self) -> EngineResult<()> {
        if self.state != TransportState::Playing {
            return Ok(());
        }
        self.engine.pause()?;
        self.set_state(TransportState::Paused);
        Ok(())
    }

    /// Tear down playback. A second call has no effect.
    pub fn stop(&mut self) {
        if self.state == TransportState::Stopped
            && !self.engine.is_loaded()
            && !self.recovery.is_active()
        {
            return;
        }
        self.force_stop();
        self.position.reset();
        self.notify(Notification::PositionChanged(0));
        self.set_state(TransportState::Stopped);
    }

    /// Play the next playlist entry. No-op on the last one.
    pub fn next(&mut self) -> EngineResult<()> {
        if !self.playlist.has_next() {
            return Ok(());
        }
        self.force_stop();
        let media = self.playlist.advance().cloned().ok_or(EngineError::NoMedia)?;
        self.switch_to(media)
    }

    /// Go back one entry near the start of a track, otherwise restart it.
    pub fn previous(&mut self) -> EngineResult<()> {
        let position = self.position.current_ms();
        if position <= self.config.restart_threshold_ms && self.playlist.has_previous() {
            self.force_stop();
            let media = self.playlist.retreat().cloned().ok_or(EngineError::NoMedia)?;
            return self.switch_to(media);
        }

        self.reconciler.clear();
        if self.engine.is_loaded() {
            self.engine.seek(0)?;
        }
        self.position.set_current(0);
        self.notify(Notification::PositionChanged(0));
        self.set_state(self.state);
        Ok(())
    }

    /// Seek to a slider value in `0..=1000`.
    ///
    /// Skipped while the duration is unknown. The landing is verified on the
    /// next position report of the same seek generation.
    pub fn set_position(&mut self, normalized: u32) -> EngineResult<()> {
        let normalized = normalized.min(SLIDER_MAX);
        let Some(target_ms) = self.reconciler.plan(normalized, self.position.duration_ms()) else {
            tracing::debug!("Seek to {} skipped, duration unknown", normalized);
            return Ok(());
        };
        if !self.engine.is_loaded() {
            return Ok(());
        }

        let issued_at = Instant::now();
        match self.engine.seek(target_ms) {
            Ok(generation) => {
                tracing::debug!("Seek {} -> {}ms (generation {})", normalized, target_ms, generation);
                self.reconciler.track(SeekRequest {
                    target_ms,
                    issued_at,
                    generation,
                });
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Seek to {}ms failed: {}", target_ms, e);
                self.begin_recovery(StallTrigger::PipelineError(e.to_string()), issued_at);
                Err(e)
            }
        }
    }

    // ========================================================================
    // Audio
    // ========================================================================

    pub fn set_volume(&mut self, percent: u32) {
        self.volume = percent.min(100);
        self.engine.set_volume(self.volume as f64 / 100.0);
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        self.engine.set_muted(muted);
    }

    /// Flip mute. Returns the new setting.
    pub fn toggle_mute(&mut self) -> bool {
        self.set_muted(!self.muted);
        self.muted
    }

    /// Stop playback before the host exits.
    pub fn shutdown(&mut self) {
        if self.state != TransportState::Stopped {
            self.stop();
        }
        self.force_stop();
        tracing::info!("Controller shut down");
    }

    // ========================================================================
    // Event loop
    // ========================================================================

    /// Run one command, reporting failures as a status message.
    pub fn execute(&mut self, command: Command) {
        tracing::debug!("Command {:?}", command);
        let result = match command {
            Command::Open(media) => self.open(media),
            Command::Play => self.play(),
            Command::Pause => self.pause(),
            Command::Stop => {
                self.stop();
                Ok(())
            }
            Command::Next => self.next(),
            Command::Previous => self.previous(),
            Command::SetPosition(normalized) => self.set_position(normalized),
            Command::SetVolume(percent) => {
                self.set_volume(percent);
                Ok(())
            }
            Command::SetMuted(muted) => {
                self.set_muted(muted);
                Ok(())
            }
            Command::ToggleMute => {
                self.toggle_mute();
                Ok(())
            }
            Command::Shutdown => {
                self.shutdown();
                Ok(())
            }
        };
        if let Err(e) = result {
            tracing::warn!("Command failed: {}", e);
            self.status(e.to_string());
        }
    }

    /// Drain queued commands and engine messages, then fire the recovery
    /// timer if it is due.
    pub fn pump(&mut self, now: Instant) {
        while let Ok(command) = self.commands_rx.try_recv() {
            self.execute(command);
        }
        while let Ok(message) = self.engine_rx.try_recv() {
            self.handle_engine_message(message, now);
        }
        if self.recovery.poll(now) {
            self.resume();
        }
    }

    fn handle_engine_message(&mut self, message: EngineMessage, now: Instant) {
        if message.session != self.engine.session() {
            tracing::trace!("Dropping message from session {}", message.session);
            return;
        }

        match message.event {
            EngineEvent::StateChanged(state) => {
                tracing::debug!("Pipeline is {}", state);
            }
            EngineEvent::DurationChanged(duration_ms) => {
                self.position.set_duration(duration_ms);
                self.notify(Notification::DurationChanged(duration_ms));
            }
            EngineEvent::PositionChanged {
                position_ms,
                generation,
            } => self.on_position(position_ms, generation, now),
            EngineEvent::Error { message, debug: details } => {
                tracing::error!("Pipeline error: {} ({:?})", message, details);
                self.status(format!(
                    "Error: {} - {}",
                    message,
                    details.as_deref().unwrap_or("No debug info")
                ));
                self.begin_recovery(StallTrigger::PipelineError(message), now);
            }
            EngineEvent::Warning { message, debug: details } => {
                tracing::warn!("Pipeline warning: {} ({:?})", message, details);
                self.status(format!(
                    "Warning: {} - {}",
                    message,
                    details.as_deref().unwrap_or("No debug info")
                ));
            }
            EngineEvent::EndOfStream => {
                tracing::info!("End of media");
                self.force_stop();
                self.position.set_current(0);
                self.notify(Notification::PositionChanged(0));
                self.set_state(TransportState::Stopped);
                self.status("End of media");
                self.notify(Notification::EndOfMedia);
            }
        }
    }

    fn on_position(&mut self, position_ms: u64, generation: u64, now: Instant) {
        let before = self.affordances();
        self.position.set_current(position_ms);
        self.notify(Notification::PositionChanged(self.position.current_ms()));
        if self.affordances() != before {
            self.set_state(self.state);
        }

        match self.reconciler.verify(position_ms, generation, now) {
            SeekVerdict::Landed {
                target_ms, latency, ..
            } => {
                tracing::debug!("Seek to {}ms landed after {:?}", target_ms, latency);
                self.recovery.settle();
            }
            SeekVerdict::Mismatch {
                target_ms,
                reported_ms,
            } => {
                tracing::warn!(
                    "{} (target {}ms, reported {}ms)",
                    BUFFERING_ERROR,
                    target_ms,
                    reported_ms
                );
                self.status(BUFFERING_ERROR);
                self.begin_recovery(
                    StallTrigger::SeekMismatch {
                        target_ms,
                        reported_ms,
                    },
                    now,
                );
            }
            SeekVerdict::Idle | SeekVerdict::Pending => {
                self.recovery.observe(position_ms);
            }
        }
    }

    // ========================================================================
    // Recovery
    // ========================================================================

    fn begin_recovery(&mut self, trigger: StallTrigger, now: Instant) {
        self.reconciler.clear();
        match self.recovery.trigger(trigger.clone(), now) {
            TriggerOutcome::Reset => {
                tracing::info!(
                    "Resetting pipeline (attempt {}): {}",
                    self.recovery.attempts(),
                    trigger
                );
                if let Err(e) = self.engine.reset() {
                    tracing::warn!("Pipeline reset failed: {}", e);
                }
                self.recovery.arm(now);
            }
            TriggerOutcome::Debounced => {
                tracing::debug!("Recovery already pending, resume pushed back");
            }
            TriggerOutcome::Exhausted => {
                tracing::error!("Giving up after {} recoveries: {}", self.recovery.attempts(), trigger);
                self.force_stop();
                self.set_state(TransportState::Error);
                self.status(format!("Playback failed: {trigger}"));
            }
        }
    }

    /// Reload the current entry and play it.
    fn resume(&mut self) {
        let Some(media) = self.playlist.current().cloned() else {
            return;
        };
        tracing::info!("Resuming {}", media);
        match self.engine.load(&media).and_then(|_| self.engine.play()) {
            Ok(()) => {
                self.position.reset();
                self.recovery.resumed(0);
                self.notify(Notification::PositionChanged(0));
                self.set_state(TransportState::Playing);
            }
            Err(e) => {
                tracing::error!("Resume failed: {}", e);
                self.force_stop();
                self.set_state(TransportState::Error);
                self.status(format!("Playback failed: {e}"));
            }
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Tear down the engine and drop any seek or recovery in flight.
    fn force_stop(&mut self) {
        self.recovery.cancel();
        self.reconciler.clear();
        self.engine.stop();
    }

    fn load_and_play(&mut self, media: &MediaReference) -> EngineResult<()> {
        self.engine.load(media)?;
        self.position.reset();
        self.notify(Notification::PositionChanged(0));
        self.engine.play()?;
        self.set_state(TransportState::Playing);
        Ok(())
    }

    fn switch_to(&mut self, media: MediaReference) -> EngineResult<()> {
        self.load_and_play(&media)
            .map_err(|e| self.fail_load(&media, e))?;
        self.notify(Notification::MediaChanged(media));
        Ok(())
    }

    fn fail_load(&mut self, media: &MediaReference, error: EngineError) -> EngineError {
        tracing::error!("Failed to open {}: {}", media, error);
        self.engine.stop();
        self.position.reset();
        self.set_state(TransportState::Stopped);
        self.status(format!("Failed to open {}: {}", media.display_name(), error));
        error
    }

    fn set_state(&mut self, state: TransportState) {
        if self.state != state {
            tracing::info!("Transport {} -> {}", self.state, state);
        }
        self.state = state;
        self.notify(Notification::TransportStateChanged {
            state,
            affordances: self.affordances(),
        });
    }

    fn status(&self, text: impl Into<String>) {
        self.notify(Notification::StatusMessage(text.into()));
    }

    fn notify(&self, notification: Notification) {
        // Receiver dropped means the UI is gone; nothing left to tell.
        let _ = self.notify_tx.send(notification);
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        self.engine.stop();
    }
}
