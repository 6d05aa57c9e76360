//! # Pot-O Video Player
//!
//! Desktop front-end for the poto-core playback engine, plus a headless
//! mode that plays one item to the end and logs what happens.

use anyhow::Result;
use crossbeam_channel::Receiver;
use eframe::egui;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use poto_core::config::EngineConfig;
use poto_core::controller::{
    Notification, PlaybackController, TransportAffordances, TransportState,
};
use poto_core::engine::{available_engines, EngineKind};
use poto_core::media::{default_mime_type, MediaReference, SUPPORTED_MIME_TYPES};
use poto_core::position::format_hms;
use poto_core::reconcile::{ms_to_normalized, SLIDER_MAX};
use poto_core::recovery::RecoveryPhase;

const APP_NAME: &str = "Pot-O Video Player";
const STATUS_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Command line
// ============================================================================

#[derive(Debug, Clone, Default)]
struct AppOptions {
    engine: Option<EngineKind>,
    config_path: Option<PathBuf>,
    headless_input: Option<String>,
    timeout: Option<Duration>,
}

impl AppOptions {
    fn from_args(args: &[String]) -> Result<Self> {
        let mut options = Self::default();
        let mut i = 1;
        while i < args.len() {
            let value = |i: usize| {
                args.get(i + 1)
                    .ok_or_else(|| anyhow::anyhow!("Missing value for {}", args[i]))
            };
            match args[i].as_str() {
                "--headless" | "headless" => {
                    options.headless_input = Some(value(i)?.clone());
                    i += 2;
                }
                "--engine" | "-e" => {
                    let name = value(i)?;
                    options.engine = Some(
                        EngineKind::from_name(name)
                            .ok_or_else(|| anyhow::anyhow!("Unknown engine {}", name))?,
                    );
                    i += 2;
                }
                "--config" | "-c" => {
                    options.config_path = Some(PathBuf::from(value(i)?));
                    i += 2;
                }
                "--timeout" | "-t" => {
                    let secs = value(i)?;
                    let secs = secs
                        .parse::<u64>()
                        .map_err(|e| anyhow::anyhow!("Invalid timeout {}: {}", secs, e))?;
                    options.timeout = Some(Duration::from_secs(secs));
                    i += 2;
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => {
                    i += 1;
                }
            }
        }
        Ok(options)
    }

    fn load_config(&self) -> EngineConfig {
        let loaded = match &self.config_path {
            Some(path) => EngineConfig::load_from(path),
            None => EngineConfig::load(),
        };
        let mut config = loaded.unwrap_or_else(|e| {
            tracing::warn!("{}; using defaults", e);
            EngineConfig::default()
        });
        if let Some(engine) = self.engine {
            config.engine = engine;
        }
        config
    }
}

fn print_usage() {
    eprintln!(
        "\nUsage:\n  poto [--engine auto|buffered|gstreamer] [--config <file>]\n  poto --headless <file|synthetic:<ms>> [--engine <kind>] [--timeout <secs>]\n"
    );
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let options = AppOptions::from_args(&args)?;

    if let Some(input) = options.headless_input.clone() {
        tracing_subscriber::fmt()
            .with_env_filter("poto=info")
            .init();
        return run_headless(&options, &input);
    }

    tracing_subscriber::fmt()
        .with_env_filter("poto=debug,wgpu=warn,eframe=warn")
        .init();

    tracing::info!("{} v{}", APP_NAME, poto_core::VERSION);
    tracing::info!("Available engines: {:?}", available_engines());

    let config = options.load_config();
    let (controller, notifications) = PlaybackController::from_config(config)
        .map_err(|e| anyhow::anyhow!("Failed to start engine: {}", e))?;

    let native = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title(APP_NAME)
            .with_inner_size([960.0, 600.0])
            .with_min_inner_size([480.0, 320.0])
            .with_drag_and_drop(true),
        ..Default::default()
    };

    eframe::run_native(
        APP_NAME,
        native,
        Box::new(|_cc| Ok(Box::new(PotoApp::new(controller, notifications)))),
    )
    .map_err(|e| anyhow::anyhow!("eframe error: {}", e))?;

    Ok(())
}

// ============================================================================
// Headless
// ============================================================================

fn run_headless(options: &AppOptions, input: &str) -> Result<()> {
    let config = options.load_config();
    let (mut controller, notifications) = PlaybackController::from_config(config)?;
    let started = Instant::now();
    let deadline = options.timeout.map(|t| started + t);

    tracing::info!(
        "Headless playback starting: input={}, engine={}",
        input,
        controller.engine().name()
    );
    controller.open(input)?;

    let outcome = loop {
        let now = Instant::now();
        controller.pump(now);

        let mut finished = None;
        for notification in notifications.try_iter() {
            match notification {
                Notification::TransportStateChanged { state, .. } => {
                    tracing::info!("Transport: {}", state);
                    if state == TransportState::Error {
                        finished = Some(Err(anyhow::anyhow!("Playback failed")));
                    }
                }
                Notification::DurationChanged(ms) if ms > 0 => {
                    tracing::info!("Duration: {}", format_hms(ms));
                }
                Notification::StatusMessage(text) => tracing::info!("Status: {}", text),
                Notification::MediaChanged(media) => {
                    tracing::info!("Now playing {}", media.display_name())
                }
                Notification::EndOfMedia => finished = Some(Ok(())),
                Notification::PositionChanged(_) | Notification::DurationChanged(_) => {}
            }
        }
        if let Some(outcome) = finished {
            break outcome;
        }

        if deadline.is_some_and(|d| now >= d) {
            break Err(anyhow::anyhow!(
                "Timed out after {:?} at {}",
                started.elapsed(),
                format_hms(controller.position().current_ms())
            ));
        }
        std::thread::sleep(Duration::from_millis(20));
    };

    controller.shutdown();
    tracing::info!("Headless playback finished in {:?}", started.elapsed());
    outcome
}

// ============================================================================
// Application State
// ============================================================================

struct PotoApp {
    controller: PlaybackController,
    notifications: Receiver<Notification>,

    state: TransportState,
    affordances: TransportAffordances,
    position_ms: u64,
    duration_ms: u64,

    /// Slider value while the user drags it
    seek_drag: Option<u32>,
    volume: u32,
    muted: bool,
    is_fullscreen: bool,
    status: Option<(String, Instant)>,
}

impl PotoApp {
    fn new(controller: PlaybackController, notifications: Receiver<Notification>) -> Self {
        let volume = controller.volume();
        let muted = controller.is_muted();
        Self {
            affordances: controller.affordances(),
            controller,
            notifications,
            state: TransportState::Stopped,
            position_ms: 0,
            duration_ms: 0,
            seek_drag: None,
            volume,
            muted,
            is_fullscreen: false,
            status: None,
        }
    }

    fn drain_notifications(&mut self, ctx: &egui::Context) {
        for notification in self.notifications.try_iter().collect::<Vec<_>>() {
            match notification {
                Notification::TransportStateChanged { state, affordances } => {
                    self.state = state;
                    self.affordances = affordances;
                    if state == TransportState::Stopped {
                        self.position_ms = 0;
                    }
                }
                Notification::PositionChanged(ms) => self.position_ms = ms,
                Notification::DurationChanged(ms) => self.duration_ms = ms,
                Notification::StatusMessage(text) => self.show_status(text),
                Notification::MediaChanged(media) => {
                    ctx.send_viewport_cmd(egui::ViewportCommand::Title(format!(
                        "{} - {}",
                        media.display_name(),
                        APP_NAME
                    )));
                }
                Notification::EndOfMedia => {
                    self.position_ms = 0;
                }
            }
        }
    }

    fn show_status(&mut self, text: String) {
        self.status = Some((text, Instant::now()));
    }

    fn report(&mut self, result: poto_core::EngineResult<()>) {
        if let Err(e) = result {
            self.show_status(e.to_string());
        }
    }

    fn open_dialog(&mut self) {
        let mut dialog = rfd::FileDialog::new();
        if let Some(dir) = dirs::video_dir() {
            dialog = dialog.set_directory(dir);
        }

        let default = default_mime_type();
        let ordered = SUPPORTED_MIME_TYPES
            .iter()
            .filter(|(mime, _)| *mime == default)
            .chain(SUPPORTED_MIME_TYPES.iter().filter(|(mime, _)| *mime != default));
        for (mime, extensions) in ordered {
            dialog = dialog.add_filter(*mime, *extensions);
        }

        if let Some(path) = dialog.pick_file() {
            self.open(MediaReference::from_path(&path));
        }
    }

    fn open(&mut self, media: MediaReference) {
        // The controller posts its own status on failure
        if let Err(e) = self.controller.open(media) {
            tracing::debug!("Open failed: {}", e);
        }
    }

    fn toggle_fullscreen(&mut self, ctx: &egui::Context) {
        self.is_fullscreen = !self.is_fullscreen;
        ctx.send_viewport_cmd(egui::ViewportCommand::Fullscreen(self.is_fullscreen));
    }

    fn transport_button(&mut self, ui: &mut egui::Ui, enabled: bool, label: &str) -> bool {
        ui.add_enabled(enabled, egui::Button::new(label)).clicked()
    }
}

// ============================================================================
// UI Rendering
// ============================================================================

impl eframe::App for PotoApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.controller.pump(Instant::now());
        self.drain_notifications(ctx);

        if self
            .status
            .as_ref()
            .is_some_and(|(_, at)| at.elapsed() >= STATUS_TIMEOUT)
        {
            self.status = None;
        }

        egui::TopBottomPanel::top("menu").show(ctx, |ui| {
            egui::menu::bar(ui, |ui| {
                ui.menu_button("File", |ui| {
                    if ui.button("Open...").clicked() {
                        ui.close_menu();
                        self.open_dialog();
                    }
                    ui.separator();
                    if ui.button("Exit").clicked() {
                        ctx.send_viewport_cmd(egui::ViewportCommand::Close);
                    }
                });

                ui.menu_button("Play", |ui| {
                    let a = self.affordances;
                    if ui.add_enabled(a.play, egui::Button::new("Play")).clicked() {
                        let result = self.controller.play();
                        self.report(result);
                        ui.close_menu();
                    }
                    if ui.add_enabled(a.pause, egui::Button::new("Pause")).clicked() {
                        let result = self.controller.pause();
                        self.report(result);
                        ui.close_menu();
                    }
                    if ui.add_enabled(a.stop, egui::Button::new("Stop")).clicked() {
                        self.controller.stop();
                        ui.close_menu();
                    }
                    ui.separator();
                    if ui.add_enabled(a.previous, egui::Button::new("Previous")).clicked() {
                        let result = self.controller.previous();
                        self.report(result);
                        ui.close_menu();
                    }
                    if ui.add_enabled(a.next, egui::Button::new("Next")).clicked() {
                        let result = self.controller.next();
                        self.report(result);
                        ui.close_menu();
                    }
                    ui.separator();
                    if ui.checkbox(&mut self.muted, "Mute").changed() {
                        self.controller.set_muted(self.muted);
                    }
                    if ui.button("Fullscreen (F11)").clicked() {
                        self.toggle_fullscreen(ctx);
                        ui.close_menu();
                    }
                });
            });
        });

        egui::TopBottomPanel::bottom("controls")
            .min_height(64.0)
            .show(ctx, |ui| {
                ui.horizontal(|ui| {
                    let mut value = self
                        .seek_drag
                        .unwrap_or_else(|| ms_to_normalized(self.position_ms, self.duration_ms));
                    ui.label(format_hms(self.position_ms));
                    ui.spacing_mut().slider_width = (ui.available_width() - 80.0).max(100.0);
                    let response = ui.add_enabled(
                        self.duration_ms > 0,
                        egui::Slider::new(&mut value, 0..=SLIDER_MAX).show_value(false),
                    );
                    if response.dragged() {
                        self.seek_drag = Some(value);
                    }
                    if response.drag_stopped() || (response.clicked() && self.seek_drag.is_none()) {
                        self.seek_drag = None;
                        let result = self.controller.set_position(value);
                        self.report(result);
                    }
                    ui.label(format_hms(self.duration_ms));
                });

                ui.horizontal(|ui| {
                    let a = self.affordances;
                    if ui.button("Open").clicked() {
                        self.open_dialog();
                    }
                    if self.transport_button(ui, a.play, "Play") {
                        let result = self.controller.play();
                        self.report(result);
                    }
                    if self.transport_button(ui, a.previous, "Previous") {
                        let result = self.controller.previous();
                        self.report(result);
                    }
                    if self.transport_button(ui, a.pause, "Pause") {
                        let result = self.controller.pause();
                        self.report(result);
                    }
                    if self.transport_button(ui, a.next, "Next") {
                        let result = self.controller.next();
                        self.report(result);
                    }
                    if self.transport_button(ui, a.stop, "Stop") {
                        self.controller.stop();
                    }

                    ui.separator();
                    if ui.toggle_value(&mut self.muted, "Mute").changed() {
                        self.controller.set_muted(self.muted);
                    }
                    if ui
                        .add(egui::Slider::new(&mut self.volume, 0..=100).suffix("%"))
                        .changed()
                    {
                        self.controller.set_volume(self.volume);
                    }
                });

                if let Some((text, _)) = &self.status {
                    ui.label(text.as_str());
                }
            });

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.centered_and_justified(|ui| {
                let label = match self.controller.playlist().current() {
                    Some(media) if self.controller.recovery_phase() != RecoveryPhase::Normal => {
                        format!("{} (recovering)", media.display_name())
                    }
                    Some(media) => format!("{} ({})", media.display_name(), self.state),
                    None => "Open a video to start".to_string(),
                };
                ui.heading(label);
            });
        });

        // Drag & drop appends to the playlist like File > Open
        let dropped: Vec<PathBuf> = ctx.input(|i| {
            i.raw
                .dropped_files
                .iter()
                .filter_map(|f| f.path.clone())
                .collect()
        });
        for path in dropped {
            self.open(MediaReference::from_path(&path));
        }

        let (fullscreen_key, space, escape, close) = ctx.input(|i| {
            (
                i.key_pressed(egui::Key::F11),
                i.key_pressed(egui::Key::Space),
                i.key_pressed(egui::Key::Escape),
                i.viewport().close_requested(),
            )
        });
        if fullscreen_key || (escape && self.is_fullscreen) {
            self.toggle_fullscreen(ctx);
        }
        if space {
            let result = if self.state == TransportState::Playing {
                self.controller.pause()
            } else {
                self.controller.play()
            };
            self.report(result);
        }
        if close {
            self.controller.shutdown();
        }

        ctx.request_repaint_after(Duration::from_millis(50));
    }
}
