use std::f32::consts::TAU;
use std::sync::mpsc::Receiver;
use std::time::Instant;

use eframe::{App, CreationContext};
use egui::{
    Align2, CentralPanel, Color32, ComboBox, Context, FontId, Key, Painter, Pos2, Rect, Sense, Shape,
    SidePanel, Slider, Stroke, TopBottomPanel, Vec2,
};
use egui_plot::{Line, Plot, PlotBounds, PlotPoints};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::audio::Effect;
use crate::collab::LoopbackChannel;
use crate::environment::{Rgb, ShapeType, SoundEnvironment};
use crate::interaction::RawInput;
use crate::midi::MidiUpdate;
use crate::recorder::{PendingRecording, SessionMode};
use crate::reflection::ReflectionState;
use crate::session::CanvasSession;
use crate::visual::{Particle, VisualElement};

const SPECTRUM_BARS: usize = 64;
const ICON_RADIUS: f32 = 18.0;
const GLOW: Color32 = Color32::from_rgba_premultiplied(51, 46, 48, 51);

fn color(rgb: Rgb, alpha: f32) -> Color32 {
    Color32::from_rgba_unmultiplied(rgb.r, rgb.g, rgb.b, (alpha.clamp(0.0, 1.0) * 255.0) as u8)
}

/// Letter keys that play notes in accessibility mode.
fn key_char(key: Key) -> Option<char> {
    Some(match key {
        Key::A => 'a',
        Key::W => 'w',
        Key::S => 's',
        Key::E => 'e',
        Key::D => 'd',
        Key::F => 'f',
        Key::T => 't',
        Key::G => 'g',
        Key::Y => 'y',
        Key::H => 'h',
        Key::U => 'u',
        Key::J => 'j',
        _ => return None,
    })
}

/// Controls mirrored from the session so widgets can edit them in place.
struct Controls {
    volume: u8,
    reverb: bool,
    delay: bool,
    complexity: f32,
    accessibility: bool,
    primary: [u8; 3],
    secondary: [u8; 3],
    custom_colors: bool,
    show_spectrum: bool,
    collaborate: bool,
}

pub struct HeartbeatApp {
    session: CanvasSession,
    midi: Option<Receiver<MidiUpdate>>,
    midi_connected: bool,
    started: Instant,
    controls: Controls,
    pending: Option<PendingRecording>,
    recording_name: String,
    status: Option<String>,
}

impl HeartbeatApp {
    pub fn new(session: CanvasSession, midi: Option<Receiver<MidiUpdate>>, show_spectrum: bool) -> Self {
        let settings = session.audio().settings();
        let style = &session.environment().visual;
        let (primary, secondary) = session.visual().custom_colors();
        let controls = Controls {
            volume: settings.volume,
            reverb: settings.reverb_enabled,
            delay: settings.delay_enabled,
            complexity: session.visual().complexity(),
            accessibility: session.router().accessibility(),
            primary: rgb_array(primary.unwrap_or(style.primary)),
            secondary: rgb_array(secondary.unwrap_or(style.secondary)),
            custom_colors: primary.is_some() || secondary.is_some(),
            show_spectrum,
            collaborate: false,
        };
        Self {
            session,
            midi,
            midi_connected: false,
            started: Instant::now(),
            controls,
            pending: None,
            recording_name: String::new(),
            status: None,
        }
    }

    fn now(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn drain_midi(&mut self, now: u64) {
        let Some(rx) = &self.midi else {
            return;
        };
        let updates: Vec<MidiUpdate> = rx.try_iter().collect();
        for update in updates {
            match update {
                MidiUpdate::Connected(connected) => {
                    if connected != self.midi_connected {
                        info!("MIDI {}", if connected { "connected" } else { "disconnected" });
                    }
                    self.midi_connected = connected;
                    self.session.set_midi_connected(connected);
                }
                MidiUpdate::Message(bytes) => {
                    self.session.submit(RawInput::Midi(bytes), now);
                }
            }
        }
    }

    fn handle_keys(&mut self, ctx: &Context, now: u64) {
        if ctx.wants_keyboard_input() {
            return;
        }
        let events = ctx.input(|i| i.events.clone());
        for event in events {
            if let egui::Event::Key { key, pressed, repeat: false, .. } = event {
                let Some(c) = key_char(key) else {
                    continue;
                };
                let raw = if pressed { RawInput::KeyDown(c) } else { RawInput::KeyUp(c) };
                self.session.submit(raw, now);
            }
        }
    }

    fn report<T>(&mut self, result: crate::error::Result<T>) -> Option<T> {
        match result {
            Ok(value) => {
                self.status = None;
                Some(value)
            }
            Err(e) => {
                warn!("{}", e);
                self.status = Some(e.to_string());
                None
            }
        }
    }

    fn controls_panel(&mut self, ui: &mut egui::Ui) {
        ui.horizontal_wrapped(|ui| {
            let current = self.session.environment();
            let mut selected = current.id;
            ComboBox::from_label("Environment")
                .selected_text(current.name)
                .show_ui(ui, |ui| {
                    for env in SoundEnvironment::presets() {
                        ui.selectable_value(&mut selected, env.id, env.name)
                            .on_hover_text(env.description);
                    }
                });
            if selected != current.id {
                let result = self.session.set_environment(selected);
                self.report(result);
            }

            let mode = if self.session.visual().canvas_mode() { "Canvas Mode" } else { "Flow Mode" };
            if ui.button(mode).clicked() {
                self.session.toggle_canvas_mode();
            }
            if self.session.visual().canvas_mode() && ui.button("Clear").clicked() {
                self.session.clear_canvas();
            }

            ui.separator();
            if ui
                .add(Slider::new(&mut self.controls.volume, 0..=100).text("Volume"))
                .changed()
            {
                self.session.set_volume(self.controls.volume);
            }
            if ui.checkbox(&mut self.controls.reverb, "Reverb").changed() {
                self.session.set_effect_enabled(Effect::Reverb, self.controls.reverb);
            }
            if ui.checkbox(&mut self.controls.delay, "Delay").changed() {
                self.session.set_effect_enabled(Effect::Delay, self.controls.delay);
            }
            if ui
                .add(Slider::new(&mut self.controls.complexity, 0.0..=1.0).text("Complexity"))
                .changed()
            {
                self.session.set_complexity(self.controls.complexity);
            }

            ui.separator();
            let mut colors_changed = ui.checkbox(&mut self.controls.custom_colors, "Custom colors").changed();
            if self.controls.custom_colors {
                colors_changed |= ui.color_edit_button_srgb(&mut self.controls.primary).changed();
                colors_changed |= ui.color_edit_button_srgb(&mut self.controls.secondary).changed();
            }
            if colors_changed {
                let (primary, secondary) = if self.controls.custom_colors {
                    (Some(array_rgb(self.controls.primary)), Some(array_rgb(self.controls.secondary)))
                } else {
                    (None, None)
                };
                self.session.set_custom_colors(primary, secondary);
            }

            if ui
                .checkbox(&mut self.controls.accessibility, "Keyboard notes")
                .on_hover_text("A W S E D F T G Y H U J play C through B")
                .changed()
            {
                self.session.set_accessibility(self.controls.accessibility);
            }
            ui.checkbox(&mut self.controls.show_spectrum, "Spectrum");
            if ui.checkbox(&mut self.controls.collaborate, "Collaborate").changed() {
                if self.controls.collaborate {
                    self.session.enable_collaboration(Box::new(LoopbackChannel::new()));
                } else {
                    self.session.disable_collaboration();
                }
            }

            let (label, tint) = if self.midi_connected {
                ("MIDI Connected", Color32::from_rgb(22, 163, 74))
            } else {
                ("MIDI Not Connected", Color32::GRAY)
            };
            ui.colored_label(tint, label);
            if !self.session.audio().is_available() {
                ui.colored_label(Color32::from_rgb(220, 38, 38), "Audio unavailable");
            }
        });
        if let Some(status) = &self.status {
            ui.colored_label(Color32::from_rgb(220, 38, 38), status);
        }
    }

    fn recordings_panel(&mut self, ui: &mut egui::Ui, now: u64) {
        ui.heading("Recordings");
        match self.session.mode() {
            SessionMode::Idle if self.pending.is_none() => {
                if ui.button("Record").clicked() {
                    let result = self.session.start_recording(now);
                    self.report(result);
                }
            }
            SessionMode::Recording => {
                if ui.button("Stop").clicked() {
                    let result = self.session.stop_recording(now);
                    self.pending = self.report(result);
                }
            }
            SessionMode::Playing => {
                if ui.button("Stop playback").clicked() {
                    self.session.stop_playback();
                }
            }
            SessionMode::Idle => {}
        }

        if self.pending.is_some() {
            ui.label("Name this recording:");
            ui.text_edit_singleline(&mut self.recording_name);
            ui.horizontal(|ui| {
                if ui.button("Save").clicked() {
                    if let Some(pending) = self.pending.take() {
                        self.session.save_recording(pending, &self.recording_name);
                        self.recording_name.clear();
                    }
                }
                if ui.button("Discard").clicked() {
                    self.pending = None;
                    self.recording_name.clear();
                }
            });
        }

        ui.separator();
        let mut play: Option<Uuid> = None;
        let mut export: Option<Uuid> = None;
        let mut delete: Option<Uuid> = None;
        egui::ScrollArea::vertical().show(ui, |ui| {
            for recording in self.session.recordings() {
                ui.group(|ui| {
                    ui.label(&recording.name);
                    ui.small(format!(
                        "{:.1}s, {} notes, {}",
                        recording.duration_ms as f32 / 1000.0,
                        recording.event_count(),
                        recording.created_at.format("%H:%M")
                    ));
                    ui.horizontal(|ui| {
                        if ui.small_button("Play").clicked() {
                            play = Some(recording.id);
                        }
                        if ui.small_button("Export").clicked() {
                            export = Some(recording.id);
                        }
                        if ui.small_button("Delete").clicked() {
                            delete = Some(recording.id);
                        }
                    });
                });
            }
        });

        if let Some(id) = play {
            let result = self.session.play_recording(id, now);
            self.report(result);
        }
        if let Some(id) = export {
            let result = self.session.export_recording(id);
            if let Some(path) = self.report(result) {
                self.status = Some(format!("Exported to {}", path.display()));
            }
        }
        if let Some(id) = delete {
            let result = self.session.delete_recording(id);
            self.report(result);
        }

        if self.session.collaborating() {
            ui.separator();
            ui.label(format!("Collaborating ({} peers)", self.session.peers().len()));
        }
    }

    fn canvas(&mut self, ui: &mut egui::Ui, now: u64) {
        let (response, painter) = ui.allocate_painter(ui.available_size(), Sense::click());
        let rect = response.rect;
        self.session.set_canvas_size(rect.width(), rect.height());

        if response.clicked() {
            if let Some(pos) = response.interact_pointer_pos() {
                let on_icon = *self.session.reflection() == ReflectionState::PromptShown
                    && pos.distance(reflection_icon(rect)) <= ICON_RADIUS;
                if on_icon {
                    self.session.activate_reflection();
                } else {
                    let local = pos - rect.min;
                    self.session.submit(RawInput::Pointer { x: local.x, y: local.y }, now);
                }
            }
        }

        let style = &self.session.environment().visual;
        painter.rect_filled(rect, 0.0, color(style.background, 1.0));

        for particle in self.session.visual().particles() {
            draw_particle(&painter, rect.min, particle);
        }
        for element in self.session.visual().elements() {
            draw_element(&painter, rect.min, element, now);
        }
        if self.session.visual().glow() {
            painter.rect_filled(rect, 0.0, GLOW);
        }
        if self.controls.show_spectrum {
            let bars = self.session.audio().frequency_data(SPECTRUM_BARS);
            draw_spectrum(&painter, rect, &bars, style.primary);
        }

        self.reflection_overlay(ui.ctx(), &painter, rect);
    }

    fn reflection_overlay(&mut self, ctx: &Context, painter: &Painter, rect: Rect) {
        let icon = reflection_icon(rect);
        match self.session.reflection().clone() {
            ReflectionState::Idle => {}
            ReflectionState::PromptShown => {
                painter.circle_filled(icon, ICON_RADIUS, Color32::from_rgb(255, 228, 240));
                painter.text(
                    icon,
                    Align2::CENTER_CENTER,
                    "✨",
                    FontId::proportional(20.0),
                    Color32::from_rgb(236, 72, 153),
                );
            }
            ReflectionState::Pending => {
                painter.text(
                    icon,
                    Align2::RIGHT_CENTER,
                    "Thinking...",
                    FontId::proportional(14.0),
                    Color32::GRAY,
                );
            }
            ReflectionState::Showing(text) => {
                egui::Window::new("Reflection")
                    .collapsible(false)
                    .resizable(false)
                    .anchor(Align2::CENTER_TOP, [0.0, 48.0])
                    .show(ctx, |ui| {
                        ui.label(text);
                        if ui.button("Close").clicked() {
                            self.session.dismiss_reflection();
                        }
                    });
            }
        }
    }
}

fn reflection_icon(rect: Rect) -> Pos2 {
    rect.right_top() + Vec2::new(-28.0, 28.0)
}

fn rgb_array(rgb: Rgb) -> [u8; 3] {
    [rgb.r, rgb.g, rgb.b]
}

fn array_rgb([r, g, b]: [u8; 3]) -> Rgb {
    Rgb::new(r, g, b)
}

fn draw_particle(painter: &Painter, origin: Pos2, p: &Particle) {
    painter.circle_filled(origin + Vec2::new(p.x, p.y), p.size, color(p.color, p.alpha));
}

fn draw_element(painter: &Painter, origin: Pos2, element: &VisualElement, now: u64) {
    let center = origin + Vec2::new(element.x, element.y);
    let size = element.radius(now);
    let tint = color(element.color, element.alpha);
    let elapsed = element.elapsed(now) as f32;

    match element.shape {
        ShapeType::Ripple => {
            let stroke = Stroke::new(2.0, tint);
            painter.circle_stroke(center, size, stroke);
            painter.circle_stroke(center, size * 0.7, stroke);
        }
        ShapeType::Burst => {
            for i in 0..8 {
                let angle = TAU / 8.0 * i as f32;
                let dot = center + Vec2::angled(angle) * size;
                painter.circle_filled(dot, size / 5.0, tint);
            }
        }
        ShapeType::Wave => {
            let points: Vec<Pos2> = (0..63)
                .map(|i| {
                    let t = i as f32 * 0.1;
                    let wobble = 1.0 + 0.2 * (t * 3.0 + elapsed / 200.0).sin();
                    center + Vec2::new(t.cos() * size, t.sin() * size * wobble)
                })
                .collect();
            painter.add(Shape::closed_line(points, Stroke::new(3.0, tint)));
        }
        ShapeType::Spiral => {
            let turns = 3.0;
            let steps = 90;
            let points: Vec<Pos2> = (0..=steps)
                .map(|i| {
                    let t = i as f32 / steps as f32;
                    let angle = t * turns * TAU + elapsed / 400.0;
                    center + Vec2::angled(angle) * (size * t)
                })
                .collect();
            painter.add(Shape::line(points, Stroke::new(2.0, tint)));
        }
    }
}

fn draw_spectrum(painter: &Painter, rect: Rect, bars: &[f32], tint: Rgb) {
    if bars.is_empty() {
        return;
    }
    let width = rect.width() / bars.len() as f32;
    let max_height = rect.height() * 0.2;
    for (i, &level) in bars.iter().enumerate() {
        if level <= 0.0 {
            continue;
        }
        let left = rect.left() + i as f32 * width;
        let bar = Rect::from_min_max(
            Pos2::new(left, rect.bottom() - level * max_height),
            Pos2::new(left + width - 1.0, rect.bottom()),
        );
        painter.rect_filled(bar, 0.0, color(tint, 0.35));
    }
}

fn scope(ui: &mut egui::Ui, samples: &[f32]) {
    let points: Vec<[f64; 2]> = samples
        .iter()
        .enumerate()
        .map(|(i, &v)| [i as f64, v as f64])
        .collect();
    let len = points.len().max(1) as f64;
    Plot::new("scope")
        .height(80.0)
        .show_axes([false, false])
        .allow_drag(false)
        .allow_zoom(false)
        .allow_scroll(false)
        .show(ui, |plot_ui| {
            plot_ui.set_plot_bounds(PlotBounds::from_min_max([0.0, -1.1], [len, 1.1]));
            plot_ui.line(Line::new(PlotPoints::from(points)));
        });
}

impl App for HeartbeatApp {
    fn update(&mut self, ctx: &Context, _: &mut eframe::Frame) {
        let now = self.now();
        ctx.request_repaint();

        self.drain_midi(now);
        self.handle_keys(ctx, now);
        self.session.tick(now);

        TopBottomPanel::top("controls").show(ctx, |ui| {
            ui.heading("Piano Heartbeat");
            self.controls_panel(ui);
        });
        TopBottomPanel::bottom("scope").show(ctx, |ui| {
            let samples = self.session.audio().waveform();
            scope(ui, &samples);
            ui.small(format!(
                "{} | style: {} | voices: {}",
                self.session.environment().description,
                self.session.style(),
                self.session.audio().active_voices()
            ));
        });
        SidePanel::right("recordings")
            .default_width(200.0)
            .show(ctx, |ui| self.recordings_panel(ui, now));
        CentralPanel::default().show(ctx, |ui| self.canvas(ui, now));
    }
}

impl Drop for HeartbeatApp {
    fn drop(&mut self) {
        self.session.shutdown();
    }
}

/// Opens the canvas window and runs until it is closed.
pub fn run_ui(
    session: CanvasSession,
    midi: Option<Receiver<MidiUpdate>>,
    show_spectrum: bool,
) -> Result<(), eframe::Error> {
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1100.0, 760.0])
            .with_title("Piano Heartbeat"),
        ..Default::default()
    };
    let result = eframe::run_native(
        "Piano Heartbeat",
        options,
        Box::new(move |_cc: &CreationContext| Ok(Box::new(HeartbeatApp::new(session, midi, show_spectrum)))),
    );
    if let Err(e) = &result {
        error!("UI exited with error: {}", e);
    }
    result
}
