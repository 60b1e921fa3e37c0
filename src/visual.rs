//! Visual state: interaction shapes, ambient particles and the sustain glow.
//!
//! Only state lives here; `ui` turns it into paint calls every frame.

use rand::Rng;

use crate::environment::{Rgb, ShapeType, VisualStyle};
use crate::interaction::InteractionEvent;
use crate::notes::HarmonicClass;

/// Lowest opacity a persistent element fades to.
pub const PERSISTENT_FLOOR: f32 = 0.1;
const STAR_COLOR: Rgb = Rgb::hex(0xFFD700);
const STAR_BASE_PROBABILITY: f64 = 0.01;
const STAR_TRAIL: usize = 5;

/// A shape spawned by one interaction.
#[derive(Debug, Clone, PartialEq)]
pub struct VisualElement {
    pub x: f32,
    pub y: f32,
    pub size: f32,
    pub color: Rgb,
    pub shape: ShapeType,
    pub start: u64,
    /// Milliseconds.
    pub duration: u64,
    pub alpha: f32,
    pub persistent: bool,
}

impl VisualElement {
    pub fn elapsed(&self, now: u64) -> u64 {
        now.saturating_sub(self.start)
    }

    fn fade(&self, now: u64) -> f32 {
        1.0 - self.elapsed(now) as f32 / self.duration.max(1) as f32
    }

    /// Recomputes alpha; returns `false` once a transient element has expired.
    pub fn update(&mut self, now: u64) -> bool {
        if self.persistent {
            self.alpha = self.fade(now).max(PERSISTENT_FLOOR);
            true
        } else {
            self.alpha = self.fade(now).max(0.0);
            self.elapsed(now) < self.duration
        }
    }

    /// Current drawing radius; every shape keeps growing at its own pace.
    pub fn radius(&self, now: u64) -> f32 {
        let growth_ms = match self.shape {
            ShapeType::Ripple => 1000.0,
            ShapeType::Burst => 2000.0,
            ShapeType::Wave => 1500.0,
            ShapeType::Spiral => 1800.0,
        };
        self.size * (1.0 + self.elapsed(now) as f32 / growth_ms)
    }
}

/// Ambient shooting-star particle; lifetime counted in frames.
#[derive(Debug, Clone, PartialEq)]
pub struct Particle {
    pub x: f32,
    pub y: f32,
    pub size: f32,
    pub color: Rgb,
    pub vx: f32,
    pub vy: f32,
    pub alpha: f32,
    pub life: u32,
    pub max_life: u32,
}

/// Major notes lean to bursts and spirals, minor notes to waves and ripples,
/// always within the environment's allowed set.
pub fn pick_shape<R: Rng + ?Sized>(
    class: Option<HarmonicClass>,
    allowed: &[ShapeType],
    rng: &mut R,
) -> ShapeType {
    if allowed.is_empty() {
        return ShapeType::Ripple;
    }
    let preferred: &[ShapeType] = match class {
        Some(HarmonicClass::Major) => &[ShapeType::Burst, ShapeType::Spiral],
        Some(HarmonicClass::Minor) => &[ShapeType::Wave, ShapeType::Ripple],
        None => &[],
    };
    let candidates: Vec<ShapeType> = allowed
        .iter()
        .copied()
        .filter(|s| preferred.contains(s))
        .collect();
    if !candidates.is_empty() && rng.gen_bool(0.5) {
        candidates[rng.gen_range(0..candidates.len())]
    } else {
        allowed[rng.gen_range(0..allowed.len())]
    }
}

/// Primary or secondary color with a brightness jitter of ±20%.
pub fn pick_color<R: Rng + ?Sized>(primary: Rgb, secondary: Rgb, rng: &mut R) -> Rgb {
    let base = if rng.gen_bool(0.5) { primary } else { secondary };
    base.scaled(rng.gen_range(0.8..=1.2))
}

#[derive(Debug)]
pub struct VisualEngine {
    elements: Vec<VisualElement>,
    particles: Vec<Particle>,
    canvas_mode: bool,
    glow: bool,
    complexity: f32,
    max_elements: usize,
    custom_primary: Option<Rgb>,
    custom_secondary: Option<Rgb>,
    width: f32,
}

impl VisualEngine {
    pub fn new(width: f32, complexity: f32, max_elements: usize, canvas_mode: bool) -> Self {
        Self {
            elements: Vec::new(),
            particles: Vec::new(),
            canvas_mode,
            glow: false,
            complexity: complexity.clamp(0.0, 1.0),
            max_elements: max_elements.max(1),
            custom_primary: None,
            custom_secondary: None,
            width: width.max(1.0),
        }
    }

    pub fn set_width(&mut self, width: f32) {
        self.width = width.max(1.0);
    }

    pub fn set_complexity(&mut self, complexity: f32) {
        self.complexity = complexity.clamp(0.0, 1.0);
    }

    pub fn complexity(&self) -> f32 {
        self.complexity
    }

    pub fn set_custom_colors(&mut self, primary: Option<Rgb>, secondary: Option<Rgb>) {
        self.custom_primary = primary;
        self.custom_secondary = secondary;
    }

    pub fn custom_colors(&self) -> (Option<Rgb>, Option<Rgb>) {
        (self.custom_primary, self.custom_secondary)
    }

    pub fn canvas_mode(&self) -> bool {
        self.canvas_mode
    }

    /// Flips between Flow and Canvas mode; affects only future spawns.
    pub fn toggle_canvas_mode(&mut self) -> bool {
        self.canvas_mode = !self.canvas_mode;
        self.canvas_mode
    }

    pub fn set_glow(&mut self, on: bool) {
        self.glow = on;
    }

    pub fn glow(&self) -> bool {
        self.glow
    }

    pub fn elements(&self) -> &[VisualElement] {
        &self.elements
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    fn scale(&self) -> f32 {
        0.5 + self.complexity
    }

    /// Spawns the element for `event` and returns the shape and color it was given.
    /// A shape or color already stamped on the event is reused.
    pub fn spawn<R: Rng + ?Sized>(
        &mut self,
        event: &InteractionEvent,
        style: &VisualStyle,
        rng: &mut R,
    ) -> (ShapeType, Rgb) {
        let shape = match event.shape {
            Some(shape) => shape,
            None => pick_shape(event.note.harmonic_class(), style.shapes, rng),
        };
        let color = match event.color {
            Some(color) => color,
            None => pick_color(
                self.custom_primary.unwrap_or(style.primary),
                self.custom_secondary.unwrap_or(style.secondary),
                rng,
            ),
        };
        let element = VisualElement {
            x: event.x,
            y: event.y,
            size: (20.0 + event.intensity * 30.0) * self.scale(),
            color,
            shape,
            start: event.timestamp,
            duration: ((2000.0 + event.intensity * 1000.0) * self.scale()).round() as u64,
            alpha: 1.0,
            persistent: self.canvas_mode,
        };
        self.push(element);
        (shape, color)
    }

    /// Adds an element, evicting the oldest transient (then the oldest
    /// persistent) one when at capacity.
    pub fn push(&mut self, element: VisualElement) {
        if self.elements.len() >= self.max_elements {
            let victim = self.elements.iter().position(|e| !e.persistent).unwrap_or(0);
            self.elements.remove(victim);
        }
        self.elements.push(element);
    }

    /// Empties persistent elements; transient ones keep fading.
    pub fn clear_persistent(&mut self) {
        self.elements.retain(|e| !e.persistent);
    }

    /// Advances one frame.
    pub fn tick<R: Rng + ?Sized>(&mut self, now: u64, rng: &mut R) {
        let probability = (STAR_BASE_PROBABILITY * self.scale() as f64).min(1.0);
        if rng.gen_bool(probability) {
            self.spawn_shooting_star(rng);
        }
        self.advance_particles();
        self.elements.retain_mut(|e| e.update(now));
    }

    fn advance_particles(&mut self) {
        self.particles.retain_mut(|p| {
            p.x += p.vx;
            p.y += p.vy;
            p.life = p.life.saturating_sub(1);
            p.alpha = p.life as f32 / p.max_life.max(1) as f32;
            p.life > 0
        });
    }

    fn spawn_shooting_star<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        use std::f32::consts::PI;

        let x = rng.gen_range(0.0..self.width);
        let size = rng.gen_range(1.0..3.0);
        let speed = rng.gen_range(2.0..5.0);
        let angle = PI / 4.0 + rng.gen_range(0.0..PI / 4.0);
        let (sin, cos) = angle.sin_cos();

        self.particles.push(Particle {
            x,
            y: 0.0,
            size,
            color: STAR_COLOR,
            vx: cos * speed,
            vy: sin * speed,
            alpha: 1.0,
            life: 100,
            max_life: 100,
        });
        for i in 0..STAR_TRAIL {
            let step = i as f32;
            let life = 70 - i as u32 * 10;
            self.particles.push(Particle {
                x: x - cos * step * 2.0,
                y: -sin * step * 2.0,
                size: size * (1.0 - step / 10.0),
                color: STAR_COLOR,
                vx: cos * speed * 0.8,
                vy: sin * speed * 0.8,
                alpha: 0.7 - step * 0.1,
                life,
                max_life: life,
            });
        }
    }
}
