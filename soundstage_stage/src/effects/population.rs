// Particle populations, one variant per effect category.
//
// Each variant carries only the particle fields its simulation needs. The
// scheduler drives them through three calls: `seed` once on activation,
// then `step` and `paint` once per frame. All kinematics are in pixels per
// frame; randomness comes from the scheduler's `EffectRng`.

use std::f32::consts::{FRAC_PI_4, PI, TAU};

use super::category::{EffectCategory, Flavor};
use super::rng::EffectRng;
use super::surface::{Paint, RenderSurface, Rgb, Shape, Viewport};

pub const RAIN_DROPS: usize = 200;
pub const WIND_GUSTS: usize = 50;
pub const FIRE_EMBERS: usize = 100;
pub const FOREST_LEAVES: usize = 80;
pub const WATER_RIPPLES: usize = 15;
pub const HOOF_PRINTS: usize = 60;
pub const DUST_MOTES: usize = 40;
pub const CROWD_MOTES: usize = 50;
pub const DOOR_MOTES: usize = 20;
pub const BELL_MOTES: usize = 25;
pub const BUTTERFLIES: usize = 36;
pub const LIGHTNING_FRAMES: u32 = 10;

/// Chance per flash frame that a bolt is drawn.
const STRIKE_CHANCE: f32 = 0.3;

#[derive(Clone, Debug)]
pub struct Ember {
    x: f32,
    y: f32,
    vx: f32,
    vy: f32,
    size: f32,
    opacity: f32,
    life: f32,
    max_life: f32,
}

impl Ember {
    fn spawn(vp: Viewport, rng: &mut EffectRng) -> Self {
        let mut ember = Self {
            x: 0.0,
            y: 0.0,
            vx: 0.0,
            vy: 0.0,
            size: 0.0,
            opacity: rng.range(0.8, 1.0),
            life: 0.0,
            max_life: rng.range(60.0, 100.0),
        };
        ember.respawn(vp, rng);
        ember
    }

    /// Back to the base of the fire with a fresh upward kick.
    fn respawn(&mut self, vp: Viewport, rng: &mut EffectRng) {
        self.x = vp.width * 0.2 + rng.next_f32() * vp.width * 0.6;
        self.y = vp.height;
        self.vx = rng.spread(2.0);
        self.vy = -2.0 - rng.next_f32() * 8.0;
        self.size = rng.range(3.0, 11.0);
        self.life = 0.0;
    }

    fn step(&mut self, vp: Viewport, rng: &mut EffectRng) {
        self.x += self.vx;
        self.y += self.vy;
        self.life += 1.0;
        self.opacity = 1.0 - self.life / self.max_life;
        self.size *= 1.02;
        if self.life >= self.max_life {
            self.respawn(vp, rng);
        }
    }

    fn paint(&self, surface: &mut dyn RenderSurface) {
        let ratio = (self.life / self.max_life).clamp(0.0, 1.0);
        let color = Rgb(255, (140.0 + (1.0 - ratio) * 115.0) as u8, (ratio * 100.0) as u8);
        surface.draw(
            Shape::Disc {
                x: self.x,
                y: self.y,
                radius: self.size,
            },
            Paint::new(color, self.opacity),
        );
    }
}

#[derive(Clone, Debug)]
pub struct Leaf {
    x: f32,
    y: f32,
    vx: f32,
    vy: f32,
    size: f32,
    opacity: f32,
    life: f32,
    max_life: f32,
    sparkle: bool,
}

impl Leaf {
    fn spawn(vp: Viewport, rng: &mut EffectRng) -> Self {
        Self {
            x: rng.next_f32() * vp.width,
            y: rng.next_f32() * vp.height,
            vx: rng.spread(1.0),
            vy: rng.range(0.5, 2.5),
            size: rng.range(2.0, 6.0),
            opacity: rng.range(0.3, 0.7),
            life: 0.0,
            max_life: rng.range(120.0, 200.0),
            sparkle: rng.chance(0.3),
        }
    }

    fn step(&mut self, vp: Viewport, rng: &mut EffectRng) {
        self.x += self.vx;
        self.y += self.vy;
        self.life += 1.0;
        if self.y > vp.height || self.life >= self.max_life {
            self.x = rng.next_f32() * vp.width;
            self.y = -10.0;
            self.life = 0.0;
        }
    }

    fn paint(&self, flavor: Flavor, surface: &mut dyn RenderSurface) {
        let alpha = self.opacity * (1.0 - self.life / self.max_life * 0.5);
        if self.sparkle {
            let color = if flavor == Flavor::Birds {
                Rgb(255, 215, 0)
            } else {
                Rgb(144, 238, 144)
            };
            surface.draw(
                Shape::Disc {
                    x: self.x,
                    y: self.y,
                    radius: self.size,
                },
                Paint::new(color, alpha).glowing(10.0),
            );
        } else {
            surface.draw(
                Shape::Ellipse {
                    x: self.x,
                    y: self.y,
                    rx: self.size,
                    ry: self.size * 1.5,
                    rotation: FRAC_PI_4,
                },
                Paint::new(Rgb(34, 139, 34), alpha),
            );
        }
    }
}

#[derive(Clone, Debug)]
pub struct Ripple {
    x: f32,
    y: f32,
    radius: f32,
    max_radius: f32,
    life: f32,
    max_life: f32,
}

impl Ripple {
    const OPACITY: f32 = 0.6;

    fn spawn(vp: Viewport, rng: &mut EffectRng) -> Self {
        let mut ripple = Self {
            x: 0.0,
            y: 0.0,
            radius: 0.0,
            max_radius: rng.range(20.0, 60.0),
            life: 0.0,
            max_life: rng.range(60.0, 100.0),
        };
        ripple.respawn(vp, rng);
        ripple
    }

    fn respawn(&mut self, vp: Viewport, rng: &mut EffectRng) {
        self.x = rng.next_f32() * vp.width;
        self.y = vp.height * 0.7 + rng.next_f32() * vp.height * 0.3;
        self.radius = 0.0;
        self.life = 0.0;
    }

    fn step(&mut self, vp: Viewport, rng: &mut EffectRng) {
        self.life += 1.0;
        self.radius = self.life / self.max_life * self.max_radius;
        if self.life >= self.max_life {
            self.respawn(vp, rng);
        }
    }

    fn paint(&self, surface: &mut dyn RenderSurface) {
        let alpha = Self::OPACITY * (1.0 - self.life / self.max_life);
        surface.draw(
            Shape::Ring {
                x: self.x,
                y: self.y,
                radius: self.radius,
                width: 2.0,
            },
            Paint::new(Rgb(79, 195, 247), alpha),
        );
    }
}

/// Small drifting particle shared by the movement and ambient layers.
#[derive(Clone, Debug)]
pub struct Mote {
    x: f32,
    y: f32,
    vx: f32,
    vy: f32,
    size: f32,
    opacity: f32,
    life: f32,
    max_life: f32,
}

impl Mote {
    fn ground(vp: Viewport, rng: &mut EffectRng) -> Self {
        let mut mote = Self {
            x: 0.0,
            y: 0.0,
            vx: 0.0,
            vy: 0.0,
            size: rng.range(1.0, 4.0),
            opacity: rng.range(0.4, 0.7),
            life: 0.0,
            max_life: rng.range(30.0, 50.0),
        };
        mote.kick_up(vp, rng);
        mote
    }

    /// Near the ground, rising.
    fn kick_up(&mut self, vp: Viewport, rng: &mut EffectRng) {
        self.x = rng.next_f32() * vp.width;
        self.y = vp.height * 0.8 + rng.next_f32() * vp.height * 0.2;
        self.vx = rng.spread(3.0);
        self.vy = -1.0 - rng.next_f32() * 3.0;
        self.life = 0.0;
    }

    fn floating(vp: Viewport, rng: &mut EffectRng) -> Self {
        Self {
            x: rng.next_f32() * vp.width,
            y: rng.next_f32() * vp.height,
            vx: rng.spread(2.0),
            vy: rng.spread(2.0),
            size: rng.range(1.0, 4.0),
            opacity: rng.range(0.2, 0.5),
            life: 0.0,
            max_life: rng.range(40.0, 70.0),
        }
    }

    fn advance(&mut self) {
        self.x += self.vx;
        self.y += self.vy;
        self.life += 1.0;
    }

    fn step_ground(&mut self, vp: Viewport, rng: &mut EffectRng) {
        self.advance();
        if self.y < 0.0 || self.life >= self.max_life {
            self.kick_up(vp, rng);
        }
    }

    fn step_floating(&mut self, vp: Viewport) {
        self.advance();
        if self.x < 0.0 {
            self.x = vp.width;
        } else if self.x > vp.width {
            self.x = 0.0;
        }
        if self.y < 0.0 {
            self.y = vp.height;
        } else if self.y > vp.height {
            self.y = 0.0;
        }
        if self.life >= self.max_life {
            self.life = 0.0;
        }
    }

    fn ratio(&self) -> f32 {
        self.life / self.max_life
    }
}

#[derive(Clone, Debug)]
pub struct Butterfly {
    x: f32,
    y: f32,
    vx: f32,
    vy: f32,
    phase: f32,
    flap: f32,
    size: f32,
    color: Rgb,
}

impl Butterfly {
    const PALETTE: [Rgb; 4] = [
        Rgb(186, 104, 200),
        Rgb(255, 183, 77),
        Rgb(129, 212, 250),
        Rgb(240, 98, 146),
    ];

    fn spawn(vp: Viewport, rng: &mut EffectRng) -> Self {
        let pick = (rng.next_u64() % Self::PALETTE.len() as u64) as usize;
        Self {
            x: rng.next_f32() * vp.width,
            y: rng.next_f32() * vp.height,
            vx: rng.spread(1.5),
            vy: rng.spread(0.75),
            phase: rng.next_f32() * TAU,
            flap: rng.range(0.25, 0.45),
            size: rng.range(6.0, 12.0),
            color: Self::PALETTE[pick],
        }
    }

    fn step(&mut self, vp: Viewport) {
        self.phase = (self.phase + self.flap) % TAU;
        self.x += self.vx + self.phase.sin() * 1.2;
        self.y += self.vy + (self.phase * 0.5).cos() * 0.8;

        let margin = self.size * 2.0;
        if self.x < -margin {
            self.x = vp.width + margin;
        } else if self.x > vp.width + margin {
            self.x = -margin;
        }
        if self.y < -margin {
            self.y = vp.height + margin;
        } else if self.y > vp.height + margin {
            self.y = -margin;
        }
    }

    fn paint(&self, surface: &mut dyn RenderSurface) {
        let open = self.phase.sin().abs();
        let rx = self.size * 0.5 * (0.25 + 0.75 * open);
        let ry = self.size * 0.6;
        let paint = Paint::new(self.color, 0.85).glowing(4.0);
        for (side, tilt) in [(-1.0, -0.3), (1.0, 0.3)] {
            surface.draw(
                Shape::Ellipse {
                    x: self.x + side * rx,
                    y: self.y,
                    rx,
                    ry,
                    rotation: tilt,
                },
                paint,
            );
        }
    }
}

#[derive(Clone, Debug)]
pub struct Gust {
    x: f32,
    y: f32,
    vx: f32,
    vy: f32,
    size: f32,
    opacity: f32,
    /// Degrees.
    rotation: f32,
}

impl Gust {
    fn spawn(vp: Viewport, rng: &mut EffectRng) -> Self {
        Self {
            x: -50.0,
            y: rng.next_f32() * vp.height,
            vx: rng.range(8.0, 20.0),
            vy: rng.spread(2.0),
            size: rng.range(2.0, 8.0),
            opacity: rng.range(0.4, 0.8),
            rotation: rng.next_f32() * 360.0,
        }
    }

    fn step(&mut self, vp: Viewport, rng: &mut EffectRng) {
        self.x += self.vx;
        self.y += self.vy;
        self.rotation = (self.rotation + 5.0) % 360.0;
        if self.x > vp.width + 50.0 {
            self.x = -50.0;
            self.y = rng.next_f32() * vp.height;
        }
    }

    fn paint(&self, surface: &mut dyn RenderSurface) {
        surface.draw(
            Shape::Square {
                x: self.x,
                y: self.y,
                size: self.size,
                rotation: self.rotation.to_radians(),
            },
            Paint::new(Rgb(209, 213, 219), self.opacity),
        );
    }
}

#[derive(Clone, Debug)]
pub struct Raindrop {
    x: f32,
    y: f32,
    speed: f32,
    opacity: f32,
    length: f32,
}

impl Raindrop {
    fn spawn(vp: Viewport, rng: &mut EffectRng) -> Self {
        Self {
            x: rng.next_f32() * (vp.width + 200.0) - 100.0,
            y: rng.next_f32() * vp.height - vp.height,
            speed: rng.range(3.0, 11.0),
            opacity: rng.range(0.3, 0.7),
            length: rng.range(10.0, 30.0),
        }
    }

    fn step(&mut self, vp: Viewport, rng: &mut EffectRng) {
        self.y += self.speed;
        self.x -= 1.0;
        if self.y > vp.height || self.x < -50.0 {
            self.y = -50.0;
            self.x = rng.next_f32() * (vp.width + 200.0) - 100.0;
        }
    }

    fn paint(&self, surface: &mut dyn RenderSurface) {
        surface.draw(
            Shape::Path {
                points: vec![(self.x, self.y), (self.x - 3.0, self.y + self.length)],
                width: 2.0,
            },
            Paint::new(Rgb(96, 165, 250), self.opacity),
        );
    }
}

#[derive(Clone, Debug)]
pub struct Flash {
    frames_left: u32,
    brightness: f32,
    bolt: Option<(Vec<(f32, f32)>, f32)>,
}

impl Flash {
    fn new() -> Self {
        Self {
            frames_left: LIGHTNING_FRAMES,
            brightness: 0.0,
            bolt: None,
        }
    }

    fn step(&mut self, vp: Viewport, rng: &mut EffectRng) {
        if self.frames_left == 0 {
            self.brightness = 0.0;
            self.bolt = None;
            return;
        }
        self.brightness = self.frames_left as f32 / 20.0;
        self.bolt = rng.chance(STRIKE_CHANCE).then(|| {
            let segments = rng.range(8.0, 20.0) as u32;
            let mut x = rng.next_f32() * vp.width;
            let mut y = 0.0;
            let mut points = vec![(x, y)];
            for _ in 0..segments {
                x += rng.spread(50.0);
                y += vp.height / segments as f32;
                points.push((x, y));
            }
            (points, rng.range(3.0, 7.0))
        });
        self.frames_left -= 1;
    }

    fn paint(&self, surface: &mut dyn RenderSurface) {
        if let Some((points, width)) = &self.bolt {
            surface.draw(
                Shape::Path {
                    points: points.clone(),
                    width: *width,
                },
                Paint::new(Rgb(255, 255, 255), 1.0).glowing(20.0),
            );
        }
        if self.brightness > 0.0 {
            surface.draw(Shape::Wash, Paint::new(Rgb(255, 255, 255), self.brightness));
        }
    }
}

#[derive(Clone, Debug)]
pub enum Population {
    Fire(Vec<Ember>),
    Forest { flavor: Flavor, leaves: Vec<Leaf> },
    Water(Vec<Ripple>),
    Movement { flavor: Flavor, motes: Vec<Mote> },
    Ambient { flavor: Flavor, motes: Vec<Mote> },
    Butterflies(Vec<Butterfly>),
    Wind(Vec<Gust>),
    Rain(Vec<Raindrop>),
    Lightning(Flash),
}

fn spawn_many<T>(
    count: usize,
    vp: Viewport,
    rng: &mut EffectRng,
    spawn: fn(Viewport, &mut EffectRng) -> T,
) -> Vec<T> {
    (0..count).map(|_| spawn(vp, rng)).collect()
}

impl Population {
    /// The initial population for `category`, sized by category and flavor.
    pub fn seed(
        category: EffectCategory,
        flavor: Flavor,
        vp: Viewport,
        rng: &mut EffectRng,
    ) -> Self {
        match category {
            EffectCategory::Fire => Population::Fire(spawn_many(FIRE_EMBERS, vp, rng, Ember::spawn)),
            EffectCategory::Forest => Population::Forest {
                flavor,
                leaves: spawn_many(FOREST_LEAVES, vp, rng, Leaf::spawn),
            },
            EffectCategory::Water => {
                Population::Water(spawn_many(WATER_RIPPLES, vp, rng, Ripple::spawn))
            }
            EffectCategory::Movement => {
                let count = if flavor == Flavor::Hoof {
                    HOOF_PRINTS
                } else {
                    DUST_MOTES
                };
                Population::Movement {
                    flavor,
                    motes: spawn_many(count, vp, rng, Mote::ground),
                }
            }
            EffectCategory::Ambient => {
                let count = match flavor {
                    Flavor::Door => DOOR_MOTES,
                    Flavor::Bell => BELL_MOTES,
                    _ => CROWD_MOTES,
                };
                Population::Ambient {
                    flavor,
                    motes: spawn_many(count, vp, rng, Mote::floating),
                }
            }
            EffectCategory::Butterflies => {
                Population::Butterflies(spawn_many(BUTTERFLIES, vp, rng, Butterfly::spawn))
            }
            EffectCategory::Wind => Population::Wind(spawn_many(WIND_GUSTS, vp, rng, Gust::spawn)),
            EffectCategory::Rain => Population::Rain(spawn_many(RAIN_DROPS, vp, rng, Raindrop::spawn)),
            EffectCategory::Lightning => Population::Lightning(Flash::new()),
        }
    }

    pub fn category(&self) -> EffectCategory {
        match self {
            Population::Fire(_) => EffectCategory::Fire,
            Population::Forest { .. } => EffectCategory::Forest,
            Population::Water(_) => EffectCategory::Water,
            Population::Movement { .. } => EffectCategory::Movement,
            Population::Ambient { .. } => EffectCategory::Ambient,
            Population::Butterflies(_) => EffectCategory::Butterflies,
            Population::Wind(_) => EffectCategory::Wind,
            Population::Rain(_) => EffectCategory::Rain,
            Population::Lightning(_) => EffectCategory::Lightning,
        }
    }

    /// Live particle count. Lightning counts its remaining flash frames.
    pub fn len(&self) -> usize {
        match self {
            Population::Fire(p) => p.len(),
            Population::Forest { leaves, .. } => leaves.len(),
            Population::Water(p) => p.len(),
            Population::Movement { motes, .. } | Population::Ambient { motes, .. } => motes.len(),
            Population::Butterflies(p) => p.len(),
            Population::Wind(p) => p.len(),
            Population::Rain(p) => p.len(),
            Population::Lightning(flash) => flash.frames_left as usize,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Advance every particle by one frame, recycling the expired ones.
    pub fn step(&mut self, vp: Viewport, rng: &mut EffectRng) {
        match self {
            Population::Fire(embers) => embers.iter_mut().for_each(|p| p.step(vp, rng)),
            Population::Forest { leaves, .. } => leaves.iter_mut().for_each(|p| p.step(vp, rng)),
            Population::Water(ripples) => ripples.iter_mut().for_each(|p| p.step(vp, rng)),
            Population::Movement { motes, .. } => {
                motes.iter_mut().for_each(|p| p.step_ground(vp, rng));
            }
            Population::Ambient { motes, .. } => motes.iter_mut().for_each(|p| p.step_floating(vp)),
            Population::Butterflies(flock) => flock.iter_mut().for_each(|p| p.step(vp)),
            Population::Wind(gusts) => gusts.iter_mut().for_each(|p| p.step(vp, rng)),
            Population::Rain(drops) => drops.iter_mut().for_each(|p| p.step(vp, rng)),
            Population::Lightning(flash) => flash.step(vp, rng),
        }
    }

    pub fn paint(&self, surface: &mut dyn RenderSurface) {
        match self {
            Population::Fire(embers) => embers.iter().for_each(|p| p.paint(surface)),
            Population::Forest { flavor, leaves } => {
                leaves.iter().for_each(|p| p.paint(*flavor, surface));
            }
            Population::Water(ripples) => ripples.iter().for_each(|p| p.paint(surface)),
            Population::Movement { flavor, motes } => {
                for mote in motes {
                    let alpha = mote.opacity * (1.0 - mote.ratio());
                    let shape = if *flavor == Flavor::Hoof {
                        Shape::Ellipse {
                            x: mote.x,
                            y: mote.y,
                            rx: mote.size * 1.5,
                            ry: mote.size,
                            rotation: 0.0,
                        }
                    } else {
                        Shape::Disc {
                            x: mote.x,
                            y: mote.y,
                            radius: mote.size,
                        }
                    };
                    let color = if *flavor == Flavor::Hoof {
                        Rgb(139, 69, 19)
                    } else {
                        Rgb(210, 180, 140)
                    };
                    surface.draw(shape, Paint::new(color, alpha));
                }
            }
            Population::Ambient { flavor, motes } => {
                let (color, glow) = match flavor {
                    Flavor::Door => (Rgb(139, 69, 19), 3.0),
                    Flavor::Bell => (Rgb(255, 215, 0), 8.0),
                    _ => (Rgb(255, 105, 180), 5.0),
                };
                for mote in motes {
                    let alpha = mote.opacity * (mote.ratio() * PI).sin();
                    surface.draw(
                        Shape::Disc {
                            x: mote.x,
                            y: mote.y,
                            radius: mote.size,
                        },
                        Paint::new(color, alpha).glowing(glow),
                    );
                }
            }
            Population::Butterflies(flock) => flock.iter().for_each(|p| p.paint(surface)),
            Population::Wind(gusts) => gusts.iter().for_each(|p| p.paint(surface)),
            Population::Rain(drops) => drops.iter().for_each(|p| p.paint(surface)),
            Population::Lightning(flash) => flash.paint(surface),
        }
    }
}
