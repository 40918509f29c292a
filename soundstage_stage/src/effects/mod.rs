// Effect scheduler: the set of active visual effects on the host.
//
// An effect is activated by a sound (through `effect_for_sound`) and lives
// until its expiry timer fires, normally the length of the sound that
// started it. Activating a category that is already running only pushes its
// expiry out; the particle population is never re-seeded, so hammering one
// button cannot grow the particle count.
//
// Two clocks are involved. `advance(now)` runs expiry timers and always
// runs, so effects come and go in step with the audio. `tick(now)` draws a
// frame and only does work while a render surface is attached and at least
// one effect is active. Detaching the surface (leaving presentation mode)
// freezes the particles but keeps the logical effect set; reattaching
// resumes drawing whatever is still active.
//
// Submodules:
// - `category.rs`:   `EffectCategory` (declaration order = paint order),
//                    `Flavor`, and the sound-id lookup table.
// - `population.rs`: per-category particle simulations.
// - `surface.rs`:    `RenderSurface` seam plus `RecordingSurface`.
// - `rng.rs`:        seeded `EffectRng`.

pub mod category;
pub mod population;
pub mod rng;
pub mod surface;

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, info};

pub use category::{EffectCategory, EffectMapping, Flavor, effect_for_sound};
pub use population::Population;
pub use rng::EffectRng;
pub use surface::{RecordingSurface, RenderSurface, Viewport};

use crate::timer::{Millis, TimerHandle, Timers};

struct ActiveEffect {
    flavor: Flavor,
    population: Population,
    expires_at: Millis,
    timer: TimerHandle,
}

pub struct EffectScheduler {
    /// Keyed by category, so iteration is paint order.
    active: BTreeMap<EffectCategory, ActiveEffect>,
    timers: Timers,
    expiry_owners: HashMap<TimerHandle, EffectCategory>,
    surface: Option<Box<dyn RenderSurface>>,
    viewport: Viewport,
    rng: EffectRng,
    /// Whether the last tick drew something, so one final clear can follow.
    painted: bool,
    frames: u64,
}

impl EffectScheduler {
    pub fn new(viewport: Viewport, seed: u64) -> Self {
        Self {
            active: BTreeMap::new(),
            timers: Timers::new(),
            expiry_owners: HashMap::new(),
            surface: None,
            viewport,
            rng: EffectRng::new(seed),
            painted: false,
            frames: 0,
        }
    }

    /// Start (or extend) the effect a sound maps to, for `duration_ms` from
    /// `now`. Returns the category when one was started or extended.
    pub fn activate(
        &mut self,
        now: Millis,
        mapping: EffectMapping,
        duration_ms: Millis,
    ) -> Option<EffectCategory> {
        let EffectMapping::Effect { category, flavor } = mapping else {
            return None;
        };
        let expires_at = now.saturating_add(duration_ms);

        if let Some(effect) = self.active.get_mut(&category) {
            if expires_at > effect.expires_at {
                self.timers.cancel(effect.timer);
                self.expiry_owners.remove(&effect.timer);
                let timer = self.timers.once(now, duration_ms);
                self.expiry_owners.insert(timer, category);
                effect.timer = timer;
                effect.expires_at = expires_at;
            }
            debug!(%category, expires_at = effect.expires_at, "effect extended");
            return Some(category);
        }

        let population = Population::seed(category, flavor, self.viewport, &mut self.rng);
        let timer = self.timers.once(now, duration_ms);
        self.expiry_owners.insert(timer, category);
        info!(%category, ?flavor, particles = population.len(), duration_ms, "effect started");
        self.active.insert(
            category,
            ActiveEffect {
                flavor,
                population,
                expires_at,
                timer,
            },
        );
        Some(category)
    }

    /// Clear one category immediately. Returns whether it was active.
    pub fn deactivate(&mut self, category: EffectCategory) -> bool {
        let Some(effect) = self.active.remove(&category) else {
            return false;
        };
        self.timers.cancel(effect.timer);
        self.expiry_owners.remove(&effect.timer);
        debug!(%category, "effect cleared");
        true
    }

    pub fn deactivate_all(&mut self) {
        if !self.active.is_empty() {
            info!(effects = self.active.len(), "all effects cleared");
        }
        self.active.clear();
        self.timers.clear();
        self.expiry_owners.clear();
    }

    /// Bring every expiry forward to at most `now + within_ms`. Effects due
    /// sooner are left alone.
    pub fn expire_within(&mut self, now: Millis, within_ms: Millis) {
        let deadline = now.saturating_add(within_ms);
        for (category, effect) in &mut self.active {
            if effect.expires_at <= deadline {
                continue;
            }
            self.timers.cancel(effect.timer);
            self.expiry_owners.remove(&effect.timer);
            let timer = self.timers.once(now, within_ms);
            self.expiry_owners.insert(timer, *category);
            effect.timer = timer;
            effect.expires_at = deadline;
        }
    }

    /// Run expiry timers.
    pub fn advance(&mut self, now: Millis) {
        for timer in self.timers.fire_due(now) {
            let Some(category) = self.expiry_owners.remove(&timer) else {
                continue;
            };
            if self.active.get(&category).is_some_and(|e| e.timer == timer) {
                self.active.remove(&category);
                debug!(%category, "effect expired");
            }
        }
    }

    /// Expire what is due, then step and paint one frame in paint order.
    /// Returns whether a frame was drawn.
    pub fn tick(&mut self, now: Millis) -> bool {
        self.advance(now);
        let Some(surface) = self.surface.as_mut() else {
            return false;
        };

        if self.active.is_empty() {
            if self.painted {
                surface.clear(self.viewport);
                surface.present();
                self.painted = false;
            }
            return false;
        }

        surface.clear(self.viewport);
        for (category, effect) in &mut self.active {
            effect.population.step(self.viewport, &mut self.rng);
            surface.begin_layer(*category);
            effect.population.paint(surface.as_mut());
        }
        surface.present();
        self.painted = true;
        self.frames += 1;
        true
    }

    /// Enter presentation mode.
    pub fn attach_surface(&mut self, surface: Box<dyn RenderSurface>) {
        self.surface = Some(surface);
        self.painted = false;
        debug!(active = self.active.len(), "render surface attached");
    }

    /// Leave presentation mode. Active effects are kept.
    pub fn detach_surface(&mut self) -> Option<Box<dyn RenderSurface>> {
        debug!(active = self.active.len(), "render surface detached");
        self.surface.take()
    }

    pub fn has_surface(&self) -> bool {
        self.surface.is_some()
    }

    pub fn resize(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn is_idle(&self) -> bool {
        self.active.is_empty()
    }

    pub fn is_active(&self, category: EffectCategory) -> bool {
        self.active.contains_key(&category)
    }

    /// Active categories in paint order.
    pub fn active_categories(&self) -> Vec<EffectCategory> {
        self.active.keys().copied().collect()
    }

    pub fn particle_count(&self, category: EffectCategory) -> usize {
        self.active
            .get(&category)
            .map_or(0, |effect| effect.population.len())
    }

    pub fn flavor(&self, category: EffectCategory) -> Option<Flavor> {
        self.active.get(&category).map(|effect| effect.flavor)
    }

    pub fn expires_at(&self, category: EffectCategory) -> Option<Millis> {
        self.active.get(&category).map(|effect| effect.expires_at)
    }

    pub fn frames_drawn(&self) -> u64 {
        self.frames
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::population::{FIRE_EMBERS, RAIN_DROPS};
    use super::surface::FrameLog;
    use super::*;

    fn scheduler() -> EffectScheduler {
        EffectScheduler::new(Viewport::new(800.0, 600.0), 42)
    }

    fn with_recorder() -> (EffectScheduler, FrameLog) {
        let mut effects = scheduler();
        let surface = RecordingSurface::new();
        let log = surface.log();
        effects.attach_surface(Box::new(surface));
        (effects, log)
    }

    #[test]
    fn repeated_rain_does_not_reseed() {
        let mut effects = scheduler();
        let rain = effect_for_sound("rain");
        effects.activate(0, rain, 5000);
        effects.activate(100, rain, 5000);
        effects.activate(200, rain, 5000);
        assert_eq!(effects.particle_count(EffectCategory::Rain), RAIN_DROPS);
    }

    #[test]
    fn reactivation_extends_expiry() {
        let mut effects = scheduler();
        let fire = effect_for_sound("fire");
        effects.activate(0, fire, 1000);
        effects.activate(800, fire, 1000);
        assert_eq!(effects.expires_at(EffectCategory::Fire), Some(1800));

        // A shorter re-activation never shortens it.
        effects.activate(900, fire, 100);
        assert_eq!(effects.expires_at(EffectCategory::Fire), Some(1800));

        effects.advance(1000);
        assert!(effects.is_active(EffectCategory::Fire));
        effects.advance(1800);
        assert!(effects.is_idle());
    }

    #[test]
    fn no_effect_mapping_is_ignored() {
        let mut effects = scheduler();
        assert_eq!(effects.activate(0, effect_for_sound("owl"), 1000), None);
        assert!(effects.is_idle());
    }

    #[test]
    fn frames_paint_in_fixed_order() {
        let (mut effects, log) = with_recorder();
        effects.activate(0, effect_for_sound("thunder"), 5000);
        effects.activate(0, effect_for_sound("rain"), 5000);
        effects.activate(0, effect_for_sound("wind"), 5000);
        effects.activate(0, effect_for_sound("fire"), 5000);

        assert!(effects.tick(16));
        let frame = log.last().unwrap();
        assert_eq!(
            frame.layers,
            vec![
                EffectCategory::Fire,
                EffectCategory::Wind,
                EffectCategory::Rain,
                EffectCategory::Lightning,
            ]
        );
        assert_eq!(frame.shapes_in(EffectCategory::Fire), FIRE_EMBERS);
        assert_eq!(frame.shapes_in(EffectCategory::Rain), RAIN_DROPS);
    }

    #[test]
    fn idle_scheduler_does_no_frame_work() {
        let (mut effects, log) = with_recorder();
        assert!(!effects.tick(0));
        assert!(!effects.tick(16));
        assert!(log.is_empty());
    }

    #[test]
    fn expiry_clears_the_screen_once() {
        let (mut effects, log) = with_recorder();
        effects.activate(0, effect_for_sound("water"), 100);
        assert!(effects.tick(50));
        assert!(!effects.tick(100));
        assert!(!effects.tick(150));
        let frames = log.all();
        assert_eq!(frames.len(), 2);
        assert!(frames[1].draws.is_empty());
    }

    #[test]
    fn detached_effects_keep_expiring() {
        let (mut effects, log) = with_recorder();
        effects.activate(0, effect_for_sound("rain"), 1000);
        effects.activate(0, effect_for_sound("fire"), 3000);
        effects.tick(16);
        let surface = effects.detach_surface().unwrap();

        assert!(!effects.tick(500));
        assert_eq!(log.len(), 1);
        effects.advance(1000);
        assert_eq!(effects.active_categories(), vec![EffectCategory::Fire]);

        effects.attach_surface(surface);
        assert!(effects.tick(1016));
        assert_eq!(log.last().unwrap().layers, vec![EffectCategory::Fire]);
    }

    #[test]
    fn expire_within_only_shortens() {
        let mut effects = scheduler();
        effects.activate(0, effect_for_sound("wind"), 10_000);
        effects.activate(0, effect_for_sound("bell"), 300);
        effects.expire_within(100, 1000);
        assert_eq!(effects.expires_at(EffectCategory::Wind), Some(1100));
        assert_eq!(effects.expires_at(EffectCategory::Ambient), Some(300));

        effects.advance(1100);
        assert!(effects.is_idle());
    }

    #[test]
    fn deactivate_cancels_expiry() {
        let mut effects = scheduler();
        let rain = effect_for_sound("rain");
        effects.activate(0, rain, 1000);
        assert!(effects.deactivate(EffectCategory::Rain));
        assert!(!effects.deactivate(EffectCategory::Rain));

        // A fresh activation is not killed by the old timer.
        effects.activate(500, rain, 1000);
        effects.advance(1000);
        assert!(effects.is_active(EffectCategory::Rain));
        effects.advance(1500);
        assert!(effects.is_idle());
    }

    #[test]
    fn first_flavor_sticks() {
        let mut effects = scheduler();
        effects.activate(0, effect_for_sound("crowd"), 1000);
        effects.activate(0, effect_for_sound("door"), 1000);
        assert_eq!(effects.flavor(EffectCategory::Ambient), Some(Flavor::Crowd));
    }

    #[test]
    fn same_seed_draws_same_frames() {
        let run = || {
            let (mut effects, log) = with_recorder();
            effects.activate(0, effect_for_sound("butterflies"), 5000);
            for t in 0..5 {
                effects.tick(t * 16);
            }
            log.all()
        };
        assert_eq!(run(), run());
    }
}
