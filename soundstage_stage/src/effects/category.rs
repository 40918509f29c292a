// Effect categories and the sound-to-effect lookup table.

use std::fmt;

/// One visual effect layer. Declaration order is paint order: earlier
/// variants are background, later ones draw on top.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EffectCategory {
    Fire,
    Forest,
    Water,
    Movement,
    Ambient,
    Butterflies,
    Wind,
    Rain,
    Lightning,
}

impl EffectCategory {
    pub const ALL: [EffectCategory; 9] = [
        EffectCategory::Fire,
        EffectCategory::Forest,
        EffectCategory::Water,
        EffectCategory::Movement,
        EffectCategory::Ambient,
        EffectCategory::Butterflies,
        EffectCategory::Wind,
        EffectCategory::Rain,
        EffectCategory::Lightning,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EffectCategory::Fire => "fire",
            EffectCategory::Forest => "forest",
            EffectCategory::Water => "water",
            EffectCategory::Movement => "movement",
            EffectCategory::Ambient => "ambient",
            EffectCategory::Butterflies => "butterflies",
            EffectCategory::Wind => "wind",
            EffectCategory::Rain => "rain",
            EffectCategory::Lightning => "lightning",
        }
    }
}

impl fmt::Display for EffectCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Variation within a category, chosen by the sound that started it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Flavor {
    Plain,
    /// Forest with golden sparkles.
    Birds,
    /// Movement: heavy hoof prints.
    Hoof,
    /// Movement: light dust from footsteps.
    Dust,
    Crowd,
    Door,
    Bell,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EffectMapping {
    NoEffect,
    Effect {
        category: EffectCategory,
        flavor: Flavor,
    },
}

impl EffectMapping {
    const fn plain(category: EffectCategory) -> Self {
        EffectMapping::Effect {
            category,
            flavor: Flavor::Plain,
        }
    }

    const fn flavored(category: EffectCategory, flavor: Flavor) -> Self {
        EffectMapping::Effect { category, flavor }
    }

    pub fn category(self) -> Option<EffectCategory> {
        match self {
            EffectMapping::NoEffect => None,
            EffectMapping::Effect { category, .. } => Some(category),
        }
    }
}

/// Which effect a sound id drives. Unlisted ids have no visual effect.
pub fn effect_for_sound(sound_id: &str) -> EffectMapping {
    use EffectCategory::*;

    match sound_id {
        "fire" | "campfire" => EffectMapping::plain(Fire),
        "forest" => EffectMapping::plain(Forest),
        "birds" => EffectMapping::flavored(Forest, Flavor::Birds),
        "water" | "stream" => EffectMapping::plain(Water),
        "horse" => EffectMapping::flavored(Movement, Flavor::Hoof),
        "footsteps" => EffectMapping::flavored(Movement, Flavor::Dust),
        "crowd" => EffectMapping::flavored(Ambient, Flavor::Crowd),
        "door" => EffectMapping::flavored(Ambient, Flavor::Door),
        "bell" | "chimes" => EffectMapping::flavored(Ambient, Flavor::Bell),
        "butterflies" => EffectMapping::plain(Butterflies),
        "wind" => EffectMapping::plain(Wind),
        "rain" => EffectMapping::plain(Rain),
        "thunder" | "spell" => EffectMapping::plain(Lightning),
        _ => EffectMapping::NoEffect,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_is_in_paint_order() {
        let mut sorted = EffectCategory::ALL;
        sorted.sort();
        assert_eq!(sorted, EffectCategory::ALL);
        assert!(EffectCategory::Fire < EffectCategory::Rain);
        assert!(EffectCategory::Rain < EffectCategory::Lightning);
    }

    #[test]
    fn lookup_table() {
        assert_eq!(
            effect_for_sound("thunder").category(),
            Some(EffectCategory::Lightning)
        );
        assert_eq!(
            effect_for_sound("horse"),
            EffectMapping::Effect {
                category: EffectCategory::Movement,
                flavor: Flavor::Hoof
            }
        );
        assert_eq!(effect_for_sound("owl"), EffectMapping::NoEffect);
        assert_eq!(effect_for_sound(""), EffectMapping::NoEffect);
    }
}
