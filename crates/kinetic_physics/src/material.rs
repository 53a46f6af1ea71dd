//! Material properties for physics simulation.

use crate::fph;
use crate::quantities::Velocity;
use serde::{Deserialize, Serialize};

/// The material properties of a part.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PartProperties {
    /// The mass density of the part.
    pub density: fph,
    /// The strength of friction at contacts with the part.
    pub friction: fph,
    /// The elasticity of collisions with the part, typically between 0 (fully
    /// inelastic, the bodies stay together) and 1 (elastic, the bodies bounce
    /// maximally apart).
    pub bounciness: fph,
    /// A surface velocity, expressed in the part's local frame, imparted to
    /// bodies in contact with the part.
    pub conveyor_effect: Option<Velocity>,
}

impl PartProperties {
    /// Creates a new set of material properties with the given density,
    /// friction and bounciness and no conveyor effect.
    ///
    /// # Panics
    /// If the given density does not exceed zero.
    pub fn new(density: fph, friction: fph, bounciness: fph) -> Self {
        assert!(
            density > 0.0,
            "Tried creating part properties with density not exceeding zero"
        );
        Self {
            density,
            friction,
            bounciness,
            conveyor_effect: None,
        }
    }

    /// Returns these properties with the given conveyor surface velocity.
    pub fn with_conveyor_effect(mut self, conveyor_effect: Velocity) -> Self {
        self.conveyor_effect = Some(conveyor_effect);
        self
    }

    /// Computes the effective restitution coefficient to use when resolving a
    /// contact between bodies with these and the given properties.
    pub fn combined_bounciness(&self, other: &Self) -> fph {
        fph::min(self.bounciness, other.bounciness)
    }

    /// Computes the effective friction coefficient to use when resolving a
    /// contact between bodies with these and the given properties.
    pub fn combined_friction(&self, other: &Self) -> fph {
        fph::sqrt(self.friction * other.friction)
    }
}

impl Default for PartProperties {
    fn default() -> Self {
        Self {
            density: 1.0,
            friction: 0.5,
            bounciness: 0.0,
            conveyor_effect: None,
        }
    }
}
