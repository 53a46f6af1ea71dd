//! External force contributors.

use crate::fph;
use crate::physical::MotorizedPhysical;
use crate::quantities::Acceleration;
use serde::{Deserialize, Serialize};

/// A contributor of external forces, invoked for every physical once per
/// tick.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ExternalForce {
    /// Uniform gravity: every body experiences the acceleration `gravity` at
    /// its center of mass.
    DirectionalGravity { gravity: Acceleration },
}

impl ExternalForce {
    /// Applies this force to all the given physicals for the current step.
    pub fn apply(&self, physicals: &mut [MotorizedPhysical]) {
        match self {
            Self::DirectionalGravity { gravity } => {
                for physical in physicals.iter_mut() {
                    physical.apply_force_at_center_of_mass(gravity * physical.total_mass());
                }
            }
        }
    }

    /// Computes the potential energy of the given physical in this force
    /// field.
    pub fn potential_energy(&self, physical: &MotorizedPhysical) -> fph {
        match self {
            Self::DirectionalGravity { gravity } => {
                -physical.total_mass() * gravity.dot(&physical.world_center_of_mass().coords)
            }
        }
    }
}
