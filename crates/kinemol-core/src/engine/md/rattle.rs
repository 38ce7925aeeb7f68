use crate::core::models::system::System;
use crate::core::models::topology::{self, BondMatrix};
use crate::core::units;
use crate::engine::error::EngineError;
use nalgebra::Vector3;
use tracing::debug;

/// Hard ceiling on the Lagrange multiplier magnitude; larger corrections are
/// clamped to keep a badly distorted bond from catapulting atoms.
const LAMBDA_CAP: f64 = 1e3;

/// Which bonds become holonomic constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RattleSelection {
    AllBonds,
    HydrogenOnly,
}

/// One constrained bond with its squared target length in Bohr².
#[derive(Debug, Clone, Copy)]
pub struct BondConstraint {
    pub i: usize,
    pub j: usize,
    pub target_d2: f64,
}

/// The iterative RATTLE constraint solver.
///
/// Positions are corrected until every squared bond length matches its
/// target within `2·tol·target`; velocities are projected so that relative
/// motion along each bond vanishes. The velocity stage accumulates a virial
/// correction `Σ μ·d` for diagnostics.
#[derive(Debug, Clone)]
pub struct RattleSolver {
    constraints: Vec<BondConstraint>,
    tolerance: f64,
    max_iterations: usize,
    virial_correction: f64,
}

impl RattleSolver {
    /// Records the constrained bond list from the initial geometry of
    /// `system`, using the perceived bond matrix.
    pub fn from_system(
        system: &System,
        bonds: &BondMatrix,
        selection: RattleSelection,
        tolerance: f64,
        max_iterations: usize,
    ) -> Self {
        let atoms = system.atoms();
        let constraints = bonds
            .pairs()
            .into_iter()
            .filter(|&(i, j)| match selection {
                RattleSelection::AllBonds => true,
                RattleSelection::HydrogenOnly => {
                    atoms[i].is_hydrogen() || atoms[j].is_hydrogen()
                }
            })
            .map(|(i, j)| {
                let distance = units::angstrom_to_bohr(system.distance(i, j));
                BondConstraint {
                    i,
                    j,
                    target_d2: distance * distance,
                }
            })
            .collect();
        Self {
            constraints,
            tolerance,
            max_iterations,
            virial_correction: 0.0,
        }
    }

    pub fn constraint_count(&self) -> usize {
        self.constraints.len()
    }

    pub fn constraints(&self) -> &[BondConstraint] {
        &self.constraints
    }

    /// Virial correction accumulated by the velocity stages, for
    /// diagnostics.
    pub fn virial_correction(&self) -> f64 {
        self.virial_correction
    }

    /// Position stage: corrects `positions` (and the corresponding velocity
    /// components) so every constraint holds at the post-drift geometry.
    ///
    /// `reference` is the pre-drift geometry supplying the bond directions
    /// the corrections act along. Reports [`EngineError::Constraint`] when
    /// the sweep count is exhausted; the caller continues with the
    /// best-effort correction.
    pub fn constrain_positions(
        &self,
        reference: &[Vector3<f64>],
        positions: &mut [Vector3<f64>],
        velocities: &mut [Vector3<f64>],
        masses: &[f64],
        dt: f64,
    ) -> Result<(), EngineError> {
        for _ in 0..self.max_iterations {
            let mut all_satisfied = true;
            for constraint in &self.constraints {
                let (i, j) = (constraint.i, constraint.j);
                let current = positions[i] - positions[j];
                let current_d2 = current.norm_squared();
                if (current_d2 - constraint.target_d2).abs()
                    <= 2.0 * self.tolerance * constraint.target_d2
                {
                    continue;
                }
                all_satisfied = false;

                let old_bond = reference[i] - reference[j];
                let inverse_mass = 1.0 / masses[i] + 1.0 / masses[j];
                let overlap = current.dot(&old_bond);
                if overlap.abs() < 1e-12 {
                    continue;
                }
                let lambda = ((constraint.target_d2 - current_d2)
                    / (inverse_mass * overlap))
                    .clamp(-LAMBDA_CAP, LAMBDA_CAP);

                let correction = 0.5 * lambda * old_bond;
                positions[i] += correction / masses[i];
                positions[j] -= correction / masses[j];
                velocities[i] += correction / (masses[i] * dt);
                velocities[j] -= correction / (masses[j] * dt);
            }
            if all_satisfied {
                return Ok(());
            }
        }
        debug!(
            iterations = self.max_iterations,
            "RATTLE position stage exhausted its sweep budget"
        );
        Err(EngineError::Constraint {
            iterations: self.max_iterations,
        })
    }

    /// Velocity stage: removes relative velocity along every constrained
    /// bond so that `r·v = 0` within the tolerance.
    pub fn constrain_velocities(
        &mut self,
        positions: &[Vector3<f64>],
        velocities: &mut [Vector3<f64>],
        masses: &[f64],
    ) -> Result<(), EngineError> {
        for _ in 0..self.max_iterations {
            let mut all_satisfied = true;
            for constraint in &self.constraints {
                let (i, j) = (constraint.i, constraint.j);
                let bond = positions[i] - positions[j];
                let relative = velocities[i] - velocities[j];
                let projection = bond.dot(&relative);
                if projection.abs() <= self.tolerance {
                    continue;
                }
                all_satisfied = false;

                let inverse_mass = 1.0 / masses[i] + 1.0 / masses[j];
                let mu = -projection / (inverse_mass * constraint.target_d2);
                self.virial_correction += mu * constraint.target_d2.sqrt();

                velocities[i] += mu * bond / masses[i];
                velocities[j] -= mu * bond / masses[j];
            }
            if all_satisfied {
                return Ok(());
            }
        }
        Err(EngineError::Constraint {
            iterations: self.max_iterations,
        })
    }

    /// True when every constraint satisfies the RATTLE tolerance at
    /// `positions`.
    pub fn all_satisfied(&self, positions: &[Vector3<f64>]) -> bool {
        self.constraints.iter().all(|c| {
            let d2 = (positions[c.i] - positions[c.j]).norm_squared();
            (d2 - c.target_d2).abs() <= 2.0 * self.tolerance * c.target_d2
        })
    }
}
