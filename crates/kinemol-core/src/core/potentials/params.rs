use crate::core::constants;
use crate::core::models::system::System;
use crate::core::models::topology;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

/// Scale of generated harmonic bond force constants, Hartree·Å.
const BOND_FORCE_BASE: f64 = 0.8;

/// Scale of generated harmonic angle force constants, Hartree·Å².
const ANGLE_FORCE_BASE: f64 = 0.15;

#[derive(Debug, Error)]
pub enum ParameterError {
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("JSON error for '{path}': {source}")]
    Json {
        path: String,
        source: serde_json::Error,
    },
    #[error("Parameter set describes {expected} atoms, system has {got}")]
    AtomCountMismatch { expected: usize, got: usize },
}

/// A harmonic bond between atoms `i` and `j`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BondParameter {
    pub i: usize,
    pub j: usize,
    /// Equilibrium distance in Ångström.
    pub r0: f64,
    /// Force constant in Hartree/Å².
    pub force_constant: f64,
}

/// A harmonic angle with vertex `j`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AngleParameter {
    pub i: usize,
    pub j: usize,
    pub k: usize,
    /// Equilibrium angle in radians.
    pub theta0: f64,
    /// Force constant in Hartree/rad².
    pub force_constant: f64,
}

/// Lennard-Jones site of one atom.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct VdwSite {
    /// Distance of the potential minimum in Ångström.
    pub r_min: f64,
    /// Well depth in Hartree.
    pub well_depth: f64,
}

/// The full parameter set of the generated classical force field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForceFieldParameters {
    pub atom_count: usize,
    pub bonds: Vec<BondParameter>,
    pub angles: Vec<AngleParameter>,
    pub vdw: Vec<VdwSite>,
    pub charges: Vec<f64>,
}

/// Lennard-Jones parameters for common elements; everything else is
/// estimated from the covalent radius.
fn vdw_site(z: u8) -> VdwSite {
    let (r_min, well_depth) = match z {
        1 => (2.60, 7.0e-5),
        6 => (3.85, 1.67e-4),
        7 => (3.66, 1.10e-4),
        8 => (3.50, 9.5e-5),
        9 => (3.36, 8.0e-5),
        15 => (4.15, 4.9e-4),
        16 => (4.04, 4.4e-4),
        17 => (3.95, 3.6e-4),
        35 => (4.19, 4.0e-4),
        53 => (4.50, 5.4e-4),
        _ => (2.4 * constants::covalent_radius(z) + 1.5, 2.0e-4),
    };
    VdwSite { r_min, well_depth }
}

impl ForceFieldParameters {
    /// Derives a parameter set from the current geometry of `system`.
    ///
    /// Bonds come from covalent-radius perception with the present distance
    /// as equilibrium; angles are formed over every bonded pair sharing a
    /// vertex, with the present angle as equilibrium. Angle force constants
    /// are damped by the product of the two equilibrium bond lengths of the
    /// arms, bond force constants by the equilibrium distance.
    pub fn generate(system: &System) -> Self {
        let bonds_matrix = topology::perceive_bonds(system);
        let geometry = system.geometry();

        let mut bonds = Vec::new();
        for (i, j) in bonds_matrix.pairs() {
            let r0 = system.distance(i, j);
            bonds.push(BondParameter {
                i,
                j,
                r0,
                force_constant: BOND_FORCE_BASE / r0,
            });
        }

        let mut angles = Vec::new();
        for j in 0..system.atom_count() {
            let neighbors = bonds_matrix.neighbors(j);
            for a in 0..neighbors.len() {
                for b in (a + 1)..neighbors.len() {
                    let (i, k) = (neighbors[a], neighbors[b]);
                    let u = geometry[i] - geometry[j];
                    let v = geometry[k] - geometry[j];
                    let cos_theta =
                        (u.dot(&v) / (u.norm() * v.norm())).clamp(-1.0, 1.0);
                    angles.push(AngleParameter {
                        i,
                        j,
                        k,
                        theta0: cos_theta.acos(),
                        force_constant: ANGLE_FORCE_BASE / (u.norm() * v.norm()),
                    });
                }
            }
        }

        let vdw = system.atoms().iter().map(|a| vdw_site(a.z)).collect();

        Self {
            atom_count: system.atom_count(),
            bonds,
            angles,
            vdw,
            charges: vec![0.0; system.atom_count()],
        }
    }

    /// Pairs excluded from non-bonded interactions: 1-2 and 1-3 neighbours.
    pub fn exclusions(&self) -> HashSet<(usize, usize)> {
        let mut excluded = HashSet::new();
        let mut insert = |i: usize, j: usize| {
            excluded.insert((i.min(j), i.max(j)));
        };
        for bond in &self.bonds {
            insert(bond.i, bond.j);
        }
        for angle in &self.angles {
            insert(angle.i, angle.k);
        }
        excluded
    }

    pub fn load(path: &Path) -> Result<Self, ParameterError> {
        let content = std::fs::read_to_string(path).map_err(|e| ParameterError::Io {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        serde_json::from_str(&content).map_err(|e| ParameterError::Json {
            path: path.to_string_lossy().to_string(),
            source: e,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ParameterError> {
        let content = serde_json::to_string_pretty(self).map_err(|e| ParameterError::Json {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        std::fs::write(path, content).map_err(|e| ParameterError::Io {
            path: path.to_string_lossy().to_string(),
            source: e,
        })
    }

    /// Validates the parameter set against a system before binding.
    pub fn check_atom_count(&self, system: &System) -> Result<(), ParameterError> {
        if self.atom_count != system.atom_count() {
            return Err(ParameterError::AtomCountMismatch {
                expected: self.atom_count,
                got: system.atom_count(),
            });
        }
        Ok(())
    }
}
