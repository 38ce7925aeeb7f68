use super::{Potential, PotentialError};
use crate::core::models::system::System;
use crate::core::units::{self, LengthUnit};
use nalgebra::Vector3;

/// Damping radius offset in Bohr, shared by every element pair.
const DAMPING_RADIUS: f64 = 3.0;

/// Global scaling of the dispersion energy.
const S6: f64 = 1.0;

/// Homonuclear C6 coefficients in Hartree·Bohr⁶ for common elements;
/// heavier elements fall back to a generic value.
fn c6_coefficient(z: u8) -> f64 {
    match z {
        1 => 3.0,
        6 => 27.3,
        7 => 19.6,
        8 => 12.8,
        9 => 9.5,
        15 => 130.0,
        16 => 128.0,
        17 => 90.4,
        35 => 162.0,
        53 => 385.0,
        _ => 40.0,
    }
}

/// Standalone pairwise dispersion correction.
///
/// `E = −s6 · Σ C6ᵢⱼ / (r⁶ + r₀⁶)` with a rational damping denominator that
/// keeps the short-range limit finite. Works in Bohr; C6 coefficients are
/// combined geometrically.
pub struct DispersionPotential {
    c6: Vec<f64>,
    geometry: Vec<Vector3<f64>>,
    gradient: Vec<Vector3<f64>>,
    bound: bool,
}

impl Default for DispersionPotential {
    fn default() -> Self {
        Self::new()
    }
}

impl DispersionPotential {
    pub fn new() -> Self {
        Self {
            c6: Vec::new(),
            geometry: Vec::new(),
            gradient: Vec::new(),
            bound: false,
        }
    }
}

impl Potential for DispersionPotential {
    fn bind(&mut self, system: &System) -> Result<(), PotentialError> {
        self.c6 = system.atoms().iter().map(|a| c6_coefficient(a.z)).collect();
        self.geometry = system
            .geometry()
            .iter()
            .map(units::vector_angstrom_to_bohr)
            .collect();
        self.gradient = vec![Vector3::zeros(); system.atom_count()];
        self.bound = true;
        Ok(())
    }

    fn set_geometry(&mut self, geometry: &[Vector3<f64>]) -> Result<(), PotentialError> {
        if !self.bound {
            return Err(PotentialError::NotBound);
        }
        self.geometry.clear();
        self.geometry.extend_from_slice(geometry);
        Ok(())
    }

    fn evaluate(&mut self, want_gradient: bool) -> Result<f64, PotentialError> {
        if !self.bound {
            return Err(PotentialError::NotBound);
        }
        for g in &mut self.gradient {
            *g = Vector3::zeros();
        }

        let r0_6 = DAMPING_RADIUS.powi(6);
        let mut energy = 0.0;
        for i in 0..self.geometry.len() {
            for j in (i + 1)..self.geometry.len() {
                let rij = self.geometry[i] - self.geometry[j];
                let r2 = rij.norm_squared();
                let r6 = r2 * r2 * r2;
                let c6 = (self.c6[i] * self.c6[j]).sqrt();
                let denominator = r6 + r0_6;
                energy -= S6 * c6 / denominator;

                if want_gradient {
                    // dE/dr = s6 · C6 · 6r⁵ / (r⁶ + r₀⁶)²
                    let r = r2.sqrt();
                    let de_dr = S6 * c6 * 6.0 * r6 / (r * denominator * denominator);
                    let force = de_dr / r * rij;
                    self.gradient[i] += force;
                    self.gradient[j] -= force;
                }
            }
        }

        if !energy.is_finite() {
            return Err(PotentialError::Numerical(
                "NaN or Inf in dispersion energy".to_string(),
            ));
        }
        Ok(energy)
    }

    fn gradient(&self) -> &[Vector3<f64>] {
        &self.gradient
    }

    fn native_unit(&self) -> LengthUnit {
        LengthUnit::Bohr
    }
}
