use super::params::ForceFieldParameters;
use super::{Potential, PotentialError};
use crate::core::models::system::System;
use crate::core::units::{self, LengthUnit};
use itertools::Itertools;
use nalgebra::Vector3;
use std::collections::HashSet;

/// Angle terms closer to linearity than this are skipped in the gradient;
/// their restoring force vanishes there and the geometry factor is singular.
const LINEAR_ANGLE_GUARD: f64 = 1e-8;

/// The generated classical force field.
///
/// Harmonic bond and angle terms with equilibria taken from the geometry the
/// parameters were generated at, plus Lennard-Jones and Coulomb non-bonded
/// interactions over all pairs that are not 1-2 or 1-3 neighbours. Works in
/// Ångström and Hartree throughout.
pub struct ClassicalForceField {
    params: Option<ForceFieldParameters>,
    exclusions: HashSet<(usize, usize)>,
    geometry: Vec<Vector3<f64>>,
    gradient: Vec<Vector3<f64>>,
    bound: bool,
}

impl Default for ClassicalForceField {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassicalForceField {
    pub fn new() -> Self {
        Self {
            params: None,
            exclusions: HashSet::new(),
            geometry: Vec::new(),
            gradient: Vec::new(),
            bound: false,
        }
    }

    /// Installs an externally loaded parameter set; otherwise [`bind`]
    /// generates one from the bound geometry.
    ///
    /// [`bind`]: Potential::bind
    pub fn set_parameters(&mut self, params: ForceFieldParameters) {
        self.exclusions = params.exclusions();
        self.params = Some(params);
    }

    fn bonded_energy(&self, gradient: Option<&mut [Vector3<f64>]>) -> f64 {
        let params = self.params.as_ref().expect("checked by evaluate");
        let mut energy = 0.0;
        let mut grad = gradient;

        for bond in &params.bonds {
            let rij = self.geometry[bond.i] - self.geometry[bond.j];
            let r = rij.norm();
            let displacement = r - bond.r0;
            energy += 0.5 * bond.force_constant * displacement * displacement;
            if let Some(g) = grad.as_deref_mut() {
                let force = bond.force_constant * displacement / r * rij;
                g[bond.i] += force;
                g[bond.j] -= force;
            }
        }

        for angle in &params.angles {
            let u = self.geometry[angle.i] - self.geometry[angle.j];
            let v = self.geometry[angle.k] - self.geometry[angle.j];
            let (nu, nv) = (u.norm(), v.norm());
            let cos_theta = (u.dot(&v) / (nu * nv)).clamp(-1.0, 1.0);
            let theta = cos_theta.acos();
            let displacement = theta - angle.theta0;
            energy += 0.5 * angle.force_constant * displacement * displacement;

            if let Some(g) = grad.as_deref_mut() {
                let sin_theta = (1.0 - cos_theta * cos_theta).sqrt();
                if sin_theta < LINEAR_ANGLE_GUARD {
                    continue;
                }
                let u_hat = u / nu;
                let v_hat = v / nv;
                let dtheta_di = (cos_theta * u_hat - v_hat) / (nu * sin_theta);
                let dtheta_dk = (cos_theta * v_hat - u_hat) / (nv * sin_theta);
                let prefactor = angle.force_constant * displacement;
                g[angle.i] += prefactor * dtheta_di;
                g[angle.k] += prefactor * dtheta_dk;
                g[angle.j] -= prefactor * (dtheta_di + dtheta_dk);
            }
        }

        energy
    }

    fn non_bonded_energy(&self, gradient: Option<&mut [Vector3<f64>]>) -> f64 {
        let params = self.params.as_ref().expect("checked by evaluate");
        let mut energy = 0.0;
        let mut grad = gradient;

        for (i, j) in (0..self.geometry.len()).tuple_combinations() {
            if self.exclusions.contains(&(i, j)) {
                continue;
            }
            let rij = self.geometry[i] - self.geometry[j];
            let r = rij.norm();

            let r_min = 0.5 * (params.vdw[i].r_min + params.vdw[j].r_min);
            let well_depth = (params.vdw[i].well_depth * params.vdw[j].well_depth).sqrt();
            let rho = r_min / r;
            let rho6 = rho.powi(6);
            let rho12 = rho6 * rho6;
            energy += well_depth * (rho12 - 2.0 * rho6);
            let mut de_dr = -12.0 * well_depth * (rho12 - rho6) / r;

            let qq = params.charges[i] * params.charges[j];
            if qq != 0.0 {
                energy += qq / units::angstrom_to_bohr(r);
                de_dr -= qq / units::angstrom_to_bohr(r * r);
            }

            if let Some(g) = grad.as_deref_mut() {
                let force = de_dr / r * rij;
                g[i] += force;
                g[j] -= force;
            }
        }

        energy
    }
}

impl Potential for ClassicalForceField {
    fn bind(&mut self, system: &System) -> Result<(), PotentialError> {
        match &self.params {
            Some(params) => params
                .check_atom_count(system)
                .map_err(|e| PotentialError::Parameter(e.to_string()))?,
            None => self.set_parameters(ForceFieldParameters::generate(system)),
        }
        self.geometry = system.geometry().to_vec();
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
        if !self.bound || self.params.is_none() {
            return Err(PotentialError::NotBound);
        }
        for g in &mut self.gradient {
            *g = Vector3::zeros();
        }

        let energy = if want_gradient {
            let mut grad = std::mem::take(&mut self.gradient);
            let e = self.bonded_energy(Some(&mut grad)) + self.non_bonded_energy(Some(&mut grad));
            self.gradient = grad;
            e
        } else {
            self.bonded_energy(None) + self.non_bonded_energy(None)
        };

        if !energy.is_finite()
            || self
                .gradient
                .iter()
                .any(|g| !(g.x.is_finite() && g.y.is_finite() && g.z.is_finite()))
        {
            return Err(PotentialError::Numerical(
                "NaN or Inf in force-field energy expression".to_string(),
            ));
        }
        Ok(energy)
    }

    fn gradient(&self) -> &[Vector3<f64>] {
        &self.gradient
    }

    fn native_unit(&self) -> LengthUnit {
        LengthUnit::Angstrom
    }

    fn charges(&self) -> Vec<f64> {
        self.params
            .as_ref()
            .map(|p| p.charges.clone())
            .unwrap_or_default()
    }

    fn install_parameters(&mut self, params: ForceFieldParameters) {
        self.set_parameters(params);
    }

    fn bond_orders(&self) -> Vec<Vec<f64>> {
        let Some(params) = &self.params else {
            return Vec::new();
        };
        let mut orders = vec![vec![0.0; params.atom_count]; params.atom_count];
        for bond in &params.bonds {
            orders[bond.i][bond.j] = 1.0;
            orders[bond.j][bond.i] = 1.0;
        }
        orders
    }
}
