//! The single energy entry point consumed by the Hessian engine and the MD
//! integrator.
//!
//! The façade owns one [`Potential`] selected by method name, transports
//! geometry in and energy, gradient and observables out, and normalizes the
//! unit conventions: its public boundary is Ångström and Hartree/Ångström,
//! whatever the backend speaks internally.

use super::error::EngineError;
use crate::core::models::system::System;
use crate::core::potentials::params::ForceFieldParameters;
use crate::core::potentials::{self, Potential, PotentialError, PotentialOptions};
use crate::core::units::{self, LengthUnit};
use nalgebra::Vector3;
use tracing::{debug, info};

pub struct EnergyFacade {
    method: String,
    options: PotentialOptions,
    backend: Box<dyn Potential>,
    bound: bool,
    geometry: Vec<Vector3<f64>>,
    gradient: Vec<Vector3<f64>>,
    energy: f64,
    had_error: bool,
    had_nan: bool,
}

impl EnergyFacade {
    /// Creates a façade for `method`; fails if the backend was compiled out.
    pub fn new(method: &str, options: PotentialOptions) -> Result<Self, EngineError> {
        let backend = potentials::create(method, &options)?;
        Ok(Self {
            method: method.to_string(),
            options,
            backend,
            bound: false,
            geometry: Vec::new(),
            gradient: Vec::new(),
            energy: 0.0,
            had_error: false,
            had_nan: false,
        })
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn options(&self) -> &PotentialOptions {
        &self.options
    }

    /// Binds the backend to `system` once.
    ///
    /// Force-field methods read their parameter file when it exists; when it
    /// is absent a parameter set is generated from the current geometry and,
    /// with `write_parameters`, written back to the configured path.
    pub fn set_system(&mut self, system: &System) -> Result<(), EngineError> {
        if self.method_uses_parameter_file() {
            if self.options.parameter_file.exists() {
                let params = ForceFieldParameters::load(&self.options.parameter_file)
                    .map_err(|e| PotentialError::Parameter(e.to_string()))?;
                params
                    .check_atom_count(system)
                    .map_err(|e| PotentialError::Parameter(e.to_string()))?;
                debug!(path = %self.options.parameter_file.display(), "Loaded force-field parameters");
                self.backend.install_parameters(params);
            } else if self.options.write_parameters {
                let params = ForceFieldParameters::generate(system);
                params
                    .save(&self.options.parameter_file)
                    .map_err(|e| PotentialError::Parameter(e.to_string()))?;
                info!(path = %self.options.parameter_file.display(), "Wrote generated force-field parameters");
                self.backend.install_parameters(params);
            }
        }
        self.backend.bind(system)?;
        self.geometry = system.geometry().to_vec();
        self.gradient = vec![Vector3::zeros(); system.atom_count()];
        self.bound = true;
        Ok(())
    }

    /// Stages new coordinates, given in Ångström.
    pub fn set_geometry(&mut self, geometry: &[Vector3<f64>]) -> Result<(), EngineError> {
        if geometry.len() != self.geometry.len() {
            return Err(EngineError::Internal(format!(
                "geometry of {} atoms supplied to a facade bound to {}",
                geometry.len(),
                self.geometry.len()
            )));
        }
        self.geometry.clear();
        self.geometry.extend_from_slice(geometry);
        Ok(())
    }

    /// Stages new coordinates from a flat `[x0, y0, z0, …]` vector in
    /// Ångström.
    pub fn set_geometry_flat(&mut self, coords: &[f64]) -> Result<(), EngineError> {
        let geometry: Vec<Vector3<f64>> = coords
            .chunks_exact(3)
            .map(|c| Vector3::new(c[0], c[1], c[2]))
            .collect();
        self.set_geometry(&geometry)
    }

    /// Evaluates the bound backend at the staged geometry.
    ///
    /// Returns the energy in Hartree. Convergence failures are recoverable
    /// and latch [`EnergyFacade::has_error`] until the next successful call;
    /// a NaN result latches [`EnergyFacade::has_nan`] and is fatal to the
    /// calling run.
    pub fn evaluate(&mut self, want_gradient: bool) -> Result<f64, EngineError> {
        if !self.bound {
            return Err(EngineError::from(PotentialError::NotBound));
        }

        let native: Vec<Vector3<f64>> = match self.backend.native_unit() {
            LengthUnit::Angstrom => self.geometry.clone(),
            LengthUnit::Bohr => self
                .geometry
                .iter()
                .map(units::vector_angstrom_to_bohr)
                .collect(),
        };
        self.backend.set_geometry(&native)?;

        match self.backend.evaluate(want_gradient) {
            Ok(energy) if energy.is_nan() => {
                self.had_nan = true;
                Err(EngineError::Numerical(
                    "backend produced NaN energy".to_string(),
                ))
            }
            Ok(energy) => {
                self.energy = energy;
                self.had_error = false;
                self.had_nan = false;
                if want_gradient {
                    let raw = self.backend.gradient();
                    self.gradient.clear();
                    match self.backend.native_unit() {
                        LengthUnit::Angstrom => self.gradient.extend_from_slice(raw),
                        LengthUnit::Bohr => self.gradient.extend(
                            raw.iter()
                                .map(|g| g.map(units::gradient_bohr_to_angstrom)),
                        ),
                    }
                    if self.gradient.iter().any(|g| g.iter().any(|c| c.is_nan())) {
                        self.had_nan = true;
                        return Err(EngineError::Numerical(
                            "backend produced NaN gradient".to_string(),
                        ));
                    }
                }
                Ok(energy)
            }
            Err(PotentialError::Convergence { iterations }) => {
                self.had_error = true;
                Err(EngineError::from(PotentialError::Convergence { iterations }))
            }
            Err(PotentialError::Numerical(message)) => {
                self.had_nan = true;
                Err(EngineError::from(PotentialError::Numerical(message)))
            }
            Err(other) => Err(EngineError::from(other)),
        }
    }

    /// The energy of the last successful evaluation, Hartree.
    pub fn energy(&self) -> f64 {
        self.energy
    }

    /// The gradient of the last successful evaluation, Hartree/Ångström.
    pub fn gradient(&self) -> &[Vector3<f64>] {
        &self.gradient
    }

    /// True after a backend reported a recoverable non-converged state;
    /// cleared by the next successful [`EnergyFacade::evaluate`].
    pub fn has_error(&self) -> bool {
        self.had_error
    }

    /// True if the last evaluation produced NaN anywhere.
    pub fn has_nan(&self) -> bool {
        self.had_nan
    }

    pub fn dipole(&self) -> Vector3<f64> {
        self.backend.dipole()
    }

    pub fn charges(&self) -> Vec<f64> {
        self.backend.charges()
    }

    pub fn bond_orders(&self) -> Vec<Vec<f64>> {
        self.backend.bond_orders()
    }

    pub fn orbital_energies(&self) -> Vec<f64> {
        self.backend.orbital_energies()
    }

    pub fn electron_count(&self) -> usize {
        self.backend.electron_count()
    }

    fn method_uses_parameter_file(&self) -> bool {
        matches!(self.method.as_str(), "ff" | "uff" | "cgfnff")
    }
}
