//! The Potential capability and its concrete back ends.
//!
//! Distinct methods are selected by name at construction time through
//! [`create`]. Tight-binding and semi-empirical methods are compiled out of
//! this build and report themselves unavailable; unknown names fall back to
//! the classical force field.

pub mod dispersion;
pub mod forcefield;
pub mod params;

use crate::core::models::system::System;
use crate::core::units::LengthUnit;
use nalgebra::Vector3;
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum PotentialError {
    #[error("Method '{0}' was not compiled into this build")]
    BackendUnavailable(String),
    #[error("Self-consistent cycle did not converge within {iterations} iterations")]
    Convergence { iterations: usize },
    #[error("Numerical failure in backend: {0}")]
    Numerical(String),
    #[error("Backend used before a system was bound")]
    NotBound,
    #[error("Parameter error: {0}")]
    Parameter(String),
}

fn default_parameter_file() -> PathBuf {
    PathBuf::from("ff_param.json")
}

fn default_accuracy() -> f64 {
    1e-8
}

fn default_max_scf_iterations() -> usize {
    100
}

fn default_threads() -> usize {
    1
}

/// Options shared by every backend, merged from the configuration tree.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PotentialOptions {
    /// Convergence accuracy for self-consistent backends.
    pub accuracy: f64,
    /// Iteration cap for self-consistent cycles.
    pub max_scf_iterations: usize,
    /// Implicit-solvent model name, if any.
    pub solvent: Option<String>,
    /// Where force-field methods read and write their parameter file.
    pub parameter_file: PathBuf,
    /// Whether a freshly generated parameter set is written to disk.
    pub write_parameters: bool,
    /// Thread count forwarded to backends that thread internally.
    pub threads: usize,
}

impl Default for PotentialOptions {
    fn default() -> Self {
        Self {
            accuracy: default_accuracy(),
            max_scf_iterations: default_max_scf_iterations(),
            solvent: None,
            parameter_file: default_parameter_file(),
            write_parameters: false,
            threads: default_threads(),
        }
    }
}

/// The capability every energy backend exposes.
///
/// A backend is bound once to an atom list, then receives geometry updates
/// in its native length unit and evaluates on demand. The optional
/// observables default to empty stubs; backends that can produce them
/// override the accessors.
pub trait Potential: Send {
    /// One-time binding to the atom list of `system`.
    fn bind(&mut self, system: &System) -> Result<(), PotentialError>;

    /// Replaces the coordinates. `geometry` is in [`Potential::native_unit`]
    /// and must not be retained across calls.
    fn set_geometry(&mut self, geometry: &[Vector3<f64>]) -> Result<(), PotentialError>;

    /// Computes the energy in Hartree; with `want_gradient` the gradient
    /// becomes readable through [`Potential::gradient`].
    fn evaluate(&mut self, want_gradient: bool) -> Result<f64, PotentialError>;

    /// The gradient of the last evaluation, Hartree per native length unit.
    fn gradient(&self) -> &[Vector3<f64>];

    /// The length unit this backend expects coordinates in.
    fn native_unit(&self) -> LengthUnit;

    /// Installs an externally loaded force-field parameter set. Backends
    /// without file-based parameters ignore the call.
    fn install_parameters(&mut self, _params: params::ForceFieldParameters) {}

    fn dipole(&self) -> Vector3<f64> {
        Vector3::zeros()
    }

    fn charges(&self) -> Vec<f64> {
        Vec::new()
    }

    fn bond_orders(&self) -> Vec<Vec<f64>> {
        Vec::new()
    }

    fn orbital_energies(&self) -> Vec<f64> {
        Vec::new()
    }

    fn electron_count(&self) -> usize {
        0
    }
}

const FORCE_FIELD_METHODS: &[&str] = &["ff", "uff"];
const DISPERSION_METHODS: &[&str] = &["d3", "d4"];
const TIGHT_BINDING_METHODS: &[&str] = &["gfn1", "gfn2"];
const SEMIEMPIRICAL_METHODS: &[&str] = &["pm6"];

/// The generated force field run in its non-reentrant compatibility mode.
pub const NON_REENTRANT_FORCE_FIELD: &str = "cgfnff";

/// True for the one force-field variant whose backend state cannot be
/// instantiated concurrently; the Hessian engine restricts itself to a
/// single thread for it.
pub fn is_non_reentrant(method: &str) -> bool {
    method == NON_REENTRANT_FORCE_FIELD
}

/// Constructs the backend selected by `method`.
///
/// Unknown names fall back to the classical force field; methods compiled
/// out of this build yield [`PotentialError::BackendUnavailable`].
pub fn create(
    method: &str,
    _options: &PotentialOptions,
) -> Result<Box<dyn Potential>, PotentialError> {
    if FORCE_FIELD_METHODS.contains(&method) || method == NON_REENTRANT_FORCE_FIELD {
        return Ok(Box::new(forcefield::ClassicalForceField::new()));
    }
    if DISPERSION_METHODS.contains(&method) {
        return Ok(Box::new(dispersion::DispersionPotential::new()));
    }
    if TIGHT_BINDING_METHODS.contains(&method) || SEMIEMPIRICAL_METHODS.contains(&method) {
        return Err(PotentialError::BackendUnavailable(method.to_string()));
    }
    warn!(method, "Unknown method, falling back to the classical force field");
    Ok(Box::new(forcefield::ClassicalForceField::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn force_field_names_resolve_to_a_backend() {
        for method in ["ff", "uff", "cgfnff"] {
            assert!(create(method, &PotentialOptions::default()).is_ok());
        }
    }

    #[test]
    fn compiled_out_methods_report_unavailable() {
        for method in ["gfn1", "gfn2", "pm6"] {
            let result = create(method, &PotentialOptions::default());
            assert!(matches!(
                result,
                Err(PotentialError::BackendUnavailable(m)) if m == method
            ));
        }
    }

    #[test]
    fn unknown_method_falls_back_to_force_field() {
        let backend = create("no-such-method", &PotentialOptions::default()).unwrap();
        assert_eq!(backend.native_unit(), LengthUnit::Angstrom);
    }

    #[test]
    fn only_the_flagged_force_field_is_non_reentrant() {
        assert!(is_non_reentrant("cgfnff"));
        assert!(!is_non_reentrant("ff"));
        assert!(!is_non_reentrant("gfn2"));
    }
}
