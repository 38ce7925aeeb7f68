//! Finite-difference construction of the mass-weighted Hessian, rigid-body
//! projection and frequency analysis.
//!
//! Three schemes exist: a full-numerical 4-point energy scheme (one task per
//! matrix element), a semi-numerical 2-point gradient scheme (one task per
//! coordinate, O(N) evaluations) and a per-atom chunked scheme for the one
//! force-field variant whose backend cannot be instantiated concurrently.
//! Every task owns an independently constructed backend built from the same
//! immutable configuration.

use super::error::EngineError;
use super::facade::EnergyFacade;
use super::pool::{Task, WorkerPool};
use crate::core::constants::{FREQ_SCALE_FACTOR, FREQ_SCALE_OFFSET};
use crate::core::models::system::System;
use crate::core::potentials::{self, PotentialOptions};
use crate::core::units;
use nalgebra::{DMatrix, SymmetricEigen, Vector3};
use std::sync::Arc;
use tracing::{info, instrument};

/// Default finite-difference step in Bohr.
pub const DEFAULT_STEP_BOHR: f64 = 5e-3;

/// Projected eigenvalues below this are rigid-body modes.
const RIGID_MODE_THRESHOLD: f64 = 1e-10;

/// Rank guard of the symmetric orthonormaliser; basis columns with smaller
/// overlap eigenvalues are dropped (the axis rotation of a linear molecule).
const ORTHONORMALISER_RANK_GUARD: f64 = 1e-10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HessianScheme {
    /// 4-point mixed partial differences of the energy, O(N²) tasks.
    FullNumerical,
    /// 2-point central differences of the gradient, O(N) tasks.
    SemiNumerical,
    /// Semi-numerical columns computed atom-wise on a single thread, for
    /// non-reentrant backends.
    PerAtomChunked,
}

/// How a normal mode is classified after projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeKind {
    Vibration,
    Imaginary,
    RigidBody,
}

/// One normal mode of the analysed system.
#[derive(Debug, Clone, Copy)]
pub struct Mode {
    /// Scaled wavenumber in cm⁻¹; zero for rigid-body modes.
    pub wavenumber: f64,
    pub kind: ModeKind,
}

/// The outcome of a Hessian build: the symmetrised Cartesian matrix in
/// Hartree/Bohr² and the classified modes, sorted by eigenvalue.
#[derive(Debug, Clone)]
pub struct HessianResult {
    pub hessian: DMatrix<f64>,
    pub modes: Vec<Mode>,
}

impl HessianResult {
    /// Wavenumbers of the genuine vibrations, ascending.
    pub fn vibrational_wavenumbers(&self) -> Vec<f64> {
        self.modes
            .iter()
            .filter(|m| m.kind == ModeKind::Vibration)
            .map(|m| m.wavenumber)
            .collect()
    }

    pub fn imaginary_count(&self) -> usize {
        self.modes
            .iter()
            .filter(|m| m.kind == ModeKind::Imaginary)
            .count()
    }

    pub fn rigid_body_count(&self) -> usize {
        self.modes
            .iter()
            .filter(|m| m.kind == ModeKind::RigidBody)
            .count()
    }
}

/// Builds the Hessian of one system with one method.
///
/// Constructed per request; [`HessianEngine::run`] executes to completion
/// and yields a [`HessianResult`].
pub struct HessianEngine {
    system: Arc<System>,
    method: String,
    options: PotentialOptions,
    scheme: HessianScheme,
    step: f64,
    threads: usize,
}

impl HessianEngine {
    pub fn new(system: System, method: &str, options: PotentialOptions) -> Self {
        let threads = options.threads.max(1);
        Self {
            system: Arc::new(system),
            method: method.to_string(),
            options,
            scheme: HessianScheme::SemiNumerical,
            step: DEFAULT_STEP_BOHR,
            threads,
        }
    }

    pub fn with_scheme(mut self, scheme: HessianScheme) -> Self {
        self.scheme = scheme;
        self
    }

    pub fn with_step(mut self, step_bohr: f64) -> Self {
        self.step = step_bohr;
        self
    }

    /// The scheme that will actually run: non-reentrant force fields are
    /// forced onto the single-threaded per-atom path.
    pub fn effective_scheme(&self) -> HessianScheme {
        if potentials::is_non_reentrant(&self.method) {
            HessianScheme::PerAtomChunked
        } else {
            self.scheme
        }
    }

    #[instrument(skip_all, name = "hessian_build", fields(method = %self.method, atoms = self.system.atom_count()))]
    pub fn run(&self) -> Result<HessianResult, EngineError> {
        let scheme = self.effective_scheme();
        info!(?scheme, "Starting Hessian calculation");
        let hessian = match scheme {
            HessianScheme::FullNumerical => self.build_full_numerical()?,
            HessianScheme::SemiNumerical => self.build_semi_numerical()?,
            HessianScheme::PerAtomChunked => self.build_chunked()?,
        };
        let hessian = symmetrize(hessian);
        let modes = analyze(&hessian, &self.system);
        Ok(HessianResult { hessian, modes })
    }

    /// Analyses a Hessian read from a file instead of recomputing it.
    pub fn analyze_loaded(&self, hessian: DMatrix<f64>) -> HessianResult {
        let hessian = symmetrize(hessian);
        let modes = analyze(&hessian, &self.system);
        HessianResult { hessian, modes }
    }

    /// Options handed to the per-task backends: identical to the engine's,
    /// with parameter writing disabled so tasks never race on the file.
    fn task_options(&self) -> PotentialOptions {
        PotentialOptions {
            write_parameters: false,
            ..self.options.clone()
        }
    }

    fn build_full_numerical(&self) -> Result<DMatrix<f64>, EngineError> {
        let n = self.system.atom_count();
        let mut pool = WorkerPool::new();
        for i in 0..n {
            for j in 0..n {
                for xi in 0..3 {
                    for xj in 0..3 {
                        pool.add_task(FullNumericalTask {
                            system: Arc::clone(&self.system),
                            method: self.method.clone(),
                            options: self.task_options(),
                            i,
                            xi,
                            j,
                            xj,
                            step: self.step,
                            value: 0.0,
                        });
                    }
                }
            }
        }
        pool.set_active_threads(self.threads);
        pool.run_dynamic(2);
        pool.start_and_wait()?;

        let mut hessian = DMatrix::zeros(3 * n, 3 * n);
        for task in pool.finished() {
            hessian[(3 * task.i + task.xi, 3 * task.j + task.xj)] = task.value;
        }
        Ok(hessian)
    }

    fn build_semi_numerical(&self) -> Result<DMatrix<f64>, EngineError> {
        let n = self.system.atom_count();
        let mut pool = WorkerPool::new();
        for i in 0..n {
            for xi in 0..3 {
                pool.add_task(GradientColumnTask {
                    system: Arc::clone(&self.system),
                    method: self.method.clone(),
                    options: self.task_options(),
                    i,
                    xi,
                    step: self.step,
                    column: Vec::new(),
                });
            }
        }
        pool.set_active_threads(self.threads);
        pool.run_dynamic(2);
        pool.start_and_wait()?;

        let mut hessian = DMatrix::zeros(3 * n, 3 * n);
        for task in pool.finished() {
            let row = 3 * task.i + task.xi;
            for (col, value) in task.column.iter().enumerate() {
                hessian[(row, col)] = *value;
            }
        }
        Ok(hessian)
    }

    fn build_chunked(&self) -> Result<DMatrix<f64>, EngineError> {
        let n = self.system.atom_count();
        let mut pool = WorkerPool::new();
        pool.add_task(ChunkedTask {
            system: Arc::clone(&self.system),
            method: self.method.clone(),
            options: self.task_options(),
            atoms: (0..n).collect(),
            step: self.step,
            partial: DMatrix::zeros(3 * n, 3 * n),
        });
        pool.set_active_threads(1);
        pool.run_static();
        pool.start_and_wait()?;

        let mut hessian = DMatrix::zeros(3 * n, 3 * n);
        for task in pool.finished() {
            hessian += &task.partial;
        }
        Ok(hessian)
    }
}

/// Averages the matrix with its transpose.
pub fn symmetrize(hessian: DMatrix<f64>) -> DMatrix<f64> {
    let transposed = hessian.transpose();
    (hessian + transposed) * 0.5
}

/// Divides element `(iα, jβ)` by `√(mᵢ·mⱼ)`, masses in amu.
pub fn mass_weight(hessian: &DMatrix<f64>, system: &System) -> DMatrix<f64> {
    let mut weighted = hessian.clone();
    let masses: Vec<f64> = system.atoms().iter().map(|a| a.mass).collect();
    for row in 0..weighted.nrows() {
        for col in 0..weighted.ncols() {
            let factor = 1.0 / (masses[row / 3] * masses[col / 3]).sqrt();
            weighted[(row, col)] *= factor;
        }
    }
    weighted
}

/// Removes the rigid translations and rotations from the Hessian.
///
/// The 3N×6 basis `D` holds the three translations and the three
/// infinitesimal rotations `eₖ × rᵢ`; the symmetric orthonormaliser
/// `R = D·(DᵀD)⁻¹ᐟ²` turns it into an orthonormal rigid-body space, with
/// rank-deficient columns dropped (a linear molecule contributes only five).
/// The result is `(I − RRᵀ)·H·(I − RRᵀ)`, which zeroes the rigid subspace.
pub fn project(hessian: &DMatrix<f64>, system: &System) -> DMatrix<f64> {
    let n = system.atom_count();
    let dim = 3 * n;
    let mut basis = DMatrix::zeros(dim, 6);

    for i in 0..n {
        for axis in 0..3 {
            basis[(3 * i + axis, axis)] = 1.0;
        }
        let r = system.geometry()[i];
        for (k, unit) in [Vector3::x(), Vector3::y(), Vector3::z()].iter().enumerate() {
            let rotation = unit.cross(&r);
            basis[(3 * i, 3 + k)] = rotation.x;
            basis[(3 * i + 1, 3 + k)] = rotation.y;
            basis[(3 * i + 2, 3 + k)] = rotation.z;
        }
    }

    let overlap = basis.transpose() * &basis;
    let eigen = SymmetricEigen::new(overlap);
    let mut inverse_sqrt = DMatrix::zeros(6, 6);
    for k in 0..6 {
        let value = eigen.eigenvalues[k];
        if value > ORTHONORMALISER_RANK_GUARD {
            let column = eigen.eigenvectors.column(k);
            inverse_sqrt += column * column.transpose() / value.sqrt();
        }
    }
    let rigid = basis * inverse_sqrt;

    let identity = DMatrix::identity(dim, dim);
    let projector = identity - &rigid * rigid.transpose();
    &projector * hessian * &projector
}

fn sorted_eigenvalues(matrix: DMatrix<f64>) -> Vec<f64> {
    let mut values: Vec<f64> = SymmetricEigen::new(matrix).eigenvalues.iter().copied().collect();
    values.sort_by(f64::total_cmp);
    values
}

/// Classifies every mode of a symmetrised Hessian.
///
/// The raw mass-weighted spectrum supplies the wavenumbers through
/// `ν = sign(λ)·a·√|λ| + b`; the projected spectrum decides which modes are
/// rigid-body or imaginary.
pub fn analyze(hessian: &DMatrix<f64>, system: &System) -> Vec<Mode> {
    let raw = sorted_eigenvalues(mass_weight(hessian, system));
    let projected = sorted_eigenvalues(mass_weight(&project(hessian, system), system));

    raw.iter()
        .zip(&projected)
        .map(|(&lambda, &lambda_projected)| {
            let kind = if lambda_projected.abs() < RIGID_MODE_THRESHOLD {
                ModeKind::RigidBody
            } else if lambda_projected < 0.0 || lambda < 0.0 {
                ModeKind::Imaginary
            } else {
                ModeKind::Vibration
            };
            let wavenumber = match kind {
                ModeKind::RigidBody => 0.0,
                _ => lambda.signum() * FREQ_SCALE_FACTOR * lambda.abs().sqrt() + FREQ_SCALE_OFFSET,
            };
            Mode { wavenumber, kind }
        })
        .collect()
}

struct FullNumericalTask {
    system: Arc<System>,
    method: String,
    options: PotentialOptions,
    i: usize,
    xi: usize,
    j: usize,
    xj: usize,
    step: f64,
    value: f64,
}

impl FullNumericalTask {
    fn displaced_energy(
        &self,
        facade: &mut EnergyFacade,
        sign_i: f64,
        sign_j: f64,
    ) -> Result<f64, EngineError> {
        let step_angstrom = units::bohr_to_angstrom(self.step);
        let mut geometry = self.system.geometry().to_vec();
        geometry[self.i][self.xi] += sign_i * step_angstrom;
        geometry[self.j][self.xj] += sign_j * step_angstrom;
        facade.set_geometry(&geometry)?;
        facade.evaluate(false)
    }
}

impl Task for FullNumericalTask {
    fn execute(&mut self) -> Result<(), EngineError> {
        let mut facade = EnergyFacade::new(&self.method, self.options.clone())?;
        facade.set_system(&self.system)?;

        let e_pp = self.displaced_energy(&mut facade, 1.0, 1.0)?;
        let e_mp = self.displaced_energy(&mut facade, -1.0, 1.0)?;
        let e_pm = self.displaced_energy(&mut facade, 1.0, -1.0)?;
        let e_mm = self.displaced_energy(&mut facade, -1.0, -1.0)?;

        self.value = (e_pp - e_mp - e_pm + e_mm) / (4.0 * self.step * self.step);
        Ok(())
    }
}

struct GradientColumnTask {
    system: Arc<System>,
    method: String,
    options: PotentialOptions,
    i: usize,
    xi: usize,
    step: f64,
    column: Vec<f64>,
}

/// Central-difference gradient column for coordinate `(i, xi)`, in
/// Hartree/Bohr². Shared by the semi-numerical and chunked schemes.
fn gradient_column(
    facade: &mut EnergyFacade,
    system: &System,
    i: usize,
    xi: usize,
    step_bohr: f64,
) -> Result<Vec<f64>, EngineError> {
    let step_angstrom = units::bohr_to_angstrom(step_bohr);

    let mut plus = system.geometry().to_vec();
    plus[i][xi] += step_angstrom;
    facade.set_geometry(&plus)?;
    facade.evaluate(true)?;
    let gradient_plus: Vec<Vector3<f64>> = facade.gradient().to_vec();

    let mut minus = system.geometry().to_vec();
    minus[i][xi] -= step_angstrom;
    facade.set_geometry(&minus)?;
    facade.evaluate(true)?;
    let gradient_minus = facade.gradient();

    let mut column = Vec::with_capacity(3 * system.atom_count());
    for (gp, gm) in gradient_plus.iter().zip(gradient_minus) {
        for axis in 0..3 {
            let derivative = units::gradient_angstrom_to_bohr(gp[axis] - gm[axis]);
            column.push(derivative / (2.0 * step_bohr));
        }
    }
    Ok(column)
}

impl Task for GradientColumnTask {
    fn execute(&mut self) -> Result<(), EngineError> {
        let mut facade = EnergyFacade::new(&self.method, self.options.clone())?;
        facade.set_system(&self.system)?;
        self.column = gradient_column(&mut facade, &self.system, self.i, self.xi, self.step)?;
        Ok(())
    }
}

struct ChunkedTask {
    system: Arc<System>,
    method: String,
    options: PotentialOptions,
    atoms: Vec<usize>,
    step: f64,
    partial: DMatrix<f64>,
}

impl Task for ChunkedTask {
    fn execute(&mut self) -> Result<(), EngineError> {
        let mut facade = EnergyFacade::new(&self.method, self.options.clone())?;
        facade.set_system(&self.system)?;
        for &i in &self.atoms {
            for xi in 0..3 {
                let column = gradient_column(&mut facade, &self.system, i, xi, self.step)?;
                for (col, value) in column.iter().enumerate() {
                    self.partial[(3 * i + xi, col)] = *value;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn water() -> System {
        System::new(
            &[8, 1, 1],
            vec![
                Vector3::new(0.0, 0.0, 0.117),
                Vector3::new(0.0, 0.757, -0.469),
                Vector3::new(0.0, -0.757, -0.469),
            ],
            0,
            1,
        )
        .unwrap()
    }

    fn carbon_dioxide() -> System {
        System::new(
            &[8, 6, 8],
            vec![
                Vector3::new(-1.16, 0.0, 0.0),
                Vector3::new(0.0, 0.0, 0.0),
                Vector3::new(1.16, 0.0, 0.0),
            ],
            0,
            1,
        )
        .unwrap()
    }

    fn engine(system: System) -> HessianEngine {
        HessianEngine::new(system, "ff", PotentialOptions::default())
    }

    #[test]
    fn symmetrised_hessian_is_symmetric_to_machine_precision() {
        let result = engine(water()).run().unwrap();
        let h = &result.hessian;
        let mut max_asymmetry = 0.0_f64;
        for i in 0..h.nrows() {
            for j in 0..h.ncols() {
                max_asymmetry = max_asymmetry.max((h[(i, j)] - h[(j, i)]).abs());
            }
        }
        assert!(max_asymmetry < 1e-10);
    }

    #[test]
    fn projection_pushes_rigid_modes_below_threshold() {
        let result = engine(water()).run().unwrap();
        let projected = sorted_eigenvalues(mass_weight(
            &project(&result.hessian, &water()),
            &water(),
        ));
        for &value in projected.iter().take(6) {
            assert!(value.abs() < 1e-8, "rigid eigenvalue {value}");
        }
    }

    #[test]
    fn water_has_six_rigid_modes_and_three_vibrations() {
        let result = engine(water()).run().unwrap();
        assert_eq!(result.rigid_body_count(), 6);
        assert_eq!(result.vibrational_wavenumbers().len(), 3);
        assert_eq!(result.imaginary_count(), 0);
        for wavenumber in result.vibrational_wavenumbers() {
            assert!(wavenumber > 0.0);
        }
    }

    #[test]
    fn linear_molecule_sheds_five_rigid_modes_and_keeps_four_vibrations() {
        let result = engine(carbon_dioxide()).run().unwrap();
        assert_eq!(result.rigid_body_count(), 5);
        assert_eq!(result.vibrational_wavenumbers().len(), 4);
    }

    #[test]
    fn full_and_semi_numerical_schemes_agree() {
        let full = engine(water())
            .with_scheme(HessianScheme::FullNumerical)
            .run()
            .unwrap();
        let semi = engine(water())
            .with_scheme(HessianScheme::SemiNumerical)
            .run()
            .unwrap();
        let difference = (&full.hessian - &semi.hessian).abs().max();
        assert!(difference < 1e-4, "scheme difference {difference}");
    }

    #[test]
    fn non_reentrant_method_forces_the_chunked_scheme() {
        let engine = HessianEngine::new(water(), "cgfnff", PotentialOptions::default())
            .with_scheme(HessianScheme::FullNumerical);
        assert_eq!(engine.effective_scheme(), HessianScheme::PerAtomChunked);
        let result = engine.run().unwrap();
        assert_eq!(result.rigid_body_count(), 6);
    }

    #[test]
    fn chunked_scheme_matches_the_semi_numerical_matrix() {
        let semi = engine(water()).run().unwrap();
        let chunked = engine(water())
            .with_scheme(HessianScheme::PerAtomChunked)
            .run()
            .unwrap();
        let difference = (&semi.hessian - &chunked.hessian).abs().max();
        assert!(difference < 1e-12);
    }
}
