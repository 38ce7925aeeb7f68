//! The molecular-dynamics integrator.
//!
//! Velocity-Verlet or RATTLE-constrained Verlet propagation with velocity
//! scaling thermostats, confining walls, centre-of-mass motion removal,
//! impulse re-seeding, topology-gated trajectory dumps and a rescue path
//! that rewinds to the last accepted snapshot. State is kept in atomic
//! units: Bohr, Hartree, electron masses and atomic time; femtoseconds enter
//! through the `FS2AMU` scale exactly once.

pub mod rattle;
pub mod restart;
pub mod thermostat;
pub mod wall;

use self::rattle::{RattleSelection, RattleSolver};
use self::restart::RestartState;
use self::thermostat::Thermostat;
use self::wall::{Wall, WallKind, WallShape};
use crate::core::constants::{AMU_TO_AU, FS2AMU, KB_HARTREE};
use crate::core::io::xyz;
use crate::core::models::system::System;
use crate::core::models::topology::{self, BondMatrix};
use crate::core::potentials::PotentialOptions;
use crate::core::units;
use crate::engine::error::EngineError;
use crate::engine::facade::EnergyFacade;
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

/// Margin added to the structure extent when wall bounds are derived
/// automatically, in Bohr.
const WALL_AUTO_MARGIN: f64 = 6.0;

/// How many accepted snapshots the rescue path keeps.
const SNAPSHOT_DEPTH: usize = 10;

/// The integrator aborts when the temperature exceeds this multiple of the
/// target.
const UNSTABLE_TEMPERATURE_FACTOR: f64 = 100.0;

fn default_method() -> String {
    "ff".to_string()
}

fn default_thermostat() -> String {
    "berendsen".to_string()
}

fn default_wall() -> String {
    "none".to_string()
}

fn default_wall_type() -> String {
    "logfermi".to_string()
}

/// The enumerated MD configuration, deserialized from a JSON tree merged
/// with these defaults. Unknown keys are configuration errors.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MdConfig {
    pub method: String,
    pub threads: usize,
    /// Integration step in femtoseconds.
    #[serde(rename = "dT")]
    pub dt: f64,
    /// Total simulation time in femtoseconds.
    #[serde(rename = "MaxTime")]
    pub max_time: f64,
    /// Target temperature in Kelvin.
    #[serde(rename = "T")]
    pub temperature: f64,
    pub thermostat: String,
    /// Thermostat relaxation time in femtoseconds; clamped to `dT`.
    pub coupling: f64,
    /// 0 = plain Verlet, 1 = RATTLE on all bonds, 2 = RATTLE on bonds
    /// involving hydrogen.
    pub rattle: u8,
    pub rattle_tolerance: f64,
    pub rattle_maxiter: usize,
    /// Hydrogen-mass repartitioning factor, ≥ 1.
    pub hmass: f64,
    /// Wall shape: "none", "spheric" or "rect".
    pub wall: String,
    /// Wall kind: "logfermi" or "harmonic".
    pub wall_type: String,
    /// Sphere radius in Bohr; non-positive derives it from the structure.
    pub wall_spheric_radius: f64,
    pub wall_x_min: f64,
    pub wall_x_max: f64,
    pub wall_y_min: f64,
    pub wall_y_max: f64,
    pub wall_z_min: f64,
    pub wall_z_max: f64,
    pub wall_beta: f64,
    pub wall_temp: f64,
    /// 0 = none, 1 = global, 2 = per fragment, 3 = both.
    pub rmrottrans: u8,
    /// Interval of COM-motion removal in femtoseconds; 0 disables it.
    #[serde(rename = "rm_COM")]
    pub rm_com: f64,
    /// Trajectory/topology-check interval in steps.
    pub dump: usize,
    /// Status-line interval in steps.
    pub print: usize,
    /// Restart-file interval in steps.
    pub writerestart: usize,
    /// Impulse threshold in Kelvin; when the current temperature exceeds it
    /// the velocities are re-seeded. Non-positive disables the check.
    pub impuls: f64,
    pub impuls_scaling: f64,
    /// Scaling of the initial Maxwell–Boltzmann velocities.
    pub velo: f64,
    /// −1 = wall clock, 0 = deterministic hash of (T, N), else literal.
    pub seed: i64,
    /// Reconstruct the backend every step to flush accumulated drift.
    #[serde(rename = "cleanenergy")]
    pub clean_energy: bool,
    #[serde(rename = "writeXYZ")]
    pub write_xyz: bool,
    /// Accepted for compatibility; unique-structure filtering is the job of
    /// the external RMSD driver.
    pub unique: bool,
    pub rmsd: f64,
    /// Accepted for compatibility; initial optimisation is the job of the
    /// external optimiser.
    pub opt: bool,
    pub rescue: bool,
    #[serde(rename = "MaxRescue")]
    pub max_rescue: usize,
    /// Bond-matrix entries allowed to differ before a dump is rejected.
    #[serde(rename = "MaxTopoDiff")]
    pub max_topo_diff: usize,
    pub nocenter: bool,
    pub norestart: bool,
    /// Force-field parameter file forwarded to the façade.
    pub param_file: Option<PathBuf>,
}

impl Default for MdConfig {
    fn default() -> Self {
        Self {
            method: default_method(),
            threads: 1,
            dt: 0.5,
            max_time: 5000.0,
            temperature: 298.15,
            thermostat: default_thermostat(),
            coupling: 10.0,
            rattle: 0,
            rattle_tolerance: 1e-4,
            rattle_maxiter: 100,
            hmass: 1.0,
            wall: default_wall(),
            wall_type: default_wall_type(),
            wall_spheric_radius: 0.0,
            wall_x_min: 0.0,
            wall_x_max: 0.0,
            wall_y_min: 0.0,
            wall_y_max: 0.0,
            wall_z_min: 0.0,
            wall_z_max: 0.0,
            wall_beta: 6.0,
            wall_temp: 298.15,
            rmrottrans: 0,
            rm_com: 100.0,
            dump: 50,
            print: 100,
            writerestart: 1000,
            impuls: 0.0,
            impuls_scaling: 0.75,
            velo: 1.0,
            seed: -1,
            clean_energy: false,
            write_xyz: true,
            unique: false,
            rmsd: 1.5,
            opt: false,
            rescue: false,
            max_rescue: 10,
            max_topo_diff: 15,
            nocenter: false,
            norestart: false,
            param_file: None,
        }
    }
}

impl MdConfig {
    /// Deserializes a configuration tree, merging absent keys from the
    /// defaults. Unknown or mistyped options are [`EngineError::Config`].
    pub fn from_json(tree: &serde_json::Value) -> Result<Self, EngineError> {
        let config: MdConfig = serde_json::from_value(tree.clone())
            .map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.dt <= 0.0 || self.max_time <= 0.0 {
            return Err(EngineError::Config(
                "dT and MaxTime must be positive".to_string(),
            ));
        }
        if self.hmass < 1.0 {
            return Err(EngineError::Config("hmass must be at least 1".to_string()));
        }
        if Thermostat::from_name(&self.thermostat, self.temperature, self.coupling).is_none() {
            return Err(EngineError::Config(format!(
                "unknown thermostat '{}'",
                self.thermostat
            )));
        }
        if !matches!(self.wall.as_str(), "none" | "spheric" | "rect") {
            return Err(EngineError::Config(format!(
                "unknown wall shape '{}'",
                self.wall
            )));
        }
        if self.wall != "none" && !matches!(self.wall_type.as_str(), "logfermi" | "harmonic") {
            return Err(EngineError::Config(format!(
                "wall enabled with invalid kind '{}'",
                self.wall_type
            )));
        }
        if self.rattle > 2 {
            return Err(EngineError::Config(
                "rattle must be 0 (off), 1 (all bonds) or 2 (hydrogen bonds)".to_string(),
            ));
        }
        if self.rmrottrans > 3 {
            return Err(EngineError::Config(
                "rmrottrans must lie in 0..=3".to_string(),
            ));
        }
        if self.dump == 0 || self.print == 0 || self.writerestart == 0 {
            return Err(EngineError::Config(
                "dump, print and writerestart intervals must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Thermostat relaxation clamped so it never undercuts the step.
    fn effective_coupling(&self) -> f64 {
        self.coupling.max(self.dt)
    }
}

/// How a finished run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MdOutcome {
    /// `MaxTime` was reached.
    Completed,
    /// The `stop` sentinel file requested a clean exit.
    Stopped,
}

/// Aggregate results of a run.
#[derive(Debug, Clone)]
pub struct MdSummary {
    pub outcome: MdOutcome,
    pub steps: usize,
    pub simulated_time_fs: f64,
    pub average_temperature: f64,
    pub average_epot: f64,
    pub average_ekin: f64,
    pub average_etot: f64,
    /// Largest |Etot − Etot(t=0)| observed, Hartree.
    pub max_total_energy_drift: f64,
}

/// The velocity-Verlet / RATTLE molecular-dynamics integrator.
///
/// Constructed once, initialised, then [`MdIntegrator::start`] runs until
/// `MaxTime`, the `stop` sentinel, or an unrecoverable failure.
pub struct MdIntegrator {
    config: MdConfig,
    system: System,
    facade: EnergyFacade,
    thermostat: Thermostat,
    wall: Wall,
    rattle: Option<RattleSolver>,
    rng: StdRng,
    working_dir: PathBuf,
    basename: String,

    positions: Vec<Vector3<f64>>,
    velocities: Vec<Vector3<f64>>,
    gradient: Vec<Vector3<f64>>,
    masses: Vec<f64>,
    dof: usize,

    current_step: usize,
    epot: f64,
    ekin: f64,
    etot: f64,
    temperature: f64,
    wall_energy: f64,
    etot_reference: Option<f64>,
    max_drift: f64,

    average_temperature: f64,
    average_epot: f64,
    average_ekin: f64,
    average_etot: f64,
    average_virial: f64,
    average_wall: f64,

    current_rescue: usize,
    snapshots: Vec<RestartState>,
    topo_initial: Option<BondMatrix>,
    restart_loaded: bool,
    initialised: bool,
}

impl MdIntegrator {
    pub fn new(config: MdConfig, system: System) -> Result<Self, EngineError> {
        config.validate()?;
        let mut options = PotentialOptions {
            threads: config.threads.max(1),
            ..PotentialOptions::default()
        };
        if let Some(path) = &config.param_file {
            options.parameter_file = path.clone();
        }
        let facade = EnergyFacade::new(&config.method, options)?;
        let thermostat = Thermostat::from_name(
            &config.thermostat,
            config.temperature,
            config.effective_coupling(),
        )
        .expect("validated above");
        let n = system.atom_count();
        Ok(Self {
            thermostat,
            facade,
            system,
            wall: Wall::none(),
            rattle: None,
            rng: StdRng::seed_from_u64(0),
            working_dir: PathBuf::from("."),
            basename: "kinemol".to_string(),
            positions: Vec::new(),
            velocities: Vec::new(),
            gradient: vec![Vector3::zeros(); n],
            masses: Vec::new(),
            dof: 3 * n,
            current_step: 0,
            epot: 0.0,
            ekin: 0.0,
            etot: 0.0,
            temperature: 0.0,
            wall_energy: 0.0,
            etot_reference: None,
            max_drift: 0.0,
            average_temperature: 0.0,
            average_epot: 0.0,
            average_ekin: 0.0,
            average_etot: 0.0,
            average_virial: 0.0,
            average_wall: 0.0,
            current_rescue: 0,
            snapshots: Vec::new(),
            topo_initial: None,
            restart_loaded: false,
            initialised: false,
            config,
        })
    }

    /// Directory for trajectory, restart and sentinel files.
    pub fn set_working_dir(&mut self, path: &Path) {
        self.working_dir = path.to_path_buf();
    }

    /// Base name of every emitted file.
    pub fn set_basename(&mut self, basename: &str) {
        self.basename = basename.to_string();
    }

    pub fn average_temperature(&self) -> f64 {
        self.average_temperature
    }

    pub fn kinetic_energy(&self) -> f64 {
        self.ekin
    }

    pub fn degrees_of_freedom(&self) -> usize {
        self.dof
    }

    /// Prepares the run: restart load, centering, mass setup, velocity
    /// sampling, constraint recording and the first gradient.
    #[instrument(skip_all, name = "md_initialise", fields(method = %self.config.method, atoms = self.system.atom_count()))]
    pub fn initialise(&mut self) -> Result<(), EngineError> {
        self.seed_rng();

        if !self.config.norestart {
            self.try_load_restart();
        }

        if !self.restart_loaded && !self.config.nocenter {
            self.system.center();
        }
        if self.config.opt {
            warn!("Initial optimisation requested but no optimiser is wired into this build");
        }
        if self.config.unique {
            warn!("Unique-structure filtering is handled by the external trajectory driver");
        }

        let n = self.system.atom_count();
        self.masses = self
            .system
            .masses(self.config.hmass)
            .into_iter()
            .map(|m| m * AMU_TO_AU)
            .collect();

        if !self.restart_loaded {
            self.positions = self
                .system
                .geometry()
                .iter()
                .map(units::vector_angstrom_to_bohr)
                .collect();
            self.velocities = vec![Vector3::zeros(); n];
            self.sample_velocities(self.config.velo);
        }

        let bonds = topology::perceive_bonds(&self.system);
        if self.config.rattle > 0 {
            let selection = if self.config.rattle == 2 {
                RattleSelection::HydrogenOnly
            } else {
                RattleSelection::AllBonds
            };
            let solver = RattleSolver::from_system(
                &self.system,
                &bonds,
                selection,
                self.config.rattle_tolerance,
                self.config.rattle_maxiter,
            );
            self.dof = (3 * n).saturating_sub(solver.constraint_count()).max(1);
            info!(
                constraints = solver.constraint_count(),
                dof = self.dof,
                "RATTLE constraints recorded"
            );
            self.rattle = Some(solver);
        } else {
            self.dof = 3 * n;
        }
        self.topo_initial = Some(bonds);
        self.wall = self.build_wall()?;

        self.facade.set_system(&self.system)?;
        self.update_gradient()?;
        self.update_kinetic_state();
        self.etot_reference = Some(self.epot + self.ekin);
        self.initialised = true;
        Ok(())
    }

    /// Runs until `MaxTime`, the `stop` sentinel, or an unrecoverable
    /// failure. On abnormal exit an `unstable_<basename>.json` restart is
    /// written before the error propagates.
    #[instrument(skip_all, name = "md_run")]
    pub fn start(&mut self) -> Result<MdSummary, EngineError> {
        if !self.initialised {
            return Err(EngineError::Internal(
                "integrator started before initialise()".to_string(),
            ));
        }
        info!(
            method = %self.config.method,
            dt_fs = self.config.dt,
            max_time_fs = self.config.max_time,
            target_temperature = self.config.temperature,
            thermostat = %self.config.thermostat,
            "Starting molecular dynamics"
        );
        self.print_status();

        let max_steps = (self.config.max_time / self.config.dt).ceil() as usize;
        while self.current_step < max_steps {
            if self.stop_requested() {
                info!("Sentinel file found, stopping gracefully");
                self.write_restart(&self.final_restart_path())?;
                return Ok(self.summary(MdOutcome::Stopped));
            }

            if self.current_step % self.config.dump == 0 {
                self.dump_checkpoint()?;
            }
            self.maybe_remove_com_motion();

            if let Err(error) = self.advance_step() {
                self.handle_step_failure(error)?;
            }
            self.update_kinetic_state();

            self.thermostat.apply(
                &mut self.velocities,
                self.ekin,
                self.temperature,
                self.dof,
                self.config.dt,
                &mut self.rng,
            );
            self.update_kinetic_state();
            self.track_drift();

            if self.temperature > UNSTABLE_TEMPERATURE_FACTOR * self.config.temperature {
                warn!(
                    temperature = self.temperature,
                    "Temperature exploded, writing unstable restart"
                );
                self.write_restart(&self.unstable_restart_path())?;
                return Err(EngineError::Numerical(format!(
                    "temperature {} exceeds {} times the target",
                    self.temperature, UNSTABLE_TEMPERATURE_FACTOR
                )));
            }

            if self.config.impuls > 0.0 && self.temperature > self.config.impuls {
                info!(
                    temperature = self.temperature,
                    threshold = self.config.impuls,
                    "Impulse threshold crossed, re-seeding velocities"
                );
                self.sample_velocities(self.config.velo * self.config.impuls_scaling);
                self.update_kinetic_state();
            }

            self.current_step += 1;
            self.update_averages();

            if self.current_step % self.config.print == 0 {
                self.print_status();
            }
            if self.current_step % self.config.writerestart == 0 {
                let path = self
                    .working_dir
                    .join(format!("{}_step_{}.json", self.basename, self.current_step));
                self.write_restart(&path)?;
            }
        }

        self.write_restart(&self.final_restart_path())?;
        info!(steps = self.current_step, "Molecular dynamics finished");
        Ok(self.summary(MdOutcome::Completed))
    }

    // --- stepping ---

    fn advance_step(&mut self) -> Result<(), EngineError> {
        if self.rattle.is_some() {
            self.rattle_step()
        } else {
            self.verlet_step()
        }
    }

    fn verlet_step(&mut self) -> Result<(), EngineError> {
        let dt = self.config.dt * FS2AMU;
        for i in 0..self.positions.len() {
            let inverse_mass = 1.0 / self.masses[i];
            self.positions[i] +=
                dt * self.velocities[i] - 0.5 * dt * dt * inverse_mass * self.gradient[i];
            self.velocities[i] -= 0.5 * dt * inverse_mass * self.gradient[i];
        }
        self.update_gradient()?;
        for i in 0..self.positions.len() {
            self.velocities[i] -= 0.5 * dt / self.masses[i] * self.gradient[i];
        }
        Ok(())
    }

    fn rattle_step(&mut self) -> Result<(), EngineError> {
        let dt = self.config.dt * FS2AMU;
        let reference = self.positions.clone();
        for i in 0..self.positions.len() {
            let inverse_mass = 1.0 / self.masses[i];
            self.positions[i] +=
                dt * self.velocities[i] - 0.5 * dt * dt * inverse_mass * self.gradient[i];
            self.velocities[i] -= 0.5 * dt * inverse_mass * self.gradient[i];
        }

        let solver = self.rattle.clone().expect("rattle_step requires a solver");
        if let Err(error) = solver.constrain_positions(
            &reference,
            &mut self.positions,
            &mut self.velocities,
            &self.masses,
            dt,
        ) {
            warn!(%error, "Continuing with best-effort position constraints");
        }

        self.update_gradient()?;
        for i in 0..self.positions.len() {
            self.velocities[i] -= 0.5 * dt / self.masses[i] * self.gradient[i];
        }

        let mut solver = self.rattle.take().expect("still present");
        let result =
            solver.constrain_velocities(&self.positions, &mut self.velocities, &self.masses);
        self.average_virial = (solver.virial_correction()
            + self.current_step as f64 * self.average_virial)
            / (self.current_step as f64 + 1.0);
        self.rattle = Some(solver);
        if let Err(error) = result {
            warn!(%error, "Continuing with best-effort velocity constraints");
        }
        Ok(())
    }

    /// Evaluates the potential at the current positions and refreshes the
    /// total gradient, wall forces included.
    fn update_gradient(&mut self) -> Result<(), EngineError> {
        if self.config.clean_energy {
            self.sync_system_geometry();
            let options = self.facade.options().clone();
            let mut fresh = EnergyFacade::new(&self.config.method, options)?;
            fresh.set_system(&self.system)?;
            self.facade = fresh;
        }

        let angstrom: Vec<Vector3<f64>> = self
            .positions
            .iter()
            .map(units::vector_bohr_to_angstrom)
            .collect();
        self.facade.set_geometry(&angstrom)?;
        self.epot = self.facade.evaluate(true)?;

        self.gradient.clear();
        self.gradient.extend(
            self.facade
                .gradient()
                .iter()
                .map(|g| g.map(units::gradient_angstrom_to_bohr)),
        );
        self.wall_energy = self.wall.apply(&self.positions, &mut self.gradient);
        Ok(())
    }

    fn update_kinetic_state(&mut self) {
        self.ekin = 0.5
            * self
                .masses
                .iter()
                .zip(&self.velocities)
                .map(|(m, v)| m * v.norm_squared())
                .sum::<f64>();
        self.temperature = 2.0 * self.ekin / (KB_HARTREE * self.dof as f64);
        self.etot = self.epot + self.ekin;
    }

    fn track_drift(&mut self) {
        if let Some(reference) = self.etot_reference {
            self.max_drift = self.max_drift.max((self.etot - reference).abs());
        }
    }

    fn update_averages(&mut self) {
        let steps = self.current_step as f64;
        self.average_temperature = (self.temperature + (steps - 1.0) * self.average_temperature) / steps;
        self.average_epot = (self.epot + (steps - 1.0) * self.average_epot) / steps;
        self.average_ekin = (self.ekin + (steps - 1.0) * self.average_ekin) / steps;
        self.average_etot = (self.etot + (steps - 1.0) * self.average_etot) / steps;
        self.average_wall = (self.wall_energy + (steps - 1.0) * self.average_wall) / steps;
    }

    // --- velocities, COM motion ---

    fn seed_rng(&mut self) {
        let seed = match self.config.seed {
            -1 => std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(0),
            0 => {
                let n = self.system.atom_count() as u64;
                n.wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ self.config.temperature.to_bits()
            }
            literal => literal as u64,
        };
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// Draws Maxwell–Boltzmann velocities at the target temperature, scaled
    /// by `scaling`, then removes the net linear momentum component by
    /// component.
    fn sample_velocities(&mut self, scaling: f64) {
        let n = self.positions.len();
        for i in 0..n {
            let sigma = (KB_HARTREE * self.config.temperature / self.masses[i]).sqrt() * scaling;
            let normal: [f64; 3] = [
                self.rng.sample(StandardNormal),
                self.rng.sample(StandardNormal),
                self.rng.sample(StandardNormal),
            ];
            self.velocities[i] = Vector3::new(
                sigma * normal[0],
                sigma * normal[1],
                sigma * normal[2],
            );
        }
        let momentum: Vector3<f64> = self
            .masses
            .iter()
            .zip(&self.velocities)
            .map(|(m, v)| *m * *v)
            .sum();
        for i in 0..n {
            self.velocities[i] -= momentum / (self.masses[i] * n as f64);
        }
    }

    fn maybe_remove_com_motion(&mut self) {
        if self.config.rmrottrans == 0 || self.config.rm_com <= 0.0 {
            return;
        }
        let interval = (self.config.rm_com / self.config.dt).round().max(1.0) as usize;
        if self.current_step % interval != 0 {
            return;
        }
        match self.config.rmrottrans {
            1 | 3 => {
                let all: Vec<usize> = (0..self.positions.len()).collect();
                self.remove_rotation_translation(&all);
            }
            2 => self.remove_per_fragment(),
            _ => {}
        }
        if self.config.rmrottrans == 3 {
            self.remove_per_fragment();
        }
    }

    fn remove_per_fragment(&mut self) {
        let bonds = self
            .topo_initial
            .clone()
            .expect("topology recorded during initialise");
        for fragment in topology::fragments(&bonds) {
            self.remove_rotation_translation(&fragment);
        }
    }

    /// Removes the linear momentum and the rigid rotation induced by
    /// `ω = I⁻¹·L` from the selected atoms.
    fn remove_rotation_translation(&mut self, atoms: &[usize]) {
        if atoms.len() < 2 {
            return;
        }
        let mut total_mass = 0.0;
        let mut com = Vector3::zeros();
        for &i in atoms {
            total_mass += self.masses[i];
            com += self.masses[i] * self.positions[i];
        }
        com /= total_mass;

        let mut angular = Vector3::zeros();
        let mut inertia = nalgebra::Matrix3::zeros();
        for &i in atoms {
            let r = self.positions[i] - com;
            angular += self.masses[i] * r.cross(&self.velocities[i]);
            let r2 = r.norm_squared();
            inertia += self.masses[i]
                * (nalgebra::Matrix3::identity() * r2 - r * r.transpose());
        }

        let omega = inertia
            .try_inverse()
            .map(|inverse| inverse * angular)
            .unwrap_or_else(Vector3::zeros);

        let mut momentum = Vector3::zeros();
        for &i in atoms {
            momentum += self.masses[i] * self.velocities[i];
        }
        for &i in atoms {
            let r = self.positions[i] - com;
            self.velocities[i] -= momentum / total_mass + omega.cross(&r);
        }
    }

    // --- dumps, rescue, restarts ---

    /// Topology-gated trajectory dump. Accepted geometries become rescue
    /// snapshots; a rejected one triggers the rescue path when enabled.
    fn dump_checkpoint(&mut self) -> Result<(), EngineError> {
        self.sync_system_geometry();
        let reference = self
            .topo_initial
            .as_ref()
            .expect("topology recorded during initialise");
        let current = topology::perceive_bonds(&self.system);
        let difference = reference.difference(&current);

        if difference <= self.config.max_topo_diff {
            if self.config.write_xyz {
                xyz::append_frame(
                    &self.trajectory_path(),
                    &self.system,
                    self.current_step,
                    self.epot,
                )?;
            }
            self.snapshots.push(self.restart_state());
            if self.snapshots.len() > SNAPSHOT_DEPTH {
                self.snapshots.remove(0);
            }
            self.current_rescue = 0;
            return Ok(());
        }

        warn!(
            difference,
            allowed = self.config.max_topo_diff,
            "Topology changed beyond the allowed difference"
        );
        if self.config.rescue {
            self.rescue(EngineError::Numerical(format!(
                "topology difference {difference} exceeds {}",
                self.config.max_topo_diff
            )))?;
        }
        Ok(())
    }

    fn handle_step_failure(&mut self, error: EngineError) -> Result<(), EngineError> {
        if self.config.rescue && (error.is_recoverable() || self.facade.has_nan()) {
            return self.rescue(error);
        }
        self.write_restart(&self.unstable_restart_path())?;
        Err(error)
    }

    /// Rewinds to the most recent accepted snapshot (stepping further back
    /// on repeated attempts), re-seeds velocities with a flipped scale and
    /// re-evaluates once. Aborts after `MaxRescue` attempts.
    fn rescue(&mut self, cause: EngineError) -> Result<(), EngineError> {
        if self.current_rescue >= self.config.max_rescue || self.snapshots.is_empty() {
            self.write_restart(&self.unstable_restart_path())?;
            return Err(EngineError::Numerical(format!(
                "rescue exhausted after {} attempts: {cause}",
                self.current_rescue
            )));
        }
        let index = self
            .snapshots
            .len()
            .saturating_sub(1 + self.current_rescue)
            .min(self.snapshots.len() - 1);
        let snapshot = self.snapshots[index].clone();
        warn!(attempt = self.current_rescue + 1, %cause, "Rewinding to an accepted snapshot");

        self.apply_restart(&snapshot)?;
        self.sample_velocities(-1.0);
        self.update_gradient()?;
        self.update_kinetic_state();
        self.current_rescue += 1;
        self.print_status();
        Ok(())
    }

    fn try_load_restart(&mut self) {
        let path = self.final_restart_path();
        if !path.exists() {
            return;
        }
        match RestartState::read(&path) {
            Ok(state) => match self.apply_restart(&state) {
                Ok(()) => {
                    info!(path = %path.display(), step = self.current_step, "Restart loaded");
                    self.restart_loaded = true;
                }
                Err(error) => warn!(%error, "Restart file rejected, starting fresh"),
            },
            Err(error) => warn!(%error, "Restart file unreadable, starting fresh"),
        }
    }

    fn apply_restart(&mut self, state: &RestartState) -> Result<(), EngineError> {
        let n = self.system.atom_count();
        let geometry = state.geometry_values()?;
        let velocities = state.velocity_values()?;
        if geometry.len() != 3 * n || velocities.len() != 3 * n {
            return Err(EngineError::Restart(format!(
                "restart carries {} coordinates for {} atoms",
                geometry.len(),
                n
            )));
        }
        self.positions = geometry
            .chunks_exact(3)
            .map(|c| Vector3::new(c[0], c[1], c[2]))
            .collect();
        self.velocities = velocities
            .chunks_exact(3)
            .map(|c| Vector3::new(c[0], c[1], c[2]))
            .collect();
        if self.velocities.len() != self.positions.len() {
            return Err(EngineError::Restart("coordinate list mismatch".to_string()));
        }
        if let Some(step) = state.current_step {
            self.current_step = step;
        }
        if let Some(value) = state.average_temperature {
            self.average_temperature = value;
        }
        if let Some(value) = state.average_epot {
            self.average_epot = value;
        }
        if let Some(value) = state.average_ekin {
            self.average_ekin = value;
        }
        if let Some(value) = state.average_etot {
            self.average_etot = value;
        }
        if let Some(value) = state.average_virial {
            self.average_virial = value;
        }
        if let Some(value) = state.average_wall {
            self.average_wall = value;
        }
        self.sync_system_geometry();
        Ok(())
    }

    fn restart_state(&self) -> RestartState {
        let flat_positions: Vec<f64> = self
            .positions
            .iter()
            .flat_map(|p| [p.x, p.y, p.z])
            .collect();
        let flat_velocities: Vec<f64> = self
            .velocities
            .iter()
            .flat_map(|v| [v.x, v.y, v.z])
            .collect();
        RestartState {
            method: Some(self.config.method.clone()),
            dt: Some(self.config.dt),
            max_time: Some(self.config.max_time),
            temperature: Some(self.config.temperature),
            current_step: Some(self.current_step),
            nocenter: Some(self.config.nocenter),
            average_temperature: Some(self.average_temperature),
            average_epot: Some(self.average_epot),
            average_ekin: Some(self.average_ekin),
            average_etot: Some(self.average_etot),
            average_virial: Some(self.average_virial),
            average_wall: Some(self.average_wall),
            coupling: Some(self.config.coupling),
            thermostat: Some(self.config.thermostat.clone()),
            geometry: Some(restart::doubles_to_string(&flat_positions)),
            velocities: Some(restart::doubles_to_string(&flat_velocities)),
        }
    }

    fn write_restart(&self, path: &Path) -> Result<(), EngineError> {
        self.restart_state().write(path)
    }

    fn sync_system_geometry(&mut self) {
        let geometry: Vec<Vector3<f64>> = self
            .positions
            .iter()
            .map(units::vector_bohr_to_angstrom)
            .collect();
        self.system
            .set_geometry(geometry)
            .expect("position list length is fixed");
    }

    fn build_wall(&self) -> Result<Wall, EngineError> {
        let kind = match self.config.wall_type.as_str() {
            "harmonic" => WallKind::Harmonic,
            _ => WallKind::LogFermi,
        };
        let shape = match self.config.wall.as_str() {
            "none" => WallShape::None,
            "spheric" => {
                let radius = if self.config.wall_spheric_radius > 0.0 {
                    self.config.wall_spheric_radius
                } else {
                    self.positions
                        .iter()
                        .map(|p| p.norm())
                        .fold(0.0, f64::max)
                        + WALL_AUTO_MARGIN
                };
                WallShape::Spheric { radius }
            }
            "rect" => {
                let axis_bounds = |configured: (f64, f64), axis: usize| {
                    if configured.0 < configured.1 {
                        configured
                    } else {
                        let low = self
                            .positions
                            .iter()
                            .map(|p| p[axis])
                            .fold(f64::INFINITY, f64::min);
                        let high = self
                            .positions
                            .iter()
                            .map(|p| p[axis])
                            .fold(f64::NEG_INFINITY, f64::max);
                        (low - WALL_AUTO_MARGIN, high + WALL_AUTO_MARGIN)
                    }
                };
                WallShape::Rect {
                    x: axis_bounds((self.config.wall_x_min, self.config.wall_x_max), 0),
                    y: axis_bounds((self.config.wall_y_min, self.config.wall_y_max), 1),
                    z: axis_bounds((self.config.wall_z_min, self.config.wall_z_max), 2),
                }
            }
            other => {
                return Err(EngineError::Config(format!("unknown wall shape '{other}'")));
            }
        };
        Ok(Wall {
            shape,
            kind,
            beta: self.config.wall_beta,
            temperature: self.config.wall_temp,
        })
    }

    // --- reporting, paths ---

    fn print_status(&self) {
        info!(
            step = self.current_step,
            time_fs = self.current_step as f64 * self.config.dt,
            epot = self.epot,
            ekin = self.ekin,
            etot = self.etot,
            temperature = self.temperature,
            average_temperature = self.average_temperature,
            "MD status"
        );
    }

    fn summary(&self, outcome: MdOutcome) -> MdSummary {
        MdSummary {
            outcome,
            steps: self.current_step,
            simulated_time_fs: self.current_step as f64 * self.config.dt,
            average_temperature: self.average_temperature,
            average_epot: self.average_epot,
            average_ekin: self.average_ekin,
            average_etot: self.average_etot,
            max_total_energy_drift: self.max_drift,
        }
    }

    fn stop_requested(&self) -> bool {
        self.working_dir.join("stop").exists()
    }

    fn trajectory_path(&self) -> PathBuf {
        self.working_dir.join(format!("{}.trj.xyz", self.basename))
    }

    fn final_restart_path(&self) -> PathBuf {
        self.working_dir.join(format!("{}_final.json", self.basename))
    }

    fn unstable_restart_path(&self) -> PathBuf {
        self.working_dir
            .join(format!("unstable_{}.json", self.basename))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::constants::{self, BOHR_RADIUS_ANGSTROM};
    use crate::core::potentials::params::{BondParameter, ForceFieldParameters, VdwSite};

    fn diatomic_system(offset: f64) -> System {
        System::new(
            &[1, 1],
            vec![Vector3::zeros(), Vector3::new(1.0 + offset, 0.0, 0.0)],
            0,
            1,
        )
        .unwrap()
    }

    /// A single harmonic bond with k = 1 Eh/Bohr² and r₀ = 1 Å, no
    /// non-bonded terms.
    fn diatomic_parameter_file(dir: &Path) -> PathBuf {
        let stiffness = 1.0 / (BOHR_RADIUS_ANGSTROM * BOHR_RADIUS_ANGSTROM);
        let params = ForceFieldParameters {
            atom_count: 2,
            bonds: vec![BondParameter {
                i: 0,
                j: 1,
                r0: 1.0,
                force_constant: stiffness,
            }],
            angles: Vec::new(),
            vdw: vec![
                VdwSite {
                    r_min: 1.0,
                    well_depth: 0.0,
                };
                2
            ],
            charges: vec![0.0, 0.0],
        };
        let path = dir.join("diatomic_params.json");
        params.save(&path).unwrap();
        path
    }

    fn methane() -> System {
        System::new(
            &[6, 1, 1, 1, 1],
            vec![
                Vector3::new(0.0, 0.0, 0.0),
                Vector3::new(0.629, 0.629, 0.629),
                Vector3::new(-0.629, -0.629, 0.629),
                Vector3::new(-0.629, 0.629, -0.629),
                Vector3::new(0.629, -0.629, -0.629),
            ],
            0,
            1,
        )
        .unwrap()
    }

    fn quiet_config() -> MdConfig {
        MdConfig {
            print: 1_000_000,
            writerestart: 1_000_000,
            norestart: true,
            ..MdConfig::default()
        }
    }

    /// Bond lengths per trajectory frame of a two-atom XYZ file.
    fn trajectory_bond_lengths(path: &Path) -> Vec<f64> {
        let content = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        let mut lengths = Vec::new();
        let mut cursor = 0;
        while cursor + 3 < lines.len() {
            let parse = |line: &str| -> Vector3<f64> {
                let fields: Vec<f64> = line
                    .split_whitespace()
                    .skip(1)
                    .map(|f| f.parse().unwrap())
                    .collect();
                Vector3::new(fields[0], fields[1], fields[2])
            };
            let a = parse(lines[cursor + 2]);
            let b = parse(lines[cursor + 3]);
            lengths.push((a - b).norm());
            cursor += 4;
        }
        lengths
    }

    #[test]
    fn config_merges_defaults_from_a_partial_json_tree() {
        let tree = serde_json::json!({"dT": 1.5, "thermostat": "csvr"});
        let config = MdConfig::from_json(&tree).unwrap();
        assert_eq!(config.dt, 1.5);
        assert_eq!(config.thermostat, "csvr");
        assert_eq!(config.max_time, 5000.0);
        assert_eq!(config.method, "ff");
    }

    #[test]
    fn unknown_config_key_is_a_config_error() {
        let tree = serde_json::json!({"dTT": 1.5});
        assert!(matches!(
            MdConfig::from_json(&tree),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn wall_enabled_with_invalid_kind_is_rejected() {
        let tree = serde_json::json!({"wall": "spheric", "wall_type": "quartic"});
        assert!(matches!(
            MdConfig::from_json(&tree),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn nve_diatomic_conserves_energy_and_reproduces_the_period() {
        let dir = tempfile::tempdir().unwrap();
        let config = MdConfig {
            thermostat: "none".to_string(),
            dt: 0.25,
            max_time: 1000.0,
            velo: 0.0,
            seed: 1,
            dump: 1,
            rm_com: 0.0,
            param_file: Some(diatomic_parameter_file(dir.path())),
            ..quiet_config()
        };
        let mut md = MdIntegrator::new(config, diatomic_system(0.1)).unwrap();
        md.set_working_dir(dir.path());
        md.initialise().unwrap();
        let summary = md.start().unwrap();

        assert_eq!(summary.outcome, MdOutcome::Completed);
        assert_eq!(summary.steps, 4000);
        assert!(
            summary.max_total_energy_drift < 5e-4,
            "total energy drift {}",
            summary.max_total_energy_drift
        );

        // Upward crossings of the equilibrium distance mark whole periods.
        let lengths = trajectory_bond_lengths(&dir.path().join("kinemol.trj.xyz"));
        let crossings: Vec<f64> = lengths
            .windows(2)
            .enumerate()
            .filter(|(_, pair)| pair[0] < 1.0 && pair[1] >= 1.0)
            .map(|(index, _)| index as f64 * 0.25)
            .collect();
        assert!(crossings.len() > 50);
        let measured = (crossings.last().unwrap() - crossings[0]) / (crossings.len() - 1) as f64;

        let mass = constants::atomic_mass(1) * AMU_TO_AU;
        let expected = 2.0 * std::f64::consts::PI * (mass / 2.0).sqrt() / FS2AMU;
        assert!(
            (measured - expected).abs() / expected < 0.01,
            "period {measured} fs vs expected {expected} fs"
        );
    }

    #[test]
    fn berendsen_equilibrates_a_cold_system_to_the_target() {
        let dir = tempfile::tempdir().unwrap();
        let config = MdConfig {
            thermostat: "berendsen".to_string(),
            temperature: 300.0,
            coupling: 50.0,
            dt: 0.5,
            max_time: 2500.0,
            velo: 0.1,
            seed: 2,
            dump: 500,
            write_xyz: false,
            rm_com: 0.0,
            ..quiet_config()
        };
        let mut md = MdIntegrator::new(config, methane()).unwrap();
        md.set_working_dir(dir.path());
        md.initialise().unwrap();
        let summary = md.start().unwrap();

        assert_eq!(summary.outcome, MdOutcome::Completed);
        assert!(
            (summary.average_temperature - 300.0).abs() < 60.0,
            "average temperature {}",
            summary.average_temperature
        );
        assert!(md.temperature > 150.0, "final temperature {}", md.temperature);
    }

    #[test]
    fn csvr_average_kinetic_energy_approaches_the_canonical_value() {
        let dir = tempfile::tempdir().unwrap();
        let config = MdConfig {
            thermostat: "csvr".to_string(),
            temperature: 300.0,
            coupling: 2.5,
            dt: 0.5,
            max_time: 2500.0,
            velo: 1.0,
            seed: 5,
            dump: 500,
            write_xyz: false,
            rm_com: 0.0,
            ..quiet_config()
        };
        let mut md = MdIntegrator::new(config, methane()).unwrap();
        md.set_working_dir(dir.path());
        md.initialise().unwrap();
        let summary = md.start().unwrap();

        let dof = md.degrees_of_freedom() as f64;
        let canonical = 0.5 * KB_HARTREE * 300.0 * dof;
        assert!(
            (summary.average_ekin - canonical).abs() / canonical < 0.3,
            "average Ekin {} vs canonical {canonical}",
            summary.average_ekin
        );
    }

    #[test]
    fn rattle_holds_hydrogen_bonds_through_a_large_step_run() {
        let dir = tempfile::tempdir().unwrap();
        let config = MdConfig {
            thermostat: "berendsen".to_string(),
            temperature: 300.0,
            coupling: 100.0,
            dt: 2.0,
            max_time: 2000.0,
            rattle: 2,
            rattle_tolerance: 1e-6,
            velo: 1.0,
            seed: 3,
            dump: 100,
            write_xyz: false,
            rm_com: 0.0,
            ..quiet_config()
        };
        let mut md = MdIntegrator::new(config, methane()).unwrap();
        md.set_working_dir(dir.path());
        md.initialise().unwrap();
        assert_eq!(md.degrees_of_freedom(), 11);

        let summary = md.start().unwrap();
        assert_eq!(summary.outcome, MdOutcome::Completed);
        let solver = md.rattle.as_ref().unwrap();
        assert!(solver.all_satisfied(&md.positions));
    }

    #[test]
    fn identical_seeds_produce_byte_identical_trajectories() {
        let run = |dir: &Path| {
            let config = MdConfig {
                thermostat: "csvr".to_string(),
                temperature: 250.0,
                coupling: 5.0,
                dt: 0.5,
                max_time: 100.0,
                velo: 1.0,
                seed: 11,
                dump: 5,
                rm_com: 0.0,
                ..quiet_config()
            };
            let mut md = MdIntegrator::new(config, methane()).unwrap();
            md.set_working_dir(dir);
            md.initialise().unwrap();
            md.start().unwrap();
            std::fs::read(dir.join("kinemol.trj.xyz")).unwrap()
        };
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        assert_eq!(run(first.path()), run(second.path()));
    }

    #[test]
    fn sentinel_file_stops_the_run_and_writes_the_final_restart() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("stop"), "").unwrap();
        let config = MdConfig {
            thermostat: "none".to_string(),
            dt: 0.5,
            max_time: 100_000.0,
            velo: 0.1,
            seed: 4,
            write_xyz: false,
            rm_com: 0.0,
            ..quiet_config()
        };
        let mut md = MdIntegrator::new(config, methane()).unwrap();
        md.set_working_dir(dir.path());
        md.initialise().unwrap();
        let summary = md.start().unwrap();

        assert_eq!(summary.outcome, MdOutcome::Stopped);
        assert!(dir.path().join("kinemol_final.json").exists());
    }

    #[test]
    fn rescue_rewinds_to_the_last_accepted_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let config = MdConfig {
            thermostat: "none".to_string(),
            rescue: true,
            velo: 0.1,
            seed: 6,
            write_xyz: false,
            ..quiet_config()
        };
        let mut md = MdIntegrator::new(config, methane()).unwrap();
        md.set_working_dir(dir.path());
        md.initialise().unwrap();
        md.snapshots.push(md.restart_state());

        md.positions[0].x = 1e300;
        let error = md.update_gradient().unwrap_err();
        md.handle_step_failure(error).unwrap();

        assert_eq!(md.current_rescue, 1);
        assert!(md.positions[0].x.abs() < 100.0);
        assert!(md.epot.is_finite());
    }

    #[test]
    fn rescue_aborts_after_the_max_rescue_ceiling() {
        let dir = tempfile::tempdir().unwrap();
        let config = MdConfig {
            thermostat: "none".to_string(),
            rescue: true,
            max_rescue: 2,
            velo: 0.1,
            seed: 6,
            write_xyz: false,
            ..quiet_config()
        };
        let mut md = MdIntegrator::new(config, methane()).unwrap();
        md.set_working_dir(dir.path());
        md.initialise().unwrap();
        md.snapshots.push(md.restart_state());
        md.current_rescue = 2;

        md.positions[0].x = 1e300;
        let error = md.update_gradient().unwrap_err();
        let result = md.handle_step_failure(error);
        assert!(matches!(result, Err(EngineError::Numerical(_))));
        assert!(dir.path().join("unstable_kinemol.json").exists());
    }

    #[test]
    fn exploding_temperature_aborts_with_an_unstable_restart() {
        let dir = tempfile::tempdir().unwrap();
        let config = MdConfig {
            thermostat: "none".to_string(),
            temperature: 10.0,
            velo: 1000.0,
            dt: 0.5,
            max_time: 50.0,
            seed: 8,
            write_xyz: false,
            rm_com: 0.0,
            ..quiet_config()
        };
        let mut md = MdIntegrator::new(config, methane()).unwrap();
        md.set_working_dir(dir.path());
        md.initialise().unwrap();
        let result = md.start();
        assert!(matches!(result, Err(EngineError::Numerical(_))));
        assert!(dir.path().join("unstable_kinemol.json").exists());
    }

    #[test]
    fn restart_round_trip_resumes_from_the_saved_step() {
        let dir = tempfile::tempdir().unwrap();
        let config = MdConfig {
            thermostat: "none".to_string(),
            dt: 0.5,
            max_time: 50.0,
            velo: 0.1,
            seed: 9,
            write_xyz: false,
            norestart: false,
            rm_com: 0.0,
            print: 1_000_000,
            writerestart: 1_000_000,
            ..MdConfig::default()
        };
        let mut first = MdIntegrator::new(config.clone(), methane()).unwrap();
        first.set_working_dir(dir.path());
        first.initialise().unwrap();
        first.start().unwrap();
        assert!(dir.path().join("kinemol_final.json").exists());

        let mut resumed = MdIntegrator::new(
            MdConfig {
                max_time: 100.0,
                ..config
            },
            methane(),
        )
        .unwrap();
        resumed.set_working_dir(dir.path());
        resumed.initialise().unwrap();
        assert_eq!(resumed.current_step, 100);
        let summary = resumed.start().unwrap();
        assert_eq!(summary.steps, 200);
    }

    #[test]
    fn com_motion_removal_zeroes_linear_momentum() {
        let dir = tempfile::tempdir().unwrap();
        let config = MdConfig {
            thermostat: "none".to_string(),
            rmrottrans: 1,
            rm_com: 0.5,
            dt: 0.5,
            max_time: 5.0,
            velo: 1.0,
            seed: 13,
            write_xyz: false,
            ..quiet_config()
        };
        let mut md = MdIntegrator::new(config, methane()).unwrap();
        md.set_working_dir(dir.path());
        md.initialise().unwrap();
        // Bias the velocities so there is momentum to remove.
        for v in &mut md.velocities {
            v.x += 1e-3;
        }
        md.start().unwrap();

        let momentum: Vector3<f64> = md
            .masses
            .iter()
            .zip(&md.velocities)
            .map(|(m, v)| *m * *v)
            .sum();
        assert!(momentum.norm() < 1e-10, "residual momentum {momentum}");
    }

    #[test]
    fn spherical_wall_confines_an_escaping_atom() {
        let dir = tempfile::tempdir().unwrap();
        let config = MdConfig {
            thermostat: "none".to_string(),
            wall: "spheric".to_string(),
            wall_type: "logfermi".to_string(),
            wall_spheric_radius: 8.0,
            wall_beta: 6.0,
            wall_temp: 300.0,
            dt: 0.5,
            max_time: 500.0,
            velo: 1.5,
            temperature: 400.0,
            seed: 21,
            write_xyz: false,
            rm_com: 0.0,
            ..quiet_config()
        };
        let mut md = MdIntegrator::new(config, methane()).unwrap();
        md.set_working_dir(dir.path());
        md.initialise().unwrap();
        md.start().unwrap();
        for position in &md.positions {
            assert!(position.norm() < 12.0, "atom escaped to {position}");
        }
    }
}
