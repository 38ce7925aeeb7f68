use crate::core::models::system::System;
use crate::engine::error::EngineError;
use crate::engine::md::{MdConfig, MdIntegrator, MdSummary};
use std::path::Path;
use tracing::{info, instrument};

/// Runs a complete molecular-dynamics simulation.
///
/// Ties the configuration tree, the system and the integrator together:
/// configuration is merged with defaults and validated, the integrator is
/// initialised (restart load, velocity sampling, constraint recording) and
/// driven to completion. Emitted files land in `working_dir` under
/// `basename`.
#[instrument(skip_all, name = "dynamics_workflow")]
pub fn run(
    system: System,
    config_tree: &serde_json::Value,
    working_dir: &Path,
    basename: &str,
) -> Result<MdSummary, EngineError> {
    let config = MdConfig::from_json(config_tree)?;
    info!(
        atoms = system.atom_count(),
        method = %config.method,
        "Starting dynamics workflow"
    );
    let mut integrator = MdIntegrator::new(config, system)?;
    integrator.set_working_dir(working_dir);
    integrator.set_basename(basename);
    integrator.initialise()?;
    let summary = integrator.start()?;
    info!(
        steps = summary.steps,
        simulated_time_fs = summary.simulated_time_fs,
        average_temperature = summary.average_temperature,
        "Dynamics workflow finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::md::MdOutcome;
    use nalgebra::Vector3;

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

    #[test]
    fn short_run_from_a_json_tree_completes() {
        let dir = tempfile::tempdir().unwrap();
        let tree = serde_json::json!({
            "thermostat": "berendsen",
            "dT": 0.5,
            "MaxTime": 25.0,
            "T": 300.0,
            "seed": 17,
            "velo": 0.5,
            "print": 1000,
            "writerestart": 1000,
            "norestart": true,
        });
        let summary = run(water(), &tree, dir.path(), "water").unwrap();
        assert_eq!(summary.outcome, MdOutcome::Completed);
        assert_eq!(summary.steps, 50);
        assert!(dir.path().join("water_final.json").exists());
        assert!(dir.path().join("water.trj.xyz").exists());
    }

    #[test]
    fn invalid_configuration_fails_before_any_dynamics() {
        let dir = tempfile::tempdir().unwrap();
        let tree = serde_json::json!({"thermostat": "unknown"});
        assert!(matches!(
            run(water(), &tree, dir.path(), "water"),
            Err(EngineError::Config(_))
        ));
    }
}
