use crate::cli::MdArgs;
use crate::error::Result;
use kinemol_core::core::io::xyz;
use kinemol_core::engine::md::MdOutcome;
use kinemol_core::workflows::dynamics;
use tracing::info;

pub fn run(args: &MdArgs) -> Result<()> {
    let system = xyz::read_xyz(&args.input)?;
    let config_tree = match &args.config {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => serde_json::json!({}),
    };
    let basename = args
        .input
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| "kinemol".to_string());

    let summary = dynamics::run(system, &config_tree, &args.directory, &basename)?;
    match summary.outcome {
        MdOutcome::Completed => info!(
            steps = summary.steps,
            simulated_time_fs = summary.simulated_time_fs,
            "Simulation reached MaxTime"
        ),
        MdOutcome::Stopped => info!(
            steps = summary.steps,
            "Simulation stopped by the sentinel file"
        ),
    }
    info!(
        average_temperature = summary.average_temperature,
        average_epot = summary.average_epot,
        average_ekin = summary.average_ekin,
        average_etot = summary.average_etot,
        "Run averages"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::MdArgs;

    #[test]
    fn short_run_from_files_writes_trajectory_and_restart() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("h2o.xyz");
        std::fs::write(
            &input,
            "3\nwater\nO 0.0 0.0 0.117\nH 0.0 0.757 -0.469\nH 0.0 -0.757 -0.469\n",
        )
        .unwrap();
        let config = dir.path().join("md.json");
        std::fs::write(
            &config,
            r#"{"MaxTime": 10.0, "dT": 0.5, "seed": 3, "velo": 0.2, "norestart": true,
               "print": 1000, "writerestart": 1000}"#,
        )
        .unwrap();

        let args = MdArgs {
            input,
            config: Some(config),
            directory: dir.path().to_path_buf(),
        };
        run(&args).unwrap();
        assert!(dir.path().join("h2o_final.json").exists());
        assert!(dir.path().join("h2o.trj.xyz").exists());
    }

    #[test]
    fn malformed_config_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("h2.xyz");
        std::fs::write(&input, "2\nh2\nH 0.0 0.0 0.0\nH 0.74 0.0 0.0\n").unwrap();
        let config = dir.path().join("md.json");
        std::fs::write(&config, "{ not json").unwrap();

        let args = MdArgs {
            input,
            config: Some(config),
            directory: dir.path().to_path_buf(),
        };
        assert!(run(&args).is_err());
    }
}
