use crate::cli::SpArgs;
use crate::error::Result;
use kinemol_core::core::io::xyz;
use kinemol_core::core::potentials::PotentialOptions;
use kinemol_core::engine::facade::EnergyFacade;
use tracing::info;

pub fn run(args: &SpArgs) -> Result<()> {
    let system = xyz::read_xyz(&args.input)?;
    let mut facade = EnergyFacade::new(&args.method, PotentialOptions::default())?;
    facade.set_system(&system)?;
    let energy = facade.evaluate(args.gradient)?;

    info!(method = %args.method, atoms = system.atom_count(), "Single point finished");
    println!("Energy = {energy:.10} Eh");
    if args.gradient {
        let norm: f64 = facade
            .gradient()
            .iter()
            .map(|g| g.norm_squared())
            .sum::<f64>()
            .sqrt();
        println!("|Gradient| = {norm:.10} Eh/A");
    }
    Ok(())
}
