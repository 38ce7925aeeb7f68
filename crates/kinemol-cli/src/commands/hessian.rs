use crate::cli::HessianArgs;
use crate::error::Result;
use kinemol_core::core::io::xyz;
use kinemol_core::core::potentials::PotentialOptions;
use kinemol_core::engine::hessian::HessianScheme;
use kinemol_core::workflows::vibrations;
use tracing::info;

pub fn run(args: &HessianArgs) -> Result<()> {
    let system = xyz::read_xyz(&args.input)?;
    let options = PotentialOptions {
        threads: args.threads.max(1),
        ..PotentialOptions::default()
    };

    let result = match &args.read {
        Some(path) => vibrations::run_from_file(system, &args.method, options, path)?,
        None => {
            let scheme = if args.full_numerical {
                HessianScheme::FullNumerical
            } else {
                HessianScheme::SemiNumerical
            };
            vibrations::run(system, &args.method, options, scheme)?
        }
    };

    info!(
        rigid_body = result.rigid_body_count(),
        imaginary = result.imaginary_count(),
        "Frequencies in cm⁻¹:"
    );
    for wavenumber in result.vibrational_wavenumbers() {
        println!("{wavenumber:10.2}");
    }
    Ok(())
}
