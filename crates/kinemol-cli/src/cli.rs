use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(
    name = "kinemol",
    version,
    about = "kinemol - molecular dynamics, finite-difference Hessians and single-point energies over pluggable potential backends.",
    help_template = HELP_TEMPLATE,
)]
pub struct Cli {
    /// Increase log verbosity (-v: debug, -vv: trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Silence all log output.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Mirror the log into a file, without colour codes.
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a molecular-dynamics simulation.
    Md(MdArgs),
    /// Build the Hessian and report vibrational frequencies.
    Hessian(HessianArgs),
    /// Evaluate a single-point energy and gradient.
    Sp(SpArgs),
}

#[derive(Args, Debug)]
pub struct MdArgs {
    /// Structure in XYZ format.
    #[arg(short, long)]
    pub input: PathBuf,

    /// JSON configuration tree merged with the defaults.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory for trajectory, restart and sentinel files.
    #[arg(short, long, default_value = ".")]
    pub directory: PathBuf,
}

#[derive(Args, Debug)]
pub struct HessianArgs {
    /// Structure in XYZ format.
    #[arg(short, long)]
    pub input: PathBuf,

    /// Potential backend selected by name.
    #[arg(short, long, default_value = "ff")]
    pub method: String,

    /// Use the O(N²) full-numerical energy scheme instead of the
    /// semi-numerical gradient scheme.
    #[arg(long)]
    pub full_numerical: bool,

    /// Analyse an existing `$hessian` text file instead of recomputing.
    #[arg(long)]
    pub read: Option<PathBuf>,

    /// Worker threads for the finite-difference tasks.
    #[arg(short, long, default_value_t = 1)]
    pub threads: usize,
}

#[derive(Args, Debug)]
pub struct SpArgs {
    /// Structure in XYZ format.
    #[arg(short, long)]
    pub input: PathBuf,

    /// Potential backend selected by name.
    #[arg(short, long, default_value = "ff")]
    pub method: String,

    /// Also report the gradient norm.
    #[arg(short, long)]
    pub gradient: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn md_subcommand_parses_with_defaults() {
        let cli = Cli::try_parse_from(["kinemol", "md", "--input", "water.xyz"]).unwrap();
        match cli.command {
            Commands::Md(args) => {
                assert_eq!(args.input, PathBuf::from("water.xyz"));
                assert!(args.config.is_none());
                assert_eq!(args.directory, PathBuf::from("."));
            }
            _ => panic!("expected the md subcommand"),
        }
    }

    #[test]
    fn hessian_subcommand_accepts_scheme_and_threads() {
        let cli = Cli::try_parse_from([
            "kinemol",
            "hessian",
            "--input",
            "co2.xyz",
            "--full-numerical",
            "--threads",
            "4",
        ])
        .unwrap();
        match cli.command {
            Commands::Hessian(args) => {
                assert!(args.full_numerical);
                assert_eq!(args.threads, 4);
            }
            _ => panic!("expected the hessian subcommand"),
        }
    }
}
