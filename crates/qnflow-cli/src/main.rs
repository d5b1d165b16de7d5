//! CLI for qnflow — toy-event demo runs and calibration-file inspection.

mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "qnflow")]
#[command(about = "qnflow — event-by-event Qn-vector corrections")]
#[command(version = qnflow_core::VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full correction chain over simulated toy events.
    /// Each pass feeds the previous pass's calibration back in, so the
    /// step states flip from calibrating to applying and the corrected
    /// vector converges.
    Demo {
        /// Events simulated per calibration pass
        #[arg(long, default_value = "2000")]
        events: usize,

        /// Number of calibration passes
        #[arg(long, default_value = "3")]
        passes: usize,

        /// Seed for the toy event generator
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Write the final calibration file here
        #[arg(long)]
        output: Option<String>,
    },

    /// Print the runs, sub-events, steps, and histogram shapes of a
    /// calibration file.
    Inspect {
        /// Calibration JSON file
        path: String,

        /// Also list not-validated QA tallies
        #[arg(long)]
        qa: bool,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Demo { events, passes, seed, output } => {
            commands::demo::run(events, passes, seed, output.as_deref())
        }
        Commands::Inspect { path, qa } => commands::inspect::run(&path, qa),
    };
    if let Err(err) = result {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
