use anyhow::Context;
use clap::Parser;
use log::info;
use std::path::PathBuf;

use infusion_protocol::{FixedKe0, ProtocolGenerator, ProtocolRequest};

#[derive(Parser)]
#[command(name = "infusion_protocol")]
#[command(about = "Bolus and threshold-controlled infusion protocol planner")]
struct Cli {
    /// Protocol request (JSON)
    #[arg(short, long)]
    request: PathBuf,

    /// Output directory
    #[arg(short, long)]
    output: PathBuf,

    /// Skip the fixed bolus-dose comparison sweep
    #[arg(long)]
    skip_comparison: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    if cli.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Info)
            .init();
    }

    let request = ProtocolRequest::from_file(&cli.request)
        .with_context(|| format!("loading request {:?}", cli.request))?;
    info!("Loaded request for patient {} from {:?}", request.patient.id, cli.request);

    // No demographic ke0 estimator is wired into the CLI.
    let ke0 = request.require_ke0()?;
    info!("Using ke0 {} /min from the request", ke0);

    let generator = ProtocolGenerator::new(FixedKe0(ke0))
        .with_comparison(!cli.skip_comparison);
    let result = generator.generate(&request)?;
    info!(
        "Protocol: {:.1} mg bolus, {:.1} mg/kg/hr, {} reduction(s)",
        result.bolus_dose,
        result.optimal_rate,
        result.adjustments.len()
    );

    std::fs::create_dir_all(&cli.output)
        .with_context(|| format!("creating output directory {:?}", cli.output))?;

    infusion_protocol::output::save_results(&result, &cli.output)?;
    info!("Results saved to {:?}", cli.output);

    Ok(())
}
