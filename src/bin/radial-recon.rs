use clap::Parser;
use radial_reco::io::{read_cfl, write_cfl, RunSummary};
use radial_reco::{ExecutionEngine, RadialReconParams, ReconError, ReconPlan};
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
struct Args {
    /// input cfl array. [nchan, nrep, nro, npe] for adjoint, [nchan, nrep, nx, ny] for forward
    input: PathBuf,
    /// output cfl array. A json run summary is written next to it
    output: PathBuf,
    /// recon parameter file (toml)
    recon_params: PathBuf,
    /// stage sequence overriding the one in the parameter file
    #[arg(long)]
    pipeline: Option<String>,
    /// number of execution lanes overriding the parameter file
    #[arg(long)]
    lanes: Option<usize>,
    /// number of devices overriding the parameter file
    #[arg(long)]
    devices: Option<usize>,
}

fn run(args: &Args) -> Result<(), ReconError> {
    let mut params = RadialReconParams::from_file(&args.recon_params)?;
    if let Some(p) = &args.pipeline {
        params.pipeline = Some(p.clone());
    }
    params.lanes = args.lanes.unwrap_or(params.lanes);
    params.devices = args.devices.unwrap_or(params.devices);
    let pipeline = params.pipeline()?;

    println!("loading {} ...", args.input.display());
    let (input, dims) = read_cfl(&args.input)?;
    let plan = ReconPlan::derive(&params, dims)?;
    println!(
        "{:?} reconstruction of {} repetitions: ngrid = {}, nimg = {}, pipeline = {pipeline}",
        plan.direction, plan.nrep, plan.ngrid, plan.nimg
    );

    let now = Instant::now();
    let mut engine = ExecutionEngine::new(plan, pipeline)?;
    engine.initialize(params.lanes, params.devices)?;
    let output = engine.run(input)?;
    let elapsed = now.elapsed().as_secs_f32();
    println!("reconstruction finished in {elapsed:.03} secs");

    write_cfl(&args.output, &output.data, &output.dims)?;
    RunSummary::new(engine.plan(), engine.pipeline(), &output, params.lanes, params.devices, elapsed).write(&args.output)?;
    engine.shutdown()?;
    println!("wrote {} with dims {:?}", args.output.display(), output.dims);
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();
    let args = Args::parse();
    if let Err(e) = run(&args) {
        eprintln!("radial-recon failed: {e}");
        std::process::exit(1);
    }
}
