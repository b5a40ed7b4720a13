use clap::{Parser, ValueEnum};
use radial_reco::engine::reconstruct;
use radial_reco::io::write_cfl;
use radial_reco::phantom::{add_noise, coil_sensitivities, gaussian_blob, multi_channel, shepp_logan};
use radial_reco::{Complex32, Direction, Pipeline, RadialReconParams, ReconError, ReconPlan};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Object {
    SheppLogan,
    Blob,
}

/// Simulates multi-channel radial k-space of a synthetic object
#[derive(Debug, Parser)]
struct Args {
    /// output cfl array [nchan, nrep, nro, npe]
    output: PathBuf,
    /// image matrix size
    #[arg(long, default_value_t = 64)]
    n: usize,
    #[arg(long, default_value_t = 4)]
    nchan: usize,
    /// repetitions of the object to simulate
    #[arg(long, default_value_t = 1)]
    nrep: usize,
    /// profiles per repetition
    #[arg(long)]
    npe: Option<usize>,
    #[arg(long)]
    golden_angle: bool,
    /// standard deviation of the added receiver noise
    #[arg(long, default_value_t = 0.)]
    noise: f32,
    #[arg(long, default_value_t = 0)]
    seed: u64,
    #[arg(long, value_enum, default_value_t = Object::SheppLogan)]
    object: Object,
}

fn run(args: &Args) -> Result<(), ReconError> {
    let n = args.n;
    let image = match args.object {
        Object::SheppLogan => shepp_logan(n),
        Object::Blob => gaussian_blob(n, n as f32 / 8.),
    };
    let sens = coil_sensitivities(n, args.nchan);
    let frame = multi_channel(&image, &sens, args.nchan);

    // repetitions are the second dimension of [nchan, nrep, n, n]
    let mut input = vec![Complex32::ZERO; frame.len() * args.nrep];
    input.chunks_exact_mut(args.nchan * args.nrep).zip(frame.chunks_exact(args.nchan)).for_each(|(dst, px)| {
        dst.chunks_exact_mut(args.nchan).for_each(|rep| rep.copy_from_slice(px));
    });

    let params = RadialReconParams {
        direction: Direction::Forward,
        golden_angle: args.golden_angle,
        pe_per_frame: args.npe,
        ..Default::default()
    };
    let plan = ReconPlan::derive(&params, [args.nchan, args.nrep, n, n])?;
    println!("simulating {} profiles of {} samples for {} channels ...", plan.npe_per_frame, plan.nro, plan.nchan);
    let mut output = reconstruct(plan, Pipeline::default_for(Direction::Forward), params.lanes, params.devices, input)?;
    add_noise(&mut output.data, args.noise, args.seed);

    write_cfl(&args.output, &output.data, &output.dims)?;
    println!("wrote {} with dims {:?}", args.output.display(), output.dims);
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();
    let args = Args::parse();
    if let Err(e) = run(&args) {
        eprintln!("radial-sim failed: {e}");
        std::process::exit(1);
    }
}
