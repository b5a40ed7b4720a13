use clap::Parser;
use radial_reco::RadialReconParams;
use std::path::PathBuf;

#[derive(Debug, Parser)]
struct Args {
    /// path to recon parameters file to write
    parameter_file: PathBuf,
}

fn main() {
    let args = Args::parse();
    let params = RadialReconParams::default();
    match params.to_file(&args.parameter_file) {
        Ok(filename) => println!("wrote default parameter file to {}", filename.display()),
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
