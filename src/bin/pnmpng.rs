use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;

/// Convert a PBM, PGM or PPM image to PNG
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Input image; the format is picked by its .pbm, .pgm or .ppm extension
    input: PathBuf,
    /// PNG file to create
    output: PathBuf,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .target(env_logger::Target::Stderr)
        .init();

    let args = Args::parse();
    pnmpng::encode_file(&args.input, &args.output)
        .with_context(|| format!("can't convert {} to {}", args.input.display(), args.output.display()))?;
    Ok(())
}
