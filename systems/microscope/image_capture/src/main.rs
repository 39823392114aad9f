//! Image capture system binary.
use clap::Parser;
use petri::components::prelude::*;

/// Arguments required for starting the program from the command line.
#[derive(Parser, Debug)]
struct Args {
    /// Path to the config file for the Capture Rig component.
    #[arg(short, long)]
    filepath: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();
    let component = CaptureRig::from_config_file(args.filepath);
    CaptureRigController::start(component).await;
}
