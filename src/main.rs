use log::error;

mod callbacks;
mod cli;
mod dataset;
mod error;
mod metrics;
mod network;
mod optimizer;
mod pipeline;
mod submission;
mod trainer;

fn main() {
    let config = cli::init().unwrap_or_else(|e| {
        error!(target: cli::FATAL_TARGET, "{}", e);
        std::process::exit(1);
    });

    if let Err(e) = pipeline::run(&config) {
        error!(target: cli::FATAL_TARGET, "{}", e);
        std::process::exit(1);
    }
}
