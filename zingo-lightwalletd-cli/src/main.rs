#![forbid(unsafe_code)]

use tracing_subscriber::EnvFilter;

pub fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    if let Err(e) = zingo_lightwalletd_cli::run_cli() {
        eprintln!("{e}");
        std::process::exit(1);
    }
}
