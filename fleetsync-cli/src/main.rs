//! Entry point for the command-line interface.
#![forbid(unsafe_code)]

use env_logger::Env;
use eyre::WrapErr;

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    if let Err(err) = fleetsync_cli::run().wrap_err("fleetsync stopped") {
        eprintln!("fleetsync: {err:?}");
        std::process::exit(1);
    }
}
