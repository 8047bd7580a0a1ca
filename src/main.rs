use std::process::ExitCode;

use clap::Parser;

use sahara_rs::cli::{self, Cli, StdioAdapter};

fn main() -> ExitCode {
    let filter = std::env::var("SAHARA_RS_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    env_logger::Builder::new().parse_filters(&filter).init();

    let cli = Cli::parse();
    let adapter = StdioAdapter;

    match cli::run(cli, &adapter) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            ExitCode::from(err.exit_code() as u8)
        }
    }
}
