use chat_relay::cli::{self, Cli, Commands};
use clap::Parser;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        None | Some(Commands::Serve) => {
            cli::init_logging();
            cli::serve(config_path).await
        }
        Some(Commands::History(args)) => cli::history(args, config_path),
        Some(Commands::Check) => cli::check(config_path),
        Some(Commands::Config) => cli::config_path(config_path),
    }
}
