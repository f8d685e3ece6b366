//! m365-provision CLI: converge this host into a running M365 Monitor install.

use clap::{CommandFactory, Parser};
use m365_provision::core::error::ErrorKind;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "m365-provision",
    version,
    about = "Provision the M365 Monitor service: venv, env file, systemd unit, optional nginx site"
)]
struct Cli {
    #[command(flatten)]
    install: m365_provision::cli::InstallArgs,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() {
                ErrorKind::UserInput.exit_code()
            } else {
                0
            };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if let Err(e) = m365_provision::cli::dispatch(&cli.install) {
        eprintln!("error: {}", e);
        if e.kind == ErrorKind::UserInput {
            eprintln!();
            eprintln!("{}", Cli::command().render_usage());
        }
        std::process::exit(e.kind.exit_code());
    }
}
