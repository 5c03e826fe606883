mod config;
mod logger;
mod server;
mod signals;

use ::config::ConfigError;
use clap::{Parser, Subcommand};
use config::Settings;
use std::io::{self, Write};
use std::path::PathBuf;

#[derive(Parser)]
#[command(version, author, about, long_about = None)]
#[command(arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the resolved configuration in JSON and exit.
    Config {
        #[arg(long, value_name = "FILE")]
        conf: Option<PathBuf>,
    },
    /// Run the coordinator daemon.
    Serve {
        #[arg(long, value_name = "FILE")]
        conf: Option<PathBuf>,
    },
}

fn load(conf: &Option<PathBuf>) -> Result<Settings, ConfigError> {
    match conf {
        Some(path) => Settings::from_file(path),
        None => Settings::new(),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Cli::parse();

    match &args.command {
        Some(Commands::Config { conf }) => {
            serde_json::to_writer_pretty(io::stdout().lock(), &load(conf)?)?;
            writeln!(io::stdout())?;
        }
        Some(Commands::Serve { conf }) => {
            let settings = load(conf)?;
            settings.init_logger();
            tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?
                .block_on(server::serve(&settings))?;
        }
        None => (),
    }
    Ok(())
}
