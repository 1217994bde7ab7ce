//! fydownloader CLI - Command-line interface
//!
//! Downloads a URL with concurrent range requests, showing one progress bar
//! per chunk. Ctrl+C cancels the download and removes partial files.

mod commands;
mod error;
mod logging;
mod ui;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use console::style;

use fydownloader::config::{config_file_path, ConfigFile};

use commands::config::ConfigCommands;
use commands::get::{GetArgs, SinkArg};
use error::CliError;

#[derive(Debug, Parser)]
#[command(name = "fydownloader")]
#[command(version, about = "Segmented concurrent HTTP downloader", long_about = None)]
struct Cli {
    /// Config file to use instead of the default location
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Show log output on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Download a file
    Get {
        /// URL of the resource
        url: String,

        /// Number of concurrent range requests
        #[arg(short, long)]
        workers: Option<usize>,

        /// Directory to save the file in
        #[arg(short, long, value_name = "DIR")]
        output_dir: Option<PathBuf>,

        /// Where chunk bytes are written while downloading
        #[arg(long, value_enum)]
        sink: Option<SinkArg>,

        /// Per-request timeout in seconds (0 disables)
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,

        /// Expected SHA-256 of the finished file
        #[arg(long, value_name = "HEX")]
        sha256: Option<String>,

        /// Do not draw progress bars
        #[arg(long)]
        no_progress: bool,
    },

    /// Inspect or create configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("{} {}", style("error:").red().bold(), e);
        process::exit(e.exit_code());
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config_path = match cli.config {
        Some(path) => path,
        None => config_file_path()?,
    };
    let file = ConfigFile::load_from(&config_path)?;

    match cli.command {
        Commands::Config { command } => commands::config::run(command, &config_path, &file),
        Commands::Get {
            url,
            workers,
            output_dir,
            sink,
            timeout,
            sha256,
            no_progress,
        } => {
            let _log_guard =
                logging::init(&file.logging.level, file.logging.file.as_deref(), cli.verbose)?;
            let args = GetArgs {
                url,
                workers,
                output_dir,
                sink,
                timeout,
                sha256,
                no_progress,
            };
            commands::get::run(args, &file)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_get_with_flags() {
        let cli = Cli::try_parse_from([
            "fydownloader",
            "get",
            "https://example.com/file.iso",
            "-w",
            "8",
            "--sink",
            "temp",
            "--timeout",
            "30",
        ])
        .unwrap();

        match cli.command {
            Commands::Get {
                url,
                workers,
                sink,
                timeout,
                ..
            } => {
                assert_eq!(url, "https://example.com/file.iso");
                assert_eq!(workers, Some(8));
                assert_eq!(sink, Some(SinkArg::Temp));
                assert_eq!(timeout, Some(30));
            }
            other => panic!("Expected get command, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_config_path_with_global_config() {
        let cli = Cli::try_parse_from(["fydownloader", "config", "path", "--config", "/tmp/fy.ini"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/fy.ini")));
        assert!(matches!(
            cli.command,
            Commands::Config {
                command: ConfigCommands::Path
            }
        ));
    }

    #[test]
    fn test_parse_config_init_force() {
        let cli = Cli::try_parse_from(["fydownloader", "config", "init", "--force"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Config {
                command: ConfigCommands::Init { force: true }
            }
        ));
    }

    #[test]
    fn test_rejects_unknown_sink() {
        assert!(Cli::try_parse_from(["fydownloader", "get", "http://x/y", "--sink", "mmap"]).is_err());
    }
}
