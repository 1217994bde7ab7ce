//! Configuration CLI commands.
//!
//! `config path` prints where the config file is read from, `config show`
//! prints the effective settings in INI form and `config init` writes a
//! default file.

use std::io;
use std::path::Path;

use clap::Subcommand;
use fydownloader::config::ConfigFile;

use crate::error::CliError;

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Show the configuration file path
    Path,

    /// Show the effective configuration
    Show,

    /// Write a config file with default settings
    Init {
        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Run a config subcommand.
///
/// `path` is the resolved config file location; `file` its loaded contents.
pub fn run(command: ConfigCommands, path: &Path, file: &ConfigFile) -> Result<(), CliError> {
    match command {
        ConfigCommands::Path => run_path(path),
        ConfigCommands::Show => run_show(path, file),
        ConfigCommands::Init { force } => run_init(path, force),
    }
}

fn run_path(path: &Path) -> Result<(), CliError> {
    println!("{}", path.display());
    Ok(())
}

fn run_show(path: &Path, file: &ConfigFile) -> Result<(), CliError> {
    if !path.exists() {
        println!("; {} does not exist, showing defaults", path.display());
    }
    file.to_ini()
        .write_to(&mut io::stdout().lock())
        .map_err(CliError::Io)
}

fn run_init(path: &Path, force: bool) -> Result<(), CliError> {
    if path.exists() && !force {
        return Err(CliError::Config(format!(
            "{} already exists (use --force to replace it)",
            path.display()
        )));
    }
    ConfigFile::default().save_to(path)?;
    println!("Wrote {}", path.display());
    Ok(())
}
