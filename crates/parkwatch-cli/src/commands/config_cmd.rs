//! Config subcommand handlers.

use crate::cli::{ConfigArgs, ConfigCommand};
use crate::config::{self, Config};
use crate::error::CliError;

fn to_toml(cfg: &Config) -> Result<String, CliError> {
    toml::to_string_pretty(cfg).map_err(|e| CliError::Validation {
        field: "config".into(),
        reason: format!("failed to serialize config: {e}"),
    })
}

pub fn handle(args: &ConfigArgs) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Init { force } => {
            let path = config::config_path();
            if path.exists() && !force {
                return Err(CliError::ConfigExists {
                    path: path.display().to_string(),
                });
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, to_toml(&Config::default())?)?;
            eprintln!("wrote {}", path.display());
            Ok(())
        }

        ConfigCommand::Show => {
            let cfg = config::load_config()?;
            println!("{}", to_toml(&cfg)?);
            Ok(())
        }

        ConfigCommand::Path => {
            println!("{}", config::config_path().display());
            Ok(())
        }
    }
}
