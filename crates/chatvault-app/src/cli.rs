//! CLI argument definitions for the chatvault binary.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use std::path::PathBuf;

use clap::{ArgGroup, Parser, Subcommand};

use chatvault_core::config::{expand_home, VaultConfig};

/// chatvault - archive chat exports in a local SQLite store.
#[derive(Parser, Debug)]
#[command(name = "chatvault", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Database file.
    #[arg(long = "db", global = true)]
    pub db: Option<PathBuf>,

    /// Managed media directory.
    #[arg(long = "media-dir", global = true)]
    pub media_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Parse an export file and store it as a new chat.
    Import {
        /// Export text file. Attachments are expected next to it.
        file: PathBuf,

        /// Chat name (defaults to `import.default_chat_name`).
        #[arg(short = 'n', long = "name")]
        name: Option<String>,

        /// Merge an imported user into a stored one, as `name:user_id`.
        #[arg(short = 'm', long = "map-user", value_parser = parse_user_mapping)]
        map_user: Vec<(String, i64)>,

        /// Print the parsed working set before saving.
        #[arg(long = "print-context")]
        print_context: bool,
    },

    /// List stored chats.
    List {
        #[arg(long = "json")]
        json: bool,
    },

    /// Print the messages of one chat.
    #[command(group(ArgGroup::new("chat").required(true).args(["id", "name"])))]
    View {
        #[arg(long = "id")]
        id: Option<i64>,

        #[arg(long = "name")]
        name: Option<String>,
    },

    /// Dump a loaded chat with runtime and database ids.
    Inspect {
        #[arg(long = "id")]
        id: i64,

        #[arg(long = "json")]
        json: bool,
    },
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > CHATVAULT_CONFIG env var > ~/.chatvault/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("CHATVAULT_CONFIG") {
            return expand_home(&p);
        }
        default_config_path()
    }

    /// Resolve the database file.
    ///
    /// Priority: --db flag > CHATVAULT_DB env var > config file value.
    pub fn resolve_db_path(&self, config: &VaultConfig) -> PathBuf {
        if let Some(ref p) = self.db {
            return p.clone();
        }
        if let Ok(p) = std::env::var("CHATVAULT_DB") {
            return expand_home(&p);
        }
        config.database_path()
    }

    /// Resolve the managed media directory.
    ///
    /// Priority: --media-dir flag > CHATVAULT_MEDIA env var > config file value.
    pub fn resolve_media_dir(&self, config: &VaultConfig) -> PathBuf {
        if let Some(ref p) = self.media_dir {
            return p.clone();
        }
        if let Ok(p) = std::env::var("CHATVAULT_MEDIA") {
            return expand_home(&p);
        }
        config.media_dir()
    }

    /// Resolve the log level.
    ///
    /// Priority: --log-level flag > config file value.
    pub fn resolve_log_level(&self, config: &VaultConfig) -> String {
        self.log_level
            .clone()
            .unwrap_or_else(|| config.general.log_level.clone())
    }
}

/// Parse `name:user_id`. The id is taken after the last colon.
pub fn parse_user_mapping(value: &str) -> Result<(String, i64), String> {
    let (name, id) = value
        .rsplit_once(':')
        .ok_or_else(|| format!("expected name:user_id, got {:?}", value))?;
    if name.is_empty() {
        return Err(format!("missing user name in {:?}", value));
    }
    let id = id
        .trim()
        .parse::<i64>()
        .map_err(|e| format!("invalid user id in {:?}: {}", value, e))?;
    Ok((name.to_string(), id))
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".chatvault").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".chatvault").join("config.toml");
    }
    PathBuf::from("config.toml")
}
