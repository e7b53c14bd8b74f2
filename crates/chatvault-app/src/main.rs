//! Chatvault application binary - composition root.
//!
//! 1. Parse CLI arguments and load configuration from TOML
//! 2. Initialize tracing
//! 3. Open the archive store (SQLite database + managed media directory)
//! 4. Run the requested subcommand

mod cli;
mod render;

use std::path::Path;

use clap::Parser;

use chatvault_core::config::VaultConfig;
use chatvault_import::{import_from_file, ImportOptions};
use chatvault_storage::{Chat, ChatStorage, DatabaseId};

use crate::cli::{CliArgs, Command};
use crate::render::{render_inspect, render_messages, WorkingSetView};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let config_file = args.resolve_config_path();
    let config = VaultConfig::load_or_default(&config_file);

    // Tracing. RUST_LOG wins over the configured level.
    let level = args.resolve_log_level(&config);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&level)),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(path = %config_file.display(), "Configuration loaded");

    let db_path = args.resolve_db_path(&config);
    let media_dir = args.resolve_media_dir(&config);
    let storage = ChatStorage::open(&db_path, &media_dir)?;
    tracing::debug!(
        db = %db_path.display(),
        media = %media_dir.display(),
        "Archive store opened"
    );

    match args.command {
        Command::Import {
            file,
            name,
            map_user,
            print_context,
        } => run_import(&storage, &config, &file, name, map_user, print_context),
        Command::List { json } => run_list(&storage, json),
        Command::View { id, name } => {
            let chat_id = match (id, name) {
                (Some(id), _) => DatabaseId::new(id),
                (None, Some(name)) => find_chat_by_name(&storage, &name)?,
                (None, None) => return Err("either --id or --name is required".into()),
            };
            let working_set = storage.load(chat_id)?;
            print!("{}", render_messages(&working_set, &storage));
            Ok(())
        }
        Command::Inspect { id, json } => {
            let working_set = storage.load(DatabaseId::new(id))?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&WorkingSetView::new(&working_set))?
                );
            } else {
                print!("{}", render_inspect(&working_set));
            }
            Ok(())
        }
    }
}

fn run_import(
    storage: &ChatStorage,
    config: &VaultConfig,
    file: &Path,
    name: Option<String>,
    map_user: Vec<(String, i64)>,
    print_context: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut options = ImportOptions::from_config(&config.import);
    if let Some(name) = name {
        options.chat_name = name;
    }
    options.user_mapping = map_user;

    let import_root = file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    options.media_root = Some(import_root.clone());

    let mut working_set = import_from_file(file, &options)?;
    if print_context {
        print!("{}", render_inspect(&working_set));
    }

    let report = storage.save(&mut working_set, &import_root)?;
    let chat_id = working_set
        .chat()
        .database_id()
        .map(|id| id.to_string())
        .unwrap_or_default();
    println!(
        "Imported chat {} ({:?}): {} users, {} media, {} messages",
        chat_id,
        working_set.chat().name(),
        report.users,
        report.media,
        report.messages
    );
    if report.media_actions.failed > 0 {
        tracing::warn!(
            failed = report.media_actions.failed,
            "Some media files could not be copied"
        );
    }
    Ok(())
}

fn run_list(storage: &ChatStorage, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let chats = storage.list()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&chats)?);
        return Ok(());
    }
    for entry in &chats {
        println!("{:>6}  {}", entry.database_id.value(), entry.name);
    }
    Ok(())
}

/// First stored chat with exactly this name.
fn find_chat_by_name(
    storage: &ChatStorage,
    name: &str,
) -> Result<DatabaseId<Chat>, Box<dyn std::error::Error>> {
    storage
        .list()?
        .into_iter()
        .find(|entry| entry.name == name)
        .map(|entry| entry.database_id)
        .ok_or_else(|| format!("no stored chat named {:?}", name).into())
}
