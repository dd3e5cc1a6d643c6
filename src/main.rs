//! mediasafe CLI.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use mediasafe::import::ImportTaskState;
use mediasafe::{
    AlbumManager, CleartextMedia, FileSecretStore, ImportManager, KeyRegistry, MediaStore,
    PrefKey, PreferenceStore, Protection, StorageOption,
};

#[derive(Parser)]
#[command(name = "mediasafe")]
#[command(version = mediasafe::VERSION)]
#[command(about = "Encrypted media store with rotatable keys and background import")]
struct Cli {
    /// Data directory
    #[arg(short, long, default_value = "./mediasafe-data")]
    data: PathBuf,

    /// Synced volume used as the cloud replica and Cloud-album root
    #[arg(long)]
    cloud: Option<PathBuf>,

    /// Protect the secret store with a passphrase instead of a device secret
    #[arg(long)]
    passphrase: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage encryption keys
    Key {
        #[command(subcommand)]
        command: KeyCommands,
    },

    /// Manage albums
    Album {
        #[command(subcommand)]
        command: AlbumCommands,
    },

    /// Import files into an album
    Import {
        /// Source files
        paths: Vec<PathBuf>,

        /// Target album name
        #[arg(short, long)]
        album: String,
    },

    /// Backfill key tags on files created before tagging existed
    MigrateTags {
        /// Album name
        #[arg(short, long)]
        album: String,
    },

    /// Decrypt one media item to a file
    Export {
        /// Media id (see `stats` / file stems)
        id: String,

        /// Album name
        #[arg(short, long)]
        album: String,

        /// Output path
        output: PathBuf,
    },

    /// Show store statistics
    Stats,
}

#[derive(Subcommand)]
enum KeyCommands {
    /// Create a new key
    Create {
        name: String,

        /// Make it the current key
        #[arg(long)]
        r#use: bool,
    },
    /// List stored keys
    List,
    /// Switch the current key
    Use { name: String },
    /// Delete a key (media stays, undecryptable until re-import)
    Delete { name: String },
    /// Print a backup document for all keys
    Backup,
    /// Import a key from its base64 backup code
    Import { name: String, code: String },
}

#[derive(Subcommand)]
enum AlbumCommands {
    /// Create an album bound to the current key
    Create {
        name: String,

        /// Place the album on the synced volume
        #[arg(long)]
        cloud_storage: bool,
    },
    /// List albums
    List,
}

struct Env {
    prefs: Arc<PreferenceStore>,
    registry: Arc<KeyRegistry>,
    albums: Arc<AlbumManager>,
}

fn open_env(cli: &Cli) -> anyhow::Result<Env> {
    std::fs::create_dir_all(&cli.data)?;

    let cloud_prefs = cli.cloud.as_ref().map(|c| c.join("prefs-replica.json"));
    let prefs = Arc::new(PreferenceStore::open(
        &cli.data.join("prefs.json"),
        cloud_prefs,
    )?);

    if prefs.needs_migration() && cli.cloud.is_some() {
        prefs.migrate_to_cloud_storage()?;
    }

    let protection = match &cli.passphrase {
        Some(p) => Protection::Passphrase(p.clone()),
        None => Protection::DeviceKey,
    };
    let secrets = FileSecretStore::open(&cli.data.join("keys"), protection)?;
    let registry = Arc::new(KeyRegistry::open(Box::new(secrets), prefs.clone())?);

    let albums = Arc::new(AlbumManager::new(
        prefs.clone(),
        registry.clone(),
        &cli.data,
        cli.cloud.clone(),
    ));

    Ok(Env {
        prefs,
        registry,
        albums,
    })
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let env = open_env(&cli)?;

    match cli.command {
        Commands::Key { command } => run_key(&env, command)?,
        Commands::Album { command } => run_album(&env, command)?,
        Commands::Import { paths, album } => run_import(&env, paths, &album).await?,
        Commands::MigrateTags { album } => {
            let store = open_store(&env, &album)?;
            let report = store.set_key_tag_for_existing_files()?;
            println!(
                "Scanned {} files: {} tagged, {} already tagged, {} skipped",
                report.scanned, report.tagged, report.already_tagged, report.skipped
            );
        }
        Commands::Export { id, album, output } => {
            let store = open_store(&env, &album)?;
            let file = store
                .enumerate_media()?
                .into_iter()
                .find(|f| f.id == id)
                .with_context(|| format!("no media '{}' in album '{}'", id, album))?;
            let data = store.load(&file)?;
            std::fs::write(&output, data)?;
            println!("Exported {} to {}", id, output.display());
        }
        Commands::Stats => run_stats(&env)?,
    }

    Ok(())
}

fn run_key(env: &Env, command: KeyCommands) -> anyhow::Result<()> {
    match command {
        KeyCommands::Create { name, r#use } => {
            let key = env.registry.create(&name, r#use)?;
            println!("Created key '{}' ({})", key.name, key.id);
        }
        KeyCommands::List => {
            let current = env.registry.current_key().map(|k| k.name);
            for key in env.registry.stored_keys() {
                let marker = if Some(&key.name) == current.as_ref() {
                    "*"
                } else {
                    " "
                };
                println!(
                    "{} {}  {}  [{}]  created {}",
                    marker,
                    key.name,
                    key.id,
                    key.fingerprint(),
                    key.created_at.format("%Y-%m-%d")
                );
            }
        }
        KeyCommands::Use { name } => {
            env.registry.set_active(&name)?;
            println!("Current key is now '{}'", name);
        }
        KeyCommands::Delete { name } => {
            env.registry.delete(&name)?;
            println!("Deleted key '{}'", name);
        }
        KeyCommands::Backup => {
            println!("{}", env.registry.backup_document());
        }
        KeyCommands::Import { name, code } => {
            let key = env.registry.import_key(&name, &code)?;
            println!("Imported key '{}' ({})", key.name, key.id);
        }
    }
    Ok(())
}

fn run_album(env: &Env, command: AlbumCommands) -> anyhow::Result<()> {
    match command {
        AlbumCommands::Create {
            name,
            cloud_storage,
        } => {
            let storage = if cloud_storage {
                StorageOption::Cloud
            } else {
                StorageOption::Local
            };
            let album = env.albums.create(&name, storage)?;
            println!("Created album '{}' ({})", album.name, album.id);
        }
        AlbumCommands::List => {
            for album in env.albums.albums() {
                println!(
                    "{}  {}  [{:?}] key '{}'",
                    album.id, album.name, album.storage, album.key_name
                );
            }
        }
    }
    Ok(())
}

fn open_store(env: &Env, album_name: &str) -> anyhow::Result<MediaStore> {
    let album = env
        .albums
        .find_by_name(album_name)
        .with_context(|| format!("album '{}' not found", album_name))?;
    Ok(MediaStore::open(&album, &env.albums)?)
}

async fn run_import(env: &Env, paths: Vec<PathBuf>, album_name: &str) -> anyhow::Result<()> {
    if paths.is_empty() {
        bail!("nothing to import");
    }

    let album = env
        .albums
        .find_by_name(album_name)
        .with_context(|| format!("album '{}' not found", album_name))?;

    let media: Vec<CleartextMedia> = paths.iter().map(|p| CleartextMedia::from_path(p)).collect();
    let total = media.len();

    let manager = ImportManager::new(env.albums.clone());
    let mut events = manager.subscribe();
    let task_id = manager.start_import(media, album.id, Vec::new())?;

    println!("Importing {} files into '{}'...", total, album.name);

    loop {
        let update = events.recv().await?;
        if update.task_id != task_id {
            continue;
        }
        match &update.state {
            ImportTaskState::Running => {
                println!(
                    "  [{}/{}] {} ({:.0}%)",
                    update.current_file_index + 1,
                    update.total_files,
                    update.current_file_name.as_deref().unwrap_or("-"),
                    update.overall_progress * 100.0
                );
            }
            ImportTaskState::Completed => {
                let task = manager.task(&task_id);
                let failed = task.map(|t| t.failed_items).unwrap_or_default();
                if failed.is_empty() {
                    println!("Done: {} files imported", total);
                } else {
                    println!("Done with {} failures:", failed.len());
                    for item in failed {
                        println!("  {} - {}", item.media_id, item.reason);
                    }
                }
                break;
            }
            ImportTaskState::Cancelled => {
                println!("Import cancelled");
                break;
            }
            ImportTaskState::Failed(reason) => {
                bail!("import failed: {}", reason);
            }
            _ => {}
        }
    }

    Ok(())
}

fn run_stats(env: &Env) -> anyhow::Result<()> {
    let keys = env.registry.stored_keys();
    let albums = env.albums.albums();

    println!("mediasafe statistics");
    println!("{:-<40}", "");
    println!("Keys:            {}", keys.len());
    println!(
        "Current key:     {}",
        env.registry
            .current_key()
            .map(|k| k.name)
            .unwrap_or_else(|| "(none)".into())
    );
    println!("Albums:          {}", albums.len());
    println!(
        "Imported items:  {}",
        env.prefs.integer(PrefKey::ImportedMediaCount)
    );
    println!(
        "Imported bytes:  {}",
        env.prefs.integer(PrefKey::ImportedMediaBytes)
    );
    if let Some(last) = env.prefs.string(PrefKey::LastImportDate) {
        println!("Last import:     {}", last);
    }

    for album in &albums {
        let store = MediaStore::open(album, &env.albums)?;
        let count = store.enumerate_media()?.len();
        println!("  album '{}': {} items", album.name, count);
    }

    Ok(())
}
