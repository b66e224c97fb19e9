//! Command line interface for the note engine. Supports initialization,
//! publishing public or draft notes, cache-first fetching, local search,
//! relay sync, and delete requests.

use std::{fs, path::Path, sync::Arc};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use notestr::{
    cipher::AesSelfCipher,
    config::{Settings, DEFAULT_RELAYS},
    note::{Note, NoteKind, Visibility},
    session::Session,
    signer::KeypairSigner,
};

/// Command line interface entry point.
#[derive(Parser)]
#[command(
    name = "notestr",
    author,
    version,
    about = "Cache-first Nostr note client"
)]
struct Cli {
    /// Path to the `.env` configuration file.
    #[arg(long, default_value = ".env")]
    env: String,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Write a default `.env` and create the snapshot directory.
    Init,
    /// Publish a note from a markdown file.
    Publish {
        /// Path to the content file.
        file: String,
        /// Note title.
        #[arg(long)]
        title: String,
        /// Publish as a wiki topic instead of an article.
        #[arg(long)]
        topic: bool,
        /// Keep the note as an encrypted draft.
        #[arg(long)]
        draft: bool,
        /// Mark the draft private (implies --draft).
        #[arg(long)]
        private: bool,
        /// Address of a document this note links to; may repeat.
        #[arg(long = "backref")]
        backrefs: Vec<String>,
    },
    /// Fetch one note by title or `kind:pubkey:slug` address and print it.
    Fetch { identifier: String },
    /// Search the local store by title words.
    Search { words: Vec<String> },
    /// Pull this identity's notes from the relays into the local store.
    Sync,
    /// Remove a note locally and broadcast a delete request.
    Delete { identifier: String },
}

/// Execute the selected CLI subcommand.
async fn run(cli: Cli) -> Result<()> {
    if matches!(cli.command, Commands::Init) {
        return init(&cli.env);
    }
    let cfg = Settings::from_env(&cli.env)?;
    let secret = cfg.secret_bytes()?;
    let signer = Arc::new(KeypairSigner::from_secret_bytes(&secret)?);
    let cipher = Arc::new(AesSelfCipher::new(&secret));
    let mut session = Session::connect(cfg, signer, cipher)?;

    match cli.command {
        Commands::Init => unreachable!(),
        Commands::Publish {
            file,
            title,
            topic,
            draft,
            private,
            backrefs,
        } => {
            let content =
                fs::read_to_string(&file).with_context(|| format!("reading {file}"))?;
            let kind = if topic {
                NoteKind::Topic
            } else {
                NoteKind::Article
            };
            let visibility = if private {
                Visibility::Private
            } else if draft {
                Visibility::Draft
            } else {
                Visibility::Published
            };
            let mut note =
                Note::from_content(kind, visibility, title, content, session.pubkey())?;
            let event = session.publish_note(&mut note, &backrefs).await?;
            println!("published {} as {}", note.title, event.id);
            println!("address: {}", note.address());
        }
        Commands::Fetch { identifier } => match session.resolve(&identifier).await? {
            Some(note) => {
                println!("# {} ({})", note.title, note.address());
                println!("{}", note.content);
            }
            None => bail!("no note found for {identifier}"),
        },
        Commands::Search { words } => {
            for note in session.store().search(&words) {
                println!("{}\t{}\t{}", note.created_at, note.database_id(), note.title);
            }
        }
        Commands::Sync => {
            let decoded = session.sync().await?;
            println!("synced {decoded} notes");
        }
        Commands::Delete { identifier } => match session.delete_note(&identifier).await? {
            Some(note) => println!("deleted {}", note.title),
            None => bail!("no local note matches {identifier}"),
        },
    }
    session.disconnect()?;
    Ok(())
}

/// Create a default `.env` (if absent) and the snapshot directory.
fn init(path: &str) -> Result<()> {
    ensure_env_file(path)?;
    let cfg = Settings::from_env(path)?;
    fs::create_dir_all(&cfg.snapshot_root)?;
    Ok(())
}

/// Write a default `.env` file if one is not already present at `path`.
fn ensure_env_file(path: &str) -> Result<()> {
    let env_path = Path::new(path);
    if env_path.exists() {
        return Ok(());
    }
    if let Some(parent) = env_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let base_dir = match env_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir()?,
    };
    let snapshot_root = base_dir.join("notestr-data");
    let mut content = String::new();
    content.push_str(&format!(
        "SNAPSHOT_ROOT={}\n",
        snapshot_root.to_string_lossy()
    ));
    content.push_str(&format!("RELAYS={}\n", DEFAULT_RELAYS.join(",")));
    content.push_str("TOR_SOCKS=\n");
    content.push_str("QUIET_MS=2000\n");
    content.push_str("SECRET_KEY=\n");
    content.push_str("PASSPHRASE=\n");
    fs::write(env_path, content)?;
    Ok(())
}

#[cfg(not(test))]
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    run(cli).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for v in [
            "SNAPSHOT_ROOT",
            "RELAYS",
            "TOR_SOCKS",
            "QUIET_MS",
            "SECRET_KEY",
            "PASSPHRASE",
        ] {
            std::env::remove_var(v);
        }
    }

    fn write_env(dir: &TempDir, extra: &str) -> String {
        let env_path = dir.path().join(".env");
        let content = format!(
            "SNAPSHOT_ROOT={}\nRELAYS=\nQUIET_MS=100\nSECRET_KEY={}\n{}",
            dir.path().to_str().unwrap(),
            "01".repeat(32),
            extra
        );
        fs::write(&env_path, content).unwrap();
        env_path.to_str().unwrap().into()
    }

    #[tokio::test]
    async fn init_scaffolds_env_and_snapshot_root() {
        let _g = ENV_MUTEX.lock().unwrap();
        clear_env();
        let dir = TempDir::new().unwrap();
        let env_path = dir.path().join(".env");
        run(Cli {
            env: env_path.to_string_lossy().into_owned(),
            command: Commands::Init,
        })
        .await
        .unwrap();

        let data = fs::read_to_string(&env_path).unwrap();
        let expected_root = dir.path().join("notestr-data");
        assert!(data.contains(&format!(
            "SNAPSHOT_ROOT={}",
            expected_root.to_string_lossy()
        )));
        assert!(data.contains("RELAYS=wss://"));
        assert!(expected_root.exists());

        // re-running init keeps the existing file
        run(Cli {
            env: env_path.to_string_lossy().into_owned(),
            command: Commands::Init,
        })
        .await
        .unwrap();
        assert_eq!(fs::read_to_string(&env_path).unwrap(), data);
    }

    #[tokio::test]
    async fn search_runs_against_empty_store() {
        let _g = ENV_MUTEX.lock().unwrap();
        clear_env();
        let dir = TempDir::new().unwrap();
        let env_file = write_env(&dir, "");
        run(Cli {
            env: env_file,
            command: Commands::Search { words: vec![] },
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn publish_without_relays_fails_but_saves_locally() {
        let _g = ENV_MUTEX.lock().unwrap();
        clear_env();
        let dir = TempDir::new().unwrap();
        let env_file = write_env(&dir, "");
        let note_path = dir.path().join("note.md");
        fs::write(&note_path, "# Offline body").unwrap();

        let result = run(Cli {
            env: env_file.clone(),
            command: Commands::Publish {
                file: note_path.to_string_lossy().into_owned(),
                title: "Offline Note".into(),
                topic: false,
                draft: false,
                private: false,
                backrefs: vec![],
            },
        })
        .await;
        // broadcast fails with zero relays, but the local write stands
        assert!(result.is_err());
        {
            use notestr::signer::Signer as _;
            let signer = KeypairSigner::from_secret_bytes(&[1u8; 32]).unwrap();
            assert!(notestr::store::snapshot_exists(dir.path(), &signer.pubkey()));
        }

        run(Cli {
            env: env_file,
            command: Commands::Search {
                words: vec!["offline".into()],
            },
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn commands_require_an_identity() {
        let _g = ENV_MUTEX.lock().unwrap();
        clear_env();
        let dir = TempDir::new().unwrap();
        let env_path = dir.path().join(".env");
        fs::write(
            &env_path,
            format!("SNAPSHOT_ROOT={}\nRELAYS=\n", dir.path().to_str().unwrap()),
        )
        .unwrap();
        let result = run(Cli {
            env: env_path.to_string_lossy().into_owned(),
            command: Commands::Search { words: vec![] },
        })
        .await;
        assert!(result.is_err());
    }
}
