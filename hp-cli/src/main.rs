//! hp: command-line front end for hotchpotch stores.
//!
//! Every store is a local sled database listed in a JSON configuration file.
//!
//! # Usage
//!
//! ```bash
//! # Register two stores
//! hp init --store usb=/media/usb/hp --store home=~/.hp/home
//!
//! # Create a document on both stores
//! hp create --type public.text --creator org.example.editor --store usb --store home --part FILE=notes.txt
//!
//! # Commit a new revision, then reconcile the stores
//! hp update <DOC> <REV> --part FILE=notes.txt
//! hp sync <DOC>
//!
//! # Inspect
//! hp stat <REV>
//! hp lookup <DOC>
//! hp cat <REV> FILE
//! ```

mod output;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use hp_core::{
    Connector, ConnectorConfig, DocId, PreRevisionPolicy, RevId, StoreBackendConfig, StoreConfig,
    StoreId, Writer,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "hp")]
#[command(author = "Hotchpotch Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Distributed, version-controlled document store")]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = "hotchpotch.json")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a configuration file listing the stores
    Init {
        /// Store as ID=PATH, repeatable
        #[arg(long = "store", value_parser = parse_pair, required = true)]
        stores: Vec<(String, PathBuf)>,
        /// A suspend replaces pre-revisions with the same parents
        #[arg(long)]
        replace_same_parent: bool,
    },

    /// Create a new document
    Create {
        /// Type code, e.g. public.text
        #[arg(long = "type")]
        type_code: String,
        /// Creator code
        #[arg(long)]
        creator: String,
        /// Target store, repeatable
        #[arg(long = "store", required = true)]
        stores: Vec<String>,
        /// Part content as NAME=FILE, repeatable
        #[arg(long = "part", value_parser = parse_pair)]
        parts: Vec<(String, PathBuf)>,
    },

    /// Write the next revision of a document
    Update {
        doc: DocId,
        /// Base revision
        base: RevId,
        #[arg(long)]
        creator: Option<String>,
        #[arg(long = "type")]
        type_code: Option<String>,
        /// Target store, repeatable (default: stores where BASE is a head)
        #[arg(long = "store")]
        stores: Vec<String>,
        #[arg(long = "part", value_parser = parse_pair)]
        parts: Vec<(String, PathBuf)>,
        /// Explicit parents, e.g. for a merge
        #[arg(long = "parent")]
        parents: Vec<RevId>,
        /// Store as pre-revision instead of committing
        #[arg(long)]
        suspend: bool,
    },

    /// Continue a suspended revision
    Resume {
        doc: DocId,
        pre: RevId,
        #[arg(long = "part", value_parser = parse_pair)]
        parts: Vec<(String, PathBuf)>,
        #[arg(long)]
        suspend: bool,
    },

    /// Reconcile a document across stores
    Sync {
        doc: DocId,
        #[arg(long = "store")]
        stores: Vec<String>,
    },

    /// Show revision metadata
    Stat { rev: RevId },

    /// Show heads and pre-revisions of a document
    Lookup { doc: DocId },

    /// Abandon a pre-revision
    Forget { doc: DocId, pre: RevId },

    /// Write one part of a revision to stdout
    Cat { rev: RevId, part: String },

    /// List known documents
    Docs,
}

fn parse_pair(s: &str) -> std::result::Result<(String, PathBuf), String> {
    match s.split_once('=') {
        Some((name, path)) if !name.is_empty() && !path.is_empty() => {
            Ok((name.to_string(), PathBuf::from(path)))
        }
        _ => Err(format!("expected NAME=PATH, got '{}'", s)),
    }
}

fn store_ids(stores: &[String]) -> Vec<StoreId> {
    stores.iter().map(|id| StoreId::new(id.as_str())).collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let env_filter = if cli.debug {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::INFO.into())
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    match cli.command {
        Commands::Init {
            stores,
            replace_same_parent,
        } => cmd_init(&cli.config, stores, replace_same_parent),

        Commands::Create {
            type_code,
            creator,
            stores,
            parts,
        } => {
            let connector = open(&cli.config).await?;
            let mut writer = connector
                .create(&type_code, &creator, &store_ids(&stores))
                .await?;
            finish(&mut writer, &parts, false).await
        }

        Commands::Update {
            doc,
            base,
            creator,
            type_code,
            stores,
            parts,
            parents,
            suspend,
        } => {
            let connector = open(&cli.config).await?;
            let stores = store_ids(&stores);
            let stores = (!stores.is_empty()).then_some(stores.as_slice());
            let mut writer = connector
                .update(doc, base, creator.as_deref(), stores)
                .await?;
            if let Some(type_code) = type_code {
                writer.set_type(type_code)?;
            }
            if !parents.is_empty() {
                writer.set_parents(parents).await?;
            }
            finish(&mut writer, &parts, suspend).await
        }

        Commands::Resume {
            doc,
            pre,
            parts,
            suspend,
        } => {
            let connector = open(&cli.config).await?;
            let mut writer = connector.resume(doc, pre).await?;
            finish(&mut writer, &parts, suspend).await
        }

        Commands::Sync { doc, stores } => {
            let connector = open(&cli.config).await?;
            let stores = store_ids(&stores);
            let stores = (!stores.is_empty()).then_some(stores.as_slice());
            let head = connector.sync(doc, stores).await?;
            println!("{}", head);
            Ok(())
        }

        Commands::Stat { rev } => {
            let connector = open(&cli.config).await?;
            let stat = connector.stat(rev).await?;
            println!("{}", serde_json::to_string_pretty(&output::StatView::from(&stat))?);
            Ok(())
        }

        Commands::Lookup { doc } => {
            let connector = open(&cli.config).await?;
            let lookup = connector.lookup(doc).await?;
            println!("{}", serde_json::to_string_pretty(&output::LookupView::from(&lookup))?);
            Ok(())
        }

        Commands::Forget { doc, pre } => {
            let connector = open(&cli.config).await?;
            connector.forget(doc, pre).await?;
            println!("Forgot {}", pre);
            Ok(())
        }

        Commands::Cat { rev, part } => {
            let connector = open(&cli.config).await?;
            let data = connector.peek(rev).await?.read_all(&part).await?;
            std::io::stdout().write_all(&data)?;
            Ok(())
        }

        Commands::Docs => {
            let connector = open(&cli.config).await?;
            for doc in connector.documents().await? {
                println!("{}", doc);
            }
            Ok(())
        }
    }
}

async fn open(config_path: &Path) -> Result<Connector> {
    let config = ConnectorConfig::load(config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    if config.stores.is_empty() {
        return Err(anyhow!(
            "No stores configured in {}; run `hp init` first",
            config_path.display()
        ));
    }
    Ok(Connector::from_config(&config).await?)
}

fn cmd_init(config_path: &Path, stores: Vec<(String, PathBuf)>, replace_same_parent: bool) -> Result<()> {
    let config = ConnectorConfig {
        stores: stores
            .into_iter()
            .map(|(id, path)| StoreConfig {
                id: StoreId::new(id),
                backend: StoreBackendConfig::Disk { path },
            })
            .collect(),
        pre_revision_policy: if replace_same_parent {
            PreRevisionPolicy::ReplaceSameParent
        } else {
            PreRevisionPolicy::Coexist
        },
        ..ConnectorConfig::default()
    };
    config
        .save(config_path)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;

    println!("Configuration written to {}", config_path.display());
    for store in &config.stores {
        if let StoreBackendConfig::Disk { path } = &store.backend {
            println!("  {:<12} {}", store.id, path.display());
        }
    }
    Ok(())
}

/// Load part files into the writer, then commit or suspend it
async fn finish(writer: &mut Writer, parts: &[(String, PathBuf)], suspend: bool) -> Result<()> {
    let mut total = 0u64;
    for (name, path) in parts {
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        total += data.len() as u64;
        writer.write_all(name, &data)?;
    }

    let rev = if suspend {
        writer.suspend().await?
    } else {
        writer.commit().await?
    };

    println!("Document: {}", writer.doc());
    println!("{}  {}", if suspend { "Pre-rev: " } else { "Revision:" }, rev);
    println!("Written:  {}", output::format_size(total));
    Ok(())
}
