use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use colored::Colorize;
use depot_replication::{read_partition, DepotConfig, ReplicatedStore};
use depot_store::{open_store, ObjectStore};
use depot_types::{Payload, PayloadSource, StoredObject};
use tracing::debug;

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Create(args) => with_repository(&cli.config, |repo| cmd_create(repo, args)),
        Command::Get(args) => with_repository(&cli.config, |repo| cmd_get(repo, args)),
        Command::Payload(args) => with_repository(&cli.config, |repo| cmd_payload(repo, args)),
        Command::Delete(args) => with_repository(&cli.config, |repo| cmd_delete(repo, args)),
        Command::List(args) => with_repository(&cli.config, |repo| cmd_list(repo, args)),
        Command::LogDump(args) => cmd_log_dump(args),
    }
}

/// Open the repository, run `f` and close it, reporting the first failure.
fn with_repository(
    config_path: &Path,
    f: impl FnOnce(&Repository) -> anyhow::Result<()>,
) -> anyhow::Result<()> {
    let repo = Repository::open(config_path)?;
    let result = f(&repo);
    let closed = repo.close();
    result.and(closed)
}

/// The configured store, with mutations routed through replication when a
/// channel is configured.
struct Repository {
    store: Arc<dyn ObjectStore>,
    replicated: Option<ReplicatedStore>,
}

impl Repository {
    fn open(config_path: &Path) -> anyhow::Result<Self> {
        let config = if config_path.exists() {
            DepotConfig::load(config_path)?
        } else {
            debug!(path = %config_path.display(), "no configuration file, using defaults");
            DepotConfig::default()
        };
        Self::from_config(&config)
    }

    fn from_config(config: &DepotConfig) -> anyhow::Result<Self> {
        let store: Arc<dyn ObjectStore> = Arc::from(open_store(&config.storage)?);
        let replicated = match &config.replication {
            Some(replication) => replication.build_channel()?.map(|channel| {
                ReplicatedStore::new(store.clone(), channel, &replication.cluster_id)
                    .with_payloads(replication.include_payloads)
            }),
            None => None,
        };
        Ok(Self { store, replicated })
    }

    fn create(&self, object: StoredObject) -> anyhow::Result<StoredObject> {
        match &self.replicated {
            Some(replicated) => Ok(replicated.create(object)?),
            None => Ok(self.store.create(object)?),
        }
    }

    fn delete(&self, id: &str) -> anyhow::Result<()> {
        match &self.replicated {
            Some(replicated) => Ok(replicated.delete(id)?),
            None => Ok(self.store.delete(id)?),
        }
    }

    fn close(self) -> anyhow::Result<()> {
        if let Some(replicated) = &self.replicated {
            replicated.shutdown()?;
        }
        self.store.close()?;
        Ok(())
    }
}

/// Split a `name=PATH` payload argument.
fn parse_payload_arg(arg: &str) -> anyhow::Result<(&str, PathBuf)> {
    match arg.split_once('=') {
        Some((name, path)) if !name.is_empty() && !path.is_empty() => Ok((name, PathBuf::from(path))),
        _ => bail!("payload must be given as name=PATH, got {arg:?}"),
    }
}

fn cmd_create(repo: &Repository, args: CreateArgs) -> anyhow::Result<()> {
    let text = fs::read_to_string(&args.content)
        .with_context(|| format!("reading {}", args.content.display()))?;
    let content = serde_json::from_str(&text)
        .with_context(|| format!("{} is not JSON", args.content.display()))?;

    let mut object = StoredObject::new(&args.id, &args.object_type, content);
    for arg in &args.payloads {
        let (name, path) = parse_payload_arg(arg)?;
        let file = File::open(&path).with_context(|| format!("opening {}", path.display()))?;
        let mut payload = Payload::new(name).with_source(PayloadSource::new(file));
        if let Some(filename) = path.file_name() {
            payload = payload.with_filename(filename.to_string_lossy());
        }
        object.add_payload(payload);
    }

    let stored = repo.create(object)?;
    println!("{} Created {}", "✓".green().bold(), stored.id.yellow());
    for payload in stored.payloads.iter().flatten() {
        println!("  {} {} bytes", payload.name.cyan(), payload.size);
    }
    Ok(())
}

fn cmd_get(repo: &Repository, args: GetArgs) -> anyhow::Result<()> {
    let object = repo.store.get(&args.id)?;
    let value = serde_json::to_value(&object)?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn cmd_payload(repo: &Repository, args: PayloadArgs) -> anyhow::Result<()> {
    let mut reader = repo
        .store
        .get_payload_range(&args.id, &args.name, args.start, args.end)?
        .ok_or_else(|| anyhow!("{} has no payload {}", args.id, args.name))?;

    match &args.output {
        Some(path) => {
            let mut file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
            let written = io::copy(&mut reader, &mut file)?;
            file.flush()?;
            eprintln!("{} Wrote {} bytes to {}", "✓".green().bold(), written, path.display());
        }
        None => {
            let mut stdout = io::stdout().lock();
            io::copy(&mut reader, &mut stdout)?;
            stdout.flush()?;
        }
    }
    Ok(())
}

fn cmd_delete(repo: &Repository, args: DeleteArgs) -> anyhow::Result<()> {
    repo.delete(&args.id)?;
    println!("{} Deleted {}", "✓".green().bold(), args.id.yellow());
    Ok(())
}

fn cmd_list(repo: &Repository, args: ListArgs) -> anyhow::Result<()> {
    let mut count = 0usize;
    if args.ids {
        let handles = if args.types.is_empty() {
            repo.store.list_handles()?
        } else {
            repo.store.list_handles_by_type(&args.types)?
        };
        for id in handles {
            println!("{}", id?);
            count += 1;
        }
    } else {
        let objects = if args.types.is_empty() {
            repo.store.list()?
        } else {
            repo.store.list_by_type(&args.types)?
        };
        for object in objects {
            let object = object?;
            println!("{}  {}", object.id.yellow(), object.object_type.cyan());
            count += 1;
        }
    }
    eprintln!("{} objects", count.to_string().bold());
    Ok(())
}

fn cmd_log_dump(args: LogDumpArgs) -> anyhow::Result<()> {
    let records = read_partition(&args.root, &args.topic, args.partition)?;
    for (offset, record) in records.iter().enumerate() {
        println!(
            "{} {} {} {}",
            offset.to_string().dimmed(),
            record.timestamp_ms.to_string().dimmed(),
            record.key.yellow(),
            record.value
        );
    }
    eprintln!(
        "{} records in {}/{}",
        records.len().to_string().bold(),
        args.topic,
        args.partition
    );
    Ok(())
}
