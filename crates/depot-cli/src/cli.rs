use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "depot",
    about = "Depot - digital object storage with replication",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file
    #[arg(short, long, global = true, default_value = "depot.toml")]
    pub config: PathBuf,

    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Store a new object
    Create(CreateArgs),
    /// Print an object record as JSON
    Get(GetArgs),
    /// Write payload bytes to stdout or a file
    Payload(PayloadArgs),
    /// Delete an object and its payloads
    Delete(DeleteArgs),
    /// List stored objects
    List(ListArgs),
    /// Print the records of one log partition
    LogDump(LogDumpArgs),
}

#[derive(Args)]
pub struct CreateArgs {
    pub id: String,
    #[arg(long = "type")]
    pub object_type: String,
    /// JSON file holding the object content
    #[arg(long)]
    pub content: PathBuf,
    /// Attach a payload, as name=PATH
    #[arg(long = "payload", value_name = "NAME=PATH")]
    pub payloads: Vec<String>,
}

#[derive(Args)]
pub struct GetArgs {
    pub id: String,
}

#[derive(Args)]
pub struct PayloadArgs {
    pub id: String,
    pub name: String,
    /// First byte, inclusive
    #[arg(long)]
    pub start: Option<u64>,
    /// Last byte, inclusive
    #[arg(long)]
    pub end: Option<u64>,
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args)]
pub struct DeleteArgs {
    pub id: String,
}

#[derive(Args)]
pub struct ListArgs {
    /// Only objects of these types
    #[arg(long = "type")]
    pub types: Vec<String>,
    /// Print ids only
    #[arg(long)]
    pub ids: bool,
}

#[derive(Args)]
pub struct LogDumpArgs {
    #[arg(long)]
    pub root: PathBuf,
    #[arg(long)]
    pub topic: String,
    #[arg(long)]
    pub partition: u32,
}
