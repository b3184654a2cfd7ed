//! Flowstore CLI
//!
//! Usage:
//!   flowstore root <file>
//!   flowstore submission <file> [--tags <hex>]
//!   flowstore gen [--size <bytes>] [--file <path>] [--overwrite]
//!   flowstore simulate <file> [--force] [--download <path>]
//!   flowstore kv-encode --stream <hex> [--set key=value]... [--watch key]... [--out <path>]
//!   flowstore config

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use flowstore_config::{get_config_path, Config};
use flowstore_core::{
    from_hex, to_hex, Downloader, FileTree, FlowConfig, FlowFile, MemoryLedger, MemoryNode,
    Submission, UploadOption, Uploader,
};
use flowstore_kv::{encode_stream_data, StreamDataBuilder};
use rand::{Rng, RngCore};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const MIB: u64 = 1024 * 1024;

#[derive(Parser)]
#[command(name = "flowstore")]
#[command(about = "Chunk, commit and upload files to ledger-anchored storage", long_about = None)]
struct Cli {
    /// Config file (defaults to ~/.flowstore/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the merkle root of a file
    Root {
        /// Path to file
        file: PathBuf,
    },
    /// Print the ledger submission for a file as JSON
    Submission {
        /// Path to file
        file: PathBuf,
        /// Tags to anchor with the submission, hex
        #[arg(long, default_value = "")]
        tags: String,
    },
    /// Generate a file with random content
    Gen {
        /// Size in bytes, random between 1 and 10 MiB if omitted
        #[arg(long)]
        size: Option<u64>,
        /// Output path, derived from the size if omitted
        #[arg(long)]
        file: Option<PathBuf>,
        /// Replace an existing file
        #[arg(long)]
        overwrite: bool,
    },
    /// Run a full upload against an in-memory node and ledger
    Simulate {
        /// Path to file
        file: PathBuf,
        /// Upload a second time, re-anchoring the same content
        #[arg(long)]
        force: bool,
        /// Download the file back from the node into this path
        #[arg(long)]
        download: Option<PathBuf>,
    },
    /// Encode a KV batch
    KvEncode {
        /// Stream id, hex
        #[arg(long)]
        stream: String,
        /// Batch version
        #[arg(long, default_value_t = u64::MAX)]
        version: u64,
        /// Write `key=value`
        #[arg(long = "set")]
        sets: Vec<String>,
        /// Read intent on a key
        #[arg(long = "watch")]
        watches: Vec<String>,
        /// Write the encoded batch here instead of printing hex
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Show the active configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("flowstore_core=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load_or_default(),
    };
    let flow = config.flow_config()?;

    match cli.command {
        Commands::Root { file } => {
            let file = open_file(&file, flow)?;
            let tree = FileTree::build(&file).context("Failed to build merkle tree")?;
            println!("root:     {}", to_hex(&tree.root()));
            println!("size:     {}", file.size());
            println!("chunks:   {}", file.num_chunks());
            println!("segments: {}", file.num_segments());
        }
        Commands::Submission { file, tags } => {
            let tags = hex::decode(tags.trim_start_matches("0x")).context("Invalid tags hex")?;
            let file = open_file(&file, flow)?;
            let tree = FileTree::build(&file).context("Failed to build merkle tree")?;
            let submission = Submission::create(&tree, file.size(), tags)?;
            println!("{}", serde_json::to_string_pretty(&submission)?);
        }
        Commands::Gen {
            size,
            file,
            overwrite,
        } => {
            let size = size.unwrap_or_else(|| rand::thread_rng().gen_range(MIB..=10 * MIB));
            if size == 0 {
                bail!("Size must be greater than 0");
            }
            let path = file.unwrap_or_else(|| default_gen_name(size));
            generate_file(&path, size, overwrite)?;

            let file = open_file(&path, flow)?;
            let tree = FileTree::build(&file).context("Failed to build merkle tree")?;
            println!("Generated {} ({} bytes)", path.display(), size);
            println!("root: {}", to_hex(&tree.root()));
        }
        Commands::Simulate {
            file,
            force,
            download,
        } => {
            let option = config
                .upload_option()
                .with_poll_interval(Duration::from_millis(10));
            simulate(flow, &option, &file, force, download.as_deref()).await?;
        }
        Commands::KvEncode {
            stream,
            version,
            sets,
            watches,
            out,
        } => {
            let stream_id = from_hex(&stream).context("Invalid stream id")?;
            let mut builder = StreamDataBuilder::new(version);
            for key in watches {
                builder.watch(stream_id, key.into_bytes());
            }
            for entry in sets {
                let (key, value) = entry
                    .split_once('=')
                    .with_context(|| format!("Expected key=value, got {}", entry))?;
                builder.set(stream_id, key.as_bytes(), value.as_bytes());
            }

            let data = builder.build()?;
            let encoded = encode_stream_data(&data)?;
            println!("tags: {}", hex::encode(builder.build_tags()));
            match out {
                Some(path) => {
                    fs::write(&path, &encoded)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    println!("Wrote {} bytes to {}", encoded.len(), path.display());
                }
                None => println!("data: {}", hex::encode(&encoded)),
            }
        }
        Commands::Config => {
            let path = cli.config.unwrap_or_else(get_config_path);
            println!("# {}", path.display());
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn open_file(path: &Path, config: FlowConfig) -> Result<FlowFile> {
    FlowFile::open(path, config).with_context(|| format!("Failed to open {}", path.display()))
}

fn default_gen_name(size: u64) -> PathBuf {
    let name = if size % MIB == 0 {
        format!("file{}MB.bin", size / MIB)
    } else if size % 1024 == 0 {
        format!("file{}KB.bin", size / 1024)
    } else {
        format!("file{}B.bin", size)
    };
    PathBuf::from(name)
}

fn generate_file(path: &Path, size: u64, overwrite: bool) -> Result<()> {
    if path.exists() && !overwrite {
        bail!("{} already exists, use --overwrite to replace it", path.display());
    }

    let mut out = fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let mut rng = rand::thread_rng();
    let mut buf = vec![0u8; MIB as usize];
    let mut remaining = size;
    while remaining > 0 {
        let n = remaining.min(MIB) as usize;
        rng.fill_bytes(&mut buf[..n]);
        out.write_all(&buf[..n])?;
        remaining -= n as u64;
    }
    out.flush()?;
    Ok(())
}

/// Run uploads (and optionally a download) against an in-memory node and ledger
async fn simulate(
    flow: FlowConfig,
    option: &UploadOption,
    file: &Path,
    force: bool,
    download: Option<&Path>,
) -> Result<()> {
    let node = MemoryNode::new(flow);
    let ledger = MemoryLedger::new(node.clone());
    let uploader =
        Uploader::new(Arc::new(node.clone()), Arc::new(ledger.clone())).with_config(flow);

    let mut report = uploader.upload_path(file, option).await?;
    print_report(&report);
    if force {
        report = uploader.upload_path(file, &option.clone().force()).await?;
        print_report(&report);
    }
    if let Some(path) = download {
        let downloader = Downloader::with_config(Arc::new(node), flow);
        let written = downloader.download_to(&report.root, path, true).await?;
        println!("downloaded: {} ({} bytes)", path.display(), written);
    }
    info!(submissions = ledger.submissions().len(), "Simulation finished");
    Ok(())
}

fn print_report(report: &flowstore_core::UploadReport) {
    println!("root:     {}", to_hex(&report.root));
    println!("path:     {:?}", report.transitions);
    println!("segments: {}", report.segments_uploaded);
    if let Some(tx) = &report.tx {
        println!("tx:       {}", tx);
    }
}
