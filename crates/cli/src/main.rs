use clap::{Parser, Subcommand};
use hnswgraph_core::{IndexConfig, LabelFilter, Space, VectorIndex};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod fvecs;

#[derive(Parser)]
#[command(name = "hnswgraph", about = "Build, query and inspect persistent HNSW indexes")]
struct Args {
    /// Index directory (header.bin, data.bin, config.json)
    #[arg(short, long, global = true, default_value = "./index")]
    dir: PathBuf,

    /// Worker threads for batch operations (0 = all cores)
    #[arg(long, global = true, default_value_t = 0)]
    threads: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create an empty index
    Create {
        #[arg(long)]
        dim: usize,
        /// Distance space: l2, ip or cosine
        #[arg(long, default_value = "l2")]
        space: Space,
        #[arg(long, default_value_t = hnswgraph_core::config::DEFAULT_MAX_ELEMENTS)]
        max_elements: usize,
        #[arg(long, default_value_t = hnswgraph_core::config::HNSW_DEFAULT_M)]
        m: usize,
        #[arg(long, default_value_t = hnswgraph_core::config::HNSW_DEFAULT_EF_CONSTRUCTION)]
        ef_construction: usize,
        #[arg(long, default_value_t = hnswgraph_core::config::DEFAULT_RANDOM_SEED)]
        seed: u64,
        /// Let inserts reuse slots of deleted elements
        #[arg(long, default_value_t = false)]
        allow_replace_deleted: bool,
    },
    /// Insert vectors from a flat vector file, labeled sequentially
    Import {
        #[arg(long)]
        input: PathBuf,
        /// Label of the first vector
        #[arg(long, default_value_t = 0)]
        start_label: u64,
        /// Replace existing labels instead of failing
        #[arg(long, default_value_t = false)]
        replace: bool,
    },
    /// Nearest-neighbor query; prints one JSON array of hits per query
    Query {
        /// Comma-separated query vector
        #[arg(long, conflicts_with = "input")]
        vector: Option<String>,
        /// Flat vector file with one query per row
        #[arg(long)]
        input: Option<PathBuf>,
        #[arg(short, default_value_t = 10)]
        k: usize,
        #[arg(long)]
        ef: Option<usize>,
    },
    /// Soft-delete labels
    Delete { labels: Vec<u64> },
    /// Restore soft-deleted labels
    Undelete { labels: Vec<u64> },
    /// Change capacity
    Resize { capacity: usize },
    /// Print configuration and counts as JSON
    Info {
        /// Also list labels: all, active_only or deleted_only
        #[arg(long)]
        labels: Option<String>,
    },
    /// Write a full snapshot to another directory
    Save { out: PathBuf },
    /// Dump live vectors to a flat vector file, in internal-id order
    Export {
        #[arg(long)]
        output: PathBuf,
    },
}

fn open(dir: &Path, threads: usize, read_only: bool) -> Result<VectorIndex, Box<dyn std::error::Error>> {
    if !dir.join(hnswgraph_core::config::HEADER_FILE_NAME).is_file() {
        return Err(format!("no index found in {:?}", dir).into());
    }
    // Behavioral knobs come from the sidecar; structure always comes from the header
    let stored = IndexConfig::load_sidecar(dir).unwrap_or_else(|e| {
        tracing::warn!("Ignoring unreadable config sidecar in {:?}: {}", dir, e);
        IndexConfig::default()
    });
    let index = VectorIndex::create_or_load(IndexConfig {
        persist_location: Some(dir.to_path_buf()),
        num_threads: threads,
        read_only,
        max_elements: 0,
        ..stored
    })?;
    Ok(index)
}

fn parse_label_filter(s: &str) -> Result<LabelFilter, Box<dyn std::error::Error>> {
    Ok(serde_json::from_value(serde_json::Value::String(s.to_string()))?)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("hnswgraph_core=info".parse()?)
                .add_directive("hnswgraph=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let dir = args.dir.as_path();

    match args.command {
        Command::Create {
            dim,
            space,
            max_elements,
            m,
            ef_construction,
            seed,
            allow_replace_deleted,
        } => {
            if dir.join(hnswgraph_core::config::HEADER_FILE_NAME).exists() {
                return Err(format!("an index already exists in {:?}", dir).into());
            }
            let index = VectorIndex::create_or_load(IndexConfig {
                dimension: dim,
                space,
                max_elements,
                m,
                ef_construction,
                random_seed: seed,
                allow_replace_deleted,
                persist_location: Some(dir.to_path_buf()),
                num_threads: args.threads,
                ..Default::default()
            })?;
            tracing::info!("Created index in {:?}", dir);
            index.close()?;
        }
        Command::Import {
            input,
            start_label,
            replace,
        } => {
            let index = open(dir, args.threads, false)?;
            let (dim, vectors) = fvecs::read_vectors(&input)?;
            if dim != index.dimension() {
                return Err(format!(
                    "{:?} holds {}-d vectors, index is {}-d",
                    input,
                    dim,
                    index.dimension()
                )
                .into());
            }
            let labels: Vec<u64> = (start_label..start_label + vectors.len() as u64).collect();
            index.insert_batch(&vectors, &labels, replace)?;
            index.persist_dirty()?;
            tracing::info!(
                "Imported {} vectors ({} elements total)",
                vectors.len(),
                index.current_count()
            );
        }
        Command::Query {
            vector,
            input,
            k,
            ef,
        } => {
            let index = open(dir, args.threads, true)?;
            if let Some(ef) = ef {
                index.set_ef_search(ef)?;
            }
            let queries = match (vector, input) {
                (Some(v), None) => vec![fvecs::parse_inline(&v)?],
                (None, Some(path)) => fvecs::read_vectors(&path)?.1,
                _ => return Err("pass exactly one of --vector or --input".into()),
            };
            for hits in index.search_batch(&queries, k, None)? {
                println!("{}", serde_json::to_string(&hits)?);
            }
        }
        Command::Delete { labels } => {
            let index = open(dir, args.threads, false)?;
            index.delete_batch(&labels)?;
            index.persist_dirty()?;
            tracing::info!("Deleted {} labels", labels.len());
        }
        Command::Undelete { labels } => {
            let index = open(dir, args.threads, false)?;
            for &label in &labels {
                index.undelete(label)?;
            }
            index.persist_dirty()?;
            tracing::info!("Restored {} labels", labels.len());
        }
        Command::Resize { capacity } => {
            let index = open(dir, args.threads, false)?;
            index.resize(capacity)?;
            index.persist_dirty()?;
        }
        Command::Info { labels } => {
            let index = open(dir, args.threads, true)?;
            let mut info = serde_json::json!({
                "config": index.config(),
                "current_count": index.current_count(),
                "deleted_count": index.deleted_count(),
                "active_count": index.active_count(),
            });
            if let Some(filter) = labels {
                info["labels"] = serde_json::json!(index.list_labels(parse_label_filter(&filter)?));
            }
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Command::Save { out } => {
            let index = open(dir, args.threads, true)?;
            index.save(&out)?;
        }
        Command::Export { output } => {
            let index = open(dir, args.threads, true)?;
            let labels = index.list_labels(LabelFilter::ActiveOnly);
            let vectors = index.get_vectors(&labels)?;
            fvecs::write_vectors(&output, &vectors)?;
            println!("{}", serde_json::to_string(&labels)?);
            tracing::info!("Exported {} vectors to {:?}", vectors.len(), output);
        }
    }
    Ok(())
}
