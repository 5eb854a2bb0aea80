pub mod config;
pub mod model;
pub mod search;
pub mod sources;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use config::Config;
use model::manifest::Manifest;
use model::types::Quantization;
use search::blob::{self, BlobQuant, HeaderVersion};
use search::checksum::sha256_hex;
use search::hash_embedder::HashEmbedder;
use search::knowledge_base::KnowledgeBase;
use search::vector_store::{MetaFilter, SearchHit, pack_inline_vectors};
use sources::fetch::BlobFetcher;

/// Command-line interface.
#[derive(Parser, Debug)]
#[command(
    name = "kbvec",
    version,
    about = "Inspect, pack and query portable knowledge-base vectors"
)]
pub struct Cli {
    /// Config file (defaults to the platform config dir)
    #[arg(long, global = true, env = "KBVEC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Debug logging on stderr (RUST_LOG overrides)
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the header of a vector blob
    Inspect {
        /// Path or URI (file://, http(s)://, ipfs://) of the blob
        blob: String,

        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Pack a manifest's inline vectors into a blob
    Pack {
        /// Manifest carrying inline embeddings
        manifest: PathBuf,

        /// Where to write the blob
        #[arg(long, short)]
        out: PathBuf,

        /// Payload element type
        #[arg(long, default_value = "fp32")]
        quant: BlobQuant,

        /// Write the 13-byte v0 header instead of v1
        #[arg(long)]
        legacy: bool,

        /// Also write a manifest that references the blob instead of inline vectors
        #[arg(long)]
        emit_manifest: Option<PathBuf>,
    },
    /// Run a top-k cosine query against a knowledge base
    Query {
        /// Manifest of the knowledge base
        manifest: PathBuf,

        /// Query text, embedded with the built-in hash embedder
        #[arg(long, conflicts_with = "vector", required_unless_present = "vector")]
        text: Option<String>,

        /// Query vector as a JSON array of numbers
        #[arg(long)]
        vector: Option<String>,

        /// Number of hits (defaults to config `default_k`)
        #[arg(long, short)]
        k: Option<usize>,

        /// Only match entries whose meta has key=value; repeatable, all must match
        #[arg(long = "filter", value_name = "KEY=VALUE")]
        filters: Vec<String>,

        /// Normalize stored vectors even when the model card says they are unit length
        #[arg(long)]
        renormalize: bool,

        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completions to stdout
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate man page to stdout
    Man,
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Inspect { blob, json } => {
            let config = Config::load(cli.config.as_deref())?;
            run_inspect(&config, &blob, json).await
        }
        Commands::Pack {
            manifest,
            out,
            quant,
            legacy,
            emit_manifest,
        } => run_pack(&manifest, &out, quant, legacy, emit_manifest.as_deref()),
        Commands::Query {
            manifest,
            text,
            vector,
            k,
            filters,
            renormalize,
            json,
        } => {
            let config = Config::load(cli.config.as_deref())?;
            let query = match (text, vector) {
                (Some(text), None) => QueryInput::Text(text),
                (None, Some(vector)) => QueryInput::Vector(parse_vector(&vector)?),
                _ => bail!("exactly one of --text or --vector is required"),
            };
            let k = k.unwrap_or(config.default_k);
            let filter = build_filter(&filters)?;
            run_query(&config, &manifest, query, k, filter, renormalize, json).await
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "kbvec", &mut std::io::stdout());
            Ok(())
        }
        Commands::Man => {
            let cmd = Cli::command();
            let man = clap_mangen::Man::new(cmd);
            let mut out = std::io::stdout();
            man.render(&mut out)?;
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "kbvec=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // A subscriber may already be installed when embedded in tests.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

async fn run_inspect(config: &Config, uri: &str, json: bool) -> Result<()> {
    let fetcher = BlobFetcher::new(config.fetch_config(None))?;
    let bytes = fetcher
        .fetch(uri)
        .await
        .with_context(|| format!("fetching {uri}"))?;
    let header = blob::read_header(&bytes).with_context(|| format!("reading header of {uri}"))?;
    let sha256 = sha256_hex(&bytes);

    if json {
        let mut value = serde_json::to_value(header)?;
        if let Value::Object(map) = &mut value {
            map.insert("bytes".to_string(), Value::from(bytes.len()));
            map.insert("sha256".to_string(), Value::from(sha256));
        }
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        let version = match header.version {
            HeaderVersion::Legacy => "v0",
            HeaderVersion::V1 => "v1",
        };
        println!("version: {version}");
        println!("quant:   {}", header.quant);
        println!("dim:     {}", header.dim);
        println!("count:   {}", header.count);
        println!("bytes:   {}", bytes.len());
        println!("sha256:  {sha256}");
    }
    Ok(())
}

fn run_pack(
    manifest_path: &Path,
    out: &Path,
    quant: BlobQuant,
    legacy: bool,
    emit_manifest: Option<&Path>,
) -> Result<()> {
    let manifest = Manifest::load(manifest_path)?;
    let version = if legacy {
        HeaderVersion::Legacy
    } else {
        HeaderVersion::V1
    };
    let bytes = pack_inline_vectors(&manifest, quant, version)
        .with_context(|| format!("packing {}", manifest_path.display()))?;
    std::fs::write(out, &bytes).with_context(|| format!("writing {}", out.display()))?;
    let sha256 = sha256_hex(&bytes);
    tracing::info!(
        out = %out.display(),
        bytes = bytes.len(),
        entries = manifest.entries.len(),
        %quant,
        ?version,
        "packed vector blob"
    );

    if let Some(path) = emit_manifest {
        let external = external_manifest(manifest, out, path, quant, version, &sha256);
        let json = serde_json::to_string_pretty(&external)?;
        std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
    }

    println!("{sha256}");
    Ok(())
}

/// Rewrite an inline manifest to point at a packed blob.
fn external_manifest(
    mut manifest: Manifest,
    blob_path: &Path,
    manifest_path: &Path,
    quant: BlobQuant,
    version: HeaderVersion,
    sha256: &str,
) -> Manifest {
    for entry in &mut manifest.entries {
        entry.embedding = None;
        entry.embedding_b64 = None;
    }
    let dir_of = |p: &Path| p.parent().map(Path::to_path_buf).unwrap_or_default();
    let same_dir = dir_of(blob_path) == dir_of(manifest_path);
    let uri = match blob_path.file_name() {
        Some(name) if same_dir => name.to_string_lossy().into_owned(),
        _ => std::path::absolute(blob_path)
            .unwrap_or_else(|_| blob_path.to_path_buf())
            .display()
            .to_string(),
    };
    manifest.vectors_uri = Some(uri);
    manifest.vectors_checksum = Some(format!("sha256:{sha256}"));
    manifest.vectors_format = (version == HeaderVersion::Legacy).then_some(version);
    manifest.model.quantization = Some(match quant {
        BlobQuant::Fp32 => Quantization::Fp32,
        BlobQuant::Fp16 => Quantization::Fp16,
    });
    manifest
}

enum QueryInput {
    Text(String),
    Vector(Vec<f32>),
}

async fn run_query(
    config: &Config,
    manifest_path: &Path,
    query: QueryInput,
    k: usize,
    filter: Option<MetaFilter>,
    renormalize: bool,
    json: bool,
) -> Result<()> {
    let kb = KnowledgeBase::open_path(
        manifest_path,
        config.fetch_config(None),
        &config.store_options(renormalize),
    )
    .await
    .with_context(|| format!("loading {}", manifest_path.display()))?;

    let hits = match query {
        QueryInput::Text(text) => {
            let embedder = HashEmbedder::new(config.hash_dimension)?;
            kb.query_text(&embedder, &text, k, filter.as_ref())?
        }
        QueryInput::Vector(vector) => kb.query_vector(&vector, k, filter.as_ref())?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
    } else {
        print_hits(&hits);
    }
    Ok(())
}

fn print_hits(hits: &[SearchHit]) {
    if hits.is_empty() {
        println!("no matches");
        return;
    }
    for (rank, hit) in hits.iter().enumerate() {
        println!("{:>2}. {:.4}  {}  {}", rank + 1, hit.score, hit.id, hit.text);
    }
}

fn parse_vector(raw: &str) -> Result<Vec<f32>> {
    let values: Vec<f32> = serde_json::from_str(raw)
        .with_context(|| format!("--vector must be a JSON array of numbers, got {raw:?}"))?;
    if values.is_empty() {
        bail!("--vector is empty");
    }
    Ok(values)
}

/// `key=value` where value is read as JSON when it parses, else as a string.
fn parse_filter(raw: &str) -> Result<(String, Value)> {
    let Some((key, value)) = raw.split_once('=') else {
        bail!("--filter expects KEY=VALUE, got {raw:?}");
    };
    let key = key.trim();
    if key.is_empty() {
        bail!("--filter key is empty in {raw:?}");
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn build_filter(raw: &[String]) -> Result<Option<MetaFilter>> {
    let pairs = raw
        .iter()
        .map(|r| parse_filter(r))
        .collect::<Result<Vec<_>>>()?;
    if pairs.is_empty() {
        return Ok(None);
    }
    Ok(Some(MetaFilter::new(move |meta| {
        pairs
            .iter()
            .all(|(key, value)| meta.and_then(|m| m.get(key)) == Some(value))
    })))
}
