// src/main.rs
//
// Command-line client for the roadpack library:
//
// - identity management (show / export / import) backed by RocksDB
// - signing a photo + observation into a report
// - building, verifying, publishing and importing packs
//
// Reports live in a plain directory: `<id>.json` holds the signed report,
// `<id>.<ext>` the photo it commits to.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use roadpack::pack::image_extension;
use roadpack::{
    ArchiveHash, BuiltPack, CachedKeyVerifier, DefaultPackVerifier, HttpBlobStore,
    HttpMetadataIndex, IdentityManager, InMemoryDedupLedger, Observation, PackBuilder,
    ReportAssembler, ReportId, RoadpackConfig, RocksDbStore, Report, Severity, import_feed,
    publish_pack, save_accepted,
};

#[derive(Parser, Debug)]
#[command(name = "roadpack")]
#[command(version, about = "Signed road-damage reports and packs", long_about = None)]
struct Cli {
    /// Path to the local RocksDB directory (overrides ROADPACK_DB_PATH)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Gateway base URL (overrides ROADPACK_BLOB_URL)
    #[arg(long)]
    gateway: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Device identity management
    #[command(subcommand)]
    Identity(IdentityCommands),

    /// Sign a photo and its observation into a report
    Sign {
        /// Photo file
        #[arg(long)]
        photo: PathBuf,
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lng: f64,
        /// MINOR, MODERATE or CRITICAL
        #[arg(long)]
        severity: String,
        #[arg(long)]
        score: f64,
        #[arg(long)]
        area_px: f64,
        #[arg(long)]
        depth_cm: Option<f64>,
        /// Report directory to write into
        #[arg(long, default_value = "reports")]
        dir: PathBuf,
    },

    /// Build a pack archive from a report directory
    Pack {
        #[arg(long, default_value = "reports")]
        dir: PathBuf,
        /// Channel name (defaults to ROADPACK_CHANNEL or "global")
        #[arg(long)]
        channel: Option<String>,
        /// Also sign the manifest with the device key
        #[arg(long)]
        sign: bool,
        /// Output archive path
        #[arg(short, long, default_value = "pack.rpak")]
        out: PathBuf,
    },

    /// Verify a pack archive
    Verify {
        archive: PathBuf,
        /// Archive hash claimed by the source of the archive
        #[arg(long)]
        expected_hash: Option<String>,
        /// Check against (and record into) the persistent dedup ledger
        #[arg(long)]
        persist: bool,
    },

    /// Build a pack and publish it to the gateway
    Publish {
        #[arg(long, default_value = "reports")]
        dir: PathBuf,
        #[arg(long)]
        channel: Option<String>,
        #[arg(long)]
        sign: bool,
    },

    /// Import the newest packs of a channel from the gateway
    Feed {
        #[arg(long)]
        channel: Option<String>,
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
        /// Directory to write accepted reports into
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum IdentityCommands {
    /// Print the public identity, creating one if needed
    Show,
    /// Write the full identity bundle (including secrets)
    Export {
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Replace the device identity with a bundle
    Import { file: PathBuf },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("roadpack=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run(Cli::parse()) {
        eprintln!("fatal error: {err}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), String> {
    let mut cfg = RoadpackConfig::from_env();
    if let Some(db) = &cli.db {
        cfg.storage.path = db.to_string_lossy().to_string();
    }
    if let Some(url) = &cli.gateway {
        cfg.blob_client.base_url = url.clone();
    }

    match cli.command {
        Commands::Identity(cmd) => run_identity(&cfg, cmd),
        Commands::Sign {
            photo,
            lat,
            lng,
            severity,
            score,
            area_px,
            depth_cm,
            dir,
        } => {
            let observation = Observation {
                lat,
                lng,
                severity: Severity::from(severity.to_ascii_uppercase().as_str()),
                score,
                area_px,
                depth_cm,
            };
            run_sign(&cfg, &photo, &observation, &dir)
        }
        Commands::Pack {
            dir,
            channel,
            sign,
            out,
        } => {
            let built = build_from_dir(&cfg, &dir, channel, sign)?;
            fs::write(&out, &built.archive)
                .map_err(|e| format!("failed to write {}: {e}", out.display()))?;
            println!("pack       {}", out.display());
            println!("reports    {}", built.manifest.report_count);
            println!("hash       {}", built.archive_hash);
            Ok(())
        }
        Commands::Verify {
            archive,
            expected_hash,
            persist,
        } => run_verify(&cfg, &archive, expected_hash, persist),
        Commands::Publish { dir, channel, sign } => run_publish(&cfg, &dir, channel, sign),
        Commands::Feed {
            channel,
            limit,
            out,
        } => run_feed(&cfg, channel, limit, out),
    }
}

fn open_store(cfg: &RoadpackConfig) -> Result<RocksDbStore, String> {
    RocksDbStore::open(&cfg.storage)
        .map_err(|e| format!("failed to open RocksDB store at {}: {e}", cfg.storage.path))
}

fn run_identity(cfg: &RoadpackConfig, cmd: IdentityCommands) -> Result<(), String> {
    let store = open_store(cfg)?;
    let mut manager = IdentityManager::new(&store);

    match cmd {
        IdentityCommands::Show => {
            let identity = manager.create_or_load().map_err(|e| e.to_string())?;
            println!("anonId     {}", identity.anon_id());
            println!("publicKey  {}", identity.public_key());
        }
        IdentityCommands::Export { out } => {
            let bundle = manager.export().map_err(|e| e.to_string())?;
            match out {
                Some(path) => {
                    fs::write(&path, &bundle)
                        .map_err(|e| format!("failed to write {}: {e}", path.display()))?;
                    warn!(path = %path.display(), "exported bundle contains the private key");
                }
                None => println!("{}", String::from_utf8_lossy(&bundle)),
            }
        }
        IdentityCommands::Import { file } => {
            let bytes = fs::read(&file)
                .map_err(|e| format!("failed to read {}: {e}", file.display()))?;
            let identity = manager.import(&bytes).map_err(|e| e.to_string())?;
            println!("anonId     {}", identity.anon_id());
        }
    }
    Ok(())
}

fn run_sign(
    cfg: &RoadpackConfig,
    photo: &Path,
    observation: &Observation,
    dir: &Path,
) -> Result<(), String> {
    let store = open_store(cfg)?;
    let identity = IdentityManager::new(&store)
        .create_or_load()
        .map_err(|e| e.to_string())?;

    let bytes =
        fs::read(photo).map_err(|e| format!("failed to read {}: {e}", photo.display()))?;
    let local = ReportAssembler::new(cfg.pack.img_mime.clone())
        .assemble(&identity, observation, &bytes)
        .map_err(|e| e.to_string())?;

    fs::create_dir_all(dir).map_err(|e| format!("failed to create {}: {e}", dir.display()))?;
    let report = local.sanitized();
    let json = serde_json::to_vec_pretty(&report).map_err(|e| e.to_string())?;
    let report_path = dir.join(format!("{}.json", report.id));
    let photo_path = dir.join(format!(
        "{}.{}",
        report.id,
        image_extension(&report.media.img_mime)
    ));
    fs::write(&report_path, json)
        .map_err(|e| format!("failed to write {}: {e}", report_path.display()))?;
    fs::write(&photo_path, &local.photo)
        .map_err(|e| format!("failed to write {}: {e}", photo_path.display()))?;

    println!("{}", report.id);
    Ok(())
}

/// Loads every `<id>.json` report in `dir` together with its photo.
fn load_dir(dir: &Path) -> Result<(Vec<Report>, HashMap<ReportId, Vec<u8>>), String> {
    let listing =
        fs::read_dir(dir).map_err(|e| format!("failed to read {}: {e}", dir.display()))?;

    let mut paths: Vec<PathBuf> = listing
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();

    let mut reports = Vec::with_capacity(paths.len());
    let mut photos = HashMap::new();
    for path in paths {
        let bytes =
            fs::read(&path).map_err(|e| format!("failed to read {}: {e}", path.display()))?;
        let report: Report = match serde_json::from_slice(&bytes) {
            Ok(r) => r,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unreadable report");
                continue;
            }
        };
        let photo_path = dir.join(format!(
            "{}.{}",
            report.id,
            image_extension(&report.media.img_mime)
        ));
        match fs::read(&photo_path) {
            Ok(photo) => {
                photos.insert(report.id.clone(), photo);
            }
            Err(e) => warn!(path = %photo_path.display(), error = %e, "photo not readable"),
        }
        reports.push(report);
    }
    Ok((reports, photos))
}

fn builder_for(
    cfg: &RoadpackConfig,
    store: &RocksDbStore,
    channel: Option<String>,
    sign: bool,
) -> Result<PackBuilder, String> {
    let identity = IdentityManager::new(store)
        .create_or_load()
        .map_err(|e| e.to_string())?;
    let channel = channel.unwrap_or_else(|| cfg.pack.default_channel.clone());
    let builder = PackBuilder::new(channel, identity.anon_id().clone());
    Ok(if sign {
        builder.signed_by(&identity)
    } else {
        builder
    })
}

fn build_from_dir(
    cfg: &RoadpackConfig,
    dir: &Path,
    channel: Option<String>,
    sign: bool,
) -> Result<BuiltPack, String> {
    let store = open_store(cfg)?;
    let builder = builder_for(cfg, &store, channel, sign)?;
    let (reports, photos) = load_dir(dir)?;
    builder.build(&reports, &photos).map_err(|e| e.to_string())
}

fn run_verify(
    cfg: &RoadpackConfig,
    archive: &Path,
    expected_hash: Option<String>,
    persist: bool,
) -> Result<(), String> {
    let bytes =
        fs::read(archive).map_err(|e| format!("failed to read {}: {e}", archive.display()))?;
    let expected = expected_hash.map(ArchiveHash::from);
    let verifier =
        DefaultPackVerifier::new(CachedKeyVerifier::new()).with_limits(cfg.verify.clone());

    let result = if persist {
        let store = open_store(cfg)?;
        verifier.verify(&bytes, expected.as_ref(), &store)
    } else {
        verifier.verify(&bytes, expected.as_ref(), &InMemoryDedupLedger::new())
    };
    let result = result.map_err(|e| e.to_string())?;

    for verdict in &result.verdicts {
        let status = if verdict.accepted() { "ok" } else { "REJECTED" };
        let reasons: Vec<String> = verdict.reasons.iter().map(ToString::to_string).collect();
        println!("{:<9} {}  {}", status, verdict.label(), reasons.join(", "));
    }

    let summary = result.summary();
    println!("hash       {}", result.archive_hash);
    match result.archive_hash_matches {
        Some(true) => println!("claimed    matches"),
        Some(false) => println!("claimed    MISMATCH"),
        None => {}
    }
    match result.pack_sig_ok {
        Some(true) => println!("pack sig   ok"),
        Some(false) => println!("pack sig   INVALID"),
        None => {}
    }
    println!(
        "total={} sig_ok={} img_ok={} duplicates={} accepted={}",
        summary.total, summary.sig_ok, summary.img_ok, summary.duplicates, summary.accepted
    );
    Ok(())
}

fn run_publish(
    cfg: &RoadpackConfig,
    dir: &Path,
    channel: Option<String>,
    sign: bool,
) -> Result<(), String> {
    let store = open_store(cfg)?;
    let builder = builder_for(cfg, &store, channel, sign)?;
    let (reports, photos) = load_dir(dir)?;

    let blobs = HttpBlobStore::new(&cfg.blob_client).map_err(|e| e.to_string())?;
    let index = HttpMetadataIndex::new(&cfg.blob_client).map_err(|e| e.to_string())?;
    let receipt =
        publish_pack(&builder, &reports, &photos, &blobs, &index).map_err(|e| e.to_string())?;

    println!("pack       {}", receipt.pack_id);
    println!("cid        {}", receipt.content_id);
    println!("hash       {}", receipt.archive_hash);
    println!("reports    {}", receipt.report_count);
    Ok(())
}

fn run_feed(
    cfg: &RoadpackConfig,
    channel: Option<String>,
    limit: usize,
    out: Option<PathBuf>,
) -> Result<(), String> {
    let store = open_store(cfg)?;
    let blobs = HttpBlobStore::new(&cfg.blob_client).map_err(|e| e.to_string())?;
    let index = HttpMetadataIndex::new(&cfg.blob_client).map_err(|e| e.to_string())?;
    let verifier =
        DefaultPackVerifier::new(CachedKeyVerifier::new()).with_limits(cfg.verify.clone());

    let outcomes = import_feed(&index, &blobs, &verifier, &store, channel.as_deref(), limit)
        .map_err(|e| e.to_string())?;

    let mut added = 0;
    for outcome in &outcomes {
        println!(
            "{}  added={} skipped={}",
            outcome.entry.pack_id, outcome.added, outcome.skipped
        );
        added += outcome.added;
        if let Some(dir) = &out {
            save_accepted(outcome, dir)
                .map_err(|e| format!("failed to write to {}: {e}", dir.display()))?;
        }
    }
    info!(packs = outcomes.len(), added, "feed import finished");
    Ok(())
}
