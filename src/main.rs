//! depgate CLI
//!
//! Entry point for the `depgate` command-line tool.

use clap::{Parser, Subcommand, ValueEnum};
use depgate::artifact::load_artifact_list;
use depgate::cancel::EXIT_CODE_CANCELLED;
use depgate::keys::{
    decode_signing_key, encode_signing_key, encode_verifying_key, generate_keypair, key_id_of,
};
use depgate::record::record_checksums;
use depgate::report::EXIT_CODE_VERIFICATION_FAILED;
use depgate::signature::default_signature_path;
use depgate::{
    render_text, CancellationToken, DetachedSignature, Engine, EngineConfig, FailureMode, Mode,
    ModuleCoordinate, PolicyStore, VerificationMetadata,
};
use depgate_metadata::ChecksumAlgorithm;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Exit code for configuration and I/O errors
const EXIT_CODE_ERROR: i32 = 2;

const DEFAULT_METADATA: &str = "verification-metadata.toml";

#[derive(Parser)]
#[command(name = "depgate")]
#[command(about = "Verify build dependencies against a trust policy", version)]
struct Cli {
    /// Log filter when RUST_LOG is unset (e.g. "debug", "depgate=trace")
    #[arg(long, global = true, default_value = "info")]
    log: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Strict,
    Lenient,
}

#[derive(Clone, Copy, ValueEnum)]
enum AlgorithmArg {
    Sha256,
    Sha512,
}

impl From<AlgorithmArg> for ChecksumAlgorithm {
    fn from(arg: AlgorithmArg) -> Self {
        match arg {
            AlgorithmArg::Sha256 => ChecksumAlgorithm::Sha256,
            AlgorithmArg::Sha512 => ChecksumAlgorithm::Sha512,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Verify artifacts against verification metadata
    Verify {
        /// Artifact list (JSON)
        #[arg(long, short = 'a')]
        artifacts: PathBuf,

        /// Verification metadata (default: verification-metadata.toml)
        #[arg(long, short = 'm')]
        metadata: Option<PathBuf>,

        /// Engine config file (TOML)
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,

        /// Treatment of missing checksums, signatures and keys
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,

        /// Stop after the first fatal outcome
        #[arg(long)]
        fail_fast: bool,

        /// Worker threads (default: available parallelism)
        #[arg(long)]
        workers: Option<usize>,

        /// Directory of the local key cache
        #[arg(long)]
        key_cache: Option<PathBuf>,

        /// Directory of exported public keys to resolve unknown keys from
        #[arg(long)]
        keyserver_dir: Option<PathBuf>,

        /// Write the JSON report to this file
        #[arg(long)]
        report: Option<PathBuf>,

        /// Print the JSON report instead of text
        #[arg(long)]
        json: bool,
    },

    /// Show the loaded policy, or what it expects for one coordinate
    ExplainPolicy {
        /// Verification metadata (default: verification-metadata.toml)
        #[arg(long, short = 'm')]
        metadata: Option<PathBuf>,

        /// Coordinate to explain (group:name:version[:classifier][@extension])
        coordinate: Option<String>,
    },

    /// Record generated checksums for artifacts into the metadata file
    Record {
        /// Artifact list (JSON)
        #[arg(long, short = 'a')]
        artifacts: PathBuf,

        /// Verification metadata to update (created if absent)
        #[arg(long, short = 'm')]
        metadata: Option<PathBuf>,

        /// Algorithms to record
        #[arg(long = "algorithm", value_enum, default_values_t = [AlgorithmArg::Sha256])]
        algorithms: Vec<AlgorithmArg>,
    },

    /// Write detached signatures (<artifact>.sig) for artifacts
    Sign {
        /// File holding the base64 signing key
        #[arg(long, short = 'k')]
        key: PathBuf,

        /// Artifacts to sign
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Generate a signing key
    Keygen {
        /// Where to write the base64 signing key
        #[arg(long, short = 'o')]
        out: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.log);

    match cli.command {
        Commands::Verify {
            artifacts,
            metadata,
            config,
            mode,
            fail_fast,
            workers,
            key_cache,
            keyserver_dir,
            report,
            json,
        } => {
            let overrides = Overrides {
                mode,
                fail_fast,
                workers,
                key_cache,
                keyserver_dir,
            };
            run_verify(&artifacts, metadata, config, overrides, report, json);
        }
        Commands::ExplainPolicy {
            metadata,
            coordinate,
        } => run_explain_policy(metadata, coordinate),
        Commands::Record {
            artifacts,
            metadata,
            algorithms,
        } => run_record(&artifacts, metadata, algorithms),
        Commands::Sign { key, files } => run_sign(&key, &files),
        Commands::Keygen { out } => run_keygen(&out),
    }
}

fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn fail(context: &str, err: impl std::fmt::Display) -> ! {
    eprintln!("Error {}: {}", context, err);
    process::exit(EXIT_CODE_ERROR);
}

fn metadata_path(path: Option<PathBuf>) -> PathBuf {
    path.unwrap_or_else(|| PathBuf::from(DEFAULT_METADATA))
}

/// CLI flags that override the engine config file
struct Overrides {
    mode: Option<ModeArg>,
    fail_fast: bool,
    workers: Option<usize>,
    key_cache: Option<PathBuf>,
    keyserver_dir: Option<PathBuf>,
}

impl Overrides {
    fn apply(self, config: &mut EngineConfig) {
        if let Some(mode) = self.mode {
            config.mode = match mode {
                ModeArg::Strict => Mode::Strict,
                ModeArg::Lenient => Mode::Lenient,
            };
        }
        if self.fail_fast {
            config.failure_mode = FailureMode::FailFast;
        }
        if self.workers.is_some() {
            config.workers = self.workers;
        }
        if self.key_cache.is_some() {
            config.key_cache_dir = self.key_cache;
        }
        if self.keyserver_dir.is_some() {
            config.keyserver_dir = self.keyserver_dir;
        }
    }
}

fn run_verify(
    artifacts_path: &Path,
    metadata: Option<PathBuf>,
    config_path: Option<PathBuf>,
    overrides: Overrides,
    report_path: Option<PathBuf>,
    json: bool,
) {
    let mut config = match config_path {
        Some(path) => EngineConfig::load(&path).unwrap_or_else(|e| fail("loading config", e)),
        None => EngineConfig::default(),
    };
    overrides.apply(&mut config);

    let policy = PolicyStore::load(&metadata_path(metadata))
        .unwrap_or_else(|e| fail("loading verification metadata", e));
    let artifacts =
        load_artifact_list(artifacts_path).unwrap_or_else(|e| fail("loading artifact list", e));
    let engine = Engine::new(config).unwrap_or_else(|e| fail("starting engine", e));

    let cancel = CancellationToken::new();
    if let Err(e) = cancel.install_signal_handler() {
        tracing::warn!(error = %e, "Ctrl-C handler not installed");
    }
    let ctx = engine
        .context(Arc::new(policy))
        .with_cancellation(cancel.clone());

    let report = engine
        .verify_all(&artifacts, &ctx)
        .unwrap_or_else(|e| fail("verifying artifacts", e));

    if let Some(path) = report_path {
        if let Err(e) = report.write_to_file(&path) {
            fail("writing report", e);
        }
    }

    if json {
        match report.to_json() {
            Ok(out) => println!("{}", out),
            Err(e) => fail("serializing report", e),
        }
    } else {
        print!("{}", render_text(&report));
    }

    if cancel.is_cancelled() {
        process::exit(EXIT_CODE_CANCELLED);
    }
    if !report.passed() {
        process::exit(EXIT_CODE_VERIFICATION_FAILED);
    }
}

fn run_explain_policy(metadata: Option<PathBuf>, coordinate: Option<String>) {
    let policy = PolicyStore::load(&metadata_path(metadata))
        .unwrap_or_else(|e| fail("loading verification metadata", e));

    let Some(coordinate) = coordinate else {
        let settings = policy.settings();
        println!("Policy version: {}", policy.version());
        println!("verify_checksums: {}", settings.verify_checksums);
        println!("verify_signatures: {}", settings.verify_signatures);
        println!("Trusted keys:");
        for key in policy.trusted_keys() {
            let material = if key.public_key.is_some() {
                "inline"
            } else {
                "external"
            };
            println!("  {} ({})", key.id, material);
        }
        return;
    };

    let coordinate: ModuleCoordinate = coordinate
        .parse()
        .unwrap_or_else(|e| fail("parsing coordinate", e));
    let entry = policy.lookup(&coordinate);

    println!("Coordinate: {}", coordinate);
    if !policy.contains(&coordinate) {
        println!("  (no entry; defaults apply)");
    }
    if let Some(exemption) = entry.exemption {
        println!("  Exemption: {:?}", exemption);
    }
    println!(
        "  Checksum required: {}",
        policy.requires_checksum(&coordinate)
    );
    for checksum in &entry.checksums {
        println!(
            "    {} {} ({:?})",
            checksum.algorithm, checksum.value, checksum.origin
        );
    }
    println!(
        "  Signature required: {}",
        policy.requires_signature(&coordinate)
    );
    let trusted: Vec<_> = policy
        .trusted_keys()
        .filter(|k| k.applies_to(&coordinate))
        .map(|k| k.id.to_string())
        .chain(entry.trusted_keys.iter().map(|k| k.to_string()))
        .collect();
    if !trusted.is_empty() {
        println!("  Trusted keys: {}", trusted.join(", "));
    }
    if !entry.ignored_keys.is_empty() {
        let ignored: Vec<_> = entry.ignored_keys.iter().map(|k| k.to_string()).collect();
        println!("  Ignored keys: {}", ignored.join(", "));
    }
}

fn run_record(artifacts_path: &Path, metadata: Option<PathBuf>, algorithms: Vec<AlgorithmArg>) {
    let path = metadata_path(metadata);
    let mut document = if path.exists() {
        let contents = fs::read_to_string(&path)
            .unwrap_or_else(|e| fail("reading verification metadata", e));
        VerificationMetadata::parse(&contents)
            .unwrap_or_else(|e| fail("parsing verification metadata", e))
    } else {
        VerificationMetadata::default()
    };
    let artifacts =
        load_artifact_list(artifacts_path).unwrap_or_else(|e| fail("loading artifact list", e));
    let algorithms: Vec<ChecksumAlgorithm> = algorithms.into_iter().map(Into::into).collect();

    let summary = record_checksums(&mut document, &artifacts, &algorithms)
        .unwrap_or_else(|e| fail("recording checksums", e));
    let toml = document
        .to_toml_string()
        .unwrap_or_else(|e| fail("serializing verification metadata", e));
    if let Err(e) = fs::write(&path, toml) {
        fail("writing verification metadata", e);
    }

    println!(
        "Recorded {} checksum(s), {} new component(s), {} unchanged -> {}",
        summary.checksums_added,
        summary.components_added,
        summary.unchanged,
        path.display()
    );
}

fn run_sign(key_path: &Path, files: &[PathBuf]) {
    let encoded =
        fs::read_to_string(key_path).unwrap_or_else(|e| fail("reading signing key", e));
    let signing_key =
        decode_signing_key(encoded.trim()).unwrap_or_else(|e| fail("decoding signing key", e));

    for file in files {
        let signature = DetachedSignature::sign_file(file, &signing_key)
            .unwrap_or_else(|e| fail(&format!("signing {}", file.display()), e));
        let out = default_signature_path(file);
        if let Err(e) = signature.write_to_file(&out) {
            fail(&format!("writing {}", out.display()), e);
        }
        println!("{} -> {}", file.display(), out.display());
    }
}

fn run_keygen(out: &Path) {
    if out.exists() {
        fail("generating key", format!("{} already exists", out.display()));
    }
    let signing_key = generate_keypair();
    if let Err(e) = fs::write(out, encode_signing_key(&signing_key)) {
        fail("writing signing key", e);
    }

    let verifying_key = signing_key.verifying_key();
    println!("Key id:     {}", key_id_of(&verifying_key));
    println!("Public key: {}", encode_verifying_key(&verifying_key));
    println!();
    println!("Trust it with:");
    println!("[[trusted_keys]]");
    println!("id = \"{}\"", key_id_of(&verifying_key));
    println!("public_key = \"{}\"", encode_verifying_key(&verifying_key));
}
