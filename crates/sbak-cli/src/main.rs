//! sbak: encrypted, Merkle-verified file backup CLI
//!
//! Commands:
//!   backup <file> [chunk_size_mb]        - chunk, encrypt, upload, record in ledger
//!   verify <manifest_path_or_uri>        - re-download chunks and check the Merkle root
//!   restore <manifest_path_or_uri> <dir> - download, verify, decrypt, reassemble
//!   list                                 - manifests in the store
//!   delete <manifest_uri>                - remove one backup's chunks and manifest
//!   status                               - storage reachability and ledger state
//!   ledger verify | ledger show          - hash-chain check / entry listing
//!   config show                          - display current configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::{ExposeSecret, SecretString};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use sbak_backup::{BackupOptions, ChainStatus, Ledger, ProgressFn};
use sbak_core::{SbakConfig, SbakError};
use sbak_storage::{BlobStore, S3Credentials};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "sbak",
    version,
    about = "Encrypted, Merkle-verified file backup",
    long_about = "sbak: split a file into encrypted chunks, store them, and prove later that \
                  every stored byte is unchanged"
)]
struct Cli {
    /// Path to sbak.toml configuration file
    #[arg(long, short = 'c', env = "SBAK_CONFIG", default_value = "sbak.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides [log] level
    #[arg(long, env = "SBAK_LOG")]
    log: Option<String>,

    /// Log format; overrides [log] format
    #[arg(long, env = "SBAK_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Back up a single file
    ///
    /// The passphrase is read from SBAK_PASSPHRASE, or prompted for.
    Backup {
        /// File to back up
        file: PathBuf,
        /// Chunk size in MiB (default: [backup] chunk_size_mb)
        chunk_size_mb: Option<u64>,
    },

    /// Verify a backup by re-downloading every chunk
    Verify {
        /// Local manifest path or store:// URI
        manifest: String,
    },

    /// Restore a backup into a directory
    Restore {
        /// Local manifest path or store:// URI
        manifest: String,
        /// Output directory
        output_dir: PathBuf,
    },

    /// List manifests in the store
    List,

    /// Delete one backup (its chunks, then its manifest)
    Delete {
        /// store:// URI of the manifest, as printed by `sbak list`
        manifest: String,
    },

    /// Show storage reachability and ledger state
    Status,

    /// Ledger inspection
    Ledger {
        #[command(subcommand)]
        action: LedgerAction,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum LedgerAction {
    /// Walk the hash chain from genesis
    Verify,
    /// Print every ledger entry
    Show,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.chain().find_map(|e| e.downcast_ref::<SbakError>()) {
                Some(kind) => eprintln!("error[{}]: {err:#}", kind.kind()),
                None => eprintln!("error: {err:#}"),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let (config, config_found) = load_config(&cli.config).await?;

    let level = cli.log.as_deref().unwrap_or(&config.log.level);
    let format = match &cli.log_format {
        Some(format) => format.clone(),
        None if config.log.format.eq_ignore_ascii_case("json") => LogFormat::Json,
        None => LogFormat::Text,
    };
    init_logging(level, &format);

    if !config_found {
        tracing::warn!(
            "config file not found: {}  (using defaults)",
            cli.config.display()
        );
    }

    match cli.command {
        Commands::Backup {
            file,
            chunk_size_mb,
        } => cmd_backup(&config, &file, chunk_size_mb).await,
        Commands::Verify { manifest } => cmd_verify(&config, &manifest).await,
        Commands::Restore {
            manifest,
            output_dir,
        } => cmd_restore(&config, &manifest, &output_dir).await,
        Commands::List => cmd_list(&config).await,
        Commands::Delete { manifest } => cmd_delete(&config, &manifest).await,
        Commands::Status => cmd_status(&config).await,
        Commands::Ledger {
            action: LedgerAction::Verify,
        } => cmd_ledger_verify(&config),
        Commands::Ledger {
            action: LedgerAction::Show,
        } => cmd_ledger_show(&config),
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &cli.config, config_found),
    }
}

// ── Config loading ────────────────────────────────────────────────────────────

async fn load_config(path: &Path) -> Result<(SbakConfig, bool)> {
    if path.exists() {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading config: {}", path.display()))?;
        let config: SbakConfig = toml::from_str(&content)
            .map_err(|e| SbakError::Config(e.to_string()))
            .with_context(|| format!("parsing config: {}", path.display()))?;
        Ok((config, true))
    } else {
        Ok((SbakConfig::default(), false))
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // Logs go to stderr; stdout carries the result lines
    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Storage, ledger, passphrase ───────────────────────────────────────────────

fn open_store(config: &SbakConfig) -> Result<BlobStore> {
    let credentials = S3Credentials::from_env();
    sbak_storage::build_store(&config.storage, credentials.as_ref())
        .context("building storage backend")
}

fn open_ledger(config: &SbakConfig) -> Result<Ledger> {
    let path = &config.backup.ledger_path;
    let ledger = Ledger::open(path)
        .with_context(|| format!("opening ledger: {}", path.display()))?;
    if let Some(reason) = ledger.load_warning() {
        eprintln!("WARNING: ledger history could not be read and starts empty: {reason}");
    }
    Ok(ledger)
}

/// Passphrase from SBAK_PASSPHRASE, else an interactive no-echo prompt.
fn read_passphrase(confirm: bool) -> Result<SecretString> {
    if let Ok(value) = std::env::var("SBAK_PASSPHRASE") {
        return Ok(SecretString::from(value));
    }

    let first = SecretString::from(
        rpassword::prompt_password("Passphrase: ").context("reading passphrase")?,
    );
    if confirm {
        let second = SecretString::from(
            rpassword::prompt_password("Confirm passphrase: ").context("reading passphrase")?,
        );
        if first.expose_secret() != second.expose_secret() {
            return Err(SbakError::InvalidParams("passphrases do not match".into()).into());
        }
    }
    Ok(first)
}

// ── Progress bar helpers ──────────────────────────────────────────────────────

fn make_progress_bar(total: u64, prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    let style = ProgressStyle::with_template(
        "{prefix:.bold} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
    )
    .map(|s| s.progress_chars("=>-"))
    .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn make_count_bar(total: u64, prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    let style = ProgressStyle::with_template("{prefix:.bold} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .map(|s| s.progress_chars("=>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn progress_callback(pb: &ProgressBar) -> ProgressFn {
    let pb = pb.clone();
    Box::new(move |done, total, msg| {
        pb.set_length(total);
        pb.set_position(done);
        pb.set_message(msg.to_string());
    })
}

// ── `sbak backup` ─────────────────────────────────────────────────────────────

async fn cmd_backup(config: &SbakConfig, file: &Path, chunk_size_mb: Option<u64>) -> Result<()> {
    let mut opts = BackupOptions::from_config(config);
    if let Some(mb) = chunk_size_mb {
        opts.chunk_size = (mb as usize).saturating_mul(1024 * 1024);
    }

    let store = open_store(config)?;
    let mut ledger = open_ledger(config)?;
    let passphrase = read_passphrase(true)?;

    println!(
        "Backing up {} ({} MiB chunks, {:?} backend)",
        file.display(),
        opts.chunk_size / (1024 * 1024),
        config.storage.backend,
    );

    let pb = make_progress_bar(0, "backup");
    let progress = progress_callback(&pb);
    let result = sbak_backup::backup_file(
        &store,
        &mut ledger,
        file,
        &passphrase,
        &opts,
        Some(&progress),
    )
    .await;
    pb.finish_and_clear();
    let outcome = result.with_context(|| format!("backing up {}", file.display()))?;

    let manifest = &outcome.manifest;
    println!("Backup complete");
    println!("  file:        {}", manifest.file_name);
    println!("  bytes:       {}", fmt_bytes(manifest.original_size));
    println!("  chunks:      {}", manifest.chunks.len());
    println!("  merkle root: {}", display_root(&manifest.merkle_root));
    println!("  manifest:    {}", outcome.manifest_uri);
    if let Some(local) = &outcome.local_manifest {
        println!("  local copy:  {}", local.display());
    }
    println!("  ledger:      {}", outcome.ledger_entry_hash);
    Ok(())
}

// ── `sbak verify` ─────────────────────────────────────────────────────────────

async fn cmd_verify(config: &SbakConfig, source: &str) -> Result<()> {
    let store = open_store(config)?;
    let manifest = sbak_backup::load_manifest(&store, source)
        .await
        .with_context(|| format!("loading manifest: {source}"))?;

    // The ledger only informs the report; verification goes on without it
    let ledger = match open_ledger(config) {
        Ok(ledger) => Some(ledger),
        Err(e) => {
            eprintln!("WARNING: {e:#}");
            None
        }
    };

    println!(
        "Verifying {} ({} chunks, {})",
        manifest.file_name,
        manifest.chunks.len(),
        fmt_bytes(manifest.original_size)
    );

    let pb = make_count_bar(manifest.chunks.len() as u64, "verify");
    let progress = progress_callback(&pb);
    let result =
        sbak_backup::verify_manifest(&store, ledger.as_ref(), &manifest, Some(&progress)).await;
    pb.finish_and_clear();

    match &result {
        Ok(report) => print_chain_status(&report.chain),
        Err(_) => print_chain_status(&sbak_backup::verify::chain_status(ledger.as_ref())),
    }
    let report = result.with_context(|| format!("verifying {}", manifest.file_name))?;

    println!("  chunks verified: {}", report.chunks_verified);
    println!("  merkle root:     {}", display_root(&report.merkle_root));
    if report.root_in_ledger {
        println!("  ledger:          root recorded");
    } else {
        println!("  ledger:          root not recorded in this ledger");
    }
    println!("Merkle Root Verified: MATCH");
    Ok(())
}

fn print_chain_status(chain: &ChainStatus) {
    match chain {
        ChainStatus::Intact => {}
        ChainStatus::Broken { index } => eprintln!(
            "WARNING: ledger chain verification failed at entry {index}; \
             the Merkle root check below is authoritative"
        ),
        ChainStatus::Unavailable { reason } => {
            eprintln!("WARNING: ledger chain not checked: {reason}")
        }
    }
}

// ── `sbak restore` ────────────────────────────────────────────────────────────

async fn cmd_restore(config: &SbakConfig, source: &str, output_dir: &Path) -> Result<()> {
    let store = open_store(config)?;
    let manifest = sbak_backup::load_manifest(&store, source)
        .await
        .with_context(|| format!("loading manifest: {source}"))?;
    let passphrase = read_passphrase(false)?;

    println!(
        "Restoring {} → {}",
        manifest.file_name,
        output_dir.display()
    );

    let pb = make_progress_bar(manifest.original_size, "restore");
    let progress = progress_callback(&pb);
    let result = sbak_backup::restore_file(
        &store,
        &manifest,
        &passphrase,
        output_dir,
        Some(&progress),
    )
    .await;
    pb.finish_and_clear();
    let outcome = result.with_context(|| format!("restoring {}", manifest.file_name))?;

    println!("Restore complete");
    println!("  path:   {}", outcome.path.display());
    println!("  bytes:  {}", fmt_bytes(outcome.bytes));
    println!("  chunks: {}", outcome.chunks);
    Ok(())
}

// ── `sbak list` ───────────────────────────────────────────────────────────────

async fn cmd_list(config: &SbakConfig) -> Result<()> {
    let store = open_store(config)?;
    let uris = store
        .list_manifests()
        .await
        .context("listing manifests")?;

    if uris.is_empty() {
        println!("No backups under prefix '{}'", store.prefix());
        return Ok(());
    }

    for uri in &uris {
        match sbak_backup::load_manifest(&store, uri).await {
            Ok(m) => println!(
                "{}  {:<24} {:>10}  {:>4} chunks  {}",
                m.timestamp,
                m.file_name,
                fmt_bytes(m.original_size),
                m.chunks.len(),
                uri
            ),
            Err(e) => println!("{uri}  (unreadable: {e})"),
        }
    }
    println!("{} backup(s)", uris.len());
    Ok(())
}

// ── `sbak delete` ─────────────────────────────────────────────────────────────

async fn cmd_delete(config: &SbakConfig, manifest_uri: &str) -> Result<()> {
    let store = open_store(config)?;
    let mut ledger = open_ledger(config)?;

    let outcome = sbak_backup::delete_backup(&store, &mut ledger, manifest_uri)
        .await
        .with_context(|| format!("deleting {manifest_uri}"))?;

    println!("Backup deleted");
    println!("  file:        {}", outcome.file_name);
    println!("  chunks:      {}", outcome.chunks_deleted);
    println!("  merkle root: {}", display_root(&outcome.merkle_root));
    println!("  ledger:      {}", outcome.ledger_entry_hash);
    Ok(())
}

// ── `sbak status` ─────────────────────────────────────────────────────────────

async fn cmd_status(config: &SbakConfig) -> Result<()> {
    let store = open_store(config)?;
    println!("storage:  {:?} (prefix '{}')", config.storage.backend, store.prefix());
    match sbak_storage::check_health(&store).await {
        Ok(()) => println!("  reachable"),
        Err(e) => println!("  UNREACHABLE: {e}"),
    }

    let ledger = open_ledger(config)?;
    println!("ledger:   {}", ledger.path().display());
    println!("  entries:     {}", ledger.len());
    match sbak_backup::verify::chain_status(Some(&ledger)) {
        ChainStatus::Intact => println!("  chain:       ok"),
        ChainStatus::Broken { index } => println!("  chain:       BROKEN at entry {index}"),
        ChainStatus::Unavailable { .. } => println!("  chain:       UNVERIFIABLE"),
    }
    println!("  latest root: {}", display_root(&ledger.get_latest_root()));
    Ok(())
}

// ── `sbak ledger` ─────────────────────────────────────────────────────────────

fn cmd_ledger_verify(config: &SbakConfig) -> Result<()> {
    let ledger = open_ledger(config)?;
    if let Some(reason) = ledger.load_warning() {
        let err = SbakError::ChainBroken(format!("history unreadable: {reason}"));
        return Err(anyhow::Error::new(err)
            .context(format!("verifying ledger: {}", ledger.path().display())));
    }
    ledger
        .check_chain()
        .with_context(|| format!("verifying ledger: {}", ledger.path().display()))?;
    println!("Ledger chain OK ({} entries)", ledger.len());
    Ok(())
}

fn cmd_ledger_show(config: &SbakConfig) -> Result<()> {
    let ledger = open_ledger(config)?;
    if ledger.is_empty() {
        println!("Ledger is empty: {}", ledger.path().display());
        return Ok(());
    }

    for (i, entry) in ledger.entries().iter().enumerate() {
        let file = entry
            .payload
            .get("file_name")
            .and_then(|v| v.as_str())
            .unwrap_or("-");
        let root = entry
            .payload
            .get("merkle_root")
            .and_then(|v| v.as_str())
            .unwrap_or("-");
        println!("#{i:<4} {}  {}", entry.ts, file);
        println!("      entry: {}", entry.entry_hash);
        println!("      root:  {}", display_root(root));
    }

    match ledger.first_broken_entry() {
        None => println!("{} entries, chain ok", ledger.len()),
        Some(index) => println!("{} entries, chain BROKEN at entry {index}", ledger.len()),
    }
    Ok(())
}

// ── `sbak config show` ────────────────────────────────────────────────────────

fn cmd_config_show(config: &SbakConfig, config_path: &Path, found: bool) -> Result<()> {
    if found {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!(
            "# Configuration: defaults (no file at {})",
            config_path.display()
        );
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

// ── Utilities ─────────────────────────────────────────────────────────────────

fn display_root(root: &str) -> &str {
    if root.is_empty() {
        "(empty: no chunks)"
    } else {
        root
    }
}

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_backup_with_chunk_size() {
        let cli = Cli::try_parse_from(["sbak", "backup", "photo.raw", "4"]).unwrap();
        match cli.command {
            Commands::Backup {
                file,
                chunk_size_mb,
            } => {
                assert_eq!(file, PathBuf::from("photo.raw"));
                assert_eq!(chunk_size_mb, Some(4));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn cli_parses_ledger_and_log_flags() {
        let cli =
            Cli::try_parse_from(["sbak", "--log-format", "json", "ledger", "verify"]).unwrap();
        assert!(matches!(cli.log_format, Some(LogFormat::Json)));
        assert!(matches!(
            cli.command,
            Commands::Ledger {
                action: LedgerAction::Verify
            }
        ));
    }

    #[test]
    fn cli_parses_delete() {
        let cli = Cli::try_parse_from([
            "sbak",
            "delete",
            "store://backups/manifests/manifest_1.json",
        ])
        .unwrap();
        match cli.command {
            Commands::Delete { manifest } => {
                assert_eq!(manifest, "store://backups/manifests/manifest_1.json")
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn ledger_verify_fails_on_unreadable_history() {
        let tmp = tempfile::TempDir::new().unwrap();
        let ledger_path = tmp.path().join("ledger.json");
        std::fs::write(&ledger_path, b"not json").unwrap();

        let mut config = SbakConfig::default();
        config.backup.ledger_path = ledger_path;
        let err = cmd_ledger_verify(&config).unwrap_err();
        let kind = err.chain().find_map(|e| e.downcast_ref::<SbakError>());
        assert!(matches!(kind, Some(SbakError::ChainBroken(_))));
    }

    #[test]
    fn restore_requires_output_dir() {
        assert!(Cli::try_parse_from(["sbak", "restore", "m.json"]).is_err());
    }

    #[test]
    fn fmt_bytes_units() {
        assert_eq!(fmt_bytes(512), "512 B");
        assert_eq!(fmt_bytes(2048), "2.0 KB");
        assert_eq!(fmt_bytes(16 * 1024 * 1024), "16.0 MB");
    }

    #[tokio::test]
    async fn missing_config_yields_defaults() {
        let (config, found) = load_config(Path::new("/nonexistent/sbak.toml"))
            .await
            .unwrap();
        assert!(!found);
        assert_eq!(config.backup.chunk_size_mb, 16);
    }
}
