//! Tranche CLI
//!
//! Operator tooling for the deposit log and Merkle distributions, plus an
//! in-memory walkthrough of the whole claim cycle.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use fs2::FileExt;
use serde::Deserialize;
use tracing::{info, warn};

use tranche_aggregator::{Distribution, TreeBuilder};
use tranche_core::{
    parse_hex32, Address, Amount, DepositRecord, EpochId, JsonlDepositLog, MemoryDepositLog,
};
use tranche_logging::{try_init, LogLevel};
use tranche_prover::{verify_entitlement, MerkleProof};
use tranche_settlement::{
    Authority, ClaimsConfig, Clock, DepositRegistry, Epoch, EpochController, KeySetAuthority,
    Ledger, ManualClock, RecordingPayout, SingleKeyAuthority, SystemClock, SECS_PER_DAY,
};

/// Tranche - Merkle-proof-gated phased claims
#[derive(Parser)]
#[command(name = "tranche")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON config file (claims parameters, admin key, log level)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Append a deposit to a JSONL deposit log, in the log's current epoch
    Deposit {
        /// Deposit log file (created if missing)
        #[arg(long)]
        log: PathBuf,

        /// Recipient address (32 bytes hex)
        #[arg(long)]
        recipient: String,

        /// Amount in base units
        #[arg(long)]
        amount: Amount,

        /// Depositor address (32 bytes hex, defaults to the recipient)
        #[arg(long)]
        depositor: Option<String>,
    },

    /// Close the log's current epoch (needs the configured admin key)
    AdvanceEpoch {
        #[arg(long)]
        log: PathBuf,

        /// Caller address (32 bytes hex)
        #[arg(long)]
        caller: String,
    },

    /// Replay a deposit log and print the distribution with every proof
    Build {
        #[arg(long)]
        log: PathBuf,

        /// Restrict to these epochs (repeatable). Omit for all epochs.
        #[arg(long)]
        epoch: Vec<EpochId>,

        /// Write the export here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the proof for one (recipient, amount, epoch) entitlement
    Proof {
        #[arg(long)]
        log: PathBuf,

        #[arg(long)]
        recipient: String,

        #[arg(long)]
        amount: Amount,

        #[arg(long)]
        epoch: EpochId,
    },

    /// Check a proof file against a root
    Verify {
        /// Merkle root (32 bytes hex)
        #[arg(long)]
        root: String,

        #[arg(long)]
        recipient: String,

        #[arg(long)]
        amount: Amount,

        #[arg(long)]
        epoch: EpochId,

        /// Proof JSON, as printed by `proof`
        #[arg(long)]
        proof: PathBuf,
    },

    /// Run deposit, publish and both claims in memory on a simulated clock
    Demo,
}

/// Config file contents. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CliConfig {
    claims: ClaimsConfig,
    /// Admin key (32 bytes hex). Without one, no admin action is allowed.
    admin: Option<String>,
    log_level: LogLevel,
}

impl CliConfig {
    fn authority(&self) -> Result<Arc<dyn Authority>> {
        Ok(match &self.admin {
            Some(admin) => Arc::new(SingleKeyAuthority::new(parse_address("admin", admin)?)),
            None => Arc::new(KeySetAuthority::new()),
        })
    }
}

fn load_config(path: Option<&Path>) -> Result<CliConfig> {
    let Some(path) = path else {
        return Ok(CliConfig::default());
    };
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let config: CliConfig = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid config {}", path.display()))?;
    config
        .claims
        .validate()
        .map_err(|e| anyhow!("{}: {}", path.display(), e))?;
    config.authority()?;
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    let level = LogLevel::from_verbosity(cli.verbose).max(config.log_level);
    try_init(level).map_err(|e| anyhow!("{}", e))?;

    let now = SystemClock.now();

    match cli.command {
        Commands::Deposit {
            log,
            recipient,
            amount,
            depositor,
        } => {
            let authority = config.authority()?;
            let record = deposit(&log, &recipient, amount, depositor.as_deref(), authority, now)?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Commands::AdvanceEpoch { log, caller } => {
            let epoch = advance_epoch(&log, &caller, config.authority()?, now)?;
            println!("Epoch {} open", epoch);
        }
        Commands::Build { log, epoch, output } => {
            build(&log, &epoch, output.as_deref())?;
        }
        Commands::Proof {
            log,
            recipient,
            amount,
            epoch,
        } => {
            proof(&log, &recipient, amount, epoch)?;
        }
        Commands::Verify {
            root,
            recipient,
            amount,
            epoch,
            proof,
        } => {
            verify(&root, &recipient, amount, epoch, &proof)?;
        }
        Commands::Demo => {
            demo(config.claims)?;
        }
    }

    Ok(())
}

fn parse_address(label: &str, value: &str) -> Result<Address> {
    parse_hex32(value).ok_or_else(|| anyhow!("{} must be 32 hex-encoded bytes: {}", label, value))
}

// ============================================================================
// Deposit log commands
// ============================================================================

/// Epoch history of a deposit log, kept next to it as `<log>.epochs.json`.
///
/// Held under an exclusive lock for the whole command, so a deposit and an
/// epoch switch from two processes never interleave.
struct EpochFile {
    file: File,
}

impl EpochFile {
    fn lock(log_path: &Path) -> Result<Self> {
        let path = log_path.with_extension("epochs.json");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("Failed to open epoch file {}", path.display()))?;
        FileExt::lock_exclusive(&file)?;
        Ok(Self { file })
    }

    /// Saved controller, or a fresh genesis epoch when nothing is saved yet.
    fn load(&mut self, authority: Arc<dyn Authority>, now: u64) -> Result<EpochController> {
        let mut raw = String::new();
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_to_string(&mut raw)?;
        if raw.trim().is_empty() {
            return Ok(EpochController::new(authority, now));
        }

        let history: Vec<Epoch> = serde_json::from_str(&raw).context("Invalid epoch file")?;
        Ok(EpochController::restore(authority, history)?)
    }

    fn save(&mut self, epochs: &[Epoch]) -> Result<()> {
        let json = serde_json::to_string_pretty(epochs)?;
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(json.as_bytes())?;
        self.file.sync_data()?;
        Ok(())
    }
}

fn open_registry(
    log_path: &Path,
    epoch_file: &mut EpochFile,
    authority: Arc<dyn Authority>,
    now: u64,
) -> Result<DepositRegistry> {
    let log = JsonlDepositLog::open(log_path)
        .with_context(|| format!("Failed to open deposit log {}", log_path.display()))?;
    let epochs = epoch_file.load(authority.clone(), now)?;
    Ok(DepositRegistry::new(Arc::new(log), epochs, authority))
}

fn deposit(
    log_path: &Path,
    recipient: &str,
    amount: Amount,
    depositor: Option<&str>,
    authority: Arc<dyn Authority>,
    now: u64,
) -> Result<DepositRecord> {
    let recipient = parse_address("recipient", recipient)?;
    let depositor = match depositor {
        Some(d) => parse_address("depositor", d)?,
        None => recipient,
    };

    let mut epoch_file = EpochFile::lock(log_path)?;
    let registry = open_registry(log_path, &mut epoch_file, authority, now)?;
    // First deposit into a new log pins the genesis epoch
    epoch_file.save(registry.epochs())?;

    Ok(registry.deposit(depositor, recipient, amount)?)
}

fn advance_epoch(
    log_path: &Path,
    caller: &str,
    authority: Arc<dyn Authority>,
    now: u64,
) -> Result<EpochId> {
    let caller = parse_address("caller", caller)?;

    let mut epoch_file = EpochFile::lock(log_path)?;
    let mut registry = open_registry(log_path, &mut epoch_file, authority, now)?;
    let epoch = registry.advance_epoch(&caller, now)?;
    epoch_file.save(registry.epochs())?;
    Ok(epoch)
}

fn replay(log_path: &Path, epochs: &[EpochId]) -> Result<Distribution> {
    let log = JsonlDepositLog::open(log_path)
        .with_context(|| format!("Failed to open deposit log {}", log_path.display()))?;

    let mut builder = TreeBuilder::new();
    builder.ingest_from(&log, 0)?;

    let stats = builder.stats();
    info!(
        "{} records ({} redelivered) → {} leaves across {} epochs",
        stats.records, stats.duplicates, stats.leaves, stats.epochs,
    );

    Ok(if epochs.is_empty() {
        builder.build()
    } else {
        builder.build_epochs(epochs)
    })
}

fn build(log_path: &Path, epochs: &[EpochId], output: Option<&Path>) -> Result<()> {
    let dist = replay(log_path, epochs)?;
    if dist.is_empty() {
        warn!("No deposits in the selected epochs; root is all zeroes");
    }

    let json = serde_json::to_string_pretty(&dist.export())?;
    match output {
        Some(path) => {
            fs::write(path, json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Root: {}", hex::encode(dist.root));
            println!("Leaves: {}, total: {}", dist.len(), dist.total);
            println!("Export written to {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn proof(log_path: &Path, recipient: &str, amount: Amount, epoch: EpochId) -> Result<()> {
    let recipient = parse_address("recipient", recipient)?;
    let dist = replay(log_path, &[])?;

    let Some(proof) = dist.proof(&recipient, amount, epoch) else {
        match dist.entitlement(&recipient, epoch) {
            Some(actual) => bail!(
                "No leaf for amount {} in epoch {}; the aggregated amount is {}",
                amount,
                epoch,
                actual,
            ),
            None => bail!("Recipient has no deposits in epoch {}", epoch),
        }
    };

    println!("{}", serde_json::to_string_pretty(&proof)?);
    Ok(())
}

fn verify(root: &str, recipient: &str, amount: Amount, epoch: EpochId, proof_path: &Path) -> Result<()> {
    let root = parse_address("root", root)?;
    let recipient = parse_address("recipient", recipient)?;
    let raw = fs::read_to_string(proof_path)
        .with_context(|| format!("Failed to read proof {}", proof_path.display()))?;
    let proof: MerkleProof = serde_json::from_str(&raw).context("Invalid proof JSON")?;

    if verify_entitlement(&root, &recipient, amount, epoch, &proof) {
        println!("Valid: {} is entitled to {} in epoch {}", hex::encode(recipient), amount, epoch);
        Ok(())
    } else {
        bail!("Proof does not verify against root {}", hex::encode(root))
    }
}

// ============================================================================
// Demo
// ============================================================================

fn demo(config: ClaimsConfig) -> Result<()> {
    const ADMIN: Address = [0xAD; 32];
    const HOLDER: Address = [0x11; 32];
    const ALICE: Address = [0xA1; 32];
    const BOB: Address = [0xB0; 32];
    const START: u64 = 1_700_000_000;

    let clock = ManualClock::new(START);
    let payout = RecordingPayout::new();
    let ledger = Ledger::new(
        config,
        Arc::new(SingleKeyAuthority::new(ADMIN)),
        Arc::new(clock.clone()),
        MemoryDepositLog::new(),
        Box::new(payout.clone()),
    )?;

    println!("== Epoch {}: deposits", ledger.current_epoch());
    ledger.deposit(HOLDER, ALICE, 10)?;
    ledger.deposit(HOLDER, ALICE, 5)?;
    ledger.deposit(HOLDER, BOB, 40)?;
    let closed = ledger.current_epoch();
    ledger.advance_epoch(&ADMIN)?;

    println!("== Build and publish epoch {}", closed);
    let mut builder = TreeBuilder::new();
    builder.ingest_from(&ledger.log(), 0)?;
    let dist = builder.build_epochs(&[closed]);
    ledger.publish_root(&ADMIN, dist.root)?;
    println!("Root: {}", hex::encode(dist.root));

    let Some(alice_amount) = dist.entitlement(&ALICE, closed) else {
        bail!("Alice has no leaf in epoch {}", closed);
    };
    let alice_proof = dist
        .proof(&ALICE, alice_amount, closed)
        .ok_or_else(|| anyhow!("No proof for Alice"))?;

    println!("== Day 0: instant claim");
    let receipt = ledger.claim_instant(ALICE, alice_amount, closed, &alice_proof)?;
    println!("Released {} of {}", receipt.released, alice_amount);

    let period_days = config.vesting_period_secs / SECS_PER_DAY;
    if period_days > 0 {
        clock.set(START + (period_days - 1) * SECS_PER_DAY);
        println!("== Day {}: vested claim", period_days - 1);
        match ledger.claim_vested(ALICE, alice_amount, closed) {
            Err(e) if e.is_retryable_later() => println!("Rejected: {}", e),
            other => bail!("Expected an early vesting rejection, got {:?}", other),
        }
    }

    clock.set(START + config.vesting_period_secs);
    println!("== Day {}: vested claim", period_days);
    let receipt = ledger.claim_vested(ALICE, alice_amount, closed)?;
    println!("Released {} of {}", receipt.released, alice_amount);

    if let Err(e) = ledger.claim_vested(ALICE, alice_amount, closed) {
        println!("Repeat claim rejected: {}", e);
    }

    println!("== Balances");
    println!("Alice: {} (phase {:?})", payout.balance(&ALICE), ledger.claim_phase(&ALICE, closed));
    println!("Bob:   {} (phase {:?})", payout.balance(&BOB), ledger.claim_phase(&BOB, closed));
    Ok(())
}
