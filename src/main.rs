//! TLS Oracle CLI
//!
//! `request` captures a TLS session into the storage directory; `prove` turns
//! the parameter documents into a proof and public witness.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use tls_oracle::session::Direction;
use tls_oracle::{
    ArtifactStore, Backend, Groth16Prover, OracleConfig, ParameterLoader, ProofOrchestrator, SessionDriver,
    WitnessAssembler, VERSION,
};

#[derive(Debug, Parser)]
#[command(name = "tls-oracle", version, about = "TLS session capture and proof generation")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one TLS session and store the captured secrets and records.
    Request {
        /// Stop after the handshake without sending a request.
        #[arg(long)]
        handshake_only: bool,
    },
    /// Summarize the stored session document.
    Session,
    /// Assemble the witness from the parameter documents and prove it.
    Prove {
        /// Proof system: groth16, plonk or plonkFRI.
        #[arg(long, default_value = "groth16", env = "ORACLE_BACKEND")]
        backend: Backend,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    info!("TLS Oracle v{}", VERSION);

    let config = OracleConfig::from_env().context("invalid configuration")?;
    let store = ArtifactStore::from_config(&config);

    match args.command {
        Command::Request { handshake_only } => request(&config, &store, handshake_only),
        Command::Session => summarize_session(&store),
        Command::Prove { backend } => prove(&config, &store, backend),
    }
}

fn request(config: &OracleConfig, store: &ArtifactStore, handshake_only: bool) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("failed to start runtime")?;
    let driver = SessionDriver::new(config.session.clone());

    let artifacts = runtime
        .block_on(driver.call_and_store(store, handshake_only))
        .with_context(|| format!("session with {} failed", config.session.dial_addr))?;

    info!(
        "Session finished: {} secrets, {} records",
        artifacts.secrets.len(),
        artifacts.records.len()
    );
    Ok(())
}

fn summarize_session(store: &ArtifactStore) -> Result<()> {
    let artifacts = store
        .load_session()
        .with_context(|| format!("failed to load {}", store.session_path().display()))?;

    for name in artifacts.secrets.keys() {
        info!("secret {}", name);
    }
    for direction in [Direction::ClientToServer, Direction::ServerToClient] {
        for (id, meta) in artifacts.records_from(direction) {
            info!(
                "{} {:?} payload={} ciphertext={}",
                id,
                meta.typ,
                meta.payload.as_slice().len(),
                meta.ciphertext.as_slice().len()
            );
        }
    }
    Ok(())
}

fn prove(config: &OracleConfig, store: &ArtifactStore, backend: Backend) -> Result<()> {
    let params = ParameterLoader::new(store)
        .load_parameters()
        .with_context(|| format!("failed to load parameters from {}", store.storage_dir().display()))?;

    let (assignment, skeleton) = WitnessAssembler::new(config.threshold)
        .assemble(&params)
        .context("witness assembly failed")?;
    info!(
        "Assembled witness: {} public, {} secret elements",
        skeleton.schema().nb_public(),
        skeleton.schema().nb_secret()
    );

    // Only Groth16 has a prover; plonk and plonkFRI fail with a typed error.
    let orchestrator = ProofOrchestrator::new(store.clone()).with_backend(Backend::Groth16, Groth16Prover);

    let output = orchestrator
        .compute_proof(backend, &assignment)
        .with_context(|| format!("{} proof failed", backend))?;

    info!(
        "{} proof: {} ({} bytes), public witness: {} ({})",
        output.backend,
        output.proof_path.display(),
        output.proof_len,
        output.public_witness_path.display(),
        hex::encode(output.public_digest)
    );
    Ok(())
}
