use std::{fmt, path::PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use rand::rngs::OsRng;
use serde::Serialize;
use zerogate_circuit::circuit_shape;
use zerogate_common::{
    load_verification_key, read_manifest, verify_artifact_digests, verification_key_to_snark,
    write_circuit_artifacts, CircuitLayout, CircuitManifest, CIRCUIT_MANIFEST_FILE,
    PROVING_KEY_FILE, VERIFICATION_KEY_FILE,
};
use zerogate_prover::setup;

const DEFAULT_CIRCUITS_DIR: &str = "circuits";

#[derive(Parser)]
#[command(
    name = "zerogate-tools",
    about = "Utility commands for ZeroGate circuit artifacts"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the Groth16 setup and write the verification key, proving key and manifest.
    GenArtifacts(GenArtifactsArgs),
    /// Print metadata about the verification key.
    DumpVk(DumpArgs),
    /// Report which artifacts are present and whether their digests match.
    Check(DumpArgs),
}

#[derive(Args)]
struct GenArtifactsArgs {
    /// Output circuits directory.
    #[arg(long, default_value = DEFAULT_CIRCUITS_DIR)]
    output_dir: PathBuf,
}

#[derive(Args)]
struct DumpArgs {
    #[arg(long, default_value = DEFAULT_CIRCUITS_DIR)]
    circuits_dir: PathBuf,
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::GenArtifacts(args) => gen_artifacts(args),
        Commands::DumpVk(args) => dump_vk(args),
        Commands::Check(args) => check(args),
    }
}

fn gen_artifacts(args: GenArtifactsArgs) -> Result<()> {
    println!("Running Groth16 setup for the hash-preimage circuit...");

    let shape = circuit_shape().map_err(|err| anyhow!("circuit synthesis failed: {err:?}"))?;
    let params = setup(&mut OsRng).map_err(|err| anyhow!("groth16 setup failed: {err:?}"))?;
    let manifest = write_circuit_artifacts(&args.output_dir, &params.vk, &params.pk, &shape)
        .with_context(|| format!("failed to write artifacts to {}", args.output_dir.display()))?;

    println!(
        "Generated artifacts for {} ({} constraints) at {}",
        manifest.circuit_name,
        manifest.num_constraints,
        args.output_dir.display()
    );
    print_artifact_summary(&manifest);
    Ok(())
}

fn print_artifact_summary(manifest: &CircuitManifest) {
    println!("\nArtifact Summary:");
    println!(
        "  {}: {} bytes, blake3: {}",
        VERIFICATION_KEY_FILE, manifest.vk.size, manifest.vk.blake3
    );
    println!(
        "  {}: {} bytes, blake3: {}",
        PROVING_KEY_FILE, manifest.pk.size, manifest.pk.blake3
    );
    println!("  {}", CIRCUIT_MANIFEST_FILE);
}

fn dump_vk(args: DumpArgs) -> Result<()> {
    let layout = CircuitLayout::new(&args.circuits_dir);
    let vk = load_verification_key(&layout).with_context(|| {
        format!(
            "failed to load verification key from {}",
            args.circuits_dir.display()
        )
    })?;
    let manifest = read_manifest(layout.manifest_path()).ok();
    let snark = verification_key_to_snark(&vk);

    let summary = VkSummary {
        circuits_dir: args.circuits_dir.display().to_string(),
        protocol: snark.protocol,
        curve: snark.curve,
        n_public: snark.n_public,
        ic_points: snark.ic.len(),
        vk_hash: manifest.as_ref().map(|m| m.vk.blake3.clone()),
        vk_size: manifest.as_ref().map(|m| m.vk.size),
        num_constraints: manifest.as_ref().map(|m| m.num_constraints),
    };
    output_summary(&summary, args.json)
}

fn check(args: DumpArgs) -> Result<()> {
    let layout = CircuitLayout::new(&args.circuits_dir);
    let missing_files = layout.missing_files();
    let digest_error = if missing_files.is_empty() {
        verify_artifact_digests(&layout)
            .err()
            .map(|err| format!("{err:#}"))
    } else {
        None
    };

    let summary = CheckSummary {
        circuits_dir: args.circuits_dir.display().to_string(),
        is_setup: missing_files.is_empty(),
        digests_ok: missing_files.is_empty() && digest_error.is_none(),
        missing_files,
        digest_error,
    };
    output_summary(&summary, args.json)
}

fn output_summary<T>(summary: &T, json: bool) -> Result<()>
where
    T: Serialize + fmt::Display,
{
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
    } else {
        println!("{}", summary);
    }
    Ok(())
}

#[derive(Serialize)]
struct VkSummary {
    circuits_dir: String,
    protocol: String,
    curve: String,
    n_public: usize,
    ic_points: usize,
    vk_hash: Option<String>,
    vk_size: Option<u64>,
    num_constraints: Option<u64>,
}

impl fmt::Display for VkSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "circuits: {}", self.circuits_dir)?;
        writeln!(f, "protocol: {} over {}", self.protocol, self.curve)?;
        writeln!(f, "public inputs: {}", self.n_public)?;
        writeln!(f, "IC points: {}", self.ic_points)?;
        writeln!(f, "vk_hash: {}", display_opt(&self.vk_hash))?;
        writeln!(f, "vk_size: {} bytes", display_opt(&self.vk_size))?;
        writeln!(f, "constraints: {}", display_opt(&self.num_constraints))
    }
}

#[derive(Serialize)]
struct CheckSummary {
    circuits_dir: String,
    is_setup: bool,
    digests_ok: bool,
    missing_files: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    digest_error: Option<String>,
}

impl fmt::Display for CheckSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "circuits: {}", self.circuits_dir)?;
        writeln!(f, "setup: {}", if self.is_setup { "complete" } else { "incomplete" })?;
        for file in &self.missing_files {
            writeln!(f, "  missing: {}", file)?;
        }
        if let Some(err) = &self.digest_error {
            writeln!(f, "digest check failed: {}", err)?;
        }
        writeln!(f, "digests ok: {}", self.digests_ok)
    }
}

fn display_opt<T: fmt::Display>(value: &Option<T>) -> String {
    value
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "unknown".to_string())
}
