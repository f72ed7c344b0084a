// zerogate/zerogate-prover/src/main.rs

use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use rand::rngs::OsRng;

use zerogate_common::{load_proving_key, proof_to_snark, public_signals_from_fr, CircuitLayout};
use zerogate_prover::prove_secret;

/// Proves knowledge of a secret and writes snarkjs-style proof.json / public.json.
#[derive(Parser)]
struct Args {
    #[arg(long)]
    secret: String,
    #[arg(long, default_value = "circuits")]
    circuits_dir: PathBuf,
    #[arg(long, default_value = "proof.json")]
    output_proof: PathBuf,
    #[arg(long, default_value = "public.json")]
    output_public: PathBuf,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let layout = CircuitLayout::new(&args.circuits_dir);
    let pk = load_proving_key(&layout).with_context(|| {
        format!(
            "failed to load proving key from {}",
            args.circuits_dir.display()
        )
    })?;

    let (proof, public_inputs) = prove_secret(&pk, &args.secret, &mut OsRng)
        .map_err(|err| anyhow::anyhow!("proof generation failed: {err:?}"))?;

    write_json(&args.output_proof, &proof_to_snark(&proof))?;
    write_json(&args.output_public, &public_signals_from_fr(&public_inputs))?;

    println!(
        "wrote {} and {}",
        args.output_proof.display(),
        args.output_public.display()
    );
    Ok(())
}

fn write_json<T: serde::Serialize>(path: &PathBuf, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)
        .with_context(|| format!("failed to serialize {}", path.display()))?;
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))
}
