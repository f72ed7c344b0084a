use std::path::Path;

use anyhow::{anyhow, Context, Result};
use ark_bn254::{Bn254, Fr};
use ark_groth16::Proof;
use once_cell::sync::OnceCell;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use zerogate_circuit::circuit_shape;
use zerogate_common::{
    proof_to_snark, public_signals_from_fr, write_circuit_artifacts, CircuitManifest, SnarkProof,
};
use zerogate_prover::{prove_secret, setup, ProverParams};

/// Secret the sample proof is generated for.
pub const SAMPLE_SECRET: &str = "123";
const SETUP_SEED: u64 = 0x2e70_6a7e;

static FIXTURES: OnceCell<TestFixtures> = OnceCell::new();

/// Deterministic Groth16 keys and a sample proof reused across tests.
pub struct TestFixtures {
    pub params: ProverParams,
    pub secret: &'static str,
    pub proof: Proof<Bn254>,
    pub public_inputs: Vec<Fr>,
    pub snark_proof: SnarkProof,
    pub public_signals: Vec<String>,
}

impl TestFixtures {
    /// The sample proof as a snarkjs JSON object.
    pub fn proof_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.snark_proof).unwrap_or_default()
    }

    /// Writes the verification key, proving key and manifest into `dir`.
    pub fn write_artifacts(&self, dir: impl AsRef<Path>) -> Result<CircuitManifest> {
        let shape = circuit_shape().map_err(|err| anyhow!("circuit synthesis failed: {err:?}"))?;
        write_circuit_artifacts(dir, &self.params.vk, &self.params.pk, &shape)
            .context("failed to write fixture artifacts")
    }
}

/// Return lazily constructed test fixtures shared across crates.
pub fn fixtures() -> &'static TestFixtures {
    FIXTURES.get_or_init(|| build_fixtures().expect("failed to build zerogate test fixtures"))
}

fn build_fixtures() -> Result<TestFixtures> {
    let mut rng = ChaCha20Rng::seed_from_u64(SETUP_SEED);
    let params = setup(&mut rng).map_err(|err| anyhow!("groth16 setup failed: {err:?}"))?;
    let (proof, public_inputs) = prove_secret(&params.pk, SAMPLE_SECRET, &mut rng)
        .map_err(|err| anyhow!("fixture proof failed: {err:?}"))?;

    Ok(TestFixtures {
        snark_proof: proof_to_snark(&proof),
        public_signals: public_signals_from_fr(&public_inputs),
        params,
        secret: SAMPLE_SECRET,
        proof,
        public_inputs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use zerogate_common::{load_proving_key, load_verification_key, CircuitLayout};

    #[test]
    fn fixtures_are_shared() {
        assert!(std::ptr::eq(fixtures(), fixtures()));
        assert_eq!(fixtures().public_signals.len(), 1);
    }

    #[test]
    fn written_artifacts_load_back() {
        let dir = tempfile::tempdir().unwrap();
        let fx = fixtures();
        let manifest = fx.write_artifacts(dir.path()).unwrap();
        assert_eq!(manifest.num_public_inputs, 1);

        let layout = CircuitLayout::new(dir.path());
        assert!(layout.is_setup());
        assert_eq!(load_verification_key(&layout).unwrap(), fx.params.vk);
        assert!(load_proving_key(&layout).is_ok());
    }
}
