// zerogate/zerogate-verifier/src/lib.rs

use anyhow::{ensure, Result};
use ark_bn254::{Bn254, Fr};
use ark_groth16::{prepare_verifying_key, Groth16, PreparedVerifyingKey, Proof, VerifyingKey};
use zerogate_common::{proof_from_snark, public_signals_to_fr, SnarkProof};

pub fn prepare(vk: &VerifyingKey<Bn254>) -> PreparedVerifyingKey<Bn254> {
    prepare_verifying_key(vk)
}

/// Runs the pairing check. Malformed input counts as a failed check.
pub fn verify(pvk: &PreparedVerifyingKey<Bn254>, proof: &Proof<Bn254>, inputs: &[Fr]) -> bool {
    if inputs.len() + 1 != pvk.vk.gamma_abc_g1.len() {
        return false;
    }
    Groth16::<Bn254>::verify_proof(pvk, proof, inputs).unwrap_or(false)
}

/// Verifies a snarkjs-encoded proof against decimal public signals.
///
/// Decoding problems are returned as errors so callers can log them; the
/// pairing result itself is the boolean.
pub fn verify_snark(
    pvk: &PreparedVerifyingKey<Bn254>,
    proof: &SnarkProof,
    public_signals: &[String],
) -> Result<bool> {
    let proof = proof_from_snark(proof)?;
    let inputs = public_signals_to_fr(public_signals)?;
    let expected = pvk.vk.gamma_abc_g1.len().saturating_sub(1);
    ensure!(
        inputs.len() == expected,
        "expected {} public signals, got {}",
        expected,
        inputs.len()
    );
    Ok(verify(pvk, &proof, &inputs))
}
