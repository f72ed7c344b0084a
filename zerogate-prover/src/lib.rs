// zerogate/zerogate-prover/src/lib.rs

use ark_bn254::{Bn254, Fr};
use ark_groth16::{Groth16, Proof, ProvingKey, VerifyingKey};
use ark_relations::r1cs::SynthesisError;
use ark_snark::{CircuitSpecificSetupSNARK, SNARK};
use rand::{rngs::OsRng, CryptoRng, RngCore};

use zerogate_circuit::HashPreimageCircuit;
use zerogate_common::{proof_to_snark, public_signals_from_fr, SnarkProof};

pub struct ProverParams {
    pub vk: VerifyingKey<Bn254>,
    pub pk: ProvingKey<Bn254>,
}

/// Circuit-specific trusted setup. The toxic waste lives only in `rng`.
pub fn setup<R: RngCore + CryptoRng>(rng: &mut R) -> Result<ProverParams, SynthesisError> {
    let (pk, vk) =
        Groth16::<Bn254>::circuit_specific_setup(HashPreimageCircuit::default(), rng)?;
    Ok(ProverParams { vk, pk })
}

pub fn prove<R: RngCore + CryptoRng>(
    pk: &ProvingKey<Bn254>,
    circuit: HashPreimageCircuit,
    rng: &mut R,
) -> Result<Proof<Bn254>, SynthesisError> {
    Groth16::<Bn254>::prove(pk, circuit, rng)
}

/// Proves knowledge of `secret` and returns the proof with its public inputs.
pub fn prove_secret<R: RngCore + CryptoRng>(
    pk: &ProvingKey<Bn254>,
    secret: &str,
    rng: &mut R,
) -> Result<(Proof<Bn254>, Vec<Fr>), SynthesisError> {
    let circuit = HashPreimageCircuit::from_secret(secret);
    let public_inputs = circuit.public_inputs();
    let proof = prove(pk, circuit, rng)?;
    Ok((proof, public_inputs))
}

/// Same as [`prove_secret`] with fresh randomness, encoded for snarkjs clients.
pub fn prove_secret_snark(
    pk: &ProvingKey<Bn254>,
    secret: &str,
) -> Result<(SnarkProof, Vec<String>), SynthesisError> {
    let (proof, public_inputs) = prove_secret(pk, secret, &mut OsRng)?;
    Ok((
        proof_to_snark(&proof),
        public_signals_from_fr(&public_inputs),
    ))
}
