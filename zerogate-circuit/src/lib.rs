// zerogate/zerogate-circuit/src/lib.rs

//! Hash-preimage relation used for login proofs.
//!
//! The prover knows `preimage` such that `hash = preimage * HASH_MULTIPLIER (mod r)`
//! over the BN254 scalar field. `hash` is the only public input.

use ark_bn254::Fr;
use ark_ff::PrimeField;
use ark_r1cs_std::{alloc::AllocVar, eq::EqGadget, fields::fp::FpVar};
use ark_relations::r1cs::{
    ConstraintSynthesizer, ConstraintSystem, ConstraintSystemRef, SynthesisError,
};
use serde::{Deserialize, Serialize};

pub const CIRCUIT_NAME: &str = "hash_preimage";
pub const HASH_MULTIPLIER: u64 = 7;
pub const PUBLIC_INPUT_COUNT: usize = 1;

#[derive(Clone, Debug, Default)]
pub struct HashPreimageCircuit {
    pub preimage: Option<Fr>,
    pub hash: Option<Fr>,
}

impl HashPreimageCircuit {
    pub fn new(preimage: Fr) -> Self {
        Self {
            preimage: Some(preimage),
            hash: Some(preimage_hash(&preimage)),
        }
    }

    pub fn from_secret(secret: &str) -> Self {
        Self::new(secret_to_field(secret))
    }

    /// Public inputs in allocation order.
    pub fn public_inputs(&self) -> Vec<Fr> {
        self.hash.into_iter().collect()
    }
}

impl ConstraintSynthesizer<Fr> for HashPreimageCircuit {
    fn generate_constraints(self, cs: ConstraintSystemRef<Fr>) -> Result<(), SynthesisError> {
        let hash = FpVar::<Fr>::new_input(cs.clone(), || {
            self.hash.ok_or(SynthesisError::AssignmentMissing)
        })?;
        let preimage = FpVar::<Fr>::new_witness(cs, || {
            self.preimage.ok_or(SynthesisError::AssignmentMissing)
        })?;

        let computed = preimage * FpVar::Constant(Fr::from(HASH_MULTIPLIER));
        computed.enforce_equal(&hash)
    }
}

/// Maps a user secret onto the scalar field: the UTF-8 bytes are read as a
/// big-endian integer and reduced mod r. Browser clients use the same encoding.
pub fn secret_to_field(secret: &str) -> Fr {
    Fr::from_be_bytes_mod_order(secret.as_bytes())
}

pub fn preimage_hash(preimage: &Fr) -> Fr {
    *preimage * Fr::from(HASH_MULTIPLIER)
}

/// Public hash a client registers for `secret`.
pub fn secret_hash(secret: &str) -> Fr {
    preimage_hash(&secret_to_field(secret))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitShape {
    pub num_constraints: u64,
    pub num_public_inputs: u64,
    pub num_witness_variables: u64,
}

/// Synthesizes the circuit once with a dummy assignment and reports its size.
pub fn circuit_shape() -> Result<CircuitShape, SynthesisError> {
    let cs = ConstraintSystem::<Fr>::new_ref();
    HashPreimageCircuit::new(Fr::from(1u64)).generate_constraints(cs.clone())?;
    cs.finalize();
    Ok(CircuitShape {
        num_constraints: cs.num_constraints() as u64,
        // instance variables include the constant one
        num_public_inputs: cs.num_instance_variables().saturating_sub(1) as u64,
        num_witness_variables: cs.num_witness_variables() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_ff::UniformRand;

    fn is_satisfied(circuit: HashPreimageCircuit) -> bool {
        let cs = ConstraintSystem::<Fr>::new_ref();
        circuit.generate_constraints(cs.clone()).unwrap();
        cs.is_satisfied().unwrap()
    }

    #[test]
    fn valid_preimage_satisfies() {
        assert!(is_satisfied(HashPreimageCircuit::from_secret("123")));
    }

    #[test]
    fn random_preimages_satisfy() {
        let mut rng = rand::thread_rng();
        for _ in 0..8 {
            let preimage = Fr::rand(&mut rng);
            assert!(is_satisfied(HashPreimageCircuit::new(preimage)));
        }
    }

    #[test]
    fn wrong_hash_fails() {
        let mut circuit = HashPreimageCircuit::from_secret("123");
        circuit.hash = Some(circuit.hash.unwrap() + Fr::from(1u64));
        assert!(!is_satisfied(circuit));
    }

    #[test]
    fn secret_encoding_is_big_endian_bytes() {
        // "123" = 0x31 0x32 0x33
        assert_eq!(secret_to_field("123"), Fr::from(0x313233u64));
        assert_eq!(secret_hash("123"), Fr::from(0x313233u64 * HASH_MULTIPLIER));
    }

    #[test]
    fn shape_has_single_public_input() {
        let shape = circuit_shape().unwrap();
        assert_eq!(shape.num_public_inputs, PUBLIC_INPUT_COUNT as u64);
        assert!(shape.num_constraints >= 1);
    }

    #[test]
    fn public_inputs_follow_allocation_order() {
        let circuit = HashPreimageCircuit::from_secret("hunter2");
        assert_eq!(circuit.public_inputs(), vec![secret_hash("hunter2")]);
        assert!(HashPreimageCircuit::default().public_inputs().is_empty());
    }
}
