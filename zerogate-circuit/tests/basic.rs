use ark_bn254::Fr;
use ark_relations::r1cs::{ConstraintSynthesizer, ConstraintSystem, SynthesisError};
use zerogate_circuit::{
    circuit_shape, secret_hash, secret_to_field, HashPreimageCircuit, HASH_MULTIPLIER,
};

fn run_constraints(circuit: HashPreimageCircuit) -> Result<bool, SynthesisError> {
    let cs = ConstraintSystem::<Fr>::new_ref();
    circuit.generate_constraints(cs.clone())?;
    cs.is_satisfied()
}

#[test]
fn test_secret_proof_satisfied() {
    assert!(run_constraints(HashPreimageCircuit::from_secret("correct horse")).unwrap());
}

#[test]
fn test_other_secret_hash_fails() {
    let mut circuit = HashPreimageCircuit::from_secret("alice");
    circuit.hash = Some(secret_hash("bob"));
    assert!(!run_constraints(circuit).unwrap());
}

#[test]
fn test_missing_witness_is_assignment_error() {
    let circuit = HashPreimageCircuit {
        preimage: None,
        hash: Some(secret_hash("123")),
    };
    assert!(matches!(
        run_constraints(circuit),
        Err(SynthesisError::AssignmentMissing)
    ));
}

#[test]
fn test_multibyte_secret_round_trips_through_field() {
    let secret = "pässwörd🔑";
    let circuit = HashPreimageCircuit::from_secret(secret);
    assert_eq!(circuit.preimage, Some(secret_to_field(secret)));
    assert_eq!(
        circuit.hash,
        Some(secret_to_field(secret) * Fr::from(HASH_MULTIPLIER))
    );
    assert!(run_constraints(circuit).unwrap());
}

#[test]
fn test_shape_matches_synthesized_system() {
    let shape = circuit_shape().unwrap();
    let cs = ConstraintSystem::<Fr>::new_ref();
    HashPreimageCircuit::from_secret("123")
        .generate_constraints(cs.clone())
        .unwrap();
    cs.finalize();
    assert_eq!(shape.num_constraints, cs.num_constraints() as u64);
    assert_eq!(shape.num_witness_variables, cs.num_witness_variables() as u64);
}
