use std::{
    fs,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::{anyhow, bail, ensure, Context, Result};
use ark_bn254::{Bn254, Fq, Fq2, Fr, G1Affine, G2Affine};
use ark_ec::AffineRepr;
use ark_ff::PrimeField;
use ark_groth16::{Proof, ProvingKey, VerifyingKey};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use serde::{Deserialize, Serialize};
use zerogate_circuit::{CircuitShape, CIRCUIT_NAME};

pub const MANIFEST_VERSION: u32 = 1;
pub const VERIFICATION_KEY_FILE: &str = "setup/verification_key.json";
pub const PROVING_KEY_FILE: &str = "setup/hash_preimage.pk";
pub const CIRCUIT_MANIFEST_FILE: &str = "build/hash_preimage.circuit.json";
/// Files that must exist under the circuits directory before proofs can be checked.
pub const REQUIRED_FILES: [&str; 3] =
    [VERIFICATION_KEY_FILE, PROVING_KEY_FILE, CIRCUIT_MANIFEST_FILE];

pub const SNARK_PROTOCOL: &str = "groth16";
pub const SNARK_CURVE: &str = "bn128";

/// Groth16 proof in the JSON shape emitted by snarkjs.
///
/// Points are projective triples of decimal strings; `z == "0"` encodes the
/// point at infinity and `z == "1"` an affine point.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnarkProof {
    pub pi_a: Vec<String>,
    pub pi_b: Vec<Vec<String>>,
    pub pi_c: Vec<String>,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default = "default_curve")]
    pub curve: String,
}

/// snarkjs `verification_key.json`. Unknown members such as
/// `vk_alphabeta_12` are ignored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnarkVerificationKey {
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default = "default_curve")]
    pub curve: String,
    #[serde(rename = "nPublic")]
    pub n_public: usize,
    pub vk_alpha_1: Vec<String>,
    pub vk_beta_2: Vec<Vec<String>>,
    pub vk_gamma_2: Vec<Vec<String>>,
    pub vk_delta_2: Vec<Vec<String>>,
    #[serde(rename = "IC")]
    pub ic: Vec<Vec<String>>,
}

fn default_protocol() -> String {
    SNARK_PROTOCOL.to_string()
}

fn default_curve() -> String {
    SNARK_CURVE.to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArtifactFile {
    pub path: String,
    pub blake3: String,
    pub size: u64,
}

impl ArtifactFile {
    pub fn from_bytes(path: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            path: path.into(),
            blake3: hash_bytes_hex(bytes),
            size: bytes.len() as u64,
        }
    }

    fn resolve_path(&self, base_dir: &Path) -> PathBuf {
        base_dir.join(&self.path)
    }
}

/// Compiled-circuit manifest written next to the keys.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CircuitManifest {
    pub manifest_version: u32,
    pub circuit_name: String,
    pub num_constraints: u64,
    pub num_public_inputs: u64,
    pub created_at_unix: u64,
    pub vk: ArtifactFile,
    pub pk: ArtifactFile,
}

/// Artifact paths under a circuits directory.
#[derive(Clone, Debug)]
pub struct CircuitLayout {
    root: PathBuf,
}

impl CircuitLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn verification_key_path(&self) -> PathBuf {
        self.root.join(VERIFICATION_KEY_FILE)
    }

    pub fn proving_key_path(&self) -> PathBuf {
        self.root.join(PROVING_KEY_FILE)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(CIRCUIT_MANIFEST_FILE)
    }

    /// Required files that do not exist, as paths relative to the root.
    pub fn missing_files(&self) -> Vec<String> {
        REQUIRED_FILES
            .into_iter()
            .filter(|rel| !self.root.join(rel).is_file())
            .map(str::to_string)
            .collect()
    }

    pub fn is_setup(&self) -> bool {
        self.missing_files().is_empty()
    }
}

pub fn proof_to_snark(proof: &Proof<Bn254>) -> SnarkProof {
    SnarkProof {
        pi_a: g1_to_strings(&proof.a),
        pi_b: g2_to_strings(&proof.b),
        pi_c: g1_to_strings(&proof.c),
        protocol: default_protocol(),
        curve: default_curve(),
    }
}

pub fn proof_from_snark(proof: &SnarkProof) -> Result<Proof<Bn254>> {
    ensure_protocol(&proof.protocol, &proof.curve)?;
    Ok(Proof {
        a: g1_from_strings(&proof.pi_a, "pi_a")?,
        b: g2_from_strings(&proof.pi_b, "pi_b")?,
        c: g1_from_strings(&proof.pi_c, "pi_c")?,
    })
}

pub fn proof_from_json(value: &serde_json::Value) -> Result<Proof<Bn254>> {
    let snark: SnarkProof =
        serde_json::from_value(value.clone()).context("proof is not a snarkjs groth16 proof")?;
    proof_from_snark(&snark)
}

pub fn verification_key_to_snark(vk: &VerifyingKey<Bn254>) -> SnarkVerificationKey {
    SnarkVerificationKey {
        protocol: default_protocol(),
        curve: default_curve(),
        n_public: vk.gamma_abc_g1.len().saturating_sub(1),
        vk_alpha_1: g1_to_strings(&vk.alpha_g1),
        vk_beta_2: g2_to_strings(&vk.beta_g2),
        vk_gamma_2: g2_to_strings(&vk.gamma_g2),
        vk_delta_2: g2_to_strings(&vk.delta_g2),
        ic: vk.gamma_abc_g1.iter().map(g1_to_strings).collect(),
    }
}

pub fn verification_key_from_snark(vk: &SnarkVerificationKey) -> Result<VerifyingKey<Bn254>> {
    ensure_protocol(&vk.protocol, &vk.curve)?;
    ensure!(
        vk.ic.len() == vk.n_public + 1,
        "verification key lists {} IC points for nPublic = {}",
        vk.ic.len(),
        vk.n_public
    );
    let gamma_abc_g1 = vk
        .ic
        .iter()
        .enumerate()
        .map(|(i, point)| g1_from_strings(point, &format!("IC[{i}]")))
        .collect::<Result<Vec<_>>>()?;
    Ok(VerifyingKey {
        alpha_g1: g1_from_strings(&vk.vk_alpha_1, "vk_alpha_1")?,
        beta_g2: g2_from_strings(&vk.vk_beta_2, "vk_beta_2")?,
        gamma_g2: g2_from_strings(&vk.vk_gamma_2, "vk_gamma_2")?,
        delta_g2: g2_from_strings(&vk.vk_delta_2, "vk_delta_2")?,
        gamma_abc_g1,
    })
}

pub fn parse_verification_key(bytes: &[u8]) -> Result<VerifyingKey<Bn254>> {
    let snark: SnarkVerificationKey =
        serde_json::from_slice(bytes).context("failed to parse verification key json")?;
    verification_key_from_snark(&snark)
}

pub fn serialize_verification_key(vk: &VerifyingKey<Bn254>) -> Result<Vec<u8>> {
    serde_json::to_vec_pretty(&verification_key_to_snark(vk))
        .context("failed to serialize verification key")
}

pub fn serialize_proving_key(pk: &ProvingKey<Bn254>) -> Result<Vec<u8>> {
    let mut buf = vec![];
    pk.serialize_compressed(&mut buf)
        .context("failed to serialize proving key")?;
    Ok(buf)
}

pub fn deserialize_proving_key(bytes: &[u8]) -> Result<ProvingKey<Bn254>> {
    ProvingKey::<Bn254>::deserialize_compressed(bytes).context("failed to deserialize proving key")
}

/// Decodes public signals given as decimal strings.
pub fn public_signals_to_fr(signals: &[String]) -> Result<Vec<Fr>> {
    signals
        .iter()
        .enumerate()
        .map(|(i, s)| parse_decimal::<Fr>(s).with_context(|| format!("public signal {i}")))
        .collect()
}

pub fn fr_to_decimal(value: &Fr) -> String {
    value.into_bigint().to_string()
}

pub fn public_signals_from_fr(values: &[Fr]) -> Vec<String> {
    values.iter().map(fr_to_decimal).collect()
}

pub fn write_manifest(path: impl AsRef<Path>, manifest: &CircuitManifest) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_vec_pretty(manifest).context("failed to serialize manifest")?;
    fs::write(path, json).context("failed to write manifest")
}

pub fn read_manifest(path: impl AsRef<Path>) -> Result<CircuitManifest> {
    let bytes = fs::read(path.as_ref()).context("failed to read manifest file")?;
    let manifest: CircuitManifest =
        serde_json::from_slice(&bytes).context("failed to parse manifest json")?;
    ensure_manifest_compat(&manifest)?;
    Ok(manifest)
}

/// Writes the verification key, proving key and manifest under `root`.
pub fn write_circuit_artifacts(
    root: impl AsRef<Path>,
    vk: &VerifyingKey<Bn254>,
    pk: &ProvingKey<Bn254>,
    shape: &CircuitShape,
) -> Result<CircuitManifest> {
    let layout = CircuitLayout::new(root.as_ref());
    let vk_bytes = serialize_verification_key(vk)?;
    let pk_bytes = serialize_proving_key(pk)?;

    write_artifact(&layout.verification_key_path(), &vk_bytes, "verification key")?;
    write_artifact(&layout.proving_key_path(), &pk_bytes, "proving key")?;

    let manifest = CircuitManifest {
        manifest_version: MANIFEST_VERSION,
        circuit_name: CIRCUIT_NAME.to_string(),
        num_constraints: shape.num_constraints,
        num_public_inputs: shape.num_public_inputs,
        created_at_unix: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default(),
        vk: ArtifactFile::from_bytes(VERIFICATION_KEY_FILE, &vk_bytes),
        pk: ArtifactFile::from_bytes(PROVING_KEY_FILE, &pk_bytes),
    };
    write_manifest(layout.manifest_path(), &manifest)?;
    Ok(manifest)
}

pub fn load_verification_key(layout: &CircuitLayout) -> Result<VerifyingKey<Bn254>> {
    let path = layout.verification_key_path();
    let bytes = fs::read(&path)
        .with_context(|| format!("failed to read verification key at {}", path.display()))?;
    parse_verification_key(&bytes)
}

/// Loads the proving key after checking it against the manifest digest.
pub fn load_proving_key(layout: &CircuitLayout) -> Result<ProvingKey<Bn254>> {
    let manifest = read_manifest(layout.manifest_path())?;
    let bytes = read_artifact_file(layout.root(), &manifest.pk, "proving key")?;
    deserialize_proving_key(&bytes)
}

/// Re-hashes both keys and compares them with the manifest.
pub fn verify_artifact_digests(layout: &CircuitLayout) -> Result<CircuitManifest> {
    let manifest = read_manifest(layout.manifest_path())?;
    read_artifact_file(layout.root(), &manifest.vk, "verification key")?;
    read_artifact_file(layout.root(), &manifest.pk, "proving key")?;
    Ok(manifest)
}

pub fn hash_bytes_hex(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

fn write_artifact(path: &Path, bytes: &[u8], label: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, bytes)
        .with_context(|| format!("failed to write {} to {}", label, path.display()))
}

fn read_artifact_file(base_dir: &Path, entry: &ArtifactFile, label: &str) -> Result<Vec<u8>> {
    let path = entry.resolve_path(base_dir);
    let bytes = fs::read(&path)
        .with_context(|| format!("failed to read {} at {}", label, path.display()))?;
    ensure!(
        bytes.len() as u64 == entry.size,
        "{} size mismatch, manifest recorded {} bytes but found {}",
        label,
        entry.size,
        bytes.len(),
    );
    ensure_hash(&bytes, &entry.blake3, label)?;
    Ok(bytes)
}

fn ensure_hash(bytes: &[u8], expected_hex: &str, label: &str) -> Result<()> {
    let actual = hash_bytes_hex(bytes);
    ensure!(
        actual == expected_hex,
        "{} hash mismatch, expected {} but computed {}",
        label,
        expected_hex,
        actual
    );
    Ok(())
}

fn ensure_manifest_compat(manifest: &CircuitManifest) -> Result<()> {
    ensure!(
        manifest.manifest_version == MANIFEST_VERSION,
        "unsupported manifest version {}, expected {}",
        manifest.manifest_version,
        MANIFEST_VERSION
    );
    ensure!(
        manifest.circuit_name == CIRCUIT_NAME,
        "circuit mismatch: manifest {} vs crate {}",
        manifest.circuit_name,
        CIRCUIT_NAME
    );
    Ok(())
}

fn ensure_protocol(protocol: &str, curve: &str) -> Result<()> {
    ensure!(
        protocol == SNARK_PROTOCOL,
        "unsupported protocol '{}', expected {}",
        protocol,
        SNARK_PROTOCOL
    );
    ensure!(
        curve.eq_ignore_ascii_case(SNARK_CURVE) || curve.eq_ignore_ascii_case("bn254"),
        "unsupported curve '{}', expected {}",
        curve,
        SNARK_CURVE
    );
    Ok(())
}

fn parse_decimal<F: PrimeField>(s: &str) -> Result<F> {
    let s = s.trim();
    ensure!(
        !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()),
        "'{}' is not a decimal integer",
        s
    );
    F::from_str(s).map_err(|_| anyhow!("'{}' is not a canonical field element", s))
}

fn fq_to_decimal(value: &Fq) -> String {
    value.into_bigint().to_string()
}

fn g1_to_strings(point: &G1Affine) -> Vec<String> {
    if point.is_zero() {
        return vec!["0".into(), "1".into(), "0".into()];
    }
    vec![fq_to_decimal(&point.x), fq_to_decimal(&point.y), "1".into()]
}

fn g2_to_strings(point: &G2Affine) -> Vec<Vec<String>> {
    if point.is_zero() {
        return vec![
            vec!["0".into(), "0".into()],
            vec!["1".into(), "0".into()],
            vec!["0".into(), "0".into()],
        ];
    }
    vec![
        vec![fq_to_decimal(&point.x.c0), fq_to_decimal(&point.x.c1)],
        vec![fq_to_decimal(&point.y.c0), fq_to_decimal(&point.y.c1)],
        vec!["1".into(), "0".into()],
    ]
}

fn g1_from_strings(coords: &[String], label: &str) -> Result<G1Affine> {
    ensure!(
        coords.len() == 2 || coords.len() == 3,
        "{} must have 2 or 3 coordinates, got {}",
        label,
        coords.len()
    );
    if let Some(z) = coords.get(2) {
        match z.trim() {
            "0" => return Ok(G1Affine::zero()),
            "1" => {}
            other => bail!("{} has non-normalized z coordinate '{}'", label, other),
        }
    }
    let x = parse_decimal::<Fq>(&coords[0]).with_context(|| format!("{label}.x"))?;
    let y = parse_decimal::<Fq>(&coords[1]).with_context(|| format!("{label}.y"))?;
    let point = G1Affine::new_unchecked(x, y);
    ensure_valid_point(
        point.is_on_curve(),
        point.is_in_correct_subgroup_assuming_on_curve(),
        label,
    )?;
    Ok(point)
}

fn g2_from_strings(coords: &[Vec<String>], label: &str) -> Result<G2Affine> {
    ensure!(
        coords.len() == 2 || coords.len() == 3,
        "{} must have 2 or 3 coordinates, got {}",
        label,
        coords.len()
    );
    if let Some(z) = coords.get(2) {
        let z = fq2_from_strings(z, &format!("{label}.z"))?;
        if z == Fq2::from(0u64) {
            return Ok(G2Affine::zero());
        }
        ensure!(
            z == Fq2::from(1u64),
            "{} has non-normalized z coordinate",
            label
        );
    }
    let x = fq2_from_strings(&coords[0], &format!("{label}.x"))?;
    let y = fq2_from_strings(&coords[1], &format!("{label}.y"))?;
    let point = G2Affine::new_unchecked(x, y);
    ensure_valid_point(
        point.is_on_curve(),
        point.is_in_correct_subgroup_assuming_on_curve(),
        label,
    )?;
    Ok(point)
}

fn fq2_from_strings(pair: &[String], label: &str) -> Result<Fq2> {
    ensure!(
        pair.len() == 2,
        "{} must have 2 components, got {}",
        label,
        pair.len()
    );
    let c0 = parse_decimal::<Fq>(&pair[0]).with_context(|| format!("{label}[0]"))?;
    let c1 = parse_decimal::<Fq>(&pair[1]).with_context(|| format!("{label}[1]"))?;
    Ok(Fq2::new(c0, c1))
}

fn ensure_valid_point(on_curve: bool, in_subgroup: bool, label: &str) -> Result<()> {
    ensure!(on_curve, "{} is not on the curve", label);
    ensure!(in_subgroup, "{} is not in the prime-order subgroup", label);
    Ok(())
}
