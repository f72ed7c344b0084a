// zerogate/zerogate-backend/src/circuit.rs

//! Verifier adapter over the on-disk circuit artifacts.
//!
//! Keys are loaded lazily on first successful use and kept for the life of
//! the process. Verification never fails loudly: every problem is logged and
//! reported as an invalid proof.

use std::{path::Path, sync::Arc};

use anyhow::{anyhow, bail, Context, Result};
use ark_bn254::Bn254;
use ark_groth16::{PreparedVerifyingKey, ProvingKey};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::sync::OnceCell;
use zerogate_common::{
    load_proving_key, parse_verification_key, read_manifest, CircuitLayout, CircuitManifest,
    SnarkProof, REQUIRED_FILES,
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupStatus {
    pub is_setup: bool,
    pub missing_files: Vec<String>,
    pub circuits_path: String,
}

/// Where the public signals of a submission came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalSource {
    Embedded,
    Envelope,
    Caller,
}

#[derive(Clone, Debug)]
pub struct NormalizedSubmission {
    pub proof: SnarkProof,
    pub public_signals: Vec<String>,
    pub source: SignalSource,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestProof {
    pub proof: SnarkProof,
    pub public_signals: Vec<String>,
}

pub struct CircuitService {
    layout: CircuitLayout,
    verifying_key: OnceCell<Arc<PreparedVerifyingKey<Bn254>>>,
    proving_key: OnceCell<Arc<ProvingKey<Bn254>>>,
    manifest: OnceCell<CircuitManifest>,
}

impl CircuitService {
    pub fn new(circuits_path: impl AsRef<Path>) -> Self {
        Self {
            layout: CircuitLayout::new(circuits_path.as_ref()),
            verifying_key: OnceCell::new(),
            proving_key: OnceCell::new(),
            manifest: OnceCell::new(),
        }
    }

    pub fn layout(&self) -> &CircuitLayout {
        &self.layout
    }

    pub async fn setup_status(&self) -> SetupStatus {
        let missing_files = self.missing_files().await;
        SetupStatus {
            is_setup: missing_files.is_empty(),
            missing_files,
            circuits_path: self.layout.root().display().to_string(),
        }
    }

    pub async fn is_setup(&self) -> bool {
        let missing = self.missing_files().await;
        for file in &missing {
            tracing::warn!(file = %file, circuits_path = %self.layout.root().display(), "circuit artifact missing");
        }
        missing.is_empty()
    }

    async fn missing_files(&self) -> Vec<String> {
        let mut missing = Vec::new();
        for rel in REQUIRED_FILES {
            match tokio::fs::metadata(self.layout.root().join(rel)).await {
                Ok(meta) if meta.is_file() => {}
                _ => missing.push(rel.to_string()),
            }
        }
        missing
    }

    /// Checks `proof` against the verification key. Any failure yields `false`.
    pub async fn verify(&self, proof: &JsonValue, public_inputs: &[String]) -> bool {
        let submission = match normalize_submission(proof, public_inputs) {
            Ok(submission) => submission,
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "proof submission could not be decoded");
                return false;
            }
        };
        tracing::debug!(
            signal_source = ?submission.source,
            public_signals = ?submission.public_signals,
            "normalized proof submission"
        );

        let pvk = match self.prepared_verifying_key().await {
            Ok(pvk) => pvk,
            Err(err) => {
                tracing::error!(error = %format!("{err:#}"), "failed to load verification key");
                return false;
            }
        };

        let outcome = tokio::task::spawn_blocking(move || {
            zerogate_verifier::verify_snark(&pvk, &submission.proof, &submission.public_signals)
        })
        .await;

        match outcome {
            Ok(Ok(valid)) => {
                tracing::info!(valid, "proof verification finished");
                valid
            }
            Ok(Err(err)) => {
                tracing::warn!(error = %format!("{err:#}"), "proof rejected before pairing check");
                false
            }
            Err(err) => {
                tracing::error!(error = %err, "verification task failed");
                false
            }
        }
    }

    /// Proves knowledge of `secret` with the on-disk proving key.
    pub async fn generate_test_proof(&self, secret: &str) -> Result<TestProof> {
        let pk = self.proving_key().await?;
        let secret = secret.to_string();
        let (proof, public_signals) =
            tokio::task::spawn_blocking(move || zerogate_prover::prove_secret_snark(&pk, &secret))
                .await
                .context("proof generation task failed")?
                .map_err(|err| anyhow!("proof generation failed: {err:?}"))?;
        Ok(TestProof {
            proof,
            public_signals,
        })
    }

    /// Constraint count from the circuit manifest, when it can be read.
    pub async fn circuit_constraints(&self) -> Option<u64> {
        let path = self.layout.manifest_path();
        let manifest = self
            .manifest
            .get_or_try_init(|| async move {
                tokio::task::spawn_blocking(move || read_manifest(path))
                    .await
                    .context("manifest task failed")?
            })
            .await;
        match manifest {
            Ok(manifest) => Some(manifest.num_constraints),
            Err(err) => {
                tracing::debug!(error = %format!("{err:#}"), "circuit manifest unavailable");
                None
            }
        }
    }

    async fn prepared_verifying_key(&self) -> Result<Arc<PreparedVerifyingKey<Bn254>>> {
        let path = self.layout.verification_key_path();
        let pvk = self
            .verifying_key
            .get_or_try_init(|| async move {
                let bytes = tokio::fs::read(&path)
                    .await
                    .with_context(|| format!("failed to read {}", path.display()))?;
                let vk = parse_verification_key(&bytes)?;
                tracing::info!(path = %path.display(), n_public = vk.gamma_abc_g1.len().saturating_sub(1), "verification key loaded");
                Ok::<_, anyhow::Error>(Arc::new(zerogate_verifier::prepare(&vk)))
            })
            .await?;
        Ok(Arc::clone(pvk))
    }

    async fn proving_key(&self) -> Result<Arc<ProvingKey<Bn254>>> {
        let layout = self.layout.clone();
        let pk = self
            .proving_key
            .get_or_try_init(|| async move {
                let pk = tokio::task::spawn_blocking(move || load_proving_key(&layout))
                    .await
                    .context("proving key task failed")??;
                tracing::info!("proving key loaded");
                Ok::<_, anyhow::Error>(Arc::new(pk))
            })
            .await?;
        Ok(Arc::clone(pk))
    }
}

/// Unwraps one level of `{proof: {...}}` nesting and picks the public signals:
/// signals embedded in the proof, then the envelope's, then the caller's.
pub fn normalize_submission(
    proof: &JsonValue,
    caller_inputs: &[String],
) -> Result<NormalizedSubmission> {
    let envelope = match proof {
        JsonValue::Object(map) => map,
        _ => bail!("proof must be a JSON object"),
    };
    let (inner, nested) = match envelope.get("proof") {
        Some(JsonValue::Object(inner)) => (inner, true),
        _ => (envelope, false),
    };
    tracing::debug!(
        nested,
        keys = ?inner.keys().collect::<Vec<_>>(),
        "proof payload structure"
    );

    let (public_signals, source) = if let Some(signals) = inner.get("publicSignals") {
        (signal_strings(signals)?, SignalSource::Embedded)
    } else if let Some(signals) = envelope.get("publicSignals").filter(|_| nested) {
        (signal_strings(signals)?, SignalSource::Envelope)
    } else {
        (caller_inputs.to_vec(), SignalSource::Caller)
    };

    let proof: SnarkProof = serde_json::from_value(JsonValue::Object(inner.clone()))
        .context("proof is not a snarkjs groth16 proof")?;

    Ok(NormalizedSubmission {
        proof,
        public_signals,
        source,
    })
}

fn signal_strings(value: &JsonValue) -> Result<Vec<String>> {
    let items = value
        .as_array()
        .ok_or_else(|| anyhow!("publicSignals must be an array"))?;
    items
        .iter()
        .map(|item| match item {
            JsonValue::String(s) => Ok(s.clone()),
            JsonValue::Number(n) => Ok(n.to_string()),
            _ => Err(anyhow!("publicSignals entries must be strings")),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use zerogate_test_fixtures::fixtures;

    fn service_with_artifacts() -> (tempfile::TempDir, CircuitService) {
        let dir = tempfile::tempdir().unwrap();
        fixtures().write_artifacts(dir.path()).unwrap();
        let service = CircuitService::new(dir.path());
        (dir, service)
    }

    #[test]
    fn plain_proof_uses_caller_signals() {
        let fx = fixtures();
        let normalized = normalize_submission(&fx.proof_json(), &fx.public_signals).unwrap();
        assert_eq!(normalized.source, SignalSource::Caller);
        assert_eq!(normalized.public_signals, fx.public_signals);
        assert_eq!(normalized.proof, fx.snark_proof);
    }

    #[test]
    fn nested_proof_prefers_embedded_signals() {
        let fx = fixtures();
        let mut inner = fx.proof_json();
        inner["publicSignals"] = json!(["1"]);
        let envelope = json!({ "proof": inner, "publicSignals": ["2"] });

        let normalized = normalize_submission(&envelope, &["3".to_string()]).unwrap();
        assert_eq!(normalized.source, SignalSource::Embedded);
        assert_eq!(normalized.public_signals, vec!["1"]);
    }

    #[test]
    fn envelope_signals_beat_caller_inputs() {
        let fx = fixtures();
        let envelope = json!({ "proof": fx.proof_json(), "publicSignals": ["2"] });
        let normalized = normalize_submission(&envelope, &["3".to_string()]).unwrap();
        assert_eq!(normalized.source, SignalSource::Envelope);
        assert_eq!(normalized.public_signals, vec!["2"]);
    }

    #[test]
    fn rejects_non_object_and_foreign_shapes() {
        assert!(normalize_submission(&json!("proof"), &[]).is_err());
        assert!(normalize_submission(&json!({ "a": 1 }), &[]).is_err());
        assert!(normalize_submission(&json!({ "pi_a": [], "publicSignals": [{}] }), &[]).is_err());
    }

    #[tokio::test]
    async fn verifies_fixture_proof() {
        let (_dir, service) = service_with_artifacts();
        let fx = fixtures();
        assert!(service.is_setup().await);
        assert!(service.verify(&fx.proof_json(), &fx.public_signals).await);
        assert!(!service.verify(&fx.proof_json(), &["5".to_string()]).await);
        assert_eq!(
            service.circuit_constraints().await,
            Some(zerogate_circuit::circuit_shape().unwrap().num_constraints)
        );
    }

    #[tokio::test]
    async fn missing_artifacts_verify_false() {
        let dir = tempfile::tempdir().unwrap();
        let service = CircuitService::new(dir.path());
        let fx = fixtures();
        let status = service.setup_status().await;
        assert!(!status.is_setup);
        assert_eq!(status.missing_files.len(), 3);
        assert!(!service.verify(&fx.proof_json(), &fx.public_signals).await);
        assert_eq!(service.circuit_constraints().await, None);
    }

    #[tokio::test]
    async fn directory_in_place_of_artifact_counts_as_missing() {
        let (dir, service) = service_with_artifacts();
        let vk_path = service.layout().verification_key_path();
        std::fs::remove_file(&vk_path).unwrap();
        std::fs::create_dir(&vk_path).unwrap();

        let status = service.setup_status().await;
        assert!(!status.is_setup);
        assert_eq!(status.missing_files, vec![zerogate_common::VERIFICATION_KEY_FILE]);
        assert!(!service.is_setup().await);
        drop(dir);
    }

    #[tokio::test]
    async fn test_proof_round_trips() {
        let (_dir, service) = service_with_artifacts();
        let generated = service.generate_test_proof("hunter2").await.unwrap();
        let proof = serde_json::to_value(&generated.proof).unwrap();
        assert!(service.verify(&proof, &generated.public_signals).await);
    }
}
