// zerogate/zerogate-backend/src/history.rs

//! Login history: one record per authentication attempt past validation.
//!
//! Entries for every user live in a single list. Stores only have to provide
//! `append` and `entries_for`; listing, statistics and the metrics series are
//! derived from those on read.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Mutex,
};

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Entries kept per username; older ones are dropped on append.
pub const RETENTION_PER_USER: usize = 1000;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofMetrics {
    /// Client-side proving time in ms. The server never measures it and records 0.
    pub generation_time: u64,
    pub verification_time: u64,
    pub proof_size: u64,
    pub public_inputs_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circuit_constraints: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginEntry {
    pub id: String,
    pub username: String,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<ProofMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// An attempt as reported by the handler; the store assigns id and timestamp.
#[derive(Clone, Debug, Default)]
pub struct NewLoginEntry {
    pub username: String,
    pub success: bool,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub metrics: Option<ProofMetrics>,
    pub error_message: Option<String>,
}

impl NewLoginEntry {
    pub fn success(username: impl Into<String>, metrics: ProofMetrics) -> Self {
        Self {
            username: username.into(),
            success: true,
            metrics: Some(metrics),
            ..Self::default()
        }
    }

    pub fn failure(username: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            success: false,
            error_message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn with_client(mut self, ip_address: Option<String>, user_agent: Option<String>) -> Self {
        self.ip_address = ip_address;
        self.user_agent = user_agent;
        self
    }

    fn into_entry(self, timestamp: DateTime<Utc>) -> LoginEntry {
        LoginEntry {
            id: format!("login_{}", Uuid::now_v7()),
            username: self.username,
            timestamp,
            success: self.success,
            ip_address: self.ip_address,
            user_agent: self.user_agent,
            metrics: self.metrics,
            error_message: self.error_message,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginHistoryStats {
    pub total_logins: u64,
    pub successful_logins: u64,
    pub failed_logins: u64,
    pub success_rate: f64,
    pub average_generation_time: u64,
    pub average_verification_time: u64,
    pub average_proof_size: u64,
    pub first_login: String,
    pub last_login: String,
}

impl Default for LoginHistoryStats {
    fn default() -> Self {
        Self {
            total_logins: 0,
            successful_logins: 0,
            failed_logins: 0,
            success_rate: 0.0,
            average_generation_time: 0,
            average_verification_time: 0,
            average_proof_size: 0,
            first_login: String::new(),
            last_login: String::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("failed to access login history at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("login history at {path} is not valid JSON: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode login history: {0}")]
    Encode(#[from] serde_json::Error),
}

#[async_trait]
pub trait LoginHistoryStore: Send + Sync {
    async fn append(&self, entry: NewLoginEntry) -> Result<LoginEntry, HistoryError>;

    /// All entries for `username` in insertion order.
    async fn entries_for(&self, username: &str) -> Result<Vec<LoginEntry>, HistoryError>;

    /// Newest first, at most `limit` entries.
    async fn read_for_user(
        &self,
        username: &str,
        limit: usize,
    ) -> Result<Vec<LoginEntry>, HistoryError> {
        let mut entries = self.entries_for(username).await?;
        entries.reverse();
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        entries.truncate(limit);
        Ok(entries)
    }

    async fn stats_for_user(&self, username: &str) -> Result<LoginHistoryStats, HistoryError> {
        Ok(compute_stats(&self.entries_for(username).await?))
    }

    /// Successful, metric-bearing entries from the last `since_days` days, oldest first.
    async fn metrics_for_user(
        &self,
        username: &str,
        since_days: u32,
    ) -> Result<Vec<LoginEntry>, HistoryError> {
        // windows reaching past the representable range have no lower bound
        let cutoff = Duration::try_days(i64::from(since_days))
            .and_then(|window| Utc::now().checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Ok(select_metrics(self.entries_for(username).await?, cutoff))
    }
}

pub fn compute_stats(entries: &[LoginEntry]) -> LoginHistoryStats {
    if entries.is_empty() {
        return LoginHistoryStats::default();
    }

    let total = entries.len() as u64;
    let successful = entries.iter().filter(|e| e.success).count() as u64;
    let with_metrics: Vec<&ProofMetrics> = entries
        .iter()
        .filter(|e| e.success)
        .filter_map(|e| e.metrics.as_ref())
        .collect();

    let average = |field: fn(&ProofMetrics) -> u64| -> u64 {
        if with_metrics.is_empty() {
            return 0;
        }
        let sum: u64 = with_metrics.iter().map(|&m| field(m)).sum();
        (sum as f64 / with_metrics.len() as f64).round() as u64
    };

    let first = entries.iter().map(|e| e.timestamp).min();
    let last = entries.iter().map(|e| e.timestamp).max();

    LoginHistoryStats {
        total_logins: total,
        successful_logins: successful,
        failed_logins: total - successful,
        success_rate: successful as f64 / total as f64 * 100.0,
        average_generation_time: average(|m| m.generation_time),
        average_verification_time: average(|m| m.verification_time),
        average_proof_size: average(|m| m.proof_size),
        first_login: first.map(format_timestamp).unwrap_or_default(),
        last_login: last.map(format_timestamp).unwrap_or_default(),
    }
}

pub fn select_metrics(entries: Vec<LoginEntry>, cutoff: DateTime<Utc>) -> Vec<LoginEntry> {
    let mut selected: Vec<LoginEntry> = entries
        .into_iter()
        .filter(|e| e.success && e.metrics.is_some() && e.timestamp >= cutoff)
        .collect();
    selected.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    selected
}

/// Drops the oldest entries of `username` beyond `cap`. Other users are untouched.
pub fn apply_retention(entries: &mut Vec<LoginEntry>, username: &str, cap: usize) {
    let count = entries.iter().filter(|e| e.username == username).count();
    let mut excess = count.saturating_sub(cap);
    if excess == 0 {
        return;
    }
    entries.retain(|e| {
        if excess > 0 && e.username == username {
            excess -= 1;
            false
        } else {
            true
        }
    });
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// All users' entries in one pretty-printed JSON array.
pub struct JsonFileHistory {
    path: PathBuf,
    retention: usize,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonFileHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_retention(path, RETENTION_PER_USER)
    }

    pub fn with_retention(path: impl Into<PathBuf>, retention: usize) -> Self {
        Self {
            path: path.into(),
            retention,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Vec<LoginEntry>, HistoryError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(HistoryError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        serde_json::from_slice(&bytes).map_err(|source| HistoryError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    async fn save(&self, entries: &[LoginEntry]) -> Result<(), HistoryError> {
        let io_err = |source| HistoryError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
            }
        }
        let json = serde_json::to_vec_pretty(entries)?;
        let tmp = self.tmp_path();
        tokio::fs::write(&tmp, json).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(io_err)
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "login_history.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl LoginHistoryStore for JsonFileHistory {
    async fn append(&self, entry: NewLoginEntry) -> Result<LoginEntry, HistoryError> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.load().await?;
        let entry = entry.into_entry(Utc::now());
        entries.push(entry.clone());
        apply_retention(&mut entries, &entry.username, self.retention);
        self.save(&entries).await?;
        Ok(entry)
    }

    async fn entries_for(&self, username: &str) -> Result<Vec<LoginEntry>, HistoryError> {
        Ok(self
            .load()
            .await?
            .into_iter()
            .filter(|e| e.username == username)
            .collect())
    }
}

/// Process-local store with the same semantics as [`JsonFileHistory`].
pub struct InMemoryHistory {
    entries: Mutex<Vec<LoginEntry>>,
    retention: usize,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::from_entries(Vec::new())
    }

    pub fn from_entries(entries: Vec<LoginEntry>) -> Self {
        Self {
            entries: Mutex::new(entries),
            retention: RETENTION_PER_USER,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("history store poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LoginHistoryStore for InMemoryHistory {
    async fn append(&self, entry: NewLoginEntry) -> Result<LoginEntry, HistoryError> {
        let entry = entry.into_entry(Utc::now());
        let mut guard = self.entries.lock().expect("history store poisoned");
        guard.push(entry.clone());
        apply_retention(&mut guard, &entry.username, self.retention);
        Ok(entry)
    }

    async fn entries_for(&self, username: &str) -> Result<Vec<LoginEntry>, HistoryError> {
        Ok(self
            .entries
            .lock()
            .expect("history store poisoned")
            .iter()
            .filter(|e| e.username == username)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn metrics(verification_time: u64, proof_size: u64) -> ProofMetrics {
        ProofMetrics {
            generation_time: 0,
            verification_time,
            proof_size,
            public_inputs_count: 1,
            circuit_constraints: None,
        }
    }

    fn entry_at(username: &str, days_ago: i64, success: bool) -> LoginEntry {
        let new = if success {
            NewLoginEntry::success(username, metrics(10, 700))
        } else {
            NewLoginEntry::failure(username, "Proof verification failed")
        };
        new.into_entry(Utc::now() - Duration::days(days_ago))
    }

    #[test]
    fn empty_history_has_zeroed_stats() {
        let stats = compute_stats(&[]);
        assert_eq!(stats, LoginHistoryStats::default());
        assert_eq!(stats.success_rate, 0.0);
        assert_eq!(stats.first_login, "");
        assert_eq!(stats.last_login, "");
    }

    #[test]
    fn success_rate_and_averages() {
        let mut entries = vec![
            NewLoginEntry::success("alice", metrics(10, 700)).into_entry(Utc::now()),
            NewLoginEntry::success("alice", metrics(15, 701)).into_entry(Utc::now()),
            NewLoginEntry::failure("alice", "nope").into_entry(Utc::now()),
        ];
        // successful entry without metrics does not count towards the averages
        entries.push(NewLoginEntry {
            username: "alice".into(),
            success: true,
            ..NewLoginEntry::default()
        }
        .into_entry(Utc::now()));

        let stats = compute_stats(&entries);
        assert_eq!(stats.total_logins, 4);
        assert_eq!(stats.successful_logins, 3);
        assert_eq!(stats.failed_logins, 1);
        assert!((stats.success_rate - 75.0).abs() < f64::EPSILON);
        assert_eq!(stats.average_verification_time, 13);
        assert_eq!(stats.average_proof_size, 701);
        assert_eq!(stats.average_generation_time, 0);
        assert!(!stats.first_login.is_empty());
        assert!(stats.first_login <= stats.last_login);
    }

    #[test]
    fn metrics_window_is_oldest_first_and_successful_only() {
        let entries = vec![
            entry_at("bob", 1, true),
            entry_at("bob", 10, true),
            entry_at("bob", 3, true),
            entry_at("bob", 2, false),
            NewLoginEntry {
                username: "bob".into(),
                success: true,
                ..NewLoginEntry::default()
            }
            .into_entry(Utc::now()),
        ];
        let cutoff = Utc::now() - Duration::days(7);
        let selected = select_metrics(entries, cutoff);
        assert_eq!(selected.len(), 2);
        assert!(selected[0].timestamp < selected[1].timestamp);
        assert!(selected.iter().all(|e| e.success && e.metrics.is_some()));
    }

    #[test]
    fn retention_only_trims_written_user() {
        let mut entries: Vec<LoginEntry> = (0..5).map(|_| entry_at("carol", 0, true)).collect();
        entries.insert(2, entry_at("dave", 0, false));
        let oldest_carol = entries[0].id.clone();

        apply_retention(&mut entries, "carol", 4);
        assert_eq!(entries.iter().filter(|e| e.username == "carol").count(), 4);
        assert_eq!(entries.iter().filter(|e| e.username == "dave").count(), 1);
        assert!(entries.iter().all(|e| e.id != oldest_carol));
    }

    #[test]
    fn entry_ids_are_prefixed_and_unique() {
        let a = NewLoginEntry::failure("x", "y").into_entry(Utc::now());
        let b = NewLoginEntry::failure("x", "y").into_entry(Utc::now());
        assert!(a.id.starts_with("login_"));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn entry_serializes_camel_case() {
        let entry = NewLoginEntry::success("erin", metrics(3, 4))
            .with_client(Some("127.0.0.1".into()), None)
            .into_entry(Utc::now());
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["ipAddress"], "127.0.0.1");
        assert!(value.get("userAgent").is_none());
        assert_eq!(value["metrics"]["verificationTime"], 3);
        assert_eq!(value["metrics"]["publicInputsCount"], 1);
    }

    #[tokio::test]
    async fn in_memory_caps_at_retention_limit() {
        let store = InMemoryHistory::new();
        store
            .append(NewLoginEntry::failure("other", "x"))
            .await
            .unwrap();
        for _ in 0..RETENTION_PER_USER + 1 {
            store
                .append(NewLoginEntry::failure("frank", "x"))
                .await
                .unwrap();
        }
        assert_eq!(
            store.entries_for("frank").await.unwrap().len(),
            RETENTION_PER_USER
        );
        assert_eq!(store.entries_for("other").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn huge_metrics_window_covers_everything() {
        let store = InMemoryHistory::from_entries(vec![
            entry_at("gina", 400, true),
            entry_at("gina", 1, true),
        ]);
        let all = store.metrics_for_user("gina", u32::MAX).await.unwrap();
        assert_eq!(all.len(), 2);
        let wide = store.metrics_for_user("gina", 100_000_000).await.unwrap();
        assert_eq!(wide.len(), 2);
        assert_eq!(store.metrics_for_user("gina", 30).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn read_for_user_is_newest_first_and_limited() {
        let store = InMemoryHistory::from_entries(vec![
            entry_at("gina", 3, true),
            entry_at("gina", 1, true),
            entry_at("gina", 2, false),
            entry_at("hank", 0, true),
        ]);
        let entries = store.read_for_user("gina", 2).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].timestamp > entries[1].timestamp);
        assert!(entries.iter().all(|e| e.username == "gina"));
    }

    #[tokio::test]
    async fn file_store_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileHistory::new(dir.path().join("nested/history.json"));
        assert!(store.entries_for("ivy").await.unwrap().is_empty());
        assert_eq!(
            store.stats_for_user("ivy").await.unwrap(),
            LoginHistoryStats::default()
        );

        store
            .append(NewLoginEntry::failure("ivy", "x"))
            .await
            .unwrap();
        assert!(store.path().exists());
        assert!(!store.tmp_path().exists());
    }

    #[tokio::test]
    async fn file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        std::fs::write(&path, b"{not json").unwrap();
        let store = JsonFileHistory::new(&path);

        let err = store.entries_for("jack").await.unwrap_err();
        assert!(matches!(err, HistoryError::Corrupt { .. }));
        assert!(store
            .append(NewLoginEntry::failure("jack", "x"))
            .await
            .is_err());
        assert_eq!(std::fs::read(&path).unwrap(), b"{not json");
    }

    #[tokio::test]
    async fn file_store_retention_keeps_other_users() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileHistory::with_retention(dir.path().join("h.json"), 3);
        store
            .append(NewLoginEntry::failure("kim", "x"))
            .await
            .unwrap();
        for _ in 0..5 {
            store
                .append(NewLoginEntry::failure("lee", "x"))
                .await
                .unwrap();
        }
        assert_eq!(store.entries_for("lee").await.unwrap().len(), 3);
        assert_eq!(store.entries_for("kim").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_appends_are_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonFileHistory::new(dir.path().join("h.json")));
        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    store
                        .append(NewLoginEntry::failure("mia", format!("attempt {i}")))
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(store.entries_for("mia").await.unwrap().len(), 16);
    }
}
