use stashpack_core::{ArchiveCodec, BundleArtifact, Error, Result, StashLocation};
use stashpack_transports::{DefaultTransportFactory, RetryPolicy, TransportFactory};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Coordinator configuration.
///
/// `locations` is an ordered priority list. Fallback to lower-priority
/// locations is disabled by default: silently landing a backup on an
/// unintended fallback can mask a primary outage, so it must be enabled
/// explicitly.
pub struct StashConfig {
    pub locations: Vec<StashLocation>,
    pub enable_fallback: bool,
    pub retry: RetryPolicy,
    /// Scratch space for bundle artifacts, restore downloads, and git
    /// working copies.
    pub work_dir: PathBuf,
}

impl StashConfig {
    pub fn new(locations: Vec<StashLocation>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            locations,
            enable_fallback: false,
            retry: RetryPolicy::default(),
            work_dir: work_dir.into(),
        }
    }

    pub fn with_fallback(mut self) -> Self {
        self.enable_fallback = true;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Progress through one backup or restore call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Bundling,
    Transferring,
    Committed,
    Failed,
}

/// Report of a successful backup: which location took the bundle and
/// where it landed.
#[derive(Debug, Clone)]
pub struct BackupReport {
    pub location: String,
    pub remote_locator: String,
}

/// Outcome of a restore call. An absent remote bundle is a valid
/// "nothing to restore" result, distinct from a failed restore.
#[derive(Debug, Clone)]
pub enum RestoreOutcome {
    Restored {
        location: String,
        remote_locator: String,
    },
    NothingToRestore,
}

/// Orchestrates backup (bundle, then retried transfer) and restore
/// (retried fetch, then unbundle) against an ordered list of stash
/// locations.
///
/// Operations are sequential within one coordinator. Independent
/// coordinators may run in parallel as long as each uses a distinct
/// remote prefix; two writers sharing a prefix are not protected against
/// interleaving at this layer.
pub struct StashCoordinator {
    config: StashConfig,
    codec: ArchiveCodec,
    factory: Box<dyn TransportFactory>,
}

impl StashCoordinator {
    pub fn new(config: StashConfig) -> Self {
        let codec = ArchiveCodec::new(config.work_dir.join("bundles"));
        let factory = Box::new(DefaultTransportFactory::new(config.work_dir.join("clones")));
        Self {
            config,
            codec,
            factory,
        }
    }

    /// Substitutes the transport factory, mainly for tests that script
    /// transport behavior.
    pub fn with_factory(config: StashConfig, factory: Box<dyn TransportFactory>) -> Self {
        let codec = ArchiveCodec::new(config.work_dir.join("bundles"));
        Self {
            config,
            codec,
            factory,
        }
    }

    fn candidates(&self) -> Result<&[StashLocation]> {
        if self.config.locations.is_empty() {
            return Err(Error::Other("no stash locations configured".to_string()));
        }
        if self.config.enable_fallback {
            Ok(&self.config.locations)
        } else {
            Ok(&self.config.locations[..1])
        }
    }

    fn remote_name(location: &StashLocation, bundle_name: &str) -> String {
        format!("{}/{}.tar.gz", location.remote_prefix, bundle_name)
    }

    /// Archives `source_dir` and transfers the bundle to the first
    /// location that accepts it, in priority order. The source directory
    /// is never modified; the transient archive is removed on every exit
    /// path. A failed backup is always surfaced, never swallowed.
    pub async fn backup(&self, source_dir: &Path, bundle_name: &str) -> Result<BackupReport> {
        let started = Instant::now();
        debug!(phase = ?Phase::Bundling, bundle = bundle_name, "Backup starting");
        let artifact = self.codec.bundle(source_dir, bundle_name).await?;

        debug!(phase = ?Phase::Transferring, bundle = bundle_name, "Bundle ready");
        let outcome = self.transfer_out(&artifact, bundle_name).await;
        // The transfer outcome always wins over a cleanup hiccup.
        if let Err(e) = artifact.cleanup().await {
            warn!(bundle = bundle_name, error = %e, "Could not remove transient archive");
        }

        match outcome {
            Ok(report) => {
                info!(
                    phase = ?Phase::Committed,
                    bundle = bundle_name,
                    location = %report.location,
                    elapsed_ms = started.elapsed().as_millis(),
                    "Backup committed"
                );
                Ok(report)
            }
            Err(e) => {
                warn!(
                    phase = ?Phase::Failed,
                    bundle = bundle_name,
                    error = %e,
                    elapsed_ms = started.elapsed().as_millis(),
                    "Backup failed"
                );
                Err(e)
            }
        }
    }

    async fn transfer_out(
        &self,
        artifact: &BundleArtifact,
        bundle_name: &str,
    ) -> Result<BackupReport> {
        let mut last_error = None;
        for location in self.candidates()? {
            let remote_name = Self::remote_name(location, bundle_name);
            let transport = match self.factory.open(location) {
                Ok(transport) => transport,
                Err(e) => {
                    warn!(location = %location.describe(), error = %e, "Cannot open transport");
                    last_error = Some(e);
                    continue;
                }
            };
            let attempt = self
                .config
                .retry
                .execute("put", || transport.put(&artifact.archive_path, &remote_name))
                .await;
            match attempt {
                Ok(result) => {
                    return Ok(BackupReport {
                        location: location.describe(),
                        remote_locator: result.remote_locator,
                    });
                }
                Err(e) => {
                    warn!(
                        location = %location.describe(),
                        error = %e,
                        "Transfer failed at this location"
                    );
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.expect("at least one candidate location"))
    }

    /// Fetches the named bundle from the first location that has it and
    /// unpacks it into `dest_dir`, overwriting existing files. Returns
    /// `NothingToRestore` when no configured location holds a bundle, so
    /// callers can tell "no prior backup" from "restore failed".
    pub async fn restore(&self, bundle_name: &str, dest_dir: &Path) -> Result<RestoreOutcome> {
        let started = Instant::now();
        let archive_path = self
            .config
            .work_dir
            .join("restore")
            .join(format!("{}.tar.gz", bundle_name));

        debug!(phase = ?Phase::Transferring, bundle = bundle_name, "Restore starting");
        // A location answering NotFound and one failing outright must stay
        // distinguishable: only an all-absent sweep is "nothing to restore".
        let mut last_failure = None;
        let mut fetched = None;
        for location in self.candidates()? {
            let remote_name = Self::remote_name(location, bundle_name);
            let transport = match self.factory.open(location) {
                Ok(transport) => transport,
                Err(e) => {
                    warn!(location = %location.describe(), error = %e, "Cannot open transport");
                    last_failure = Some(e);
                    continue;
                }
            };
            let attempt = self
                .config
                .retry
                .execute("get", || transport.get(&remote_name, &archive_path))
                .await;
            match attempt {
                Ok(result) => {
                    fetched = Some((location.describe(), result.remote_locator));
                    break;
                }
                Err(e) if e.is_not_found() => {
                    debug!(location = %location.describe(), "No bundle at this location");
                }
                Err(e) => {
                    warn!(
                        location = %location.describe(),
                        error = %e,
                        "Fetch failed at this location"
                    );
                    last_failure = Some(e);
                }
            }
        }

        let Some((location, remote_locator)) = fetched else {
            if let Some(error) = last_failure {
                warn!(phase = ?Phase::Failed, bundle = bundle_name, error = %error, "Restore failed");
                return Err(error);
            }
            info!(bundle = bundle_name, "Nothing to restore");
            return Ok(RestoreOutcome::NothingToRestore);
        };

        debug!(phase = ?Phase::Bundling, bundle = bundle_name, "Unpacking fetched bundle");
        let unpack = self.codec.unbundle(&archive_path, dest_dir).await;
        let _ = tokio::fs::remove_file(&archive_path).await;
        unpack?;

        info!(
            phase = ?Phase::Committed,
            bundle = bundle_name,
            location = %location,
            elapsed_ms = started.elapsed().as_millis(),
            "Restore committed"
        );
        Ok(RestoreOutcome::Restored {
            location,
            remote_locator,
        })
    }

    /// Probes the candidate locations for the named bundle. A confident
    /// `false` requires every candidate to have answered; if any probe
    /// failed and none answered `true`, the failure is surfaced rather
    /// than passed off as absence.
    pub async fn exists(&self, bundle_name: &str) -> Result<bool> {
        let mut last_failure = None;
        for location in self.candidates()? {
            let remote_name = Self::remote_name(location, bundle_name);
            let transport = self.factory.open(location)?;
            match self
                .config
                .retry
                .execute("exists", || transport.exists(&remote_name))
                .await
            {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                Err(e) => {
                    warn!(location = %location.describe(), error = %e, "Probe failed");
                    last_failure = Some(e);
                }
            }
        }
        match last_failure {
            Some(e) => Err(e),
            None => Ok(false),
        }
    }

    /// Best-effort delete of the named bundle from every candidate
    /// location. Returns whether any object was actually removed.
    pub async fn remove(&self, bundle_name: &str) -> Result<bool> {
        let mut removed = false;
        for location in self.candidates()? {
            let remote_name = Self::remote_name(location, bundle_name);
            let transport = self.factory.open(location)?;
            removed |= self
                .config
                .retry
                .execute("remove", || transport.remove(&remote_name))
                .await?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use stashpack_core::{Protocol, TransferResult};
    use stashpack_transports::{LocalTransport, Transport};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;
    use tokio::fs;

    /// Always fails with a transient transport error, counting attempts.
    struct DownTransport {
        attempts: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Transport for DownTransport {
        async fn put(&self, _local_path: &Path, _remote_name: &str) -> Result<TransferResult> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(Error::Transport("host unreachable".to_string()))
        }
        async fn get(&self, _remote_name: &str, _local_path: &Path) -> Result<TransferResult> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(Error::Transport("host unreachable".to_string()))
        }
        async fn exists(&self, _remote_name: &str) -> Result<bool> {
            Err(Error::Transport("host unreachable".to_string()))
        }
        async fn remove(&self, _remote_name: &str) -> Result<bool> {
            Err(Error::Transport("host unreachable".to_string()))
        }
        fn protocol(&self) -> Protocol {
            Protocol::Sftp
        }
    }

    /// Fails transiently until `failures` attempts have been consumed,
    /// then delegates to a local store.
    struct FlakyTransport {
        inner: LocalTransport,
        failures: u32,
        attempts: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Transport for FlakyTransport {
        async fn put(&self, local_path: &Path, remote_name: &str) -> Result<TransferResult> {
            if self.attempts.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(Error::Transport("connection reset".to_string()));
            }
            self.inner.put(local_path, remote_name).await
        }
        async fn get(&self, remote_name: &str, local_path: &Path) -> Result<TransferResult> {
            self.inner.get(remote_name, local_path).await
        }
        async fn exists(&self, remote_name: &str) -> Result<bool> {
            self.inner.exists(remote_name).await
        }
        async fn remove(&self, remote_name: &str) -> Result<bool> {
            self.inner.remove(remote_name).await
        }
        fn protocol(&self) -> Protocol {
            Protocol::Https
        }
    }

    /// Stores the bundle, then replaces the local artifact with a
    /// non-empty directory so the later cleanup cannot remove it.
    struct ClobberingTransport {
        inner: LocalTransport,
    }

    #[async_trait]
    impl Transport for ClobberingTransport {
        async fn put(&self, local_path: &Path, remote_name: &str) -> Result<TransferResult> {
            let result = self.inner.put(local_path, remote_name).await?;
            fs::remove_file(local_path).await?;
            fs::create_dir_all(local_path.join("pin")).await?;
            Ok(result)
        }
        async fn get(&self, remote_name: &str, local_path: &Path) -> Result<TransferResult> {
            self.inner.get(remote_name, local_path).await
        }
        async fn exists(&self, remote_name: &str) -> Result<bool> {
            self.inner.exists(remote_name).await
        }
        async fn remove(&self, remote_name: &str) -> Result<bool> {
            self.inner.remove(remote_name).await
        }
        fn protocol(&self) -> Protocol {
            Protocol::Local
        }
    }

    /// Routes "down:" locations to a DownTransport, "clobber:" locations
    /// to a ClobberingTransport, and everything else to the local
    /// filesystem.
    struct ScriptedFactory {
        down_attempts: Arc<AtomicU32>,
        flaky_attempts: Arc<AtomicU32>,
        flaky_failures: u32,
    }

    impl ScriptedFactory {
        fn new() -> Self {
            Self {
                down_attempts: Arc::new(AtomicU32::new(0)),
                flaky_attempts: Arc::new(AtomicU32::new(0)),
                flaky_failures: 0,
            }
        }
    }

    impl TransportFactory for ScriptedFactory {
        fn open(&self, location: &StashLocation) -> Result<Box<dyn Transport>> {
            if location.base_path.starts_with("down:") {
                Ok(Box::new(DownTransport {
                    attempts: self.down_attempts.clone(),
                }))
            } else if let Some(path) = location.base_path.strip_prefix("clobber:") {
                Ok(Box::new(ClobberingTransport {
                    inner: LocalTransport::new(path),
                }))
            } else if self.flaky_failures > 0 {
                Ok(Box::new(FlakyTransport {
                    inner: LocalTransport::new(&location.base_path),
                    failures: self.flaky_failures,
                    attempts: self.flaky_attempts.clone(),
                }))
            } else {
                Ok(Box::new(LocalTransport::new(&location.base_path)))
            }
        }
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: std::time::Duration::from_millis(1),
            max_backoff: std::time::Duration::from_millis(5),
            backoff_multiplier: 2.0,
            jitter: false,
            per_attempt_timeout: None,
        }
    }

    async fn write_tree(root: &Path) {
        fs::create_dir_all(root.join("nested")).await.unwrap();
        fs::write(root.join("a.txt"), b"alpha").await.unwrap();
        fs::write(root.join("nested/b.txt"), b"beta").await.unwrap();
    }

    fn local_config(tmp: &TempDir, store: &str) -> StashConfig {
        let location = StashLocation::local(
            tmp.path().join(store).display().to_string(),
            "A",
        );
        StashConfig::new(vec![location], tmp.path().join("work"))
            .with_retry(fast_retry(3))
    }

    #[tokio::test]
    async fn backup_then_restore_round_trip() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("source");
        write_tree(&source).await;

        let coordinator = StashCoordinator::new(local_config(&tmp, "store"));
        let report = coordinator.backup(&source, "dataset").await.unwrap();
        assert!(report.remote_locator.ends_with("A/dataset.tar.gz"));
        assert!(coordinator.exists("dataset").await.unwrap());

        let dest = tmp.path().join("restored");
        let outcome = coordinator.restore("dataset", &dest).await.unwrap();
        assert!(matches!(outcome, RestoreOutcome::Restored { .. }));
        assert_eq!(fs::read(dest.join("a.txt")).await.unwrap(), b"alpha");
        assert_eq!(fs::read(dest.join("nested/b.txt")).await.unwrap(), b"beta");
    }

    #[tokio::test]
    async fn transient_archive_is_cleaned_up_after_backup() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("source");
        write_tree(&source).await;

        let coordinator = StashCoordinator::new(local_config(&tmp, "store"));
        coordinator.backup(&source, "dataset").await.unwrap();
        assert!(
            !tmp.path()
                .join("work/bundles/dataset.tar.gz")
                .exists()
        );
    }

    #[tokio::test]
    async fn restore_without_prior_backup_is_nothing_to_restore() {
        let tmp = TempDir::new().unwrap();
        let coordinator = StashCoordinator::new(local_config(&tmp, "store"));
        assert!(!coordinator.exists("dataset").await.unwrap());
        let outcome = coordinator
            .restore("dataset", &tmp.path().join("restored"))
            .await
            .unwrap();
        assert!(matches!(outcome, RestoreOutcome::NothingToRestore));
    }

    #[tokio::test]
    async fn fallback_disabled_fails_without_touching_secondary() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("source");
        write_tree(&source).await;

        let secondary_store = tmp.path().join("secondary");
        let locations = vec![
            StashLocation::local("down:primary", "A"),
            StashLocation::local(secondary_store.display().to_string(), "A"),
        ];
        let config = StashConfig::new(locations, tmp.path().join("work"))
            .with_retry(fast_retry(2));
        let factory = ScriptedFactory::new();
        let coordinator = StashCoordinator::with_factory(config, Box::new(factory));

        let err = coordinator.backup(&source, "dataset").await.unwrap_err();
        assert!(matches!(err, Error::TransferExhausted { attempts: 2, .. }));
        assert!(!secondary_store.exists());
    }

    #[tokio::test]
    async fn fallback_enabled_records_secondary_success() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("source");
        write_tree(&source).await;

        let secondary_store = tmp.path().join("secondary");
        let locations = vec![
            StashLocation::local("down:primary", "A"),
            StashLocation::local(secondary_store.display().to_string(), "A"),
        ];
        let config = StashConfig::new(locations, tmp.path().join("work"))
            .with_fallback()
            .with_retry(fast_retry(2));
        let factory = ScriptedFactory::new();
        let down_attempts = factory.down_attempts.clone();
        let coordinator = StashCoordinator::with_factory(config, Box::new(factory));

        let report = coordinator.backup(&source, "dataset").await.unwrap();
        assert!(report.location.contains("secondary"));
        assert_eq!(down_attempts.load(Ordering::SeqCst), 2);
        assert!(secondary_store.join("A/dataset.tar.gz").exists());
    }

    #[tokio::test]
    async fn restore_reports_failure_when_primary_is_unreachable() {
        let tmp = TempDir::new().unwrap();
        let locations = vec![
            StashLocation::local("down:primary", "A"),
            StashLocation::local(tmp.path().join("secondary").display().to_string(), "A"),
        ];
        let config = StashConfig::new(locations, tmp.path().join("work"))
            .with_fallback()
            .with_retry(fast_retry(2));
        let coordinator =
            StashCoordinator::with_factory(config, Box::new(ScriptedFactory::new()));

        // The secondary is merely empty; the unreachable primary must not
        // be reported as "nothing to restore".
        let err = coordinator
            .restore("dataset", &tmp.path().join("restored"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TransferExhausted { .. }));
    }

    #[tokio::test]
    async fn exists_reports_failure_when_primary_is_unreachable() {
        let tmp = TempDir::new().unwrap();
        let locations = vec![
            StashLocation::local("down:primary", "A"),
            StashLocation::local(tmp.path().join("secondary").display().to_string(), "A"),
        ];
        let config = StashConfig::new(locations, tmp.path().join("work"))
            .with_fallback()
            .with_retry(fast_retry(2));
        let coordinator =
            StashCoordinator::with_factory(config, Box::new(ScriptedFactory::new()));

        let err = coordinator.exists("dataset").await.unwrap_err();
        assert!(matches!(err, Error::TransferExhausted { .. }));
    }

    #[tokio::test]
    async fn stuck_transient_archive_does_not_fail_the_backup() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("source");
        write_tree(&source).await;

        let store = tmp.path().join("store");
        let config = StashConfig::new(
            vec![StashLocation::local(
                format!("clobber:{}", store.display()),
                "A",
            )],
            tmp.path().join("work"),
        )
        .with_retry(fast_retry(2));
        let coordinator =
            StashCoordinator::with_factory(config, Box::new(ScriptedFactory::new()));

        let report = coordinator.backup(&source, "dataset").await.unwrap();
        assert!(report.remote_locator.ends_with("A/dataset.tar.gz"));
        assert!(store.join("A/dataset.tar.gz").exists());
    }

    #[tokio::test]
    async fn transient_failures_are_retried_to_success() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("source");
        write_tree(&source).await;

        let store = tmp.path().join("store");
        let config = StashConfig::new(
            vec![StashLocation::local(store.display().to_string(), "A")],
            tmp.path().join("work"),
        )
        .with_retry(fast_retry(5));
        let mut factory = ScriptedFactory::new();
        factory.flaky_failures = 2;
        let attempts = factory.flaky_attempts.clone();
        let coordinator = StashCoordinator::with_factory(config, Box::new(factory));

        coordinator.backup(&source, "dataset").await.unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(store.join("A/dataset.tar.gz").exists());
    }

    #[tokio::test]
    async fn failed_backup_leaves_source_untouched() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("source");
        write_tree(&source).await;

        let config = StashConfig::new(
            vec![StashLocation::local("down:primary", "A")],
            tmp.path().join("work"),
        )
        .with_retry(fast_retry(2));
        let coordinator =
            StashCoordinator::with_factory(config, Box::new(ScriptedFactory::new()));

        coordinator.backup(&source, "dataset").await.unwrap_err();
        assert_eq!(fs::read(source.join("a.txt")).await.unwrap(), b"alpha");
        assert_eq!(
            fs::read(source.join("nested/b.txt")).await.unwrap(),
            b"beta"
        );
        assert!(
            !tmp.path()
                .join("work/bundles/dataset.tar.gz")
                .exists()
        );
    }

    #[tokio::test]
    async fn remove_deletes_the_stashed_bundle() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("source");
        write_tree(&source).await;

        let coordinator = StashCoordinator::new(local_config(&tmp, "store"));
        coordinator.backup(&source, "dataset").await.unwrap();
        assert!(coordinator.remove("dataset").await.unwrap());
        assert!(!coordinator.exists("dataset").await.unwrap());
        assert!(!coordinator.remove("dataset").await.unwrap());
    }

    #[tokio::test]
    async fn prefixes_do_not_collide_under_one_base() {
        let tmp = TempDir::new().unwrap();
        let source_a = tmp.path().join("source_a");
        let source_b = tmp.path().join("source_b");
        write_tree(&source_a).await;
        fs::create_dir_all(&source_b).await.unwrap();
        fs::write(source_b.join("other.txt"), b"other").await.unwrap();

        let store = tmp.path().join("store").display().to_string();
        let coord_a = StashCoordinator::new(
            StashConfig::new(
                vec![StashLocation::local(store.clone(), "A")],
                tmp.path().join("work_a"),
            )
            .with_retry(fast_retry(2)),
        );
        let coord_b = StashCoordinator::new(
            StashConfig::new(
                vec![StashLocation::local(store.clone(), "B")],
                tmp.path().join("work_b"),
            )
            .with_retry(fast_retry(2)),
        );

        coord_a.backup(&source_a, "dataset").await.unwrap();
        assert!(!coord_b.exists("dataset").await.unwrap());

        coord_b.backup(&source_b, "dataset").await.unwrap();
        let dest = tmp.path().join("restored_a");
        coord_a.restore("dataset", &dest).await.unwrap();
        assert!(dest.join("a.txt").exists());
        assert!(!dest.join("other.txt").exists());
    }
}
