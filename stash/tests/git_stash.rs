use stashpack_core::{Credentials, Error, Protocol, StashLocation};
use stashpack_stash::{RestoreOutcome, StashConfig, StashCoordinator};
use stashpack_transports::RetryPolicy;
use std::path::Path;
use std::process::Command;
use std::time::Duration;
use tempfile::TempDir;

fn git(args: &[&str], cwd: &Path) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .output()
        .expect("git invocation");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Creates a bare remote with one seed commit on `main` and returns its
/// path. Seeding avoids the empty-repository special cases so clone and
/// pull behave the same on every git version.
fn seed_remote(tmp: &TempDir) -> (std::path::PathBuf, std::path::PathBuf) {
    let bare = tmp.path().join("remote.git");
    let seed = tmp.path().join("seed");
    std::fs::create_dir_all(&bare).unwrap();
    std::fs::create_dir_all(&seed).unwrap();

    git(&["init", "--bare", "."], &bare);
    git(&["init", "."], &seed);
    git(&["checkout", "-b", "main"], &seed);
    std::fs::write(seed.join("README"), "stash store\n").unwrap();
    git(&["add", "-A"], &seed);
    git(
        &[
            "-c",
            "user.name=seed",
            "-c",
            "user.email=seed@localhost",
            "commit",
            "-m",
            "seed",
        ],
        &seed,
    );
    git(
        &["remote", "add", "origin", bare.to_str().unwrap()],
        &seed,
    );
    git(&["push", "origin", "main"], &seed);
    (bare, seed)
}

fn git_location(bare: &Path) -> StashLocation {
    StashLocation {
        protocol: Protocol::Git,
        host: None,
        port: None,
        base_path: bare.display().to_string(),
        branch: Some("main".to_string()),
        remote_prefix: "A".to_string(),
        credentials: Credentials::default(),
    }
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 2,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
        backoff_multiplier: 2.0,
        jitter: false,
        per_attempt_timeout: None,
    }
}

#[tokio::test]
async fn sequential_git_backups_stack_commits_and_restore_sees_the_latest() {
    if !git_available() {
        eprintln!("git not available, skipping");
        return;
    }
    let tmp = TempDir::new().unwrap();
    let (bare, _seed) = seed_remote(&tmp);

    let source = tmp.path().join("source");
    std::fs::create_dir_all(&source).unwrap();
    std::fs::write(source.join("data.txt"), "first revision").unwrap();

    let coordinator = StashCoordinator::new(
        StashConfig::new(vec![git_location(&bare)], tmp.path().join("work"))
            .with_retry(fast_retry()),
    );

    coordinator.backup(&source, "dataset").await.unwrap();
    std::fs::write(source.join("data.txt"), "second revision").unwrap();
    coordinator.backup(&source, "dataset").await.unwrap();

    let count = git(&["rev-list", "--count", "main"], &bare);
    assert_eq!(count.trim(), "3", "seed commit plus one commit per backup");

    // A second coordinator with its own scratch space clones fresh and
    // must see the content of the latest commit.
    let other = StashCoordinator::new(
        StashConfig::new(vec![git_location(&bare)], tmp.path().join("work2"))
            .with_retry(fast_retry()),
    );
    let dest = tmp.path().join("restored");
    let outcome = other.restore("dataset", &dest).await.unwrap();
    assert!(matches!(outcome, RestoreOutcome::Restored { .. }));
    assert_eq!(
        std::fs::read_to_string(dest.join("data.txt")).unwrap(),
        "second revision"
    );
}

#[tokio::test]
async fn git_exists_and_remove_follow_blob_semantics() {
    if !git_available() {
        eprintln!("git not available, skipping");
        return;
    }
    let tmp = TempDir::new().unwrap();
    let (bare, _seed) = seed_remote(&tmp);

    let source = tmp.path().join("source");
    std::fs::create_dir_all(&source).unwrap();
    std::fs::write(source.join("data.txt"), "payload").unwrap();

    let coordinator = StashCoordinator::new(
        StashConfig::new(vec![git_location(&bare)], tmp.path().join("work"))
            .with_retry(fast_retry()),
    );

    assert!(!coordinator.exists("dataset").await.unwrap());
    coordinator.backup(&source, "dataset").await.unwrap();
    assert!(coordinator.exists("dataset").await.unwrap());

    assert!(coordinator.remove("dataset").await.unwrap());
    assert!(!coordinator.exists("dataset").await.unwrap());
    assert!(!coordinator.remove("dataset").await.unwrap());

    let outcome = coordinator
        .restore("dataset", &tmp.path().join("restored"))
        .await
        .unwrap();
    assert!(matches!(outcome, RestoreOutcome::NothingToRestore));
}

#[tokio::test]
async fn force_pushed_remote_surfaces_diverged_history() {
    if !git_available() {
        eprintln!("git not available, skipping");
        return;
    }
    let tmp = TempDir::new().unwrap();
    let (bare, seed) = seed_remote(&tmp);

    let source = tmp.path().join("source");
    std::fs::create_dir_all(&source).unwrap();
    std::fs::write(source.join("data.txt"), "payload").unwrap();

    let coordinator = StashCoordinator::new(
        StashConfig::new(vec![git_location(&bare)], tmp.path().join("work"))
            .with_retry(fast_retry()),
    );
    coordinator.backup(&source, "dataset").await.unwrap();

    // Rewrite the remote's history out from under the cached clone.
    git(
        &[
            "-c",
            "user.name=seed",
            "-c",
            "user.email=seed@localhost",
            "commit",
            "--amend",
            "--allow-empty",
            "-m",
            "rewritten",
        ],
        &seed,
    );
    git(&["push", "--force", "origin", "main"], &seed);

    let err = coordinator.backup(&source, "dataset").await.unwrap_err();
    assert!(
        matches!(err, Error::DivergedHistory { .. }),
        "expected DivergedHistory, got {:?}",
        err
    );
}
