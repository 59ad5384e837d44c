use crate::transport::Transport;
use async_trait::async_trait;
use chrono::Utc;
use stashpack_core::{Error, Protocol, Result, TransferResult};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Transport that treats the remote as a git working copy instead of a
/// blob store. `put` copies into a persistent local clone, stages,
/// commits with a timestamped message, and pushes; `get` fast-forwards
/// the clone and copies out.
///
/// The clone directory is dedicated to one remote prefix and reused for
/// the life of the process, so repeated stash calls skip the clone cost.
/// A non-fast-forward remote is a fatal `DivergedHistory` condition:
/// retrying cannot help and no automatic merge is attempted. A failed
/// push leaves the local commit in place so a later backup can retry the
/// push without re-bundling.
pub struct GitTransport {
    clone_dir: PathBuf,
    remote_url: String,
    branch: Option<String>,
    token: Option<String>,
}

impl GitTransport {
    pub fn new(
        clone_dir: impl Into<PathBuf>,
        remote_url: impl Into<String>,
        branch: Option<String>,
        token: Option<String>,
    ) -> Self {
        Self {
            clone_dir: clone_dir.into(),
            remote_url: remote_url.into(),
            branch,
            token,
        }
    }

    pub fn clone_dir(&self) -> &Path {
        &self.clone_dir
    }

    /// Clone URL with the access token spliced into the authority, the
    /// way hosted git services accept personal access tokens.
    fn authenticated_url(&self) -> String {
        match (&self.token, self.remote_url.strip_prefix("https://")) {
            (Some(token), Some(rest)) => format!("https://{}@{}", token, rest),
            _ => self.remote_url.clone(),
        }
    }

    async fn run_git(&self, args: &[&str], cwd: Option<&Path>) -> Result<std::process::Output> {
        let mut command = Command::new("git");
        command.args(args).stdout(Stdio::piped()).stderr(Stdio::piped());
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }
        command
            .output()
            .await
            .map_err(|e| Error::Transport(format!("failed to run git: {}", e)))
    }

    /// Runs git and classifies a non-zero exit against the remote.
    async fn git_checked(&self, args: &[&str], cwd: Option<&Path>) -> Result<String> {
        let output = self.run_git(args, cwd).await?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            debug!(args = ?args, stderr = %stderr, "git command failed");
            Err(classify_git(&stderr, &self.remote_url))
        }
    }

    /// Clones on first use, then fast-forwards the working copy so a
    /// stale clone never serves a restore. A freshly initialized remote
    /// with no commits yet is tolerated.
    async fn ensure_ready(&self) -> Result<()> {
        if !self.clone_dir.join(".git").exists() {
            if let Some(parent) = self.clone_dir.parent() {
                fs::create_dir_all(parent).await?;
            }
            let url = self.authenticated_url();
            let dir = self.clone_dir.display().to_string();
            let mut args = vec!["clone"];
            if let Some(branch) = &self.branch {
                args.push("--branch");
                args.push(branch.as_str());
            }
            args.push(url.as_str());
            args.push(dir.as_str());
            self.git_checked(&args, None).await?;
            info!(clone = %self.clone_dir.display(), "Cloned git stash");
            return Ok(());
        }

        let mut args = vec!["pull", "--ff-only", "origin"];
        if let Some(branch) = &self.branch {
            args.push(branch.as_str());
        }
        match self.git_checked(&args, Some(&self.clone_dir)).await {
            Ok(_) => Ok(()),
            // An unborn remote branch has nothing to pull yet.
            Err(Error::Transport(msg)) if msg.contains("couldn't find remote ref") => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn commit_and_push(&self, message: &str) -> Result<()> {
        let cwd = Some(self.clone_dir.as_path());
        self.git_checked(&["add", "-A"], cwd).await?;

        let staged = self.git_checked(&["status", "--porcelain"], cwd).await?;
        if staged.trim().is_empty() {
            // Nothing new to record, e.g. a retried backup whose commit
            // already exists locally. Go straight to push.
            debug!("Working tree clean, skipping commit");
        } else {
            self.git_checked(
                &[
                    "-c",
                    "user.name=stashpack",
                    "-c",
                    "user.email=stashpack@localhost",
                    "commit",
                    "-m",
                    message,
                ],
                cwd,
            )
            .await?;
        }

        let push_ref = self.branch.as_deref().unwrap_or("HEAD");
        if let Err(e) = self.git_checked(&["push", "origin", push_ref], cwd).await {
            warn!(error = %e, "git push failed; local commit retained for a later retry");
            return Err(e);
        }
        Ok(())
    }
}

fn classify_git(stderr: &str, remote: &str) -> Error {
    let lower = stderr.to_lowercase();
    if lower.contains("authentication failed")
        || lower.contains("could not read username")
        || lower.contains("invalid username or password")
        || lower.contains("permission denied")
    {
        Error::Auth(format!("git {}: {}", remote, stderr.trim()))
    } else if lower.contains("non-fast-forward")
        || lower.contains("fetch first")
        || lower.contains("not possible to fast-forward")
        || lower.contains("diverg")
        || lower.contains("[rejected]")
    {
        Error::DivergedHistory {
            remote: remote.to_string(),
        }
    } else {
        Error::Transport(format!("git {}: {}", remote, stderr.trim()))
    }
}

#[async_trait]
impl Transport for GitTransport {
    async fn put(&self, local_path: &Path, remote_name: &str) -> Result<TransferResult> {
        self.ensure_ready().await?;

        let target = self.clone_dir.join(remote_name);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::copy(local_path, &target).await?;

        let message = format!(
            "stashpack update {} ({})",
            remote_name,
            Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
        );
        self.commit_and_push(&message).await?;
        Ok(TransferResult {
            remote_locator: format!("{}:{}", self.remote_url, remote_name),
        })
    }

    async fn get(&self, remote_name: &str, local_path: &Path) -> Result<TransferResult> {
        self.ensure_ready().await?;

        let source = self.clone_dir.join(remote_name);
        if !fs::try_exists(&source).await? {
            return Err(Error::NotFound {
                remote: format!("{}:{}", self.remote_url, remote_name),
            });
        }
        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::copy(&source, local_path).await?;
        Ok(TransferResult {
            remote_locator: format!("{}:{}", self.remote_url, remote_name),
        })
    }

    async fn exists(&self, remote_name: &str) -> Result<bool> {
        self.ensure_ready().await?;
        Ok(fs::try_exists(self.clone_dir.join(remote_name)).await?)
    }

    async fn remove(&self, remote_name: &str) -> Result<bool> {
        self.ensure_ready().await?;

        if !fs::try_exists(self.clone_dir.join(remote_name)).await? {
            return Ok(false);
        }
        self.git_checked(&["rm", "-f", remote_name], Some(&self.clone_dir))
            .await?;
        let message = format!(
            "stashpack remove {} ({})",
            remote_name,
            Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
        );
        self.commit_and_push(&message).await?;
        Ok(true)
    }

    fn protocol(&self) -> Protocol {
        Protocol::Git
    }
}
