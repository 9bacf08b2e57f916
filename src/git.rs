//! Per-repository clone-or-update
//!
//! [`Syncer`] decides between clone and update for one repository and
//! delegates the actual work to a [`GitBackend`]. [`GitCli`] is the backend
//! that shells out to the `git` executable.

use async_trait::async_trait;
use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tokio::process::Command as AsyncCommand;
use tracing::{debug, info};

use crate::config::Layout;
use crate::error::SyncError;
use crate::github::{strip_credentials, RepositoryDescriptor};

/// Clone and update primitives of a version-control system
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GitBackend: Send + Sync {
    /// Create a full local copy of `url` at `path`, which must not exist
    async fn clone_repository(&self, url: &str, path: &Path) -> Result<(), SyncError>;

    /// Bring the existing copy of `repo` at `path` up to date, integrating
    /// its default branch
    async fn update_repository(
        &self,
        repo: &RepositoryDescriptor,
        path: &Path,
    ) -> Result<(), SyncError>;
}

/// What a sync did, or tried to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    Clone,
    Update,
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncAction::Clone => write!(f, "clone"),
            SyncAction::Update => write!(f, "update"),
        }
    }
}

/// Result of syncing one repository
#[derive(Debug)]
pub struct SyncOutcome {
    pub name: String,
    pub action: SyncAction,
    pub path: PathBuf,
    pub result: Result<(), SyncError>,
}

/// Maps descriptors to local paths and runs clone or update
#[derive(Clone)]
pub struct Syncer {
    backend: Arc<dyn GitBackend>,
    base_dir: PathBuf,
    layout: Layout,
}

impl Syncer {
    pub fn new(backend: Arc<dyn GitBackend>, base_dir: impl Into<PathBuf>, layout: Layout) -> Self {
        Self {
            backend,
            base_dir: base_dir.into(),
            layout,
        }
    }

    /// Local directory for `repo` under the configured layout
    pub fn local_path(&self, repo: &RepositoryDescriptor) -> PathBuf {
        match self.layout {
            Layout::Flat => self.base_dir.join(&repo.name),
            Layout::Owner => self.base_dir.join(&repo.owner).join(&repo.name),
        }
    }

    /// Clone `repo` if it is missing locally, update it otherwise
    ///
    /// Never fails as a whole; every problem is recorded in the outcome.
    pub async fn sync(&self, repo: &RepositoryDescriptor) -> SyncOutcome {
        let path = self.local_path(repo);

        let (action, result) = match self.check_names(repo) {
            Err(e) => (self.planned_action(&path).await, Err(e)),
            Ok(()) => match tokio::fs::metadata(&path).await {
                Ok(meta) if meta.is_dir() => {
                    info!("Updating {} at {}", repo.full_name, path.display());
                    let result = self.backend.update_repository(repo, &path).await;
                    (SyncAction::Update, result)
                }
                Ok(_) => (
                    SyncAction::Update,
                    Err(SyncError::UnexpectedPath { path: path.clone() }),
                ),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    info!("Cloning {} -> {}", repo.display_url(), path.display());
                    (SyncAction::Clone, self.clone_into(repo, &path).await)
                }
                Err(source) => (
                    SyncAction::Clone,
                    Err(SyncError::Io {
                        path: path.clone(),
                        source,
                    }),
                ),
            },
        };

        SyncOutcome {
            name: repo.name.clone(),
            action,
            path,
            result,
        }
    }

    async fn clone_into(&self, repo: &RepositoryDescriptor, path: &Path) -> Result<(), SyncError> {
        if self.layout == Layout::Owner {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|source| SyncError::Io {
                        path: parent.to_path_buf(),
                        source,
                    })?;
            }
        }
        self.backend.clone_repository(&repo.clone_url, path).await
    }

    fn check_names(&self, repo: &RepositoryDescriptor) -> Result<(), SyncError> {
        if !is_path_safe(&repo.name) {
            return Err(SyncError::UnsafeName {
                name: repo.name.clone(),
            });
        }
        if self.layout == Layout::Owner && !is_path_safe(&repo.owner) {
            return Err(SyncError::UnsafeName {
                name: repo.owner.clone(),
            });
        }
        Ok(())
    }

    /// Action a sync of the repository at `path` would take right now
    pub async fn planned_action(&self, path: &Path) -> SyncAction {
        if tokio::fs::metadata(path).await.is_ok() {
            SyncAction::Update
        } else {
            SyncAction::Clone
        }
    }
}

/// Whether `name` can be used as a single directory component
pub fn is_path_safe(name: &str) -> bool {
    static SAFE: OnceLock<Regex> = OnceLock::new();
    let safe = SAFE.get_or_init(|| Regex::new(r"^[A-Za-z0-9._-]+$").expect("valid regex"));
    name != "." && name != ".." && safe.is_match(name)
}

/// Mask userinfo in every URL found in `text`
pub fn redact_credentials(text: &str) -> String {
    static USERINFO: OnceLock<Regex> = OnceLock::new();
    let userinfo = USERINFO
        .get_or_init(|| Regex::new(r"([A-Za-z][A-Za-z0-9+.-]*://)[^/@\s']+@").expect("valid regex"));
    userinfo.replace_all(text, "${1}***@").into_owned()
}

/// Compare two remotes ignoring credentials, `.git` suffix, case and ssh/https form
pub fn remote_urls_match(actual: &str, expected: &str) -> bool {
    let normalize = |url: &str| -> String {
        let url = strip_credentials(url.trim());
        let url = match url.strip_prefix("git@") {
            Some(rest) => format!("https://{}", rest.replacen(':', "/", 1)),
            None => url,
        };
        url.trim_end_matches('/')
            .trim_end_matches(".git")
            .to_lowercase()
    };

    normalize(actual) == normalize(expected)
}

/// [`GitBackend`] that runs the `git` executable
#[derive(Debug, Clone)]
pub struct GitCli {
    program: String,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new()
    }
}

impl GitCli {
    pub fn new() -> Self {
        Self {
            program: "git".to_string(),
        }
    }

    /// Use a specific git executable
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Run git with `args`, returning trimmed stdout on success
    async fn git(&self, dir: Option<&Path>, args: &[&str]) -> Result<String, SyncError> {
        let command = args.first().copied().unwrap_or_default().to_string();
        debug!("Running git {}", redact_credentials(&args.join(" ")));

        let mut cmd = AsyncCommand::new(&self.program);
        cmd.args(args).env("GIT_TERMINAL_PROMPT", "0");
        if let Some(dir) = dir {
            cmd.current_dir(dir);
        }

        let output = cmd
            .output()
            .await
            .map_err(|source| SyncError::Spawn {
                command: command.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SyncError::Git {
                command,
                status: output.status.code(),
                stderr: redact_credentials(stderr.trim()),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Fail unless `path` is the top level of a git work tree
    async fn ensure_repository(&self, path: &Path) -> Result<(), SyncError> {
        let not_a_repo = || SyncError::NotARepository {
            path: path.to_path_buf(),
        };

        let toplevel = self
            .git(Some(path), &["rev-parse", "--show-toplevel"])
            .await
            .map_err(|e| match e {
                SyncError::Git { .. } => not_a_repo(),
                other => other,
            })?;

        let expected = tokio::fs::canonicalize(path)
            .await
            .map_err(|source| SyncError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let actual = tokio::fs::canonicalize(&toplevel)
            .await
            .unwrap_or_else(|_| PathBuf::from(&toplevel));

        if actual != expected {
            debug!(
                "{} belongs to the work tree at {}",
                path.display(),
                actual.display()
            );
            return Err(not_a_repo());
        }
        Ok(())
    }

    /// Check origin points at `url`, refreshing stored credentials if needed
    async fn ensure_origin(&self, url: &str, path: &Path) -> Result<(), SyncError> {
        let current = self
            .git(Some(path), &["remote", "get-url", "origin"])
            .await?;

        if !remote_urls_match(&current, url) {
            return Err(SyncError::RemoteMismatch {
                path: path.to_path_buf(),
                expected: strip_credentials(url),
                actual: strip_credentials(&current),
            });
        }

        if current != url {
            debug!("Refreshing origin URL for {}", path.display());
            self.git(Some(path), &["remote", "set-url", "origin", url])
                .await?;
        }
        Ok(())
    }

    /// Fast-forward local `branch` to `origin/<branch>`
    ///
    /// A checked-out branch is merged; otherwise only its ref moves.
    async fn fast_forward_branch(&self, path: &Path, branch: &str) -> Result<(), SyncError> {
        let remote_ref = format!("refs/remotes/origin/{}", branch);
        if self
            .git(Some(path), &["rev-parse", "--verify", "--quiet", &remote_ref])
            .await
            .is_err()
        {
            debug!("origin has no {} in {}, fetched only", branch, path.display());
            return Ok(());
        }

        let current = self
            .git(Some(path), &["symbolic-ref", "--quiet", "--short", "HEAD"])
            .await
            .ok();

        if current.as_deref() == Some(branch) {
            self.git(Some(path), &["merge", "--ff-only", &remote_ref])
                .await?;
        } else {
            debug!(
                "{} is not checked out in {}, moving its ref only",
                branch,
                path.display()
            );
            // Local fetch refuses non-fast-forward updates
            let refspec = format!("{}:refs/heads/{}", remote_ref, branch);
            self.git(Some(path), &["fetch", "--quiet", ".", &refspec])
                .await?;
        }
        Ok(())
    }

    /// Fast-forward the checked-out branch to its upstream, if it has one
    async fn fast_forward_upstream(&self, path: &Path) -> Result<(), SyncError> {
        // Empty remotes and detached checkouts have nothing to fast-forward
        if self
            .git(
                Some(path),
                &["rev-parse", "--abbrev-ref", "--symbolic-full-name", "@{u}"],
            )
            .await
            .is_err()
        {
            debug!("No upstream branch in {}, fetched only", path.display());
            return Ok(());
        }

        self.git(Some(path), &["merge", "--ff-only", "@{u}"])
            .await?;
        Ok(())
    }
}

#[async_trait]
impl GitBackend for GitCli {
    async fn clone_repository(&self, url: &str, path: &Path) -> Result<(), SyncError> {
        let target = path.to_string_lossy();
        self.git(None, &["clone", "--", url, target.as_ref()])
            .await?;
        Ok(())
    }

    async fn update_repository(
        &self,
        repo: &RepositoryDescriptor,
        path: &Path,
    ) -> Result<(), SyncError> {
        self.ensure_repository(path).await?;
        self.ensure_origin(&repo.clone_url, path).await?;

        self.git(Some(path), &["fetch", "--prune", "origin"])
            .await?;

        match repo.default_branch.as_deref() {
            Some(branch) => self.fast_forward_branch(path, branch).await,
            None => self.fast_forward_upstream(path).await,
        }
    }
}
