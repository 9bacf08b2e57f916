//! Sync Engine - Orchestrates parallel repository synchronization
//!
//! A run is split into strictly ordered phases: list the remote repositories,
//! filter them, plan their local paths, then sync them on a fixed-size worker
//! pool. Workers pull from one shared queue and send every outcome to a
//! single collector, which reports it and folds it into the [`SyncSummary`].

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::error::{ConfigError, MirrorError, SyncError};
use crate::filter;
use crate::git::{GitBackend, GitCli, SyncAction, SyncOutcome, Syncer};
use crate::github::{GitHubLister, RepositoryDescriptor, RepositoryLister};
use crate::report::Reporter;

/// A repository that could not be synced
#[derive(Debug)]
pub struct SyncFailure {
    pub name: String,
    pub action: SyncAction,
    pub error: SyncError,
}

/// Results from a complete sync operation
#[derive(Debug, Default)]
pub struct SyncSummary {
    /// Repositories returned by the listing
    pub listed: usize,
    /// Repositories left out by the exclusion set
    pub excluded: usize,
    pub cloned: usize,
    pub updated: usize,
    pub failures: Vec<SyncFailure>,
    pub duration: Duration,
}

impl SyncSummary {
    /// Repositories a sync was attempted for
    pub fn attempted(&self) -> usize {
        self.successful() + self.failure_count()
    }

    pub fn successful(&self) -> usize {
        self.cloned + self.updated
    }

    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    pub fn failed_names(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.name.as_str()).collect()
    }

    fn record(&mut self, outcome: SyncOutcome) {
        match outcome.result {
            Ok(()) => match outcome.action {
                SyncAction::Clone => self.cloned += 1,
                SyncAction::Update => self.updated += 1,
            },
            Err(error) => self.failures.push(SyncFailure {
                name: outcome.name,
                action: outcome.action,
                error,
            }),
        }
    }
}

/// The main sync engine that orchestrates repository synchronization
#[derive(Clone)]
pub struct SyncEngine {
    lister: Arc<dyn RepositoryLister>,
    backend: Arc<dyn GitBackend>,
    reporter: Arc<dyn Reporter>,
}

impl SyncEngine {
    /// Create an engine from its collaborators
    pub fn new(
        lister: Arc<dyn RepositoryLister>,
        backend: Arc<dyn GitBackend>,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            lister,
            backend,
            reporter,
        }
    }

    /// Engine talking to the GitHub API and the `git` executable
    pub fn github(settings: &Settings, reporter: Arc<dyn Reporter>) -> Result<Self, MirrorError> {
        let lister = GitHubLister::new(
            &settings.api_url,
            settings.account.clone(),
            settings.secret.clone(),
        )?
        .with_page_size(settings.page_size);

        Ok(Self::new(Arc::new(lister), Arc::new(GitCli::new()), reporter))
    }

    /// Run a complete mirror: list, filter, plan, then sync every repository
    ///
    /// Returns `Ok` only if every repository synced. Repositories that did
    /// sync stay on disk regardless of failures elsewhere.
    pub async fn run(&self, settings: &Settings) -> Result<SyncSummary, MirrorError> {
        let start_time = Instant::now();

        let scope = settings.scope()?;
        prepare_base_directory(settings).await?;

        info!("Listing repositories for {}", scope);
        let repositories = self.lister.list(&scope).await?;
        let listed = repositories.len();

        let repositories = filter::apply(repositories, &settings.exclusions);
        let excluded = listed - repositories.len();

        let syncer = Syncer::new(
            self.backend.clone(),
            settings.directory.clone(),
            settings.layout,
        );
        check_collisions(&syncer, &repositories)?;

        info!(
            "Syncing {} repositories ({} excluded) with {} workers",
            repositories.len(),
            excluded,
            settings.workers.min(repositories.len()).max(1)
        );

        let mut summary = self
            .sync_repositories(syncer, repositories, settings.workers)
            .await;
        summary.listed = listed;
        summary.excluded = excluded;
        summary.duration = start_time.elapsed();

        info!(
            "Sync completed in {:.2}s: {} cloned, {} updated, {} excluded, {} failed",
            summary.duration.as_secs_f64(),
            summary.cloned,
            summary.updated,
            summary.excluded,
            summary.failure_count()
        );

        if summary.failure_count() > 0 {
            return Err(MirrorError::Sync { summary });
        }
        Ok(summary)
    }

    /// Sync `repositories` on at most `workers` concurrent workers
    async fn sync_repositories(
        &self,
        syncer: Syncer,
        repositories: Vec<RepositoryDescriptor>,
        workers: usize,
    ) -> SyncSummary {
        let mut pending: HashMap<PathBuf, (String, SyncAction)> = HashMap::new();
        for repo in &repositories {
            let path = syncer.local_path(repo);
            let action = syncer.planned_action(&path).await;
            pending.insert(path, (repo.name.clone(), action));
        }
        let worker_count = workers.min(repositories.len()).max(1);

        let queue = Arc::new(Mutex::new(VecDeque::from(repositories)));
        let (tx, mut rx) = mpsc::unbounded_channel::<SyncOutcome>();

        let mut pool = JoinSet::new();
        for worker in 0..worker_count {
            let queue = queue.clone();
            let tx = tx.clone();
            let syncer = syncer.clone();

            pool.spawn(async move {
                loop {
                    let next = queue.lock().await.pop_front();
                    let Some(repo) = next else { break };

                    debug!("Worker {} picked {}", worker, repo.name);
                    let outcome = syncer.sync(&repo).await;
                    if tx.send(outcome).is_err() {
                        break;
                    }
                }
            });
        }
        drop(tx);

        let mut summary = SyncSummary::default();
        while let Some(outcome) = rx.recv().await {
            pending.remove(&outcome.path);
            self.report(&outcome);
            summary.record(outcome);
        }

        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                error!("Sync worker terminated abnormally: {}", e);
            }
        }

        for (path, (name, action)) in pending {
            let outcome = SyncOutcome {
                path,
                name,
                action,
                result: Err(SyncError::Interrupted),
            };
            self.report(&outcome);
            summary.record(outcome);
        }

        summary
    }

    fn report(&self, outcome: &SyncOutcome) {
        match &outcome.result {
            Ok(()) => {
                let verb = match outcome.action {
                    SyncAction::Clone => "cloned",
                    SyncAction::Update => "updated",
                };
                self.reporter.progress(&format!("{}: {}", outcome.name, verb));
            }
            Err(e) => {
                warn!("Failed to {} {}: {}", outcome.action, outcome.name, describe(e));
                self.reporter
                    .progress(&format!("{}: {} failed", outcome.name, outcome.action));
                self.reporter.failure(&format!(
                    "{}: {} failed: {}",
                    outcome.name,
                    outcome.action,
                    describe(e)
                ));
            }
        }
    }
}

/// Error message followed by its chain of causes
fn describe(error: &dyn std::error::Error) -> String {
    let mut text = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

/// Create the target directory if needed
async fn prepare_base_directory(settings: &Settings) -> Result<(), ConfigError> {
    tokio::fs::create_dir_all(&settings.directory)
        .await
        .map_err(|source| ConfigError::BaseDirectory {
            path: settings.directory.clone(),
            source,
        })
}

/// Reject two repositories mapping to the same directory
///
/// Paths are compared case-insensitively so a run behaves the same on
/// case-insensitive filesystems.
fn check_collisions(syncer: &Syncer, repositories: &[RepositoryDescriptor]) -> Result<(), ConfigError> {
    let mut claimed: HashMap<String, &RepositoryDescriptor> = HashMap::new();

    for repo in repositories {
        let path = syncer.local_path(repo);
        let key = path.to_string_lossy().to_lowercase();
        if let Some(first) = claimed.insert(key, repo) {
            return Err(ConfigError::PathCollision {
                path,
                first: first.full_name.clone(),
                second: repo.full_name.clone(),
            });
        }
    }
    Ok(())
}
