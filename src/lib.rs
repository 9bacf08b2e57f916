//! hubmirror - Mirror GitHub repositories into a local directory
//!
//! hubmirror lists every repository owned by an account (or visible to a
//! token), clones the ones missing locally and fast-forwards the ones already
//! present. It is built for unattended, periodic runs.
//!
//! ## Modules
//!
//! - [`config`]: Configuration file, command-line overrides and run settings
//! - [`github`]: Paginated repository listing via the GitHub REST API
//! - [`filter`]: Exclusion of repositories by name
//! - [`git`]: Clone-or-update of a single repository
//! - [`sync`]: Concurrent orchestration of a whole run
//! - [`report`]: Progress and error output sinks

pub mod config;
pub mod error;
pub mod filter;
pub mod git;
pub mod github;
pub mod report;
pub mod sync;

pub use config::{Config, Layout, Settings};
pub use error::{ConfigError, ListingError, MirrorError, SyncError};
pub use filter::ExclusionSet;
pub use git::{GitBackend, GitCli, SyncAction, SyncOutcome, Syncer};
pub use github::{GitHubLister, RepositoryDescriptor, RepositoryLister, Scope};
pub use report::{ConsoleReporter, MemoryReporter, Reporter};
pub use sync::{SyncEngine, SyncSummary};
