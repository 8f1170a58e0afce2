//! gitpub-core: publish git-tracked documents to remote document stores.
//!
//! The engine keeps, per remote, a durable [`DocumentMap`] pairing local
//! paths with remote document IDs. Pushing diffs the map against its
//! last-push snapshot ([`MapDiff`]) and drives a [`RemotePlugin`] backend;
//! fetching imports remote documents (optionally with full revision
//! history) back into the repository. All durable state lives on a
//! dedicated tracking branch ([`TrackingBranch`]) so the user's branches
//! stay clean.

pub mod config;
pub mod diff;
pub mod docmap;
pub mod document;
pub mod errors;
pub mod git;
pub mod remote;
pub mod tracking;

pub use config::RemoteConfig;
pub use diff::MapDiff;
pub use docmap::{DocRecord, DocumentMap};
pub use document::Document;
pub use errors::{
    ConfigError, CoreError, DocumentError, GitError, MapError, RemoteError, SyncError,
};
pub use git::{BranchGuard, GitRepo, MoveRegistry};
pub use remote::{PushOutcome, RemoteEndpoint, RemotePlugin};
pub use tracking::{tracking_branch_name, TrackingBranch};
