//! The tracking branch: a dedicated local branch recording what one remote
//! has been told, plus the staging buffer feeding it.
//!
//! Each remote `<name>` owns branch `gpremotes/<name>/master`. The map file
//! and its last-push snapshot are committed there, never on the user's
//! working branch. Map edits accumulate in an in-memory staging copy
//! (copy-on-first-touch from the endpoint's map) until `commit` folds them
//! in; `merge` reconciles the user's branch into the tracking branch first,
//! replaying recorded renames against the map.
//!
//! All branch switching goes through [`BranchGuard`], so the caller's
//! checkout is restored on every exit path.

use std::path::Path;

use tracing::{debug, info, instrument};

use crate::docmap::{load_map_file, save_map_file, DocumentMap, STATE_DIR};
use crate::document::Document;
use crate::errors::{MapError, SyncError};
use crate::git::{moves, BranchGuard, GitRepo, MoveRegistry};
use crate::remote::{PushOutcome, RemoteEndpoint, RevisionInfo};

/// Branch owned by the tracking state for remote `name`.
pub fn tracking_branch_name(name: &str) -> String {
    format!("gpremotes/{name}/master")
}

/// Tracking state for one remote: its branch, endpoint, and staging buffer.
pub struct TrackingBranch {
    branch_name: String,
    repo: GitRepo,
    endpoint: RemoteEndpoint,
    /// Pending map edits; `None` means nothing staged.
    stage: Option<DocumentMap>,
}

impl TrackingBranch {
    /// Start tracking a new remote: create its branch and commit the empty
    /// map file there.
    pub fn create(
        repo: GitRepo,
        name: &str,
        remote_type: &str,
        repo_args: serde_json::Value,
    ) -> Result<Self, SyncError> {
        let branch_name = tracking_branch_name(name);
        if !repo.has_branch(&branch_name)? {
            repo.create_branch(&branch_name)?;
        }
        let guard_repo = repo.clone();
        let _guard = BranchGuard::enter(&guard_repo, &branch_name)?;
        let endpoint = RemoteEndpoint::create(name, repo.root(), remote_type, repo_args)?;
        repo.add(&endpoint.map_rel_path())?;
        if repo.staged_changes()? {
            repo.commit(&format!("track remote '{name}'"))?;
        }
        info!(name, branch = %branch_name, "tracking branch created");
        Ok(Self {
            branch_name,
            repo,
            endpoint,
            stage: None,
        })
    }

    /// Open the tracking state for an already-tracked remote, reading the
    /// map file as committed on the tracking branch.
    pub fn open(repo: GitRepo, name: &str) -> Result<Self, SyncError> {
        let branch_name = tracking_branch_name(name);
        let guard_repo = repo.clone();
        let endpoint = {
            let _guard = BranchGuard::enter(&guard_repo, &branch_name)?;
            RemoteEndpoint::open(name, repo.root())?
        };
        Ok(Self {
            branch_name,
            repo,
            endpoint,
            stage: None,
        })
    }

    /// Wrap an existing endpoint, creating the branch if needed. Lets
    /// callers supply their own backend wiring.
    pub fn with_endpoint(repo: GitRepo, endpoint: RemoteEndpoint) -> Result<Self, SyncError> {
        let branch_name = tracking_branch_name(endpoint.name());
        if !repo.has_branch(&branch_name)? {
            repo.create_branch(&branch_name)?;
        }
        Ok(Self {
            branch_name,
            repo,
            endpoint,
            stage: None,
        })
    }

    pub fn branch_name(&self) -> &str {
        &self.branch_name
    }

    pub fn endpoint(&self) -> &RemoteEndpoint {
        &self.endpoint
    }

    pub fn endpoint_mut(&mut self) -> &mut RemoteEndpoint {
        &mut self.endpoint
    }

    pub fn has_staged_changes(&self) -> bool {
        self.stage.is_some()
    }

    /// The map as the next commit would see it: the staging buffer when one
    /// exists, the endpoint's map otherwise.
    pub fn current_map(&self) -> &DocumentMap {
        match &self.stage {
            Some(stage) => stage,
            None => self.endpoint.docmap(),
        }
    }

    fn stage_mut(&mut self) -> &mut DocumentMap {
        self.stage
            .get_or_insert_with(|| self.endpoint.docmap().clone())
    }

    /// Repository-relative path of the on-disk staging buffer. The file is
    /// never committed; it carries staged edits between invocations.
    pub fn stage_rel_path(&self) -> String {
        format!("{STATE_DIR}/{}.stage.json", self.endpoint.name())
    }

    /// Load a staging buffer persisted by an earlier invocation, if any.
    pub fn load_stage(&mut self) -> Result<(), SyncError> {
        let path = self.repo.root().join(self.stage_rel_path());
        if path.is_file() {
            let (_, _, map) = load_map_file(&path)?;
            self.stage = Some(map);
        }
        Ok(())
    }

    /// Persist the staging buffer for the next invocation, or clear the
    /// file when nothing is staged.
    pub fn save_stage(&self) -> Result<(), SyncError> {
        let path = self.repo.root().join(self.stage_rel_path());
        match &self.stage {
            Some(stage) => {
                save_map_file(
                    &path,
                    self.endpoint.remote_type(),
                    self.endpoint.repo_args(),
                    stage,
                )?;
            }
            None => {
                if path.is_file() {
                    std::fs::remove_file(&path).map_err(MapError::IoError)?;
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Staging operations
    // -----------------------------------------------------------------------

    /// Stage a document for tracking, refreshing its content hash from the
    /// working tree.
    pub fn add(&mut self, rel_path: &str, unlisted: bool) -> Result<(), SyncError> {
        let doc = Document::load(self.repo.root(), rel_path)?;
        let mut record = self.current_map().get(rel_path).cloned().unwrap_or_default();
        record.unlisted = unlisted;
        record.content_hash = Some(doc.content_hash());
        self.stage_mut().upsert(rel_path, record)?;
        debug!(path = rel_path, unlisted, "staged document");
        Ok(())
    }

    /// Stage removal of a tracked document; the remote copy is deleted on
    /// the next push.
    pub fn rm(&mut self, rel_path: &str) -> Result<(), SyncError> {
        if self.stage_mut().delete(rel_path).is_none() {
            return Err(SyncError::NotTracked(rel_path.to_string()));
        }
        debug!(path = rel_path, "staged removal");
        Ok(())
    }

    /// Stage a rename of a tracked document to a new path, keeping its
    /// remote identity.
    pub fn record_move(&mut self, old_path: &str, new_path: &str) -> Result<(), SyncError> {
        if !self.stage_mut().rename(old_path, new_path)? {
            return Err(SyncError::NotTracked(old_path.to_string()));
        }
        Ok(())
    }

    /// Fold the staging buffer (or pending endpoint-map changes) into a
    /// commit on the tracking branch.
    ///
    /// With `from_stage`, the staging buffer becomes the endpoint's map and
    /// must exist. With `last_push`, the snapshot file is written alongside
    /// the map. Returns the commit ID, or `None` when the tree already
    /// matched.
    pub fn commit(
        &mut self,
        message: &str,
        from_stage: bool,
        last_push: bool,
    ) -> Result<Option<String>, SyncError> {
        let repo = self.repo.clone();
        let _guard = BranchGuard::enter(&repo, &self.branch_name)?;
        if from_stage {
            let stage = self.stage.take().ok_or(SyncError::NothingToCommit)?;
            *self.endpoint.docmap_mut() = stage;
        }
        self.endpoint.save_map()?;
        repo.add(&self.endpoint.map_rel_path())?;
        if last_push {
            self.endpoint.save_lastpush()?;
            repo.add(&self.endpoint.lastpush_rel_path())?;
        }
        if !repo.staged_changes()? {
            debug!("map unchanged, no commit");
            return Ok(None);
        }
        let id = repo.commit(message)?;
        info!(commit = %id, "committed tracking state");
        Ok(Some(id))
    }

    // -----------------------------------------------------------------------
    // Merge
    // -----------------------------------------------------------------------

    /// Merge a source branch (default: the caller's current branch) into
    /// the tracking branch, then reconcile the map: replay recorded renames
    /// not yet folded in and refresh content hashes from the merged tree.
    ///
    /// `update_only` skips the git merge and just reconciles the map.
    #[instrument(skip(self), fields(branch = %self.branch_name))]
    pub fn merge(&mut self, source: Option<&str>, update_only: bool) -> Result<(), SyncError> {
        let repo = self.repo.clone();
        let guard = BranchGuard::enter(&repo, &self.branch_name)?;
        let source = source.unwrap_or(guard.original_branch()).to_string();
        if !update_only && source != self.branch_name {
            repo.merge(&source)?;
        }

        let mut stage = self
            .stage
            .take()
            .unwrap_or_else(|| self.endpoint.docmap().clone());
        self.apply_recorded_moves(&mut stage)?;
        stage.update_hashes(repo.root())?;

        if &stage == self.endpoint.docmap() {
            debug!("merge produced no map changes");
            return Ok(());
        }
        self.stage = Some(stage);
        self.commit(&format!("merge '{source}'"), true, false)?;
        Ok(())
    }

    /// Replay renames from the shared move registry that this branch has
    /// not folded in yet, then mark them folded in the branch-scoped
    /// registry. More than one pending rename for one old path cannot be
    /// ordered and aborts the merge.
    fn apply_recorded_moves(&self, stage: &mut DocumentMap) -> Result<(), SyncError> {
        let root = self.repo.root();
        let registry = MoveRegistry::load(&moves::registry_path(root))?;
        if registry.is_empty() {
            return Ok(());
        }
        let merged_path = moves::merged_registry_path(root, self.endpoint.name());
        let mut merged = MoveRegistry::load(&merged_path)?;
        for (old_path, commits) in registry.iter() {
            let pending: Vec<(&String, &String)> = commits
                .iter()
                .filter(|(commit, _)| !merged.contains(old_path, commit))
                .collect();
            if pending.is_empty() {
                continue;
            }
            if pending.len() > 1 {
                return Err(MapError::AmbiguousMove {
                    old_path: old_path.to_string(),
                }
                .into());
            }
            let (_, new_path) = pending[0];
            if stage.rename(old_path, new_path)? {
                info!(old = old_path, new = %new_path, "reconciled rename into map");
            }
            for (commit, new) in &pending {
                merged.record(old_path, new, commit);
            }
        }
        merged.save()?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Push / fetch
    // -----------------------------------------------------------------------

    /// Full push cycle: merge the caller's branch in, push the map diff to
    /// the remote, and commit the updated map with a last-push snapshot.
    ///
    /// Documents whose cross-references never resolved fail the push after
    /// the state commit, so a rerun picks up where this one stopped.
    #[instrument(skip(self), fields(branch = %self.branch_name))]
    pub fn push(&mut self) -> Result<PushOutcome, SyncError> {
        self.merge(None, false)?;
        let repo = self.repo.clone();
        let _guard = BranchGuard::enter(&repo, &self.branch_name)?;
        let outcome = self.endpoint.push(None)?;
        self.commit(&format!("push to '{}'", self.endpoint.name()), false, true)?;
        if !outcome.unresolved.is_empty() {
            return Err(SyncError::UnresolvedReferences {
                titles: outcome.unresolved,
            });
        }
        Ok(outcome)
    }

    /// Fetch remote documents onto the tracking branch. With a
    /// history-capable backend each remote revision becomes its own commit;
    /// otherwise the latest snapshots land in one commit.
    #[instrument(skip(self), fields(branch = %self.branch_name))]
    pub fn fetch(&mut self) -> Result<Vec<String>, SyncError> {
        let repo = self.repo.clone();
        let _guard = BranchGuard::enter(&repo, &self.branch_name)?;
        let name = self.endpoint.name().to_string();
        if self.endpoint.history_supported() {
            let (import_dir, listing) = self.endpoint.fetch_setup()?;
            let mut written = Vec::new();
            for remote_id in listing.keys() {
                written.extend(self.fetch_doc_history(remote_id, &import_dir)?);
            }
            self.commit(&format!("fetch history from '{name}'"), false, false)?;
            Ok(written)
        } else {
            let written = self.endpoint.fetch_latest()?;
            for path in &written {
                repo.add(path)?;
            }
            self.commit(&format!("fetch from '{name}'"), false, false)?;
            Ok(written)
        }
    }

    /// Import one document's revision history as a chain of commits,
    /// oldest first, each tagged with the remote revision's timestamp.
    ///
    /// Revisions already recorded in the map's revision ledger are skipped,
    /// so an aborted import resumes where it stopped.
    pub fn fetch_doc_history(
        &mut self,
        remote_id: &str,
        import_dir: &Path,
    ) -> Result<Vec<String>, SyncError> {
        let history = self.endpoint.document_history(remote_id)?;
        let mut revisions: Vec<(String, RevisionInfo)> = history.into_iter().collect();
        revisions.sort_by_key(|(_, info)| info.timestamp);

        let repo = self.repo.clone();
        let mut written = Vec::new();
        for (rev_id, info) in revisions {
            let imported = self
                .endpoint
                .docmap()
                .get_by_id(remote_id)
                .is_some_and(|r| r.revision_commits.contains_key(&rev_id));
            if imported {
                continue;
            }
            let Some(path) = self.endpoint.import_doc(remote_id, import_dir, Some(&rev_id))?
            else {
                continue;
            };
            repo.add(&path)?;
            self.endpoint.save_map()?;
            repo.add(&self.endpoint.map_rel_path())?;
            if !repo.staged_changes()? {
                continue;
            }
            let message = format!(
                "{} revision {} of {}",
                info.timestamp.to_rfc3339(),
                rev_id,
                remote_id
            );
            let commit_id = repo.commit(&message)?;
            if let Some(doc_path) = self.endpoint.docmap().path_for_id(remote_id).map(String::from)
            {
                if let Some(mut record) = self.endpoint.docmap().get(&doc_path).cloned() {
                    record.revision_commits.insert(rev_id.clone(), commit_id);
                    self.endpoint.docmap_mut().upsert(&doc_path, record)?;
                }
            }
            written.push(path);
        }
        Ok(written)
    }
}
