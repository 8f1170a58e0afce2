//! Scoped branch switching.
//!
//! Operations that must run "as" the tracking branch save the caller's
//! current branch, check out the target, and restore on every exit path.
//! [`BranchGuard`] makes the restore automatic via `Drop`; the branch switch
//! is the single-process mutual-exclusion mechanism, so nothing here is
//! safe to run concurrently against one working tree.

use tracing::warn;

use crate::errors::GitError;
use crate::git::GitRepo;

/// Checks out a branch on construction and restores the previously current
/// branch when dropped.
#[derive(Debug)]
pub struct BranchGuard<'a> {
    repo: &'a GitRepo,
    saved: String,
}

impl<'a> BranchGuard<'a> {
    /// Save the current branch and check out `branch`.
    pub fn enter(repo: &'a GitRepo, branch: &str) -> Result<Self, GitError> {
        let saved = repo.current_branch()?;
        if saved != branch {
            repo.checkout(branch)?;
        }
        Ok(Self { repo, saved })
    }

    /// The branch that was current when the guard was entered.
    pub fn original_branch(&self) -> &str {
        &self.saved
    }
}

impl Drop for BranchGuard<'_> {
    fn drop(&mut self) {
        // Checking out the already-current branch is a no-op, so restore
        // unconditionally. A restore failure cannot propagate from drop.
        if let Err(e) = self.repo.checkout(&self.saved) {
            warn!(branch = %self.saved, error = %e, "failed to restore branch");
        }
    }
}
