//! Synchronous git CLI wrapper.
//!
//! Every operation shells out to `git` rooted at the repository top level
//! (no reliance on the process working directory). A non-zero exit becomes
//! [`GitError::CommandFailed`] carrying the command and exit code.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{debug, info, warn};

use crate::errors::GitError;
use crate::git::moves;

/// Client for a local git repository, driven via the `git` CLI.
#[derive(Debug, Clone)]
pub struct GitRepo {
    root: PathBuf,
}

impl GitRepo {
    /// Open an existing repository whose top level is `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, GitError> {
        let root = root.into();
        if !root.join(".git").exists() {
            return Err(GitError::RepositoryNotFound(root.display().to_string()));
        }
        Ok(Self { root })
    }

    /// Initialize a new repository at `root` (`git init`).
    pub fn init(root: impl Into<PathBuf>) -> Result<Self, GitError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        let repo = Self { root };
        repo.run(&["init", "-q"])?;
        info!(root = %repo.root.display(), "initialized git repository");
        Ok(repo)
    }

    /// Repository top-level directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Name of the currently checked-out branch.
    pub fn current_branch(&self) -> Result<String, GitError> {
        let out = self.run(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let name = out.trim();
        if name.is_empty() {
            return Err(GitError::ParseError("empty branch name from rev-parse".into()));
        }
        Ok(name.to_string())
    }

    /// List local branches, current branch first.
    pub fn list_branches(&self) -> Result<Vec<String>, GitError> {
        let out = self.run(&["branch", "--list"])?;
        let mut current = Vec::new();
        let mut rest = Vec::new();
        for line in out.lines() {
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }
            if let Some(name) = line.strip_prefix("* ") {
                current.push(name.to_string());
            } else {
                rest.push(line.trim_start().to_string());
            }
        }
        current.extend(rest);
        Ok(current)
    }

    pub fn has_branch(&self, name: &str) -> Result<bool, GitError> {
        Ok(self.list_branches()?.iter().any(|b| b == name))
    }

    /// Create a new branch at the current HEAD (`git branch <name>`).
    pub fn create_branch(&self, name: &str) -> Result<(), GitError> {
        self.run(&["branch", name])?;
        info!(branch = name, "created branch");
        Ok(())
    }

    /// Check out the named branch.
    pub fn checkout(&self, name: &str) -> Result<(), GitError> {
        self.run(&["checkout", "-q", name])?;
        debug!(branch = name, "checked out branch");
        Ok(())
    }

    /// Stage a path for the next commit.
    pub fn add(&self, rel_path: &str) -> Result<(), GitError> {
        self.run(&["add", "--", rel_path])?;
        Ok(())
    }

    /// Remove a path from the working tree and stage the removal.
    pub fn rm(&self, rel_path: &str) -> Result<(), GitError> {
        self.run(&["rm", "-q", "--", rel_path])?;
        Ok(())
    }

    /// Rename a path (`git mv`) and record the move in the per-repository
    /// move registry keyed by the current HEAD commit.
    pub fn mv(&self, old_path: &str, new_path: &str) -> Result<(), GitError> {
        self.run(&["mv", old_path, new_path])?;
        let commit_id = self.head_commit()?;
        let mut registry = moves::MoveRegistry::load(&moves::registry_path(&self.root))
            .map_err(|e| GitError::ParseError(format!("move registry: {e}")))?;
        registry.record(old_path, new_path, &commit_id);
        registry
            .save()
            .map_err(|e| GitError::ParseError(format!("move registry: {e}")))?;
        info!(old = old_path, new = new_path, commit = %commit_id, "recorded move");
        Ok(())
    }

    /// Merge the named branch into the current branch.
    pub fn merge(&self, branch: &str) -> Result<(), GitError> {
        self.run(&["merge", "-q", "--no-edit", branch])?;
        info!(branch, "merged branch");
        Ok(())
    }

    /// Commit staged changes and return the new commit ID.
    pub fn commit(&self, message: &str) -> Result<String, GitError> {
        self.run(&["commit", "-q", "-m", message])?;
        let id = self.head_commit()?;
        info!(commit = %id, "created commit");
        Ok(id)
    }

    /// Most recent commit ID on the current branch.
    pub fn head_commit(&self) -> Result<String, GitError> {
        let out = self.run(&["rev-parse", "HEAD"])?;
        let id = out.trim();
        if id.is_empty() {
            return Err(GitError::ParseError("empty commit id from rev-parse".into()));
        }
        Ok(id.to_string())
    }

    /// True when the index differs from HEAD (something is staged).
    pub fn staged_changes(&self) -> Result<bool, GitError> {
        let out = self.run(&["diff", "--cached", "--name-only"])?;
        Ok(!out.trim().is_empty())
    }

    fn run(&self, args: &[&str]) -> Result<String, GitError> {
        let mut cmd = Command::new("git");
        cmd.current_dir(&self.root)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(cmd = %format!("git {}", args.join(" ")), "running git command");
        let output = cmd.output().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                GitError::BinaryNotFound("git".into())
            } else {
                GitError::IoError(e)
            }
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            let exit_code = output.status.code().unwrap_or(-1);
            warn!(exit_code, %stderr, "git command failed");
            return Err(GitError::CommandFailed {
                command: format!("git {}", args.join(" ")),
                exit_code,
                stderr,
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::moves::MoveRegistry;

    fn test_repo() -> (tempfile::TempDir, GitRepo) {
        let dir = tempfile::tempdir().unwrap();
        let repo = GitRepo::init(dir.path()).unwrap();
        repo.run(&["config", "user.email", "test@test.com"]).unwrap();
        repo.run(&["config", "user.name", "Test"]).unwrap();
        repo.run(&["checkout", "-q", "-b", "main"]).unwrap();
        std::fs::write(dir.path().join("README.md"), "# Test\n").unwrap();
        repo.add("README.md").unwrap();
        repo.commit("initial commit").unwrap();
        (dir, repo)
    }

    #[test]
    fn test_open_missing_repo() {
        assert!(matches!(
            GitRepo::open("/nonexistent/path"),
            Err(GitError::RepositoryNotFound(_))
        ));
    }

    #[test]
    fn test_commit_returns_head_id() {
        let (dir, repo) = test_repo();
        std::fs::write(dir.path().join("a.md"), "# A\n").unwrap();
        repo.add("a.md").unwrap();
        let id = repo.commit("add a").unwrap();
        assert_eq!(id, repo.head_commit().unwrap());
        assert_eq!(id.len(), 40);
    }

    #[test]
    fn test_branches_current_first() {
        let (_dir, repo) = test_repo();
        repo.create_branch("gpremotes/blog/master").unwrap();
        let branches = repo.list_branches().unwrap();
        assert_eq!(branches[0], "main");
        assert!(branches.contains(&"gpremotes/blog/master".to_string()));
        assert!(repo.has_branch("gpremotes/blog/master").unwrap());

        repo.checkout("gpremotes/blog/master").unwrap();
        assert_eq!(repo.list_branches().unwrap()[0], "gpremotes/blog/master");
        assert_eq!(repo.current_branch().unwrap(), "gpremotes/blog/master");
    }

    #[test]
    fn test_failed_command_carries_exit_code() {
        let (_dir, repo) = test_repo();
        let err = repo.checkout("no-such-branch").unwrap_err();
        match err {
            GitError::CommandFailed { exit_code, command, .. } => {
                assert_ne!(exit_code, 0);
                assert!(command.contains("checkout"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_mv_records_move() {
        let (dir, repo) = test_repo();
        std::fs::write(dir.path().join("old.md"), "# Old\n").unwrap();
        repo.add("old.md").unwrap();
        let commit = repo.commit("add old").unwrap();

        repo.mv("old.md", "new.md").unwrap();
        assert!(dir.path().join("new.md").is_file());
        assert!(!dir.path().join("old.md").exists());

        let registry = MoveRegistry::load(&moves::registry_path(dir.path())).unwrap();
        let entry = registry.moves_for("old.md").unwrap();
        assert_eq!(entry.get(&commit).map(String::as_str), Some("new.md"));
    }

    #[test]
    fn test_staged_changes() {
        let (dir, repo) = test_repo();
        assert!(!repo.staged_changes().unwrap());
        std::fs::write(dir.path().join("b.md"), "# B\n").unwrap();
        repo.add("b.md").unwrap();
        assert!(repo.staged_changes().unwrap());
    }
}
