// sync.rs — Force-sync: fetch, optionally reset, check out the ref.
//
// The sequence mirrors what an operator would type when a deploy is stuck:
//
//   git fetch --all --prune
//   git reset --hard HEAD && git clean -fd     (force only)
//   git checkout <ref>                         (+ ff-only pull for branches)
//
// and, if the checkout still conflicts with force set, one more
// reset-clean-checkout round before giving up.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::GitSyncError;

/// What the webhook (or operator) asked to deploy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployRef {
    Branch(String),
    Tag(String),
    Commit(String),
}

impl DeployRef {
    /// Interpret a ref string from a webhook payload or CLI argument.
    /// Full ref paths are explicit; a 40-char hex string is a commit;
    /// anything else is a branch name.
    pub fn parse(raw: &str) -> Self {
        if let Some(name) = raw.strip_prefix("refs/heads/") {
            return Self::Branch(name.to_string());
        }
        if let Some(name) = raw.strip_prefix("refs/tags/") {
            return Self::Tag(name.to_string());
        }
        if raw.len() == 40 && raw.chars().all(|c| c.is_ascii_hexdigit()) {
            return Self::Commit(raw.to_string());
        }
        Self::Branch(raw.to_string())
    }

    pub fn display_name(&self) -> &str {
        match self {
            Self::Branch(n) | Self::Tag(n) | Self::Commit(n) => n,
        }
    }
}

/// What a successful force-sync did.
#[derive(Debug)]
pub struct ForceSyncOutcome {
    pub reference: String,
    pub forced: bool,
    /// Whether the conflict-retry round was needed.
    pub retried: bool,
}

/// Git operations against one working tree root.
pub struct GitSync {
    work_dir: PathBuf,
}

impl GitSync {
    /// Bind to a working tree root. The `.git` entry must exist — this
    /// helper never runs against arbitrary directories.
    pub fn new(work_dir: impl AsRef<Path>) -> Result<Self, GitSyncError> {
        let work_dir = work_dir.as_ref().to_path_buf();
        if !work_dir.join(".git").exists() {
            return Err(GitSyncError::NotAWorkTree { path: work_dir });
        }
        Ok(Self { work_dir })
    }

    /// Run the deploy sequence for `reference`.
    pub fn force_sync(
        &self,
        reference: &DeployRef,
        force: bool,
    ) -> Result<ForceSyncOutcome, GitSyncError> {
        tracing::info!(
            work_dir = %self.work_dir.display(),
            reference = reference.display_name(),
            force,
            "force-sync starting"
        );
        self.git(&["fetch", "--all", "--prune"])?;

        if force {
            self.reset_and_clean()?;
        }

        match self.checkout(reference) {
            Ok(()) => Ok(ForceSyncOutcome {
                reference: reference.display_name().to_string(),
                forced: force,
                retried: false,
            }),
            Err(first_err) if force => {
                // One forced retry: drift may have appeared between the
                // reset and the checkout.
                tracing::warn!(error = %first_err, "checkout conflicted, retrying after reset");
                self.reset_and_clean()?;
                self.checkout(reference)
                    .map_err(|e| GitSyncError::CheckoutConflict {
                        reference: reference.display_name().to_string(),
                        detail: e.to_string(),
                    })?;
                Ok(ForceSyncOutcome {
                    reference: reference.display_name().to_string(),
                    forced: true,
                    retried: true,
                })
            }
            Err(e) => Err(GitSyncError::CheckoutConflict {
                reference: reference.display_name().to_string(),
                detail: e.to_string(),
            }),
        }
    }

    /// Current branch name, or `HEAD` when detached.
    pub fn current_branch(&self) -> Result<String, GitSyncError> {
        self.git(&["rev-parse", "--abbrev-ref", "HEAD"])
    }

    /// Current commit hash.
    pub fn current_commit(&self) -> Result<String, GitSyncError> {
        self.git(&["rev-parse", "HEAD"])
    }

    /// Whether the tree has uncommitted changes.
    pub fn is_dirty(&self) -> Result<bool, GitSyncError> {
        Ok(!self.git(&["status", "--porcelain"])?.is_empty())
    }

    fn reset_and_clean(&self) -> Result<(), GitSyncError> {
        self.git(&["reset", "--hard", "HEAD"])?;
        // -fd only: ignored files (build caches) survive, and `.git` is
        // never clean's business.
        self.git(&["clean", "-fd"])?;
        Ok(())
    }

    fn checkout(&self, reference: &DeployRef) -> Result<(), GitSyncError> {
        match reference {
            DeployRef::Branch(name) => {
                self.git(&["checkout", name])?;
                // Fast-forward only; a diverged local branch is a conflict
                // the force path resolves by resetting to the remote.
                self.git(&["pull", "--ff-only", "origin", name])?;
                Ok(())
            }
            DeployRef::Tag(name) => {
                self.git(&["checkout", &format!("refs/tags/{}", name)])?;
                Ok(())
            }
            DeployRef::Commit(sha) => {
                self.git(&["checkout", sha])?;
                Ok(())
            }
        }
    }

    /// Run a git command in the working directory.
    fn git(&self, args: &[&str]) -> Result<String, GitSyncError> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.work_dir)
            .output()?;

        if !output.status.success() {
            return Err(GitSyncError::Command {
                command: args.join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn run(dir: &Path, args: &[&str]) {
        let out = Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .unwrap();
        assert!(
            out.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&out.stderr)
        );
    }

    /// An origin repo with main + tag v1, and a clone to deploy into.
    fn origin_and_clone() -> (tempfile::TempDir, PathBuf, PathBuf) {
        let root = tempdir().unwrap();
        let origin = root.path().join("origin");
        let clone = root.path().join("clone");
        fs::create_dir_all(&origin).unwrap();

        run(&origin, &["init", "-b", "main"]);
        run(&origin, &["config", "user.name", "Test"]);
        run(&origin, &["config", "user.email", "test@example.com"]);
        fs::write(origin.join("a.txt"), "v1 content\n").unwrap();
        run(&origin, &["add", "."]);
        run(&origin, &["commit", "-m", "first"]);
        run(&origin, &["tag", "v1"]);
        fs::write(origin.join("a.txt"), "v2 content\n").unwrap();
        run(&origin, &["commit", "-am", "second"]);

        // Absolute source path: git keeps the URL as typed, and a
        // relative one would not resolve from inside the clone.
        run(root.path(), &["clone", origin.to_str().unwrap(), "clone"]);
        run(&clone, &["config", "user.name", "Test"]);
        run(&clone, &["config", "user.email", "test@example.com"]);

        (root, origin, clone)
    }

    #[test]
    fn refuses_non_worktree_paths() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            GitSync::new(dir.path()),
            Err(GitSyncError::NotAWorkTree { .. })
        ));
    }

    #[test]
    fn ref_parsing() {
        assert_eq!(
            DeployRef::parse("refs/heads/main"),
            DeployRef::Branch("main".into())
        );
        assert_eq!(
            DeployRef::parse("refs/tags/v1.2"),
            DeployRef::Tag("v1.2".into())
        );
        let sha = "a".repeat(40);
        assert_eq!(DeployRef::parse(&sha), DeployRef::Commit(sha.clone()));
        assert_eq!(
            DeployRef::parse("release"),
            DeployRef::Branch("release".into())
        );
    }

    #[test]
    fn branch_deploy_fast_forwards() {
        let (_root, origin, clone) = origin_and_clone();
        // Move origin ahead.
        fs::write(origin.join("b.txt"), "new\n").unwrap();
        run(&origin, &["add", "."]);
        run(&origin, &["commit", "-m", "third"]);

        let git = GitSync::new(&clone).unwrap();
        let outcome = git
            .force_sync(&DeployRef::Branch("main".into()), false)
            .unwrap();
        assert!(!outcome.forced);
        assert!(clone.join("b.txt").exists());
    }

    #[test]
    fn forced_tag_deploy_discards_local_edits() {
        let (_root, _origin, clone) = origin_and_clone();
        let git = GitSync::new(&clone).unwrap();

        // Operator edits a tracked file out of band.
        fs::write(clone.join("a.txt"), "locally hacked\n").unwrap();
        assert!(git.is_dirty().unwrap());

        let outcome = git.force_sync(&DeployRef::Tag("v1".into()), true).unwrap();
        assert!(outcome.forced);
        assert_eq!(
            fs::read_to_string(clone.join("a.txt")).unwrap(),
            "v1 content\n"
        );
        // Detached at the tag.
        assert_eq!(git.current_branch().unwrap(), "HEAD");
    }

    #[test]
    fn forced_deploy_removes_untracked_but_keeps_ignored() {
        let (_root, _origin, clone) = origin_and_clone();
        fs::write(clone.join(".gitignore"), "cache/\n").unwrap();
        run(&clone, &["add", ".gitignore"]);
        run(&clone, &["commit", "-m", "ignore cache"]);

        fs::write(clone.join("untracked.txt"), "junk\n").unwrap();
        fs::create_dir_all(clone.join("cache")).unwrap();
        fs::write(clone.join("cache/build.bin"), "expensive\n").unwrap();

        let git = GitSync::new(&clone).unwrap();
        git.force_sync(&DeployRef::Branch("main".into()), true)
            .unwrap();

        assert!(!clone.join("untracked.txt").exists());
        // Ignored files survive: clean runs without -x.
        assert!(clone.join("cache/build.bin").exists());
        // And .git is obviously still there.
        assert!(clone.join(".git").exists());
    }

    #[test]
    fn unforced_deploy_fails_on_conflicting_edit() {
        let (_root, origin, clone) = origin_and_clone();
        // Diverge: origin moves forward, clone edits the same file.
        fs::write(origin.join("a.txt"), "v3 content\n").unwrap();
        run(&origin, &["commit", "-am", "third"]);
        fs::write(clone.join("a.txt"), "conflicting local edit\n").unwrap();

        let git = GitSync::new(&clone).unwrap();
        let err = git.force_sync(&DeployRef::Branch("main".into()), false);
        assert!(matches!(err, Err(GitSyncError::CheckoutConflict { .. })));
        // The local edit is untouched without force.
        assert_eq!(
            fs::read_to_string(clone.join("a.txt")).unwrap(),
            "conflicting local edit\n"
        );
    }

    #[test]
    fn forced_deploy_resolves_the_same_conflict() {
        let (_root, origin, clone) = origin_and_clone();
        fs::write(origin.join("a.txt"), "v3 content\n").unwrap();
        run(&origin, &["commit", "-am", "third"]);
        fs::write(clone.join("a.txt"), "conflicting local edit\n").unwrap();

        let git = GitSync::new(&clone).unwrap();
        git.force_sync(&DeployRef::Branch("main".into()), true)
            .unwrap();
        assert_eq!(
            fs::read_to_string(clone.join("a.txt")).unwrap(),
            "v3 content\n"
        );
    }

    #[test]
    fn commit_deploy_detaches_at_sha() {
        let (_root, _origin, clone) = origin_and_clone();
        let git = GitSync::new(&clone).unwrap();
        let head = git.current_commit().unwrap();

        git.force_sync(&DeployRef::Commit(head.clone()), false)
            .unwrap();
        assert_eq!(git.current_commit().unwrap(), head);
    }
}
