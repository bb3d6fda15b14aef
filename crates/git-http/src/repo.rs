//! Repository descriptors and their lifecycle operations.
//!
//! A [`HostedRepository`] names a bare repository below the repositories root and
//! backs the HTTP endpoints. A [`WorkingCopy`] names a clone below the clones root.
//! Operations that only make sense on one of them exist only on that type.
//! Descriptors are cheap values built per request or operation; they never own the
//! directory they point at.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument};

use crate::errors::{EmptyRepositoryError, RepositoryError};
use crate::process::{DebugFlags, Invocation};
use crate::validation::{REPOSITORY_SUFFIX, strip_repository_suffix, validate_segment};

pub const DEFAULT_BRANCH: &str = "main";

/// Read-only settings the descriptors are resolved against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositorySettings {
    /// Prefix of every hosted clone URL, without trailing slash.
    pub base_url: String,
    pub repositories_root: PathBuf,
    pub clones_root: PathBuf,
    pub default_branch: String,
    pub debug: DebugFlags,
}

impl RepositorySettings {
    pub fn new(
        base_url: impl Into<String>,
        repositories_root: impl Into<PathBuf>,
        clones_root: impl Into<PathBuf>,
    ) -> Self {
        RepositorySettings {
            base_url: base_url.into(),
            repositories_root: repositories_root.into(),
            clones_root: clones_root.into(),
            default_branch: DEFAULT_BRANCH.to_string(),
            debug: DebugFlags::default(),
        }
    }
}

/// A path inside a repository tree, relative to its root.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct File {
    pub name: String,
}

/// Bare repository served over HTTP, at `<repositories_root>/<org>/<name>.git`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostedRepository {
    name: String,
    org_name: String,
    full_name: String,
    full_path: PathBuf,
    clone_url: String,
    default_branch: String,
    clones_root: PathBuf,
    debug: DebugFlags,
}

impl HostedRepository {
    /// Build a descriptor from a logical repository name (without suffix).
    pub fn new(
        settings: &RepositorySettings,
        org_name: &str,
        repo_name: &str,
    ) -> Result<Self, RepositoryError> {
        if repo_name.ends_with(REPOSITORY_SUFFIX) {
            return Err(RepositoryError::validation(format!(
                "{repo_name} must not end with '{REPOSITORY_SUFFIX}' as it is added automatically"
            )));
        }
        validate_segment("repository name", repo_name)?;
        validate_segment("org name", org_name)?;

        let full_name = format!("{repo_name}{REPOSITORY_SUFFIX}");
        let clone_url = format!(
            "{}/{}/{}",
            settings.base_url.trim_end_matches('/'),
            org_name,
            full_name
        );
        let full_path = settings.repositories_root.join(org_name).join(&full_name);

        Ok(HostedRepository {
            name: repo_name.to_string(),
            org_name: org_name.to_string(),
            full_name,
            full_path,
            clone_url,
            default_branch: settings.default_branch.clone(),
            clones_root: settings.clones_root.clone(),
            debug: settings.debug,
        })
    }

    /// Build a descriptor from the `<name>.git` segment of a request path.
    pub fn from_request_path(
        settings: &RepositorySettings,
        org_name: &str,
        repository_name: &str,
    ) -> Result<Self, RepositoryError> {
        let name = strip_repository_suffix(repository_name)?;
        HostedRepository::new(settings, org_name, name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn full_path(&self) -> &Path {
        &self.full_path
    }

    pub fn clone_url(&self) -> &str {
        &self.clone_url
    }

    pub fn default_branch(&self) -> &str {
        &self.default_branch
    }

    pub fn debug(&self) -> DebugFlags {
        self.debug
    }

    /// Override the branch `create_bare` initialises.
    pub fn with_default_branch(mut self, branch: impl Into<String>) -> Self {
        self.default_branch = branch.into();
        self
    }

    pub fn exists(&self) -> bool {
        self.full_path.is_dir()
    }

    /// `git init --bare --initial-branch=<default>` at the descriptor's path.
    #[instrument(skip(self), fields(path = %self.full_path.display()))]
    pub async fn create_bare(&self) -> Result<(), RepositoryError> {
        validate_branch(&self.default_branch)?;
        ensure_parent(&self.full_path).await?;

        Invocation::git(self.debug)
            .arg("init")
            .arg("--bare")
            .arg(format!("--initial-branch={}", self.default_branch))
            .arg(&self.full_path)
            .output()
            .await?;

        info!(branch = %self.default_branch, "repository created");
        Ok(())
    }

    /// Remove the bare repository. Missing directories are not an error.
    #[instrument(skip(self), fields(path = %self.full_path.display()))]
    pub async fn delete(&self) -> Result<(), RepositoryError> {
        remove_tree(&self.full_path).await
    }

    /// Descriptor of an existing clone at `<clones_root>/<org>/<destination>`.
    pub fn working_copy(&self, destination: &str) -> Result<WorkingCopy, RepositoryError> {
        validate_segment("clone destination", destination)?;
        Ok(WorkingCopy::open(
            self.clones_root.join(&self.org_name).join(destination),
            self.debug,
        ))
    }

    /// Clone through `clone_url` into `<clones_root>/<org>/<destination>`.
    #[instrument(skip(self), fields(url = %self.clone_url))]
    pub async fn clone_to(&self, destination: &str) -> Result<WorkingCopy, RepositoryError> {
        let clone = self.working_copy(destination)?;
        let clone_path = clone.full_path.clone();
        ensure_parent(&clone_path).await?;

        debug!(dest = %clone_path.display(), "cloning repository");
        Invocation::git(self.debug)
            .arg("clone")
            .arg(&self.clone_url)
            .arg(&clone_path)
            .output()
            .await?;

        info!(dest = %clone_path.display(), "repository cloned");
        Ok(clone)
    }

    /// Every file reachable from `branch_name`.
    pub async fn files(&self, branch_name: &str) -> Result<Vec<File>, RepositoryError> {
        list_files(&self.full_path, self.debug, branch_name).await
    }
}

/// Non-bare clone with a checked-out tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingCopy {
    full_path: PathBuf,
    debug: DebugFlags,
}

impl WorkingCopy {
    /// Wrap an existing checkout. Nothing is checked until an operation runs.
    pub fn open(full_path: impl Into<PathBuf>, debug: DebugFlags) -> Self {
        WorkingCopy {
            full_path: full_path.into(),
            debug,
        }
    }

    pub fn full_path(&self) -> &Path {
        &self.full_path
    }

    fn git(&self) -> Invocation {
        Invocation::git(self.debug).current_dir(&self.full_path)
    }

    /// Name of the checked-out branch.
    #[instrument(skip(self), fields(path = %self.full_path.display()))]
    pub async fn branch(&self) -> Result<String, RepositoryError> {
        let out = self.git().arg("branch").arg("--show-current").output().await?;
        Ok(strip_line_terminator(&out.stdout).to_string())
    }

    #[instrument(skip(self), fields(path = %self.full_path.display()))]
    pub async fn add_all(&self) -> Result<(), RepositoryError> {
        self.git().arg("add").arg(".").output().await?;
        Ok(())
    }

    #[instrument(skip(self), fields(path = %self.full_path.display()))]
    pub async fn commit(&self, message: &str) -> Result<(), RepositoryError> {
        self.git().arg("commit").arg("-m").arg(message).output().await?;
        Ok(())
    }

    /// Push the current branch to `origin` under the same name.
    #[instrument(skip(self), fields(path = %self.full_path.display()))]
    pub async fn push(&self) -> Result<(), RepositoryError> {
        self.git().arg("push").arg("origin").arg("HEAD").output().await?;
        Ok(())
    }

    /// `git config --list` as printed by git.
    pub async fn config_list(&self) -> Result<String, RepositoryError> {
        let out = self.git().arg("config").arg("--list").output().await?;
        Ok(out.stdout)
    }

    pub async fn set_config(&self, key: &str, value: &str) -> Result<(), RepositoryError> {
        debug!(key, value, "setting config");
        self.git().arg("config").arg(key).arg(value).output().await?;
        Ok(())
    }

    pub async fn files(&self, branch_name: &str) -> Result<Vec<File>, RepositoryError> {
        list_files(&self.full_path, self.debug, branch_name).await
    }

    /// Remove the checkout. Missing directories are not an error.
    #[instrument(skip(self), fields(path = %self.full_path.display()))]
    pub async fn delete(&self) -> Result<(), RepositoryError> {
        remove_tree(&self.full_path).await
    }
}

async fn list_files(
    repo_path: &Path,
    debug: DebugFlags,
    branch_name: &str,
) -> Result<Vec<File>, RepositoryError> {
    validate_branch(branch_name)?;

    let result = Invocation::git(debug)
        .current_dir(repo_path)
        .arg("ls-tree")
        .arg(branch_name)
        .arg("--full-tree")
        .arg("-r")
        .arg("--name-only")
        .arg("-z")
        .output()
        .await;

    match result {
        Ok(out) => Ok(out
            .stdout
            .split('\0')
            .filter(|name| !name.is_empty())
            .map(|name| File {
                name: name.to_string(),
            })
            .collect()),
        Err(RepositoryError::Process {
            code: Some(128),
            ref stderr,
            ..
        }) if is_missing_object(stderr, branch_name) => Err(EmptyRepositoryError {
            branch_name: branch_name.to_string(),
        }
        .into()),
        Err(err) => Err(err),
    }
}

/// Best-effort match on git's wording for an unresolvable revision. The text is
/// not a stable interface and may change between git versions.
fn is_missing_object(stderr: &str, branch_name: &str) -> bool {
    stderr.contains(&format!("fatal: Not a valid object name {branch_name}\n"))
}

fn validate_branch(branch_name: &str) -> Result<(), RepositoryError> {
    if branch_name.is_empty()
        || branch_name.starts_with('-')
        || branch_name.chars().any(|c| c.is_whitespace() || c.is_control())
    {
        return Err(RepositoryError::validation(format!(
            "invalid branch name {branch_name:?}"
        )));
    }
    Ok(())
}

fn strip_line_terminator(s: &str) -> &str {
    s.strip_suffix("\r\n")
        .or_else(|| s.strip_suffix('\n'))
        .unwrap_or(s)
}

async fn ensure_parent(path: &Path) -> Result<(), RepositoryError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|source| {
            RepositoryError::io(format!("failed to create {}", parent.display()), source)
        })?;
    }
    Ok(())
}

async fn remove_tree(path: &Path) -> Result<(), RepositoryError> {
    debug!("attempting to delete");
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => {
            debug!("deleted");
            Ok(())
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!("nothing to delete");
            Ok(())
        }
        Err(source) => Err(RepositoryError::io(
            format!("failed to delete repository at {}", path.display()),
            source,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn settings(root: &Path) -> RepositorySettings {
        RepositorySettings::new(
            "http://localhost:1323",
            root.join("repositories"),
            root.join("clones"),
        )
    }

    fn git_available() -> bool {
        std::process::Command::new("git")
            .arg("--version")
            .output()
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    #[test]
    fn hosted_descriptor_layout() {
        let tmp = TempDir::new().unwrap();
        let repo = HostedRepository::new(&settings(tmp.path()), "test_org", "demo").unwrap();
        assert_eq!(repo.name(), "demo");
        assert_eq!(repo.full_name(), "demo.git");
        assert_eq!(repo.clone_url(), "http://localhost:1323/test_org/demo.git");
        assert_eq!(
            repo.full_path(),
            tmp.path().join("repositories").join("test_org").join("demo.git")
        );
        assert_eq!(repo.default_branch(), "main");
        assert!(!repo.exists());
    }

    #[test]
    fn descriptor_rejects_bad_names_without_touching_disk() {
        let tmp = TempDir::new().unwrap();
        let settings = settings(tmp.path());
        let cases = [
            ("test_org", "test.git"),
            ("test_org", "test repository with spaces"),
            ("test org", "test"),
            ("..", "test"),
            ("test_org", "a/b"),
        ];
        for (org, name) in cases {
            let err = HostedRepository::new(&settings, org, name).unwrap_err();
            assert!(err.is_validation(), "{org}/{name}: {err}");
        }
        assert!(!tmp.path().join("repositories").exists());
    }

    #[test]
    fn request_path_requires_suffix() {
        let tmp = TempDir::new().unwrap();
        let settings = settings(tmp.path());
        let repo = HostedRepository::from_request_path(&settings, "org", "demo.git").unwrap();
        assert_eq!(repo.name(), "demo");
        assert!(HostedRepository::from_request_path(&settings, "org", "demo").is_err());
        assert!(HostedRepository::from_request_path(&settings, "org", "demo.git.git").is_err());
    }

    #[test]
    fn working_copy_lives_under_clones_root() {
        let tmp = TempDir::new().unwrap();
        let repo = HostedRepository::new(&settings(tmp.path()), "test_org", "demo").unwrap();
        let clone = repo.working_copy("checkout").unwrap();
        assert_eq!(
            clone.full_path(),
            tmp.path().join("clones").join("test_org").join("checkout")
        );
        assert!(repo.working_copy("../escape").unwrap_err().is_validation());
        assert!(repo.working_copy("").unwrap_err().is_validation());
    }

    #[test]
    fn base_url_trailing_slash_is_ignored() {
        let mut s = RepositorySettings::new("https://gitgud.com/", "r", "c");
        s.default_branch = "trunk".into();
        let repo = HostedRepository::new(&s, "acme", "tools").unwrap();
        assert_eq!(repo.clone_url(), "https://gitgud.com/acme/tools.git");
        assert_eq!(repo.default_branch(), "trunk");
    }

    #[test]
    fn strips_exactly_one_line_terminator() {
        assert_eq!(strip_line_terminator("main\n"), "main");
        assert_eq!(strip_line_terminator("main\r\n"), "main");
        assert_eq!(strip_line_terminator("main\n\n"), "main\n");
        assert_eq!(strip_line_terminator("main"), "main");
    }

    #[test]
    fn missing_object_matching() {
        assert!(is_missing_object("fatal: Not a valid object name main\n", "main"));
        assert!(!is_missing_object("fatal: Not a valid object name main\n", "dev"));
        assert!(!is_missing_object("fatal: not a git repository\n", "main"));
    }

    #[tokio::test]
    async fn delete_missing_repository_is_a_no_op() {
        let tmp = TempDir::new().unwrap();
        let repo = HostedRepository::new(&settings(tmp.path()), "org", "gone").unwrap();
        repo.delete().await.unwrap();
    }

    #[tokio::test]
    async fn invalid_branch_is_rejected_before_spawning() {
        let tmp = TempDir::new().unwrap();
        let repo = HostedRepository::new(&settings(tmp.path()), "org", "demo").unwrap();
        let err = repo.files("--output=/tmp/x").await.unwrap_err();
        assert!(err.is_validation());

        let err = repo
            .clone()
            .with_default_branch("bad branch")
            .create_bare()
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert!(!repo.exists());
    }

    #[tokio::test]
    async fn create_bare_sets_head_to_default_branch() {
        if !git_available() {
            eprintln!("Skipping test - git not available");
            return;
        }
        let tmp = TempDir::new().unwrap();
        let repo = HostedRepository::new(&settings(tmp.path()), "test_org", "test_repo")
            .unwrap()
            .with_default_branch("trunk");
        repo.create_bare().await.unwrap();
        assert!(repo.exists());

        let head = std::fs::read_to_string(repo.full_path().join("HEAD")).unwrap();
        assert_eq!(head, "ref: refs/heads/trunk\n");

        repo.delete().await.unwrap();
        assert!(!repo.exists());
        repo.delete().await.unwrap();
    }

    #[tokio::test]
    async fn files_on_empty_repository_is_reclassified() {
        if !git_available() {
            eprintln!("Skipping test - git not available");
            return;
        }
        let tmp = TempDir::new().unwrap();
        let repo = HostedRepository::new(&settings(tmp.path()), "test_org", "empty").unwrap();
        repo.create_bare().await.unwrap();

        match repo.files("main").await {
            Err(RepositoryError::Empty(EmptyRepositoryError { branch_name })) => {
                assert_eq!(branch_name, "main")
            }
            other => panic!("expected empty repository error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn branch_outside_a_repository_fails() {
        if !git_available() {
            eprintln!("Skipping test - git not available");
            return;
        }
        let tmp = TempDir::new().unwrap();
        let missing = WorkingCopy::open(tmp.path().join("nope"), DebugFlags::default());
        assert!(missing.branch().await.is_err());
    }
}
