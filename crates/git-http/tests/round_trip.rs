//! End-to-end lifecycle through a live gateway backed by the `git` binary.

use std::sync::Arc;

use git_http::{
    EmptyRepositoryError, File, GitExecutor, GitHttpState, HostedRepository, RepositoryError,
    RepositorySettings, WorkingCopy,
};
use tempfile::TempDir;
use tokio::sync::Semaphore;

#[derive(Clone)]
struct LiveState {
    executor: GitExecutor,
    settings: Arc<RepositorySettings>,
    semaphore: Arc<Semaphore>,
}

impl GitHttpState for LiveState {
    type Executor = GitExecutor;

    fn executor(&self) -> &GitExecutor {
        &self.executor
    }

    fn settings(&self) -> &RepositorySettings {
        &self.settings
    }

    fn git_semaphore(&self) -> &Arc<Semaphore> {
        &self.semaphore
    }

    fn allow_push(&self) -> bool {
        true
    }
}

fn git_available() -> bool {
    std::process::Command::new("git")
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

/// Serve the gateway on an ephemeral port and return settings whose base URL points at it.
async fn serve(root: &TempDir) -> RepositorySettings {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let settings = RepositorySettings::new(
        format!("http://{addr}"),
        root.path().join("repositories"),
        root.path().join("clones"),
    );
    let state = LiveState {
        executor: GitExecutor,
        settings: Arc::new(settings.clone()),
        semaphore: Arc::new(Semaphore::new(8)),
    };
    tokio::spawn(async move {
        axum::serve(listener, git_http::router(state)).await.unwrap();
    });
    settings
}

async fn configure_identity(clone: &WorkingCopy) {
    clone.set_config("user.name", "Test User").await.unwrap();
    clone.set_config("user.email", "test@example.com").await.unwrap();
}

#[tokio::test]
async fn clone_of_fresh_repository_checks_out_default_branch() {
    if !git_available() {
        eprintln!("Skipping test - git not available");
        return;
    }
    let root = TempDir::new().unwrap();
    let settings = serve(&root).await;

    let hosted = HostedRepository::new(&settings, "test_org", "test_repo").unwrap();
    hosted.create_bare().await.unwrap();

    let head = std::fs::read_to_string(hosted.full_path().join("HEAD")).unwrap();
    assert_eq!(head, "ref: refs/heads/main\n");

    let clone = hosted.clone_to("test_cloned_repo").await.unwrap();
    assert_eq!(
        clone.full_path(),
        root.path().join("clones").join("test_org").join("test_cloned_repo")
    );
    assert_eq!(clone.branch().await.unwrap(), "main");

    let reopened = hosted.working_copy("test_cloned_repo").unwrap();
    assert_eq!(reopened, clone);
    assert_eq!(reopened.branch().await.unwrap(), "main");

    match hosted.files("main").await {
        Err(RepositoryError::Empty(EmptyRepositoryError { branch_name })) => {
            assert_eq!(branch_name, "main")
        }
        other => panic!("expected empty repository, got {other:?}"),
    }

    clone.delete().await.unwrap();
    hosted.delete().await.unwrap();
    assert!(!hosted.exists());
}

#[tokio::test]
async fn pushed_content_is_visible_to_later_clones() {
    if !git_available() {
        eprintln!("Skipping test - git not available");
        return;
    }
    let root = TempDir::new().unwrap();
    let settings = serve(&root).await;
    let contents = "This is a readme";

    let hosted = HostedRepository::new(&settings, "test_org", "test_repo").unwrap();
    hosted.create_bare().await.unwrap();

    let first = hosted.clone_to("test_cloned_repo_1").await.unwrap();
    configure_identity(&first).await;
    std::fs::write(first.full_path().join("readme.md"), contents).unwrap();
    first.add_all().await.unwrap();
    first.commit("Initial commit").await.unwrap();
    first.push().await.unwrap();

    let second = hosted.clone_to("test_cloned_repo_2").await.unwrap();
    let read = std::fs::read_to_string(second.full_path().join("readme.md")).unwrap();
    assert_eq!(read, contents);

    let expected = vec![File {
        name: "readme.md".to_string(),
    }];
    assert_eq!(hosted.files("main").await.unwrap(), expected);
    assert_eq!(second.files("main").await.unwrap(), expected);
    assert!(second.config_list().await.unwrap().contains("remote.origin.url="));
}

#[tokio::test]
async fn commit_without_changes_reports_process_error() {
    if !git_available() {
        eprintln!("Skipping test - git not available");
        return;
    }
    let root = TempDir::new().unwrap();
    let settings = serve(&root).await;

    let hosted = HostedRepository::new(&settings, "test_org", "quiet").unwrap();
    hosted.create_bare().await.unwrap();
    let clone = hosted.clone_to("quiet_clone").await.unwrap();
    configure_identity(&clone).await;

    let err = clone.commit("nothing to see").await.unwrap_err();
    assert!(matches!(err, RepositoryError::Process { .. }), "{err:?}");
}
