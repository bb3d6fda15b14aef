//! Full server stack: config projection, health, metrics and the git gateway.

use gitgud_server::api::server::{AppState, prepare_storage, serve};
use gitgud_server::config::Config;
use gitgud_server::metrics_exporter::init_metrics;
use git_http::HostedRepository;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

struct TestServer {
    base: String,
    config: Config,
    shutdown: CancellationToken,
    handle: tokio::task::JoinHandle<anyhow::Result<()>>,
    _root: TempDir,
}

async fn start_server() -> TestServer {
    let root = TempDir::new().unwrap();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let config = Config {
        listen_addr: addr,
        base_url: format!("http://{addr}"),
        repositories_root: root.path().join("repositories"),
        clones_root: root.path().join("clones"),
        ..Config::default()
    };
    prepare_storage(&config).await.unwrap();

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(serve(listener, AppState::new(&config), shutdown.clone()));

    TestServer {
        base: format!("http://{addr}"),
        config,
        shutdown,
        handle,
        _root: root,
    }
}

fn git_available() -> bool {
    std::process::Command::new("git")
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

#[tokio::test]
async fn test_storage_roots_are_created() {
    let server = start_server().await;
    assert!(server.config.repositories_root.is_dir());
    assert!(server.config.clones_root.is_dir());
}

#[tokio::test]
async fn test_healthz() {
    let server = start_server().await;
    let resp = reqwest::get(format!("{}/healthz", server.base)).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn test_graceful_shutdown() {
    let server = start_server().await;
    server.shutdown.cancel();
    assert!(server.handle.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_unknown_repository_is_not_found() {
    let server = start_server().await;
    let resp = reqwest::get(format!(
        "{}/nobody/nothing.git/info/refs?service=git-upload-pack",
        server.base
    ))
    .await
    .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_advertisement_is_counted_in_metrics() {
    if !git_available() {
        eprintln!("Skipping test - git not available");
        return;
    }
    init_metrics().unwrap();
    let server = start_server().await;

    let settings = server.config.repository_settings();
    let repo = HostedRepository::new(&settings, "test_org", "served").unwrap();
    repo.create_bare().await.unwrap();

    let resp = reqwest::get(format!(
        "{}/test_org/served.git/info/refs?service=git-upload-pack",
        server.base
    ))
    .await
    .unwrap();
    assert_eq!(resp.status(), 200);
    let body = resp.bytes().await.unwrap();
    assert!(body.starts_with(b"001e# service=git-upload-pack\n0000"));

    let metrics = reqwest::get(format!("{}/metrics", server.base))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(metrics.contains("git_http_info_refs"), "{metrics}");
}
