use tracing::debug;

use crate::errors::RepositoryError;
use crate::process::{Invocation, ServiceProcess};
use crate::repo::HostedRepository;
use crate::service::Service;

/// Protocol version handed to git when the client did not ask for one.
pub const DEFAULT_GIT_PROTOCOL: &str = "version=2";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceMode {
    /// `--advertise-refs`: print the ref advertisement and exit.
    Advertise,
    /// One request from stdin, one response on stdout.
    StatelessRpc,
}

/// Runs the transport side of a service for the gateway.
///
/// The gateway only frames and streams; whatever produces the bytes sits behind
/// this trait, so tests can swap the git binary for canned output.
pub trait TransportExecutor: Send + Sync + 'static {
    fn spawn(
        &self,
        repo: &HostedRepository,
        service: Service,
        mode: ServiceMode,
        git_protocol: &str,
    ) -> Result<ServiceProcess, RepositoryError>;
}

/// Shells out to the `git` binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitExecutor;

impl TransportExecutor for GitExecutor {
    fn spawn(
        &self,
        repo: &HostedRepository,
        service: Service,
        mode: ServiceMode,
        git_protocol: &str,
    ) -> Result<ServiceProcess, RepositoryError> {
        debug!(%service, ?mode, path = %repo.full_path().display(), "calling service");

        let mut invocation = Invocation::git(repo.debug())
            .arg(service.subcommand())
            .arg("--stateless-rpc");
        if mode == ServiceMode::Advertise {
            invocation = invocation
                .arg("--advertise-refs")
                .arg("--http-backend-info-refs");
        }

        invocation
            .arg(".")
            .current_dir(repo.full_path())
            .env("GIT_PROTOCOL", git_protocol)
            .spawn_streaming(mode == ServiceMode::StatelessRpc)
    }
}
