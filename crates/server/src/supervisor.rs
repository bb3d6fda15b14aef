use std::future::Future;

use anyhow::{Error, Result};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Runs named long-lived tasks and tears all of them down once one fails,
/// panics or the process receives Ctrl-C.
pub struct Supervisor {
    shutdown: CancellationToken,
    tasks: JoinSet<(&'static str, Result<()>)>,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            shutdown: CancellationToken::new(),
            tasks: JoinSet::new(),
        }
    }

    pub fn spawn<F, Fut>(&mut self, name: &'static str, factory: F)
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let shutdown = self.shutdown.child_token();
        self.tasks.spawn(async move { (name, factory(shutdown).await) });
    }

    pub async fn run(mut self) -> Result<()> {
        let mut first_err: Option<Error> = None;

        while !self.tasks.is_empty() {
            tokio::select! {
                Some(outcome) = self.tasks.join_next() => {
                    self.record(&mut first_err, outcome);
                }
                _ = tokio::signal::ctrl_c(), if !self.shutdown.is_cancelled() => {
                    info!("received interrupt, shutting down");
                    self.shutdown.cancel();
                }
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn record(
        &self,
        first_err: &mut Option<Error>,
        outcome: std::result::Result<(&'static str, Result<()>), JoinError>,
    ) {
        let err = match outcome {
            Ok((name, Ok(()))) => {
                info!(task = name, "task exited gracefully");
                return;
            }
            Ok((name, Err(err))) => {
                error!(task = name, error = %err, "task exited with error");
                err
            }
            Err(join_err) => {
                error!(error = ?join_err, "task panicked");
                join_err.into()
            }
        };

        first_err.get_or_insert(err);
        if !self.shutdown.is_cancelled() {
            warn!("supervisor shutting down remaining tasks");
            self.shutdown.cancel();
        }
    }
}
