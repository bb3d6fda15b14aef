//! Smart HTTP endpoints: ref advertisement and stateless RPC.
//!
//! Both handlers validate the path, resolve a [`HostedRepository`], spawn the
//! transport through the state's [`TransportExecutor`] and hand back a streaming
//! body. A background task pumps process stdout into the body as it is produced
//! (and the request body into stdin for RPC). Nothing is buffered end to end.

use std::io::{self, Write};
use std::time::Instant;

use axum::Router;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, header};
use axum::response::Response;
use axum::routing::{get, post};
use bytes::Bytes;
use flate2::write::GzDecoder;
use futures::StreamExt;
use metrics::{counter, histogram};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::{OwnedSemaphorePermit, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::ReaderStream;
use tracing::{Instrument, debug, error, instrument, trace, warn};

use crate::errors::{GitHttpError, RepositoryError};
use crate::executor::{DEFAULT_GIT_PROTOCOL, ServiceMode, TransportExecutor};
use crate::pkt::service_prelude;
use crate::process::{BoxedReader, BoxedWriter, ServiceProcess};
use crate::repo::HostedRepository;
use crate::service::Service;
use crate::state::GitHttpState;

/// Chunks buffered between the process and the HTTP writer.
const BODY_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Deserialize)]
pub struct ServiceQuery {
    pub service: Option<String>,
}

/// Routes for both transport endpoints.
pub fn router<S: GitHttpState>(state: S) -> Router {
    Router::new()
        .route("/{org_name}/{repository_name}/info/refs", get(info_refs::<S>))
        .route("/{org_name}/{repository_name}/{service}", post(service_rpc::<S>))
        .with_state(state)
}

// GET /{org}/{repo}.git/info/refs?service=git-upload-pack|git-receive-pack
#[instrument(skip(state, query, headers))]
pub async fn info_refs<S: GitHttpState>(
    State(state): State<S>,
    Path((org_name, repository_name)): Path<(String, String)>,
    Query(query): Query<ServiceQuery>,
    headers: HeaderMap,
) -> Result<Response, GitHttpError> {
    let start = Instant::now();
    let repo = HostedRepository::from_request_path(state.settings(), &org_name, &repository_name)?;
    let service: Service = query.service.as_deref().unwrap_or_default().parse()?;
    check_access(&state, &repo, service)?;

    let permit = acquire_permit(&state).await?;
    let process = state.executor().spawn(
        &repo,
        service,
        ServiceMode::Advertise,
        git_protocol(&headers),
    )?;
    counter!("git_http.info_refs", "service" => service.as_str()).increment(1);

    let prelude = Bytes::from(service_prelude(service));
    let body = stream_process(process, Some(prelude), None, Pump {
        service,
        mode: ServiceMode::Advertise,
        permit,
        start,
    });
    streaming_response(service.advertisement_content_type(), body)
}

// POST /{org}/{repo}.git/git-upload-pack|git-receive-pack
#[instrument(skip(state, headers, body))]
pub async fn service_rpc<S: GitHttpState>(
    State(state): State<S>,
    Path((org_name, repository_name, service)): Path<(String, String, String)>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, GitHttpError> {
    let start = Instant::now();
    let repo = HostedRepository::from_request_path(state.settings(), &org_name, &repository_name)?;
    let service: Service = service.parse()?;
    check_access(&state, &repo, service)?;

    let permit = acquire_permit(&state).await?;
    let process = state.executor().spawn(
        &repo,
        service,
        ServiceMode::StatelessRpc,
        git_protocol(&headers),
    )?;
    counter!("git_http.service_rpc", "service" => service.as_str()).increment(1);

    let input = RequestInput {
        body,
        gzip: is_gzip(&headers),
    };
    let body = stream_process(process, None, Some(input), Pump {
        service,
        mode: ServiceMode::StatelessRpc,
        permit,
        start,
    });
    streaming_response(service.result_content_type(), body)
}

fn check_access<S: GitHttpState>(
    state: &S,
    repo: &HostedRepository,
    service: Service,
) -> Result<(), GitHttpError> {
    if service == Service::ReceivePack && !state.allow_push() {
        return Err(GitHttpError::Forbidden("push over HTTP is disabled".to_string()));
    }
    if !repo.exists() {
        debug!(path = %repo.full_path().display(), "repository missing");
        return Err(GitHttpError::NotFound);
    }
    Ok(())
}

async fn acquire_permit<S: GitHttpState>(state: &S) -> Result<OwnedSemaphorePermit, GitHttpError> {
    state
        .git_semaphore()
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| GitHttpError::Internal("service limiter closed".to_string()))
}

/// Client-requested protocol (`Git-Protocol` header) or version 2.
fn git_protocol(headers: &HeaderMap) -> &str {
    headers
        .get("Git-Protocol")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && v.chars().all(|c| c.is_ascii_graphic()))
        .unwrap_or(DEFAULT_GIT_PROTOCOL)
}

fn is_gzip(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("gzip") || v.eq_ignore_ascii_case("x-gzip"))
}

fn streaming_response(content_type: String, body: Body) -> Result<Response, GitHttpError> {
    let content_type = HeaderValue::from_str(&content_type)
        .map_err(|err| GitHttpError::Internal(format!("invalid content type: {err}")))?;
    let mut resp = Response::new(body);
    let headers = resp.headers_mut();
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    Ok(resp)
}

struct Pump {
    service: Service,
    mode: ServiceMode,
    permit: OwnedSemaphorePermit,
    start: Instant,
}

struct RequestInput {
    body: Body,
    gzip: bool,
}

enum PumpError {
    /// The response body was dropped, normally because the client went away.
    Disconnected,
    Failed(RepositoryError),
}

type BodySender = mpsc::Sender<Result<Bytes, io::Error>>;

/// Turn a spawned process into a response body fed from a background task.
///
/// A process failure after bytes were sent cannot change the status line any
/// more; it is logged and ends the body with an error so the client sees a
/// broken transfer instead of a clean end of stream.
fn stream_process(
    process: ServiceProcess,
    prelude: Option<Bytes>,
    input: Option<RequestInput>,
    pump: Pump,
) -> Body {
    let (tx, rx) = mpsc::channel(BODY_CHANNEL_CAPACITY);

    tokio::spawn(
        async move {
            let Pump {
                service,
                mode,
                permit,
                start,
            } = pump;
            let outcome = run_pump(process, prelude, input, &tx).await;
            drop(permit);

            match outcome {
                Ok(bytes) => {
                    record_duration(mode, service, start);
                    debug!(bytes, "service finished");
                }
                Err(PumpError::Disconnected) => {
                    counter!("git_http.failures", "stage" => "disconnect").increment(1);
                    warn!("client disconnected, service process terminated");
                }
                Err(PumpError::Failed(err)) => {
                    counter!("git_http.failures", "stage" => "stream").increment(1);
                    error!(error = %err, "failure calling service");
                    let _ = tx
                        .send(Err(io::Error::other(format!(
                            "failure calling service {service}: {err}"
                        ))))
                        .await;
                }
            }
        }
        .in_current_span(),
    );

    Body::from_stream(ReceiverStream::new(rx))
}

async fn run_pump(
    process: ServiceProcess,
    prelude: Option<Bytes>,
    input: Option<RequestInput>,
    tx: &BodySender,
) -> Result<u64, PumpError> {
    let ServiceProcess {
        stdin,
        stdout,
        exit,
    } = process;

    let mut sent = 0u64;
    if let Some(prelude) = prelude {
        sent += prelude.len() as u64;
        send(tx, prelude).await?;
    }

    // Without a request body stdin is dropped here, which the child sees as EOF.
    let feeder = match (stdin, input) {
        (Some(stdin), Some(input)) => Some(tokio::spawn(
            feed_stdin(stdin, input.body, input.gzip).in_current_span(),
        )),
        _ => None,
    };

    // Runs until stdout hits EOF and the process exited. Dropping it part way
    // drops `exit`, which kills the child.
    let piped = async {
        let forwarded = forward_stdout(stdout, tx).await?;
        exit.await.map_err(PumpError::Failed)?;
        Ok::<_, PumpError>(forwarded)
    };

    // A silent child never gives `send` the chance to notice the client left,
    // so the closed channel is watched on its own.
    let outcome = tokio::select! {
        outcome = piped => outcome,
        _ = tx.closed() => Err(PumpError::Disconnected),
    };

    if let Some(feeder) = feeder {
        if outcome.is_ok() && feeder.is_finished() {
            match feeder.await {
                Ok(Ok(fed)) => trace!(fed, "request body consumed"),
                Ok(Err(err)) => debug!(error = %err, "request body not fully delivered"),
                Err(err) => debug!(error = %err, "stdin feeder failed"),
            }
        } else {
            feeder.abort();
        }
    }

    Ok(sent + outcome?)
}

async fn send(tx: &BodySender, chunk: Bytes) -> Result<(), PumpError> {
    tx.send(Ok(chunk)).await.map_err(|_| PumpError::Disconnected)
}

async fn forward_stdout(stdout: BoxedReader, tx: &BodySender) -> Result<u64, PumpError> {
    let mut stream = ReaderStream::new(stdout);
    let mut total = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|err| {
            PumpError::Failed(RepositoryError::io("reading service output", err))
        })?;
        trace!(len = chunk.len(), "writing");
        total += chunk.len() as u64;
        send(tx, chunk).await?;
    }
    Ok(total)
}

/// Compressed bytes handed to the gzip decoder per step. Deflate expands at
/// most about 1032:1, so one step never inflates past roughly a megabyte.
const INFLATE_STEP: usize = 1024;

/// Incremental gzip inflater whose output per call is bounded by [`INFLATE_STEP`].
struct GzipInflater {
    decoder: GzDecoder<Vec<u8>>,
}

impl GzipInflater {
    fn new() -> Self {
        GzipInflater {
            decoder: GzDecoder::new(Vec::new()),
        }
    }

    /// Inflate at most `INFLATE_STEP` compressed bytes.
    fn step(&mut self, input: &[u8]) -> io::Result<Vec<u8>> {
        debug_assert!(input.len() <= INFLATE_STEP);
        self.decoder.write_all(input)?;
        Ok(std::mem::take(self.decoder.get_mut()))
    }

    fn finish(mut self) -> io::Result<Vec<u8>> {
        self.decoder.try_finish()?;
        Ok(std::mem::take(self.decoder.get_mut()))
    }
}

/// Copy the request body into the child's stdin, inflating it when the client
/// sent `Content-Encoding: gzip`, then close stdin.
async fn feed_stdin(mut stdin: BoxedWriter, body: Body, gzip: bool) -> io::Result<u64> {
    let mut stream = body.into_data_stream();
    let mut inflater = gzip.then(GzipInflater::new);
    let mut total = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(io::Error::other)?;
        match inflater.as_mut() {
            Some(inflater) => {
                for piece in chunk.chunks(INFLATE_STEP) {
                    let inflated = inflater.step(piece)?;
                    stdin.write_all(&inflated).await?;
                    total += inflated.len() as u64;
                }
            }
            None => {
                stdin.write_all(&chunk).await?;
                total += chunk.len() as u64;
            }
        }
    }

    if let Some(inflater) = inflater {
        let inflated = inflater.finish()?;
        stdin.write_all(&inflated).await?;
        total += inflated.len() as u64;
    }

    stdin.shutdown().await?;
    Ok(total)
}

fn record_duration(mode: ServiceMode, service: Service, start: Instant) {
    let ms = start.elapsed().as_millis() as f64;
    match mode {
        ServiceMode::Advertise => {
            histogram!("git_http.info_refs_ms", "service" => service.as_str()).record(ms)
        }
        ServiceMode::StatelessRpc => {
            histogram!("git_http.service_rpc_ms", "service" => service.as_str()).record(ms)
        }
    }
}
