//! Cancellable HTTP downloads of archives into job workspaces.
//!
//! A [`Transport`] owns one session. Every transfer started through it runs
//! as a tokio task and resolves its completion callback exactly once.
//! Cancelling the session resolves every in-flight transfer with
//! [`AcquireError::Cancelled`] and starts a fresh session for later
//! downloads.

mod registry;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::TransferConfig;
use crate::pipeline::AcquireError;
use crate::sanitize;

use registry::{TransferEntry, TransferRegistry};

pub use registry::{CompletionFn, TransferHandle};

/// Receives transfer fractions in [0, 1].
pub type ProgressFn = Arc<dyn Fn(f64) + Send + Sync>;

const PARTIAL_SUFFIX: &str = "part";

#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub job_id: String,
    pub owner_id: String,
    pub url: String,
    /// Final location of the archive inside the job's workspace.
    pub destination: PathBuf,
    /// Job-level token; cancelling it aborts this transfer as well.
    pub cancel: CancellationToken,
}

pub struct Transport {
    client: reqwest::Client,
    runtime: Handle,
    require_https: bool,
    session: Mutex<CancellationToken>,
    registry: Arc<TransferRegistry>,
    next_handle: AtomicU64,
}

impl Transport {
    /// Builds a transport whose tasks run on `runtime`.
    pub fn new(config: &TransferConfig, runtime: Handle) -> Result<Self, AcquireError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| AcquireError::TransferFailed(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            runtime,
            require_https: config.require_https,
            session: Mutex::new(CancellationToken::new()),
            registry: Arc::new(TransferRegistry::default()),
            next_handle: AtomicU64::new(1),
        })
    }

    /// Starts downloading `request.url` into `request.destination`.
    ///
    /// `on_progress` fires only when the server announces a non-zero length.
    /// `on_complete` is called exactly once, from a runtime thread or from
    /// whichever thread cancels the transfer.
    pub fn download(
        &self,
        request: TransferRequest,
        on_progress: ProgressFn,
        on_complete: CompletionFn,
    ) -> TransferHandle {
        let handle = TransferHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let transfer_cancel = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .child_token();

        self.registry.insert(
            handle,
            TransferEntry {
                job_id: request.job_id.clone(),
                owner_id: request.owner_id.clone(),
                destination: request.destination.clone(),
                cancel: transfer_cancel.clone(),
                on_complete,
            },
        );

        let span = info_span!(
            "transfer",
            %handle,
            job_id = %request.job_id,
            url = %sanitize::redact_url(&request.url),
        );
        let client = self.client.clone();
        let registry = Arc::clone(&self.registry);
        let require_https = self.require_https;

        self.runtime.spawn(
            async move {
                let resolver = ResolveOnExit {
                    registry,
                    handle,
                    resolved: false,
                };
                let result = run_transfer(
                    &client,
                    require_https,
                    &request,
                    &transfer_cancel,
                    on_progress.as_ref(),
                )
                .await;

                match &result {
                    Ok(path) => info!("Downloaded {}", sanitize::redact_path(path)),
                    Err(e) if e.is_cancelled() => info!("Transfer cancelled"),
                    Err(e) => warn!("Transfer failed: {}", e),
                }

                resolver.resolve(result);
            }
            .instrument(span),
        );

        handle
    }

    /// Cancels every in-flight transfer and starts a new session.
    pub fn cancel(&self) {
        {
            let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
            session.cancel();
            *session = CancellationToken::new();
        }

        let drained = self.registry.drain();
        if !drained.is_empty() {
            info!("Cancelling {} in-flight transfer(s)", drained.len());
        }
        for (handle, entry) in drained {
            debug!(
                %handle,
                job_id = %entry.job_id,
                destination = %sanitize::redact_path(&entry.destination),
                "Cancelling transfer"
            );
            entry.cancel.cancel();
            entry.finish(Err(AcquireError::Cancelled));
        }
    }

    /// Cancels a single transfer. Returns `false` if it had already resolved.
    pub fn cancel_transfer(&self, handle: TransferHandle) -> bool {
        match self.registry.take(handle) {
            Some(entry) => {
                debug!(
                    %handle,
                    job_id = %entry.job_id,
                    destination = %sanitize::redact_path(&entry.destination),
                    "Cancelling transfer"
                );
                entry.cancel.cancel();
                entry.finish(Err(AcquireError::Cancelled));
                true
            }
            None => false,
        }
    }

    /// Number of transfers that have not resolved yet.
    pub fn in_flight(&self) -> usize {
        self.registry.len()
    }

    /// Job and owner ids of an unresolved transfer.
    pub fn job_of(&self, handle: TransferHandle) -> Option<(String, String)> {
        self.registry.job_of(handle)
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("require_https", &self.require_https)
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}

/// Resolves a transfer's registry entry when its task ends. A task that
/// panics or is dropped by the runtime resolves with
/// [`AcquireError::PipelineAborted`] so the waiting job is never stranded.
struct ResolveOnExit {
    registry: Arc<TransferRegistry>,
    handle: TransferHandle,
    resolved: bool,
}

impl ResolveOnExit {
    fn resolve(mut self, result: Result<PathBuf, AcquireError>) {
        self.resolved = true;
        match self.registry.take(self.handle) {
            Some(entry) => entry.finish(result),
            None => debug!("Transfer already resolved"),
        }
    }
}

impl Drop for ResolveOnExit {
    fn drop(&mut self) {
        if self.resolved {
            return;
        }
        if let Some(entry) = self.registry.take(self.handle) {
            warn!(handle = %self.handle, job_id = %entry.job_id, "Transfer task ended without a result");
            entry.finish(Err(AcquireError::PipelineAborted(
                "transfer task ended without a result".to_string(),
            )));
        }
    }
}

fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".");
    name.push(PARTIAL_SUFFIX);
    destination.with_file_name(name)
}

async fn run_transfer(
    client: &reqwest::Client,
    require_https: bool,
    request: &TransferRequest,
    transfer_cancel: &CancellationToken,
    on_progress: &(dyn Fn(f64) + Send + Sync),
) -> Result<PathBuf, AcquireError> {
    let url = reqwest::Url::parse(&request.url)
        .map_err(|e| AcquireError::TransferFailed(format!("invalid URL: {}", e)))?;
    if require_https && url.scheme() != "https" {
        return Err(AcquireError::TransferFailed("insecure URL".to_string()));
    }

    let partial = partial_path(&request.destination);
    let streamed = tokio::select! {
        _ = transfer_cancel.cancelled() => Err(AcquireError::Cancelled),
        _ = request.cancel.cancelled() => Err(AcquireError::Cancelled),
        result = stream_to_file(client, url, &partial, on_progress) => result,
    };

    if let Err(e) = streamed {
        discard_partial(&partial).await;
        return Err(e);
    }
    if transfer_cancel.is_cancelled() || request.cancel.is_cancelled() {
        discard_partial(&partial).await;
        return Err(AcquireError::Cancelled);
    }

    if let Err(e) = tokio::fs::rename(&partial, &request.destination).await {
        discard_partial(&partial).await;
        return Err(AcquireError::TransferFailed(format!(
            "could not move download into place: {}",
            e
        )));
    }

    Ok(request.destination.clone())
}

async fn stream_to_file(
    client: &reqwest::Client,
    url: reqwest::Url,
    partial: &Path,
    on_progress: &(dyn Fn(f64) + Send + Sync),
) -> Result<(), AcquireError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| AcquireError::TransferFailed(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(AcquireError::TransferFailed(format!("HTTP {}", status)));
    }

    let expected = response.content_length().filter(|len| *len > 0);
    let mut file = tokio::fs::File::create(partial).await.map_err(|e| {
        AcquireError::TransferFailed(format!(
            "cannot create {}: {}",
            sanitize::redact_path(partial),
            e
        ))
    })?;

    let mut written: u64 = 0;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| AcquireError::TransferFailed(e.to_string()))?;
        file.write_all(&chunk)
            .await
            .map_err(|e| AcquireError::TransferFailed(e.to_string()))?;
        written += chunk.len() as u64;

        if let Some(total) = expected {
            on_progress((written as f64 / total as f64).min(1.0));
        }
    }

    file.flush()
        .await
        .map_err(|e| AcquireError::TransferFailed(e.to_string()))?;
    Ok(())
}

async fn discard_partial(partial: &Path) {
    match tokio::fs::remove_file(partial).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove partial download: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    fn insecure_config() -> TransferConfig {
        TransferConfig {
            require_https: false,
            ..TransferConfig::default()
        }
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) {
        let mut buf = vec![0u8; 4096];
        let mut seen = Vec::new();
        loop {
            let n = socket.read(&mut buf).await.unwrap_or(0);
            if n == 0 {
                return;
            }
            seen.extend_from_slice(&buf[..n]);
            if seen.windows(4).any(|w| w == b"\r\n\r\n") {
                return;
            }
        }
    }

    /// Serves one response. When `stall` is set, only half the body is sent
    /// and the connection is held open.
    async fn serve_once(status: &'static str, body: Vec<u8>, stall: bool) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_request(&mut socket).await;
            let head = format!(
                "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                status,
                body.len()
            );
            socket.write_all(head.as_bytes()).await.unwrap();
            if stall {
                socket.write_all(&body[..body.len() / 2]).await.unwrap();
                socket.flush().await.unwrap();
                tokio::time::sleep(Duration::from_secs(30)).await;
            } else {
                socket.write_all(&body).await.unwrap();
            }
        });
        format!("http://{}/App.ipa", addr)
    }

    fn request(url: String, destination: PathBuf) -> TransferRequest {
        TransferRequest {
            job_id: "job-1".to_string(),
            owner_id: "owner-1".to_string(),
            url,
            destination,
            cancel: CancellationToken::new(),
        }
    }

    fn completion() -> (CompletionFn, oneshot::Receiver<Result<PathBuf, AcquireError>>) {
        let (tx, rx) = oneshot::channel();
        (
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
            rx,
        )
    }

    async fn wait_until_gone(path: &Path) -> bool {
        for _ in 0..100 {
            if !path.exists() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_download_success_reports_progress() {
        let tmp = TempDir::new().unwrap();
        let body = vec![7u8; 256 * 1024];
        let url = serve_once("200 OK", body.clone(), false).await;
        let transport = Transport::new(&insecure_config(), Handle::current()).unwrap();

        let fractions = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&fractions);
        let (on_complete, rx) = completion();
        let dest = tmp.path().join("App.ipa");

        transport.download(
            request(url, dest.clone()),
            Arc::new(move |f| sink.lock().unwrap().push(f)),
            on_complete,
        );

        let path = rx.await.unwrap().unwrap();
        assert_eq!(path, dest);
        assert_eq!(std::fs::read(&dest).unwrap(), body);
        assert!(!partial_path(&dest).exists());

        let fractions = fractions.lock().unwrap();
        assert_eq!(fractions.last().copied(), Some(1.0));
        assert!(fractions.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(transport.in_flight(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_http_error_status_fails() {
        let tmp = TempDir::new().unwrap();
        let url = serve_once("404 Not Found", b"missing".to_vec(), false).await;
        let transport = Transport::new(&insecure_config(), Handle::current()).unwrap();
        let (on_complete, rx) = completion();
        let dest = tmp.path().join("App.ipa");

        transport.download(request(url, dest.clone()), Arc::new(|_| {}), on_complete);

        match rx.await.unwrap() {
            Err(AcquireError::TransferFailed(reason)) => assert!(reason.contains("404")),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(!dest.exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_plain_http_rejected_when_https_required() {
        let tmp = TempDir::new().unwrap();
        let transport = Transport::new(&TransferConfig::default(), Handle::current()).unwrap();
        let (on_complete, rx) = completion();

        transport.download(
            request(
                "http://127.0.0.1:9/App.ipa".to_string(),
                tmp.path().join("App.ipa"),
            ),
            Arc::new(|_| {}),
            on_complete,
        );

        match rx.await.unwrap() {
            Err(AcquireError::TransferFailed(reason)) => assert_eq!(reason, "insecure URL"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_session_cancel_completes_exactly_once() {
        let tmp = TempDir::new().unwrap();
        let url = serve_once("200 OK", vec![1u8; 512 * 1024], true).await;
        let transport = Transport::new(&insecure_config(), Handle::current()).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = oneshot::channel();
        let counter = Arc::clone(&calls);
        let (progress_tx, mut progress_rx) = tokio::sync::mpsc::unbounded_channel();
        let dest = tmp.path().join("App.ipa");

        transport.download(
            request(url, dest.clone()),
            Arc::new(move |f| {
                let _ = progress_tx.send(f);
            }),
            Box::new(move |result| {
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = tx.send(result);
            }),
        );

        // Wait until bytes are flowing, then cancel the session.
        progress_rx.recv().await.unwrap();
        assert_eq!(transport.in_flight(), 1);
        transport.cancel();

        assert!(matches!(rx.await.unwrap(), Err(AcquireError::Cancelled)));
        assert!(wait_until_gone(&partial_path(&dest)).await);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(transport.in_flight(), 0);
        assert!(!dest.exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_single_transfer() {
        let tmp = TempDir::new().unwrap();
        let url = serve_once("200 OK", vec![1u8; 512 * 1024], true).await;
        let transport = Transport::new(&insecure_config(), Handle::current()).unwrap();
        let (on_complete, rx) = completion();

        let handle = transport.download(
            request(url, tmp.path().join("App.ipa")),
            Arc::new(|_| {}),
            on_complete,
        );

        assert_eq!(
            transport.job_of(handle),
            Some(("job-1".to_string(), "owner-1".to_string()))
        );
        assert!(transport.cancel_transfer(handle));
        assert!(!transport.cancel_transfer(handle));
        assert!(matches!(rx.await.unwrap(), Err(AcquireError::Cancelled)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_task_panic_resolves_transfer() {
        let tmp = TempDir::new().unwrap();
        let url = serve_once("200 OK", vec![3u8; 64 * 1024], false).await;
        let transport = Transport::new(&insecure_config(), Handle::current()).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let (tx, rx) = oneshot::channel();

        transport.download(
            request(url, tmp.path().join("App.ipa")),
            Arc::new(|_| panic!("progress sink crashed")),
            Box::new(move |result| {
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = tx.send(result);
            }),
        );

        match rx.await.unwrap() {
            Err(AcquireError::PipelineAborted(reason)) => {
                assert!(reason.contains("without a result"))
            }
            other => panic!("unexpected result: {:?}", other),
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(transport.in_flight(), 0);
    }

    #[test]
    fn test_partial_path_appends_suffix() {
        assert_eq!(
            partial_path(Path::new("/ws/App.ipa")),
            PathBuf::from("/ws/App.ipa.part")
        );
    }
}
