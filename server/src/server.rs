//! Server lifecycle and the HTTP request pipeline

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use http::header::{HeaderValue, ALLOW};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{body::Incoming, Request as HyperRequest, Response as HyperResponse, StatusCode};
use hyper_util::rt::TokioIo;
use hyper_util::server::graceful::GracefulShutdown;
use sonar_core::cache::JANITOR_INTERVAL;
use sonar_core::llm::{OllamaProvider, OllamaStatus};
use sonar_core::{ProviderRegistry, Router};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::api;
use crate::config::{EnvSource, SonarConfig};
use crate::error::{SonarError, SonarResult};
use crate::handler::BoxedHandler;
use crate::logging;
use crate::middleware::{Context, MiddlewareChain};
use crate::request::RequestData;
use crate::response::{ResponseBody, SonarResponse};
use crate::state::{ApiKeys, AppState};

/// Requests a running [`Server::run`] to stop
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    notify: Arc<Notify>,
}

impl StopHandle {
    /// Ask the running server to stop. Requests made while no server is
    /// running are dropped by the next `start`.
    pub fn stop(&self) {
        self.notify.notify_one();
    }

    fn discard_pending(&self) {
        // a stored permit completes the first poll
        let _ = self.notify.notified().now_or_never();
    }

    async fn stopped(&self) {
        self.notify.notified().await
    }
}

/// Routes, middleware and state shared by every connection
struct Service {
    state: Arc<AppState>,
    router: Router<BoxedHandler>,
    middleware: MiddlewareChain,
}

impl Service {
    async fn handle_request(
        &self,
        hyper_req: HyperRequest<Incoming>,
        remote_addr: SocketAddr,
    ) -> HyperResponse<ResponseBody> {
        let (parts, body) = hyper_req.into_parts();

        let limit = self.state.config.max_request_body_size;
        let body = match Limited::new(body, limit).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
                warn!("Rejected body larger than {} bytes from {}", limit, remote_addr);
                return SonarResponse::error(
                    StatusCode::PAYLOAD_TOO_LARGE,
                    "Request body too large",
                )
                .into_hyper();
            }
            Err(e) => {
                error!("Failed to read request body: {}", e);
                return SonarResponse::error(
                    StatusCode::BAD_REQUEST,
                    "Unable to read request body",
                )
                .into_hyper();
            }
        };

        let request = RequestData::new(parts.method, &parts.uri, parts.headers, body, remote_addr);
        self.dispatch(request).await.into_hyper()
    }

    /// Route, then run the middleware chain around the handler
    async fn dispatch(&self, request: RequestData) -> SonarResponse {
        let handler = match self.router.at(&request.method, &request.path) {
            Some(handler) => handler,
            None => return self.unrouted(&request),
        };

        let ctx = Context::new(request, Arc::clone(&self.state));
        let timeout = self.state.config.request_timeout();
        match tokio::time::timeout(timeout, self.middleware.execute(ctx, handler)).await {
            Ok(response) => response,
            Err(_) => SonarResponse::from_error(&SonarError::Timeout(format!(
                "request took longer than {:?}",
                timeout
            ))),
        }
    }

    /// 405 with `Allow` when the path exists under other methods, else 404
    fn unrouted(&self, request: &RequestData) -> SonarResponse {
        let allowed = self.router.allowed_methods(&request.path);
        if allowed.is_empty() {
            debug!("No route for {} {}", request.method, request.path);
            return SonarResponse::error(
                StatusCode::NOT_FOUND,
                format!("No route found for {} {}", request.method, request.path),
            );
        }

        let allow = allowed
            .iter()
            .map(|m| m.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let response = SonarResponse::error(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed");
        match HeaderValue::from_str(&allow) {
            Ok(value) => response.with_header(ALLOW, value),
            Err(_) => response,
        }
    }
}

/// Tasks and handles of a started server
struct Running {
    local_addr: SocketAddr,
    state: Arc<AppState>,
    shutdown_tx: oneshot::Sender<()>,
    accept_task: JoinHandle<()>,
    janitor: JoinHandle<()>,
}

/// The Open Sonar answer server
///
/// ```no_run
/// use sonar::{Server, SonarConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), sonar::SonarError> {
///     let mut server = Server::new(SonarConfig::new().port(8080));
///     server.add_auth_token("secret").await;
///     server.run().await
/// }
/// ```
pub struct Server {
    config: SonarConfig,
    api_keys: ApiKeys,
    stop: StopHandle,
    running: Option<Running>,
}

impl Server {
    pub fn new(config: SonarConfig) -> Self {
        Self {
            config,
            api_keys: ApiKeys::new(),
            stop: StopHandle::default(),
            running: None,
        }
    }

    /// Bind and start serving in the background
    pub async fn start(&mut self) -> SonarResult<()> {
        if self.running.is_some() {
            return Err(SonarError::InvalidState("server already running".to_string()));
        }
        self.stop.discard_pending();

        let mut env = EnvSource::process();
        if self.config.load_env_file {
            env = env.with_env_file(&self.config.env_file_path);
        }
        self.config.merge_env(&env);
        self.config.validate()?;
        logging::set_level(self.config.log_level);

        if let Some(token) = &self.config.auth_token {
            self.api_keys.add(token.clone()).await;
        }

        let state = Arc::new(AppState::new(self.config.clone(), self.api_keys.clone()));
        if !self.config.cache_peers.is_empty() {
            info!(
                "🌐 Distributed cache enabled with {} peers",
                self.config.cache_peers.len()
            );
            state
                .cache
                .enable_distributed(self.config.cache_peers.clone(), self.config.auth_token.clone())
                .await;
        }

        let service = Arc::new(Service {
            state: Arc::clone(&state),
            router: api::routes()?,
            middleware: MiddlewareChain::standard(),
        });

        let addr = self.config.socket_addr();
        let listener = TcpListener::bind(addr.as_str()).await.map_err(|e| {
            error!("Failed to bind {}: {}", addr, e);
            SonarError::Io(e)
        })?;
        let local_addr = listener.local_addr()?;

        info!("🚀 Open Sonar listening on http://{}", local_addr);
        info!("📊 Router contains {} routes", service.router.total_routes());

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let accept_task = tokio::spawn(accept_loop(
            listener,
            service,
            shutdown_rx,
            self.config.shutdown_timeout(),
        ));
        let janitor = state.cache.spawn_janitor(JANITOR_INTERVAL);

        self.running = Some(Running {
            local_addr,
            state,
            shutdown_tx,
            accept_task,
            janitor,
        });
        Ok(())
    }

    /// Start, then serve until SIGINT/SIGTERM or [`StopHandle::stop`]
    pub async fn run(&mut self) -> SonarResult<()> {
        self.start().await?;

        let stop = self.stop.clone();
        tokio::select! {
            _ = shutdown_signal() => {
                info!("📛 Received shutdown signal");
            }
            _ = stop.stopped() => {
                info!("📛 Stop requested");
            }
        }

        self.stop().await
    }

    /// Stop accepting connections and wait for in-flight ones, up to the
    /// shutdown timeout. Does nothing when the server is not running.
    pub async fn stop(&mut self) -> SonarResult<()> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };

        info!("🛑 Initiating graceful shutdown");
        running.janitor.abort();
        let _ = running.shutdown_tx.send(());
        if let Err(e) = running.accept_task.await {
            if !e.is_cancelled() {
                return Err(SonarError::Internal(format!("accept loop failed: {}", e)));
            }
        }

        info!("👋 Open Sonar shut down successfully");
        Ok(())
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Bound address while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.local_addr)
    }

    /// `http://localhost:<port>`, with the bound port once running
    pub fn server_url(&self) -> String {
        match &self.running {
            Some(running) => format!("http://localhost:{}", running.local_addr.port()),
            None => self.config.server_url(),
        }
    }

    /// Shared state of the running server
    pub fn state(&self) -> Option<Arc<AppState>> {
        self.running.as_ref().map(|r| Arc::clone(&r.state))
    }

    pub fn config(&self) -> &SonarConfig {
        &self.config
    }

    /// Accept `token` as an API key; takes effect immediately when running
    pub async fn add_auth_token<S: Into<String>>(&self, token: S) {
        self.api_keys.add(token).await;
    }

    /// Make `name` the default LLM provider after checking it can be
    /// resolved
    pub async fn set_llm_provider(&mut self, name: &str) -> SonarResult<()> {
        match &self.running {
            Some(running) => {
                running.state.providers.resolve(name).await?;
                running.state.providers.set_default_provider(name).await?;
            }
            None => {
                let registry = ProviderRegistry::new(self.config.llm_settings());
                registry.resolve(name).await?;
                registry.set_default_provider(name).await?;
            }
        }
        self.config.default_provider = Some(name.to_string());
        Ok(())
    }

    /// Reachability and models of the configured Ollama server
    pub async fn check_ollama(&self) -> OllamaStatus {
        OllamaProvider::new(&self.config.llm_settings()).status().await
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.janitor.abort();
            let _ = running.shutdown_tx.send(());
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    service: Arc<Service>,
    mut shutdown_rx: oneshot::Receiver<()>,
    shutdown_timeout: Duration,
) {
    let graceful = GracefulShutdown::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, remote_addr) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        continue;
                    }
                };

                let io = TokioIo::new(stream);
                let service = Arc::clone(&service);
                let svc = service_fn(move |req| {
                    let service = Arc::clone(&service);
                    async move {
                        Ok::<_, Infallible>(service.handle_request(req, remote_addr).await)
                    }
                });

                let conn = graceful.watch(http1::Builder::new().serve_connection(io, svc));
                tokio::spawn(async move {
                    if let Err(err) = conn.await {
                        debug!("Error serving connection from {}: {:?}", remote_addr, err);
                    }
                });
            }
            _ = &mut shutdown_rx => break,
        }
    }

    drop(listener);
    tokio::select! {
        _ = graceful.shutdown() => {
            debug!("All connections closed");
        }
        _ = tokio::time::sleep(shutdown_timeout) => {
            warn!("Shutdown timed out after {:?} with connections still open", shutdown_timeout);
        }
    }
}

/// Resolves on SIGINT, SIGTERM or Ctrl+C
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use signal::unix::{signal as unix_signal, SignalKind};

        match (
            unix_signal(SignalKind::terminate()),
            unix_signal(SignalKind::interrupt()),
        ) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM signal"),
                    _ = sigint.recv() => info!("Received SIGINT signal"),
                    _ = signal::ctrl_c() => info!("Received Ctrl+C"),
                }
            }
            _ => {
                warn!("Failed to install unix signal handlers, waiting for Ctrl+C only");
                let _ = signal::ctrl_c().await;
                info!("Received Ctrl+C");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
        info!("Received Ctrl+C");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::{HeaderMap, Method, Uri};

    fn test_config() -> SonarConfig {
        SonarConfig::new()
            .port(0)
            .hostname("127.0.0.1")
            .without_env_file()
            .test_mode(true)
    }

    fn service() -> Service {
        Service {
            state: Arc::new(AppState::new(test_config(), ApiKeys::new())),
            router: api::routes().unwrap(),
            middleware: MiddlewareChain::standard(),
        }
    }

    fn request(method: Method, uri: &'static str) -> RequestData {
        RequestData::new(
            method,
            &Uri::from_static(uri),
            HeaderMap::new(),
            Bytes::new(),
            "127.0.0.1:5000".parse().unwrap(),
        )
    }

    #[tokio::test]
    async fn test_dispatch_not_found_and_not_allowed() {
        let service = service();

        let resp = service.dispatch(request(Method::GET, "/nope")).await;
        assert_eq!(resp.status, StatusCode::NOT_FOUND);

        let resp = service.dispatch(request(Method::GET, "/chat")).await;
        assert_eq!(resp.status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(resp.headers.get(ALLOW).unwrap(), "POST");
    }

    #[tokio::test]
    async fn test_dispatch_runs_handler() {
        let resp = service().dispatch(request(Method::GET, "/test")).await;
        assert_eq!(resp.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let mut server = Server::new(test_config());
        assert!(!server.is_running());
        assert_eq!(server.server_url(), "http://localhost:0");
        server.stop().await.unwrap();

        server.start().await.unwrap();
        assert!(server.is_running());
        let port = server.local_addr().unwrap().port();
        assert_ne!(port, 0);
        assert_eq!(server.server_url(), format!("http://localhost:{}", port));

        assert!(matches!(
            server.start().await,
            Err(SonarError::InvalidState(_))
        ));

        server.stop().await.unwrap();
        assert!(!server.is_running());
        assert!(server.local_addr().is_none());
    }

    #[tokio::test]
    async fn test_run_returns_on_stop_handle() {
        let mut server = Server::new(test_config());
        let handle = server.stop_handle();
        // left over from before the server existed
        handle.stop();

        let task = tokio::spawn(async move {
            server.run().await.unwrap();
            server
        });
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!task.is_finished());

        handle.stop();
        let server = tokio::time::timeout(Duration::from_secs(10), task)
            .await
            .unwrap()
            .unwrap();
        assert!(!server.is_running());
    }

    #[tokio::test]
    async fn test_stale_stop_does_not_end_next_run() {
        let mut server = Server::new(test_config());
        let handle = server.stop_handle();
        server.start().await.unwrap();
        server.stop().await.unwrap();
        handle.stop();

        server.start().await.unwrap();
        let stopped = tokio::time::timeout(Duration::from_millis(100), handle.stopped()).await;
        assert!(stopped.is_err());
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_set_llm_provider() {
        let mut server = Server::new(test_config());
        server.set_llm_provider("openai").await.unwrap();
        assert_eq!(server.config().default_provider.as_deref(), Some("openai"));

        assert!(server.set_llm_provider("gpt-unknown").await.is_err());
        assert_eq!(server.config().default_provider.as_deref(), Some("openai"));
    }

    #[tokio::test]
    async fn test_bind_error_surfaces_from_start() {
        let mut first = Server::new(test_config());
        first.start().await.unwrap();
        let port = first.local_addr().unwrap().port();

        let mut second = Server::new(test_config().port(port));
        assert!(matches!(second.start().await, Err(SonarError::Io(_))));
        assert!(!second.is_running());

        first.stop().await.unwrap();
    }
}
