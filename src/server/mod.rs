//! HTTP server wrapper around an axum router
//!
//! Routes and middleware are collected on a [`Server`] before it starts; the
//! fully assembled service always carries request logging and panic recovery.
//!
//! ```no_run
//! use servekit::server::{Server, ServerConfig};
//!
//! # async fn run() -> servekit::Result<()> {
//! let mut server = Server::new(ServerConfig::from_env()?);
//! server.register_routes(|rg| {
//!     rg.get("/ping", || async { axum::Json(serde_json::json!({"message": "pong"})) });
//! });
//! server.start().await
//! # }
//! ```

mod config;
pub mod handlers;
mod route;

pub use config::{Mode, ServerConfig};
pub use route::{join_paths, to_axum_path, HttpMethod, Middleware, RouteDescriptor, RouteGroup};

use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use axum::{handler::Handler, routing::on, Router};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

use crate::context::Context;
use crate::error::{Error, Result};

/// Pause after a failed accept, e.g. when out of file descriptors
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Handle on the listener currently being served
struct Running {
    graceful: CancellationToken,
    abort: CancellationToken,
    finished: watch::Receiver<bool>,
}

pub struct Server {
    config: ServerConfig,
    router: Router,
    middleware: Vec<Middleware>,
    running: Mutex<Option<Running>>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        tracing::debug!("Creating server in {} mode", config.mode);
        Self {
            config,
            router: Router::new(),
            middleware: Vec::new(),
            running: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The underlying router holding every registered route
    pub fn engine(&self) -> &Router {
        &self.router
    }

    pub fn engine_mut(&mut self) -> &mut Router {
        &mut self.router
    }

    /// Add engine-wide middleware; it runs for every request in registration order.
    pub fn register_middleware(&mut self, middleware: impl IntoIterator<Item = Middleware>) {
        self.middleware.extend(middleware);
    }

    /// Register a single route by method name (`GET`, `POST`, `PUT`, `PATCH`, `DELETE`).
    ///
    /// Any other method is logged as unsupported, registers nothing and is
    /// returned as [`Error::UnsupportedMethod`].
    pub fn register_route<H, T>(&mut self, method: &str, path: &str, handler: H) -> Result<()>
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        let method = route::parse_method(method)?;
        let path = to_axum_path(path);
        self.router = std::mem::take(&mut self.router).route(&path, on(method.filter(), handler));
        self.log_route(method, &path);
        Ok(())
    }

    /// Register public routes on a group rooted at `/`.
    pub fn register_routes<F>(&mut self, register: F)
    where
        F: FnOnce(&mut RouteGroup),
    {
        self.mount(RouteGroup::new("/"), register);
    }

    /// Register routes under `/private`, each wrapped in `middleware`.
    pub fn register_private_routes<F>(
        &mut self,
        register: F,
        middleware: impl IntoIterator<Item = Middleware>,
    ) where
        F: FnOnce(&mut RouteGroup),
    {
        let mut group = RouteGroup::new("/private");
        group.use_middleware(middleware);
        self.mount(group, register);
    }

    /// Bulk registration: every descriptor becomes one route at its own path,
    /// wrapped in its own middleware.
    ///
    /// Descriptors with unsupported methods are logged and skipped; the first
    /// one is reported once every descriptor has been processed.
    pub fn routes(&mut self, routes: impl IntoIterator<Item = RouteDescriptor>) -> Result<()> {
        let mut rejected = None;
        for route in routes {
            match route.into_router() {
                Ok((method, path, router)) => {
                    self.router = std::mem::take(&mut self.router).merge(router);
                    self.log_route(method, &path);
                }
                Err(err) => {
                    rejected.get_or_insert(err);
                }
            }
        }
        rejected.map_or(Ok(()), Err)
    }

    fn mount<F>(&mut self, mut group: RouteGroup, register: F)
    where
        F: FnOnce(&mut RouteGroup),
    {
        register(&mut group);
        for (method, path) in group.routes() {
            self.log_route(*method, path);
        }
        if let Some(router) = group.into_router() {
            self.router = std::mem::take(&mut self.router).merge(router);
        }
    }

    fn log_route(&self, method: HttpMethod, path: &str) {
        if self.config.mode == Mode::Debug {
            tracing::info!("{:<6} {}", method, path);
        } else {
            tracing::debug!("{:<6} {}", method, path);
        }
    }

    /// The complete service: routes, engine middleware, panic recovery and request logging.
    pub fn app(&self) -> Router {
        route::wrap_router(self.router.clone(), &self.middleware)
            .layer(CatchPanicLayer::custom(handlers::recover_panic))
            .layer(TraceLayer::new_for_http())
    }

    /// Bind the configured address and serve until shut down.
    ///
    /// The server counts as running from before the bind, so a `shutdown`
    /// issued while binding stops it as soon as the listener is up.
    pub async fn start(&self) -> Result<()> {
        let running = self.reserve()?;
        let listener = TcpListener::bind(self.config.addr()).await?;
        self.serve(listener, running).await
    }

    /// Serve on an already bound listener until shut down.
    ///
    /// Returns `Ok(())` once a shutdown completes, including one forced at its
    /// deadline.
    pub async fn start_with_listener(&self, listener: TcpListener) -> Result<()> {
        let running = self.reserve()?;
        self.serve(listener, running).await
    }

    fn reserve(&self) -> Result<RunningGuard<'_>> {
        let mut slot = self.lock_running();
        if slot.is_some() {
            return Err(Error::AlreadyRunning);
        }
        let graceful = CancellationToken::new();
        let abort = CancellationToken::new();
        let (done, finished) = watch::channel(false);
        *slot = Some(Running {
            graceful: graceful.clone(),
            abort: abort.clone(),
            finished,
        });
        Ok(RunningGuard {
            server: self,
            graceful,
            abort,
            done,
        })
    }

    /// Accept loop. Every connection runs in `connections` so a forced
    /// shutdown can close the ones still open.
    async fn serve(&self, listener: TcpListener, running: RunningGuard<'_>) -> Result<()> {
        let addr = listener.local_addr()?;
        let app = self.app();
        let mut connections = JoinSet::new();

        tracing::info!("Server is running at {}", addr);

        loop {
            let (stream, remote) = tokio::select! {
                biased;
                _ = running.graceful.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        tracing::warn!("Accept error: {}", err);
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                },
            };
            connections.spawn(serve_connection(
                stream,
                remote,
                app.clone(),
                running.graceful.clone(),
            ));
        }
        drop(listener);

        let forced = tokio::select! {
            _ = drain(&mut connections) => false,
            _ = running.abort.cancelled() => true,
        };
        if forced {
            tracing::warn!(
                "Shutdown deadline passed, closing {} open connections",
                connections.len()
            );
            connections.shutdown().await;
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.lock_running().is_some()
    }

    /// Stop accepting connections and wait for in-flight requests.
    ///
    /// Returns `Ok(())` at once if the server was never started. If `ctx`
    /// ends first, the open connections are closed, their requests abandoned,
    /// and the context error returned.
    pub async fn shutdown(&self, ctx: &Context) -> Result<()> {
        tracing::info!("Shutting down server...");

        let (graceful, abort, mut finished) = match self.lock_running().as_ref() {
            Some(running) => (
                running.graceful.clone(),
                running.abort.clone(),
                running.finished.clone(),
            ),
            None => return Ok(()),
        };

        graceful.cancel();
        let drained = ctx
            .run(async {
                // a dropped sender also means the serving loop is gone
                let _ = finished.wait_for(|done| *done).await;
            })
            .await;

        match drained {
            Ok(()) => {
                tracing::info!("Server stopped");
                Ok(())
            }
            Err(err) => {
                abort.cancel();
                let _ = finished.wait_for(|done| *done).await;
                tracing::warn!("Server stopped: {}", err);
                Err(err)
            }
        }
    }

    fn lock_running(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("middleware", &self.middleware.len())
            .field("running", &self.is_running())
            .finish()
    }
}

/// Owns the running slot; clears it when serving ends, however it ends.
struct RunningGuard<'a> {
    server: &'a Server,
    graceful: CancellationToken,
    abort: CancellationToken,
    done: watch::Sender<bool>,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.server.lock_running().take();
        let _ = self.done.send(true);
    }
}

/// Serve one connection; on graceful shutdown it finishes the request in
/// flight and then closes.
async fn serve_connection(
    stream: TcpStream,
    remote: SocketAddr,
    app: Router,
    graceful: CancellationToken,
) {
    let builder = auto::Builder::new(TokioExecutor::new());
    let conn = builder
        .serve_connection_with_upgrades(TokioIo::new(stream), TowerToHyperService::new(app));
    tokio::pin!(conn);

    let mut closing = false;
    loop {
        tokio::select! {
            result = conn.as_mut() => {
                if let Err(err) = result {
                    tracing::debug!("Connection from {} closed with error: {}", remote, err);
                }
                break;
            }
            _ = graceful.cancelled(), if !closing => {
                conn.as_mut().graceful_shutdown();
                closing = true;
            }
        }
    }
}

async fn drain(connections: &mut JoinSet<()>) {
    while connections.join_next().await.is_some() {}
}
