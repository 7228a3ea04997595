mod api;
mod git_http;
pub mod response;
pub mod router;

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use hyper::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response};
use tracing::{debug, info};

use crate::auth::{Actor, Credentials, IdentityProvider, StaticIdentityProvider};
use crate::core::{GitError, Result, ServerConfig};
use crate::protocol::{GitBackend, PreReceiveValidator, ProtectedRefs};
use crate::repository::{CommitGate, Locator, MemoryRepositoryStore, RefLocks, RepositoryStore, ScratchSpace};
use crate::utils;
use router::Route;

/// Everything a request handler needs, shared by all connections
pub struct AppState {
    pub config: ServerConfig,
    pub locator: Locator,
    pub backend: GitBackend,
    pub repositories: Arc<dyn RepositoryStore>,
    pub identity: Arc<dyn IdentityProvider>,
    /// Set when branch protection is enabled
    pub validator: Option<Arc<dyn PreReceiveValidator>>,
    pub locks: Arc<RefLocks>,
    pub scratch: ScratchSpace,
    cors_origin: HeaderValue,
}

impl AppState {
    /// Wire up the built-in collaborators from configuration
    pub fn from_config(config: ServerConfig) -> Result<Self> {
        let root = utils::absolute_path(&config.storage.root)?;
        utils::ensure_dir_exists(&root)?;

        let repositories: Arc<dyn RepositoryStore> = match &config.storage.metadata_file {
            Some(file) => Arc::new(MemoryRepositoryStore::with_file(file)?),
            None => Arc::new(MemoryRepositoryStore::new()),
        };
        let identity: Arc<dyn IdentityProvider> = Arc::new(StaticIdentityProvider::new(config.users.clone()));
        let validator: Option<Arc<dyn PreReceiveValidator>> = if config.branch_protection.enabled {
            Some(Arc::new(ProtectedRefs::new(config.branch_protection.protected_refs.clone())))
        } else {
            None
        };

        Ok(Self {
            locator: Locator::new(root),
            backend: GitBackend::new(&config.server.git_binary, config.limits.service_timeout()),
            repositories,
            identity,
            validator,
            locks: Arc::new(RefLocks::new()),
            scratch: ScratchSpace::new(config.storage.scratch_dir.clone()),
            cors_origin: response::header_value(&config.server.cors_origin)?,
            config,
        })
    }

    /// Swap the metadata store, e.g. for one backed by a database
    pub fn with_repositories(mut self, repositories: Arc<dyn RepositoryStore>) -> Self {
        self.repositories = repositories;
        self
    }

    /// Swap the identity provider
    pub fn with_identity(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.identity = identity;
        self
    }

    /// The actor behind the request's `Authorization` header, if any verifies
    pub async fn actor(&self, headers: &HeaderMap) -> Option<Actor> {
        let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
        let credentials = Credentials::from_header(value)?;
        let actor = self.identity.authenticate(&credentials).await;
        if actor.is_none() {
            debug!(?credentials, "credentials did not verify");
        }
        actor
    }

    /// Run object database work on the blocking pool, bounded by the
    /// configured operation timeout.
    ///
    /// On timeout the caller gets an error right away; the blocking thread
    /// itself runs to completion in the background, so this is for reads.
    pub async fn blocking<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let timeout = self.config.limits.operation_timeout();
        match tokio::time::timeout(timeout, tokio::task::spawn_blocking(work)).await {
            Ok(joined) => joined.map_err(worker_failed)?,
            Err(_) => Err(timed_out(timeout)),
        }
    }

    /// Like [`AppState::blocking`] for work that ends in a ref update.
    ///
    /// On timeout the gate is cancelled so the work never commits after the
    /// caller has been told it failed. If the commit has already started, the
    /// outcome is awaited and reported instead.
    pub async fn blocking_commit<T, F>(&self, gate: CommitGate, work: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let timeout = self.config.limits.operation_timeout();
        let mut task = tokio::task::spawn_blocking(work);
        let waited = tokio::time::timeout(timeout, &mut task).await;
        match waited {
            Ok(joined) => joined.map_err(worker_failed)?,
            Err(_) if gate.cancel() => Err(timed_out(timeout)),
            Err(_) => {
                debug!("deadline passed mid-commit, waiting for it to finish");
                task.await.map_err(worker_failed)?
            }
        }
    }
}

fn worker_failed(e: tokio::task::JoinError) -> GitError {
    GitError::Internal(format!("Worker task failed: {}", e))
}

fn timed_out(timeout: std::time::Duration) -> GitError {
    GitError::Internal(format!("Operation timed out after {:?}", timeout))
}

/// HTTP front end: Smart HTTP for git clients plus the JSON API
#[derive(Clone)]
pub struct GitHttpServer {
    state: Arc<AppState>,
}

impl GitHttpServer {
    pub fn new(state: AppState) -> Self {
        Self { state: Arc::new(state) }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Answer one request; failures are turned into error responses here
    pub async fn handle(&self, req: Request<Body>) -> Response<Body> {
        let started = Instant::now();
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let route = router::route(&method, &path);
        let state = &self.state;

        let response = match route {
            Route::Preflight => response::preflight(&state.cors_origin),
            route if route.is_git() => git_http::dispatch(state, route, req)
                .await
                .unwrap_or_else(|e| response::git_error(&e)),
            route => {
                let response = api::dispatch(state, route, req)
                    .await
                    .unwrap_or_else(|e| response::api_error(&e));
                response::with_cors(response, &state.cors_origin)
            }
        };

        info!(
            %method,
            path = %path,
            status = response.status().as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "request"
        );
        response
    }

    /// Bind `addr` and return the bound address together with the server
    /// future, which stops once `shutdown` resolves.
    pub fn bind(
        self,
        addr: &SocketAddr,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(SocketAddr, impl Future<Output = Result<()>>)> {
        let make_service = make_service_fn(move |conn: &AddrStream| {
            let server = self.clone();
            let remote = conn.remote_addr();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    let server = server.clone();
                    async move {
                        debug!(%remote, "accepted request");
                        Ok::<_, Infallible>(server.handle(req).await)
                    }
                }))
            }
        });

        let server = hyper::Server::try_bind(addr)?.serve(make_service);
        let local = server.local_addr();
        let running = server.with_graceful_shutdown(shutdown);
        Ok((local, async move { running.await.map_err(GitError::from) }))
    }

    /// Serve on `addr` until Ctrl-C
    pub async fn serve(self, addr: SocketAddr) -> Result<()> {
        let shutdown = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "failed to listen for shutdown signal");
                futures::future::pending::<()>().await;
            }
            info!("shutting down");
        };
        let root = self.state.locator.root().display().to_string();
        let (local, server) = self.bind(&addr, shutdown)?;
        info!(address = %local, root = %root, "gitway listening");
        server.await
    }
}
