//! The HTTP Frontend (§4.D): a loopback-only listener with three routes.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use tokio::sync::RwLock;

use crate::config::{self, Config};
use crate::constants::DEFAULT_SERVER_HEADER;
use crate::events::EventSink;
use crate::registry::{Registry, RegistrySnapshot};
use crate::resolver::{Outcome, Resolver};

struct AppStateInner {
    config: Config,
    registry: Arc<Registry>,
}

/// Shared server state: configuration and registry, swapped atomically on reload so a
/// request in flight always sees a consistent pair of the two.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<RwLock<Arc<AppStateInner>>>,
    sink: Arc<dyn EventSink>,
    config_path: Option<PathBuf>,
    pool_capacity: usize,
}

impl AppState {
    pub fn new(
        config: Config,
        config_path: Option<PathBuf>,
        sink: Arc<dyn EventSink>,
        pool_capacity: usize,
    ) -> Self {
        let registry = Arc::new(build_registry(&config, pool_capacity, Arc::clone(&sink)));
        let inner = Arc::new(AppStateInner { config, registry });
        Self {
            inner: Arc::new(RwLock::new(inner)),
            sink,
            config_path,
            pool_capacity,
        }
    }

    /// Re-reads the configuration file (keeping the previous configuration if it fails to
    /// parse, per §7) and rebuilds the plugin registry against the (possibly unchanged)
    /// plugin directories.
    pub async fn reload(&self) {
        let previous = Arc::clone(&*self.inner.read().await);

        let config = match &self.config_path {
            Some(path) => match config::load_config(path) {
                Ok(config) => config,
                Err(err) => {
                    tracing::warn!(error = %err, "configuration reload failed, keeping previous configuration");
                    previous.config.clone()
                }
            },
            None => previous.config.clone(),
        };

        let registry = Arc::new(build_registry(&config, self.pool_capacity, Arc::clone(&self.sink)));
        let next = Arc::new(AppStateInner { config, registry });
        *self.inner.write().await = next;
    }

    async fn snapshot(&self) -> (Config, Arc<Registry>) {
        let inner = Arc::clone(&*self.inner.read().await);
        (inner.config.clone(), Arc::clone(&inner.registry))
    }
}

fn build_registry(config: &Config, pool_capacity: usize, sink: Arc<dyn EventSink>) -> Registry {
    let mut dirs = Vec::new();
    if let Some(dir) = config::default_user_plugin_dir() {
        dirs.push(dir);
    }
    dirs.extend(config.plugin_dirs.iter().cloned());
    if let Some(dir) = config::default_system_plugin_dir() {
        dirs.push(dir);
    }

    Registry::load(
        dirs,
        std::time::Duration::from_millis(config.plugin_timeout_ms),
        pool_capacity,
        sink,
    )
}

/// Starts the server, blocking until it shuts down. Mirrors the SIGHUP-reload-alongside-
/// serve structure of the teacher's `async_main`/`setup_signal_handler`.
pub async fn serve(addr: SocketAddr, state: AppState) -> std::result::Result<(), hyper::Error> {
    let make_svc = make_service_fn(move |conn: &AddrStream| {
        let state = state.clone();
        let peer = conn.remote_addr();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let state = state.clone();
                handle(req, state, peer)
            }))
        }
    });

    Server::try_bind(&addr)?.serve(make_svc).await
}

async fn handle(
    req: Request<Body>,
    state: AppState,
    peer: SocketAddr,
) -> Result<Response<Body>, Infallible> {
    if !peer.ip().is_loopback() {
        return Ok(error_response(StatusCode::FORBIDDEN, "loopback connections only"));
    }

    if req.method() != Method::GET {
        return Ok(error_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed"));
    }

    let response = match req.uri().path() {
        "/" => handle_root(&req, &state).await,
        "/reload" => handle_reload(&state).await,
        _ => error_response(StatusCode::NOT_FOUND, "not found"),
    };

    Ok(response)
}

async fn handle_root(req: &Request<Body>, state: &AppState) -> Response<Body> {
    let cmd = query_param(req.uri().query().unwrap_or(""), "cmd");

    let (config, registry) = state.snapshot().await;
    let resolver = Resolver::new(Arc::clone(&registry), Arc::clone(&state.sink));

    match cmd {
        Some(cmd) if !cmd.trim().is_empty() => match resolver.resolve(&cmd, &config).await {
            Outcome::Redirect(url) => redirect(&url),
            Outcome::Index => bindings_page(&registry.current()),
        },
        _ => bindings_page(&registry.current()),
    }
}

async fn handle_reload(state: &AppState) -> Response<Body> {
    state.reload().await;
    let (_, registry) = state.snapshot().await;
    let body = format!("reloaded, {} plugin(s) active\n", registry.current().list().len());
    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "text/plain; charset=utf-8")
        .header("Server", DEFAULT_SERVER_HEADER)
        .body(Body::from(body))
        .expect("static response is well-formed")
}

fn query_param(query: &str, key: &str) -> Option<String> {
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

fn redirect(location: &str) -> Response<Body> {
    Response::builder()
        .status(StatusCode::FOUND)
        .header("Location", location)
        .header("Cache-Control", "no-store")
        .header("Server", DEFAULT_SERVER_HEADER)
        .header("Date", httpdate::fmt_http_date(SystemTime::now()))
        .body(Body::empty())
        .expect("static response is well-formed")
}

fn bindings_page(snapshot: &RegistrySnapshot) -> Response<Body> {
    let mut rows = String::new();
    for plugin in snapshot.list() {
        rows.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td><code>{}</code></td></tr>\n",
            html_escape(&plugin.metadata.bindings.join(", ")),
            html_escape(&plugin.metadata.description),
            html_escape(&plugin.metadata.example),
        ));
    }

    let body = format!(
        "<!doctype html><html><head><meta charset=\"utf-8\"><title>bunnylol</title></head>\
         <body><h1>bunnylol</h1><table><thead><tr><th>binding</th><th>description</th>\
         <th>example</th></tr></thead><tbody>\n{rows}</tbody></table></body></html>"
    );

    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "text/html; charset=utf-8")
        .header("Server", DEFAULT_SERVER_HEADER)
        .body(Body::from(body))
        .expect("static response is well-formed")
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn error_response(status: StatusCode, body: &str) -> Response<Body> {
    Response::builder()
        .status(status)
        .header("Content-Type", "text/plain; charset=utf-8")
        .header("Server", DEFAULT_SERVER_HEADER)
        .body(Body::from(body.to_string()))
        .expect("static response is well-formed")
}
