use std::{
    fs,
    net::SocketAddr,
    process::ExitCode,
    sync::{atomic, RwLock},
    time::Duration,
};

use axum::{
    extract::{DefaultBodyLimit, MatchedPath},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use axum_server::{
    bind, bind_rustls, tls_rustls::RustlsConfig, Handle as ServerHandle,
};
use http::{
    header::{self, HeaderName},
    Method, StatusCode, Uri,
};
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{
    cors::{self, CorsLayer},
    trace::TraceLayer,
    ServiceBuilderExt as _,
};
use tracing::{debug, info, warn};

mod api;
mod clap;
mod config;
mod database;
mod error;
mod observability;
mod service;
mod utils;

use api::{client_server, server_server};
pub(crate) use config::Config;
pub(crate) use database::KeyValueDatabase;
pub(crate) use service::Services;
pub(crate) use utils::error::{Error, Result};

pub(crate) static SERVICES: RwLock<Option<&'static Services>> =
    RwLock::new(None);

/// Convenient access to the global [`Services`] instance
pub(crate) fn services() -> &'static Services {
    SERVICES
        .read()
        .unwrap()
        .expect("SERVICES should be initialized when this is called")
}

/// Returns the current version of the crate with extra info if supplied
///
/// Set the environment variable `SIGNET_VERSION_EXTRA` to any UTF-8 string
/// to include it in parenthesis after the SemVer version. A common value
/// are git commit hashes.
fn version() -> String {
    let cargo_pkg_version = env!("CARGO_PKG_VERSION");

    match option_env!("SIGNET_VERSION_EXTRA") {
        Some(x) => format!("{cargo_pkg_version} ({x})"),
        None => cargo_pkg_version.to_owned(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let Err(e) = try_main().await else {
        return ExitCode::SUCCESS;
    };

    eprintln!(
        "Error: {}",
        error::DisplayWithSources {
            error: &e,
            infix: "\n    Caused by: "
        }
    );

    ExitCode::FAILURE
}

/// Fallible entrypoint
async fn try_main() -> Result<(), error::Main> {
    use error::Main as Error;

    let args = clap::parse();

    let raw_config = fs::read_to_string(&args.config)
        .map_err(|err| error::Config::Read(err, args.config.clone()))?;
    let config = toml::from_str::<Config>(&raw_config)
        .map_err(|err| error::Config::Parse(err, args.config.clone()))?;

    observability::init(&config)?;

    info!("Loading database");
    KeyValueDatabase::load_or_create(config)
        .await
        .map_err(Error::DatabaseError)?;

    info!("Starting server");
    run_server().await?;

    Ok(())
}

async fn run_server() -> Result<(), error::Serve> {
    let config = &services().globals.config;
    let addr = SocketAddr::from((config.address, config.port));

    let x_requested_with = HeaderName::from_static("x-requested-with");
    let auth_principal = HeaderName::from_static(api::AUTH_PRINCIPAL_HEADER);

    let middlewares = ServiceBuilder::new()
        .sensitive_headers([header::AUTHORIZATION, auth_principal.clone()])
        .layer(axum::middleware::from_fn(spawn_task))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &http::Request<_>| {
                let path = if let Some(path) =
                    request.extensions().get::<MatchedPath>()
                {
                    path.as_str()
                } else {
                    request.uri().path()
                };

                tracing::info_span!(
                    "http_request",
                    %path,
                    method = %request.method(),
                )
            },
        ))
        .layer(axum::middleware::from_fn(unrecognized_method))
        .layer(
            CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                .allow_headers([
                    header::ORIGIN,
                    x_requested_with,
                    header::CONTENT_TYPE,
                    header::ACCEPT,
                    header::AUTHORIZATION,
                    header::IF_MATCH,
                    auth_principal,
                ])
                .max_age(Duration::from_secs(86400)),
        )
        .layer(DefaultBodyLimit::max(
            config
                .max_request_size
                .try_into()
                .expect("failed to convert max request size"),
        ));

    let app = routes().layer(middlewares).into_make_service();
    let handle = ServerHandle::new();

    tokio::spawn(shutdown_signal(handle.clone()));

    match &config.tls {
        Some(tls) => {
            let conf = RustlsConfig::from_pem_file(&tls.certs, &tls.key)
                .await
                .map_err(|err| error::Serve::LoadCerts {
                    certs: tls.certs.clone(),
                    key: tls.key.clone(),
                    err,
                })?;
            let server = bind_rustls(addr, conf).handle(handle).serve(app);

            #[cfg(feature = "systemd")]
            sd_notify::notify(true, &[sd_notify::NotifyState::Ready])
                .expect("should be able to notify systemd");

            server
                .await
                .map_err(|err| error::Serve::Listen(err, addr))?;
        }
        None => {
            let server = bind(addr).handle(handle).serve(app);

            #[cfg(feature = "systemd")]
            sd_notify::notify(true, &[sd_notify::NotifyState::Ready])
                .expect("should be able to notify systemd");

            server
                .await
                .map_err(|err| error::Serve::Listen(err, addr))?;
        }
    }

    Ok(())
}

/// Ensures the request runs in a new tokio task.
///
/// The axum request handler task gets cancelled if the connection is shut
/// down; by spawning our own task, processing continues after the client
/// disconnects, so a mutation that has entered its critical section always
/// runs to completion.
async fn spawn_task(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> std::result::Result<axum::response::Response, StatusCode> {
    if services().globals.shutdown.load(atomic::Ordering::Relaxed) {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    tokio::spawn(next.run(req))
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

async fn unrecognized_method(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> std::result::Result<axum::response::Response, StatusCode> {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let inner = next.run(req).await;
    if inner.status() == StatusCode::METHOD_NOT_ALLOWED {
        warn!("Method not allowed: {method} {uri}");
        return Ok(Error::MethodNotAllowed(format!(
            "{method} is not supported for {uri}"
        ))
        .into_response());
    }
    Ok(inner)
}

fn routes() -> Router {
    use client_server as c2s;
    use server_server as s2s;

    Router::new()
        .route(
            "/token",
            get(c2s::get_token_route)
                .post(c2s::post_token_route)
                .delete(c2s::delete_token_route),
        )
        .route("/tokens", get(c2s::list_tokens_route))
        .route("/token-owners", get(c2s::token_owners_route))
        .route("/tokens/refresh", post(s2s::refresh_route))
        .route("/tokens/reindex", post(s2s::reindex_route))
        .route("/", get(it_works))
        .fallback(not_found)
}

async fn shutdown_signal(handle: ServerHandle) {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let sig: &str;

    tokio::select! {
        () = ctrl_c => { sig = "Ctrl+C"; },
        () = terminate => { sig = "SIGTERM"; },
    }

    warn!("Received {}, shutting down...", sig);
    handle.graceful_shutdown(Some(Duration::from_secs(30)));

    services().globals.shutdown();

    #[cfg(feature = "systemd")]
    sd_notify::notify(true, &[sd_notify::NotifyState::Stopping])
        .expect("should be able to notify systemd");
}

async fn not_found(method: Method, uri: Uri) -> impl IntoResponse {
    debug!(%method, %uri, "unknown route");
    Error::NotFound("Unrecognized request".to_owned())
}

async fn it_works() -> &'static str {
    "Hello from Signet!"
}
