//! 路由表与共享组件的装配。

use axum::Router;
use axum::extract::{DefaultBodyLimit, Extension, connect_info::ConnectInfo};
use axum::http::Request;
use axum::middleware;
use axum::routing::{delete, get, post};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info_span};

use crate::auth::Authenticator;
use crate::backup::BackupRunner;
use crate::config::{Config, MAX_CONCURRENT_BACKUPS};
use crate::guard::HotlinkGuard;
use crate::handlers;
use crate::http::{PublicUrl, add_security_headers, resolve_client_ip};
use crate::quota::QuotaMonitor;
use crate::storage::Storage;

/// 处理器依赖的组件，全部由配置显式构造。
#[derive(Clone)]
pub struct Services {
    pub storage: Arc<Storage>,
    pub auth: Arc<Authenticator>,
    pub quota: Arc<QuotaMonitor>,
    pub hotlink: Arc<HotlinkGuard>,
    pub urls: Arc<PublicUrl>,
    pub backups: Arc<BackupRunner>,
}

impl Services {
    pub fn from_config(config: &Config, env_secret: Option<String>) -> Self {
        Self {
            storage: Arc::new(Storage::new(config.storage.path.clone())),
            auth: Arc::new(Authenticator::new(&config.auth, env_secret)),
            quota: Arc::new(QuotaMonitor::from_config(&config.storage)),
            hotlink: Arc::new(HotlinkGuard::from_config(&config.network)),
            urls: Arc::new(PublicUrl::new(config.network.base_url.as_deref())),
            backups: Arc::new(BackupRunner::new(MAX_CONCURRENT_BACKUPS)),
        }
    }
}

pub fn build_router(services: Services) -> Router {
    Router::new()
        .route(
            "/upload/{directory}",
            post(handlers::upload).layer(DefaultBodyLimit::disable()),
        )
        .route("/delete/{directory}/{file}", delete(handlers::delete_file))
        .route("/list", get(handlers::list_root))
        .route("/list/{directory}", get(handlers::list_directory))
        .route("/backup", get(handlers::backup_root))
        .route("/backup/{directory}", get(handlers::backup_directory))
        .route("/{directory}/{file}", get(handlers::retrieve))
        .layer(middleware::from_fn(add_security_headers))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    let connect_ip = request
                        .extensions()
                        .get::<ConnectInfo<SocketAddr>>()
                        .map(|ConnectInfo(addr)| addr.ip());
                    let client_ip = resolve_client_ip(request.headers(), connect_ip)
                        .map(|ip| ip.to_string())
                        .unwrap_or_else(|| "unknown".to_string());

                    info_span!(
                        env!("CARGO_CRATE_NAME"),
                        client_ip,
                        method = ?request.method(),
                        path = ?request.uri().path(),
                    )
                })
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(Extension(services.storage))
        .layer(Extension(services.auth))
        .layer(Extension(services.quota))
        .layer(Extension(services.hotlink))
        .layer(Extension(services.urls))
        .layer(Extension(services.backups))
}
