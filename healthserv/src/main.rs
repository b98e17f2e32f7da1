mod boundary;
mod handlers;
mod store;

use tracing::info;

use actix_web::{
    App,
    HttpServer,
    middleware::{Logger, from_fn},
    web,
};

use std::sync::Arc;

use healthsec::SecurityConfig;
use healthsec::server::hasher::CredentialHasher;
use healthsec::server::policy::{RoutePolicy, RouteTable};
use healthsec::server::tls::load_rustls_config;
use healthsec::server::token::{Clock, SystemClock, TokenService};

use boundary::Boundary;
use handlers::AppState;

pub fn configure_routes() -> impl actix_web::dev::HttpServiceFactory {
    web::scope("/api")
        .route("/health", web::get().to(handlers::health))
        .service(
            web::scope("/user")
                .route("/signup", web::post().to(handlers::signup))
                .route("/login", web::post().to(handlers::login))
                .route("/add-user", web::post().to(handlers::add_user))
                .route("/update-user", web::post().to(handlers::update_user))
                .route("/me", web::get().to(handlers::me))
                .route("/getallusers", web::get().to(handlers::get_all_users))
                .route("/delete-user/{id}", web::post().to(handlers::delete_user))
                .route("/delete-user/{id}/{deleted}", web::post().to(handlers::delete_user))
        )
}

/// Capability table for every route in [`configure_routes`].
pub fn route_table() -> RouteTable {
    RouteTable::new()
        .route("GET", "/api/health", RoutePolicy::public())
        .route("POST", "/api/user/signup", RoutePolicy::encrypted())
        .route("POST", "/api/user/login", RoutePolicy::encrypted())
        .route("POST", "/api/user/add-user", RoutePolicy::authenticated_encrypted())
        .route("POST", "/api/user/update-user", RoutePolicy::authenticated_encrypted())
        .route("GET", "/api/user/me", RoutePolicy::authenticated())
        .route("GET", "/api/user/getallusers", RoutePolicy::authenticated())
        .route("POST", "/api/user/delete-user/{id}", RoutePolicy::authenticated_encrypted())
        .route("POST", "/api/user/delete-user/{id}/{deleted}", RoutePolicy::authenticated_encrypted())
}

/// Wire the boundary and handler state from one configuration.
pub fn build_state(
    config: &SecurityConfig,
    clock: Arc<dyn Clock>,
) -> Result<(web::Data<Boundary>, web::Data<AppState>), healthsec::SecurityError> {
    let tokens = Arc::new(TokenService::with_clock(&config.secret, clock));
    let boundary = Boundary::new(&config.secret, tokens.clone(), route_table());
    let state = AppState::new(CredentialHasher::new(config.hash_cost), tokens, config.token_ttl)?;
    Ok((web::Data::new(boundary), web::Data::new(state)))
}

fn config_error(e: healthsec::SecurityError) -> std::io::Error {
    e.log_security_event();
    std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let mut _guard = None;

    if std::env::var("SERVER_LOG").unwrap_or_default() == "true" {
        let file_appender = tracing_appender::rolling::RollingFileAppender::new(
            tracing_appender::rolling::Rotation::DAILY,
            "./logs",
            "healthserv.log"
        );
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        tracing_subscriber::fmt()
            .with_writer(tracing_subscriber::fmt::writer::MakeWriterExt::and(non_blocking, std::io::stdout))
            .with_file(true)
            .with_line_number(true)
            .with_env_filter("info,actix_server=warn,actix_http::h1::dispatcher=off")
            .with_timer(tracing_subscriber::fmt::time::ChronoLocal::new("%Y-%m-%dT%H:%M:%S".to_string()))
            .init();

        _guard = Some(guard);
    } else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stdout)
            .with_file(true)
            .with_line_number(true)
            .with_env_filter("info,actix_server=warn,actix_http::h1::dispatcher=off")
            .with_timer(tracing_subscriber::fmt::time::ChronoLocal::new("%Y-%m-%dT%H:%M:%S".to_string()))
            .init();
    }

    let use_tls = std::env::var("USE_TLS").unwrap_or_default() == "true";

    // Key material is read once here and only passed by reference afterwards
    let config = SecurityConfig::from_env().map_err(config_error)?;
    let (boundary, state) = build_state(&config, Arc::new(SystemClock)).map_err(config_error)?;

    if let (Ok(email), Ok(password)) = (
        std::env::var("HEALTH_ADMIN_EMAIL"),
        std::env::var("HEALTH_ADMIN_PASSWORD"),
    ) {
        state.bootstrap_admin(&email, &password).map_err(config_error)?;
    }

    let bind = std::env::var("HEALTH_BIND").ok();

    let server = HttpServer::new(move || {
        App::new()
            .app_data(boundary.clone())
            .app_data(state.clone())
            .wrap(from_fn(boundary::security_boundary))
            .wrap(Logger::default())
            .service(configure_routes())
            .default_service(web::to(handlers::not_found))
    });

    if use_tls {
        let cert = std::env::var("HEALTH_TLS_CERT").unwrap_or_else(|_| "cert.pem".to_string());
        let key = std::env::var("HEALTH_TLS_KEY").unwrap_or_else(|_| "key.pem".to_string());
        let tls = load_rustls_config(&cert, &key).map_err(config_error)?;

        let bind = bind.unwrap_or_else(|| "0.0.0.0:8443".to_string());
        info!("Server starting with TLS on https://{}/", bind);
        server.bind_rustls_0_23(bind, tls)?.run().await
    } else {
        let bind = bind.unwrap_or_else(|| "0.0.0.0:8080".to_string());
        info!("Server starting on http://{}/", bind);
        server.bind(bind)?.run().await
    }
}
