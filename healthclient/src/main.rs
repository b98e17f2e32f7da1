mod modules {
    pub mod api;
    pub mod client;
}

use healthsec::client::session::ClientSession;
use modules::api::HealthApi;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {

    let mut _guard = None;

    if std::env::var("SERVER_LOG").unwrap_or_default() == "true" {
        let file_appender = tracing_appender::rolling::RollingFileAppender::new(
            tracing_appender::rolling::Rotation::DAILY,
            "./logs",
            "healthclient.log"
        );
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        tracing_subscriber::fmt()
            .with_writer(tracing_subscriber::fmt::writer::MakeWriterExt::and(non_blocking, std::io::stdout))
            .with_target(false)
            .with_env_filter("info")
            .with_timer(tracing_subscriber::fmt::time::ChronoLocal::new("%Y-%m-%dT%H:%M:%S".to_string()))
            .init();

        _guard = Some(guard);
    } else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stdout)
            .with_target(false)
            .with_env_filter("info")
            .with_timer(tracing_subscriber::fmt::time::ChronoLocal::new("%Y-%m-%dT%H:%M:%S".to_string()))
            .init();
    }

    let base_url = std::env::var("HEALTH_SERVER_URL").unwrap_or_else(|_| "http://127.0.0.1:8080".to_string());
    let payload_key = std::env::var("HEALTH_PAYLOAD_KEY").map_err(|_| "HEALTH_PAYLOAD_KEY is not set")?;
    let email = std::env::var("HEALTH_DEMO_EMAIL").unwrap_or_else(|_| "demo@example.com".to_string());
    let password = std::env::var("HEALTH_DEMO_PASSWORD").unwrap_or_else(|_| "demo-pass".to_string());

    let ca_pem = match std::env::var("HEALTH_CA_CERT") {
        Ok(path) => Some(std::fs::read(path)?),
        Err(_) => None,
    };

    let client = modules::client::create_client(ca_pem.as_deref())?;
    let session = ClientSession::from_base64_key(&payload_key)?;
    let mut api = HealthApi::new(client, &base_url, session);

    tracing::info!("Starting healthclient against {}\n", base_url);

    tracing::info!("Step 1: Checking server health...");
    let (status, body) = api.health().await?;
    tracing::info!("{} {}\n", status, body.message);

    tracing::info!("Step 2: Signing up {}...", email);
    let (status, body) = api.signup(&email, &password).await?;
    if status.is_success() {
        tracing::info!("Created: {}\n", body.data.unwrap_or_default());
    } else {
        // already registered on a previous run
        tracing::warn!("Signup returned {} ({}): {:?}\n", status, body.message, body.errors);
    }

    tracing::info!("Step 3: Logging in...");
    let body = api.login(&email, &password).await?;
    tracing::info!("{}\n", body.message);

    tracing::info!("Step 4: Fetching own record...");
    let (status, body) = api.me().await?;
    tracing::info!("{} {}\n", status, body.data.unwrap_or_default());

    tracing::info!("Step 5: Listing users...");
    let (status, body) = api.get_all_users().await?;
    let total = body.data.as_ref().and_then(|d| d.get("total")).and_then(|t| t.as_u64()).unwrap_or(0);
    tracing::info!("{} {} active users\n", status, total);

    tracing::info!("All steps completed");
    Ok(())
}
