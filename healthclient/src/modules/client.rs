use reqwest::{Certificate, ClientBuilder};

/// HTTP client for the health service. When `ca_pem` is given the server
/// certificate must chain to it (self-signed dev setups).
pub fn create_client(ca_pem: Option<&[u8]>) -> Result<reqwest::Client, Box<dyn std::error::Error>> {
    let mut builder = ClientBuilder::new().use_rustls_tls();

    if let Some(pem) = ca_pem {
        builder = builder.add_root_certificate(Certificate::from_pem(pem)?);
        tracing::debug!("Trusting custom CA certificate");
    }

    Ok(builder.build()?)
}
