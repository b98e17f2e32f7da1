use healthsec::ApiResponse;
use healthsec::client::session::ClientSession;
use healthsec::server::cipher::Envelope;
use healthsec::server::token::Token;
use reqwest::StatusCode;

/// Typed calls against the service. Every body goes out and comes back as an
/// envelope; the session does the sealing.
pub struct HealthApi {
    client: reqwest::Client,
    base_url: String,
    session: ClientSession,
}

impl HealthApi {
    pub fn new(client: reqwest::Client, base_url: &str, session: ClientSession) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            session,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn open(&self, resp: reqwest::Response) -> Result<(StatusCode, ApiResponse), Box<dyn std::error::Error>> {
        let status = resp.status();
        let envelope: Envelope = resp.json().await?;
        let body = self.session.decrypt_response(&envelope)?;
        tracing::debug!("{} -> {}", status, body.message);
        Ok((status, body))
    }

    async fn get(&self, path: &str) -> Result<(StatusCode, ApiResponse), Box<dyn std::error::Error>> {
        let mut req = self.client.get(self.url(path));
        if let Some(header) = self.session.authorization_header() {
            req = req.header(reqwest::header::AUTHORIZATION, header);
        }
        let resp = req.send().await?;
        self.open(resp).await
    }

    async fn post(&self, path: &str, body: &serde_json::Value) -> Result<(StatusCode, ApiResponse), Box<dyn std::error::Error>> {
        let envelope = self.session.encrypt_request(body)?;
        let mut req = self.client.post(self.url(path)).json(&envelope);
        if let Some(header) = self.session.authorization_header() {
            req = req.header(reqwest::header::AUTHORIZATION, header);
        }
        let resp = req.send().await?;
        self.open(resp).await
    }

    pub async fn health(&self) -> Result<(StatusCode, ApiResponse), Box<dyn std::error::Error>> {
        self.get("/api/health").await
    }

    pub async fn signup(&self, email: &str, password: &str) -> Result<(StatusCode, ApiResponse), Box<dyn std::error::Error>> {
        self.post("/api/user/signup", &serde_json::json!({"email": email, "password": password})).await
    }

    /// Log in and keep the bearer token for later calls.
    pub async fn login(&mut self, email: &str, password: &str) -> Result<ApiResponse, Box<dyn std::error::Error>> {
        let (status, body) = self
            .post("/api/user/login", &serde_json::json!({"email": email, "password": password}))
            .await?;

        if !status.is_success() {
            return Err(format!("Login failed: {} ({})", body.message, status).into());
        }

        let token = body
            .data
            .as_ref()
            .and_then(|d| d.get("token"))
            .and_then(|t| t.as_str())
            .ok_or("token missing from login response")?;
        self.session.set_token(Token::from_string(token));
        Ok(body)
    }

    pub async fn me(&self) -> Result<(StatusCode, ApiResponse), Box<dyn std::error::Error>> {
        self.get("/api/user/me").await
    }

    pub async fn get_all_users(&self) -> Result<(StatusCode, ApiResponse), Box<dyn std::error::Error>> {
        self.get("/api/user/getallusers").await
    }
}
