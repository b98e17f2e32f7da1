use actix_web::{HttpRequest, http::StatusCode, web};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use healthsec::server::hasher::CredentialHasher;
use healthsec::server::token::TokenService;
use healthsec::{ApiResponse, FieldError, SecurityError};

use crate::boundary::{Identity, Plain, Sealed};
use crate::store::{PublicUser, Role, StoreError, UserFilter, UserStore};

const MIN_PASSWORD_LEN: usize = 6;
const DEFAULT_PAGE_LIMIT: usize = 10;
const MAX_PAGE_LIMIT: usize = 100;

/// Handler-side state, shared across workers.
pub struct AppState {
    pub store: UserStore,
    pub hasher: CredentialHasher,
    pub tokens: Arc<TokenService>,
    pub token_ttl: Duration,
    dummy_hash: String,     // verified against on unknown emails
}

impl AppState {
    pub fn new(hasher: CredentialHasher, tokens: Arc<TokenService>, token_ttl: Duration) -> Result<Self, SecurityError> {
        let dummy_hash = hasher.hash("healthserv-timing-pad")?.to_string();
        Ok(Self {
            store: UserStore::new(),
            hasher,
            tokens,
            token_ttl,
            dummy_hash,
        })
    }

    /// Create the first admin, unless that email is already registered.
    /// Credentials go through the same checks as signup.
    pub fn bootstrap_admin(&self, email: &str, password: &str) -> Result<(), SecurityError> {
        let email = email.trim();
        let errors = validate_credentials(email, password);
        if !errors.is_empty() {
            let detail: Vec<String> = errors.iter().map(|e| format!("{}: {}", e.path, e.msg)).collect();
            return Err(SecurityError::Config(format!("bootstrap admin rejected ({})", detail.join(", "))));
        }

        if self.store.email_exists(email) {
            tracing::info!("Bootstrap admin {} already present", email);
            return Ok(());
        }
        let hash = self.hasher.hash(password)?.to_string();
        match self.store.insert(email, hash, Role::Admin) {
            Ok(user) => tracing::info!("Bootstrap admin created: {}", user.email),
            Err(e) => tracing::warn!("Bootstrap admin not created: {:?}", e),
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct NewUser {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    pub role: Role,
}

/// Body of `update-user`. `id` defaults to the caller, `role` to the
/// current role.
#[derive(Debug, Deserialize)]
pub struct UserUpdate {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub role: Option<Role>,
}

/// Raw `getallusers` query string, validated by [`parse_filter`].
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub page: Option<String>,
    pub limit: Option<String>,
    pub search: Option<String>,
    pub role: Option<String>,
    pub deleted: Option<String>,
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

fn parse_filter(query: ListQuery) -> Result<UserFilter, Vec<FieldError>> {
    let mut errors = Vec::new();

    let page = match query.page.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
        None => 1,
        Some(raw) => match raw.parse::<usize>() {
            Ok(page) if page >= 1 => page,
            _ => {
                errors.push(FieldError::new("page", "Page must be a positive integer"));
                1
            }
        },
    };

    let limit = match query.limit.as_deref().map(str::trim).filter(|l| !l.is_empty()) {
        None => DEFAULT_PAGE_LIMIT,
        Some(raw) => match raw.parse::<usize>() {
            Ok(limit) if (1..=MAX_PAGE_LIMIT).contains(&limit) => limit,
            _ => {
                errors.push(FieldError::new(
                    "limit",
                    format!("Limit must be between 1 and {}", MAX_PAGE_LIMIT),
                ));
                DEFAULT_PAGE_LIMIT
            }
        },
    };

    let role = match query.role.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
        None => None,
        Some("User") => Some(Role::User),
        Some("Admin") => Some(Role::Admin),
        Some(_) => {
            errors.push(FieldError::new("role", "Role must be User or Admin"));
            None
        }
    };

    let deleted = match query.deleted.as_deref().filter(|d| !d.trim().is_empty()) {
        None => false,
        Some(raw) => parse_flag(raw).unwrap_or_else(|| {
            errors.push(FieldError::new("deleted", "deleted must be true or false"));
            false
        }),
    };

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(UserFilter {
        page,
        limit,
        search: query.search.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
        role,
        deleted,
    })
}

fn validate_credentials(email: &str, password: &str) -> Vec<FieldError> {
    let mut errors = Vec::new();
    if !is_valid_email(email) {
        errors.push(FieldError::new("email", "Valid email is required"));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        errors.push(FieldError::new(
            "password",
            format!("Password must be at least {} characters", MIN_PASSWORD_LEN),
        ));
    }
    errors
}

fn is_valid_email(email: &str) -> bool {
    let email = email.trim();
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.split('.').count() >= 2
                && domain.split('.').all(|label| !label.is_empty())
        }
        None => false,
    }
}

fn internal(what: &str, e: impl std::fmt::Display) -> Sealed {
    tracing::error!("{}: {}", what, e);
    Sealed::failure(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
}

fn validation_failed(errors: Vec<FieldError>) -> Sealed {
    Sealed::new(StatusCode::BAD_REQUEST, ApiResponse::validation(errors))
}

fn email_exists_error() -> Sealed {
    validation_failed(vec![FieldError::new("email", "Email already exists")])
}

fn admin_required() -> Sealed {
    Sealed::failure(StatusCode::FORBIDDEN, "Admin privileges required")
}

/// Argon2 on the blocking pool; the PHC string, or the reply to send.
async fn hash_password(state: &web::Data<AppState>, password: String) -> Result<String, Sealed> {
    let hasher = state.hasher.clone();
    match web::block(move || hasher.hash(&password)).await {
        Ok(Ok(hash)) => Ok(hash.to_string()),
        Ok(Err(e)) => Err(Sealed::from_error(&e)),
        Err(e) => Err(internal("Hashing task failed", e)),
    }
}

/// Hash on the blocking pool and insert.
async fn create_user(state: &web::Data<AppState>, email: &str, password: String, role: Role) -> Sealed {
    if state.store.email_exists(email) {
        tracing::warn!("Email already exists: {}", email.to_lowercase());
        return email_exists_error();
    }

    let hash = match hash_password(state, password).await {
        Ok(hash) => hash,
        Err(reply) => return reply,
    };

    match state.store.insert(email, hash, role) {
        Ok(user) => {
            tracing::info!("User created: {} ({})", user.id, user.email);
            Sealed::new(
                StatusCode::CREATED,
                ApiResponse::ok("User added successfully", serde_json::json!(PublicUser::from(&user))),
            )
        }
        // lost a race with a concurrent signup
        Err(StoreError::EmailTaken) => email_exists_error(),
        Err(e) => internal("User insert failed", format!("{:?}", e)),
    }
}

pub async fn health() -> Sealed<()> {
    Sealed::ok(ApiResponse::message_only("ok"))
}

pub async fn signup(state: web::Data<AppState>, Plain(body): Plain<Credentials>) -> Sealed {
    let errors = validate_credentials(&body.email, &body.password);
    if !errors.is_empty() {
        return validation_failed(errors);
    }
    create_user(&state, body.email.trim(), body.password, Role::User).await
}

pub async fn login(state: web::Data<AppState>, Plain(body): Plain<Credentials>) -> Sealed {
    let user = state.store.find_by_email(body.email.trim());

    // unknown emails still pay for one hash so timing does not tell them apart
    let stored = user
        .as_ref()
        .map(|u| u.password_hash.clone())
        .unwrap_or_else(|| state.dummy_hash.clone());
    let hasher = state.hasher.clone();
    let password = body.password;

    let matched = match web::block(move || hasher.verify_encoded(&password, &stored)).await {
        Ok(Ok(matched)) => matched,
        Ok(Err(e)) => return Sealed::from_error(&e),
        Err(e) => return internal("Verification task failed", e),
    };

    let user = match user {
        Some(user) if matched => user,
        _ => return Sealed::from_error(&SecurityError::HashVerificationFailure),
    };

    let token = match state.tokens.issue(&user.id, user.role.as_str(), state.token_ttl) {
        Ok(token) => token,
        Err(e) => return Sealed::from_error(&e),
    };

    tracing::info!("Login successful for {}", user.id);
    Sealed::ok(ApiResponse::ok(
        "Login successful",
        serde_json::json!({
            "token": token,
            "user": PublicUser::from(&user),
        }),
    ))
}

pub async fn add_user(state: web::Data<AppState>, identity: Identity, Plain(body): Plain<NewUser>) -> Sealed {
    if !identity.is_admin() {
        tracing::warn!("Rejected add-user from non-admin {}", identity.user_id());
        return admin_required();
    }

    let errors = validate_credentials(&body.email, &body.password);
    if !errors.is_empty() {
        return validation_failed(errors);
    }
    create_user(&state, body.email.trim(), body.password, body.role).await
}

pub async fn me(state: web::Data<AppState>, identity: Identity) -> Sealed {
    match state.store.get(identity.user_id()) {
        Some(user) => Sealed::ok(ApiResponse::ok("User found", serde_json::json!(PublicUser::from(&user)))),
        None => Sealed::failure(StatusCode::NOT_FOUND, "User not found"),
    }
}

/// Admins may change anyone, including their role. Everyone else may only
/// change their own email and password.
pub async fn update_user(state: web::Data<AppState>, identity: Identity, Plain(body): Plain<UserUpdate>) -> Sealed {
    let target = body.id.unwrap_or_else(|| identity.user_id().to_string());
    if !identity.is_admin() && identity.user_id() != target {
        tracing::warn!("Rejected update of {} by {}", target, identity.user_id());
        return admin_required();
    }

    let errors = validate_credentials(&body.email, &body.password);
    if !errors.is_empty() {
        return validation_failed(errors);
    }

    let Some(current) = state.store.get(&target) else {
        return Sealed::failure(StatusCode::NOT_FOUND, "User not found");
    };

    let role = match body.role {
        Some(role) if role != current.role && !identity.is_admin() => {
            tracing::warn!("Rejected role change of {} by {}", target, identity.user_id());
            return admin_required();
        }
        Some(role) => role,
        None => current.role,
    };

    let email = body.email.trim();
    if state.store.email_taken_by_other(email, &target) {
        tracing::warn!("Email already exists: {}", email.to_lowercase());
        return email_exists_error();
    }

    let hash = match hash_password(&state, body.password).await {
        Ok(hash) => hash,
        Err(reply) => return reply,
    };

    match state.store.update(&target, email, hash, role) {
        Ok(user) => {
            tracing::info!("User {} updated by {}", user.id, identity.user_id());
            Sealed::ok(ApiResponse::ok("User updated successfully", serde_json::json!(PublicUser::from(&user))))
        }
        Err(StoreError::EmailTaken) => email_exists_error(),
        Err(StoreError::NotFound) => Sealed::failure(StatusCode::NOT_FOUND, "User not found"),
    }
}

/// Paged listing with optional `search` (email substring), `role` and
/// `deleted` filters. Only admins may list deleted users.
pub async fn get_all_users(state: web::Data<AppState>, identity: Identity, req: HttpRequest) -> Sealed {
    let query = match web::Query::<ListQuery>::from_query(req.query_string()) {
        Ok(query) => query.into_inner(),
        Err(e) => {
            tracing::debug!("Unparseable user listing query: {}", e);
            return validation_failed(vec![FieldError::new("query", "Malformed query string")]);
        }
    };
    let filter = match parse_filter(query) {
        Ok(filter) => filter,
        Err(errors) => return validation_failed(errors),
    };
    if filter.deleted && !identity.is_admin() {
        return admin_required();
    }

    let (users, total) = state.store.query(&filter);
    let users: Vec<PublicUser> = users.iter().map(PublicUser::from).collect();
    tracing::debug!("{} listed {} of {} users", identity.user_id(), users.len(), total);
    Sealed::ok(ApiResponse::ok(
        "Users fetched successfully",
        serde_json::json!({
            "users": users,
            "total": total,
            "page": filter.page,
            "limit": filter.limit,
        }),
    ))
}

/// `delete-user/{id}` soft deletes; `delete-user/{id}/{deleted}` sets the
/// flag either way. Users may delete themselves, only admins restore.
pub async fn delete_user(
    state: web::Data<AppState>,
    identity: Identity,
    req: HttpRequest,
    _body: Plain<serde_json::Value>,
) -> Sealed {
    let target = req.match_info().get("id").unwrap_or_default().to_string();
    let deleted = match req.match_info().get("deleted") {
        None => true,
        Some(raw) => match parse_flag(raw) {
            Some(flag) => flag,
            None => return validation_failed(vec![FieldError::new("deleted", "deleted must be true or false")]),
        },
    };

    let allowed = identity.is_admin() || (deleted && identity.user_id() == target);
    if !allowed {
        tracing::warn!("Rejected delete flag {} on {} by {}", deleted, target, identity.user_id());
        return admin_required();
    }

    match state.store.set_deleted(&target, deleted) {
        Ok(user) => {
            let message = if deleted { "User marked as deleted successfully" } else { "User restored successfully" };
            tracing::info!("User {} deleted={} by {}", user.id, deleted, identity.user_id());
            Sealed::ok(ApiResponse::ok(message, serde_json::json!(PublicUser::from(&user))))
        }
        Err(_) => Sealed::failure(StatusCode::NOT_FOUND, "User not found"),
    }
}

/// Fallback for unknown paths and methods, sealed like every other reply.
pub async fn not_found(req: HttpRequest) -> Sealed<()> {
    tracing::debug!("No route for {} {}", req.method(), req.path());
    Sealed::failure(StatusCode::NOT_FOUND, "Not found")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_shapes() {
        for ok in ["a@b.co", "first.last@example.org", "  ann@example.com "] {
            assert!(is_valid_email(ok), "{ok}");
        }
        for bad in ["", "ann", "@example.com", "ann@", "ann@example", "ann@@example.com", "a n@b.co", "ann@example..com"] {
            assert!(!is_valid_email(bad), "{bad}");
        }
    }

    #[test]
    fn short_password_and_bad_email_both_reported() {
        let errors = validate_credentials("nope", "12345");
        let paths: Vec<&str> = errors.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["email", "password"]);
    }

    #[test]
    fn six_characters_is_enough() {
        assert!(validate_credentials("ann@example.com", "123456").is_empty());
    }

    fn state() -> AppState {
        use healthsec::SharedSecret;
        use healthsec::server::hasher::HashCost;

        let tokens = Arc::new(TokenService::new(&SharedSecret::generate()));
        AppState::new(
            CredentialHasher::new(HashCost::new(1024, 1, 1).unwrap()),
            tokens,
            Duration::from_secs(60),
        )
        .unwrap()
    }

    #[test]
    fn bootstrap_admin_is_validated_like_signup() {
        let state = state();
        assert!(matches!(
            state.bootstrap_admin("root@example.com", "x"),
            Err(SecurityError::Config(_))
        ));
        assert!(matches!(state.bootstrap_admin("root", "rootpass"), Err(SecurityError::Config(_))));
        assert_eq!(state.store.len(), 0);

        state.bootstrap_admin(" Root@Example.com ", "rootpass").unwrap();
        assert_eq!(state.store.find_by_email("root@example.com").unwrap().role, Role::Admin);
        // second start with the same admin is a no-op
        state.bootstrap_admin("root@example.com", "rootpass").unwrap();
        assert_eq!(state.store.len(), 1);
    }

    #[test]
    fn listing_filter_defaults() {
        let filter = parse_filter(ListQuery::default()).unwrap();
        assert_eq!(
            filter,
            UserFilter {
                page: 1,
                limit: DEFAULT_PAGE_LIMIT,
                search: None,
                role: None,
                deleted: false,
            }
        );
    }

    #[test]
    fn listing_filter_reads_every_field() {
        let filter = parse_filter(ListQuery {
            page: Some("3".into()),
            limit: Some("25".into()),
            search: Some(" ann ".into()),
            role: Some("Admin".into()),
            deleted: Some("true".into()),
        })
        .unwrap();
        assert_eq!(filter.page, 3);
        assert_eq!(filter.limit, 25);
        assert_eq!(filter.search.as_deref(), Some("ann"));
        assert_eq!(filter.role, Some(Role::Admin));
        assert!(filter.deleted);
    }

    #[test]
    fn listing_filter_reports_each_bad_field() {
        let errors = parse_filter(ListQuery {
            page: Some("0".into()),
            limit: Some("1000".into()),
            search: None,
            role: Some("Root".into()),
            deleted: Some("maybe".into()),
        })
        .unwrap_err();
        let paths: Vec<&str> = errors.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["page", "limit", "role", "deleted"]);
    }
}
