//! Route definitions for the Roost gateway.
//!
//! HTTP endpoints for accounts, the coin ledger, and bot deployments.

use crate::auth::{auth_middleware, AuthState, AuthUser};
use crate::coins::{CoinLedger, LedgerEntry};
use crate::deployments::{Deployment, DeploymentStatus, DeploymentStore};
use crate::mailer::Mailer;
use crate::user::{CreateUserRequest, User, UserStore};
use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    middleware,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use roost_common::Error;
use roost_sessions::{SessionError, SessionId, SessionManager};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub auth: AuthState,
    pub users: Arc<UserStore>,
    pub coins: Arc<CoinLedger>,
    pub deployments: Arc<DeploymentStore>,
    pub sessions: SessionManager,
    pub mailer: Arc<dyn Mailer>,
    pub signup_bonus: u64,
    pub deploy_cost: u64,
}

/// Error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub service: String,
}

/// Registration response.
#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub user: UserResponse,
    pub balance: i64,
    pub message: String,
}

/// Email verification request body.
#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub username: String,
    pub code: String,
}

/// Login request body.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Login response.
#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_in: u64,
    pub user: UserResponse,
}

/// User response (sanitized user data).
#[derive(Debug, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: String,
    pub username: String,
    pub email: String,
    pub verified: bool,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login_at: Option<String>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            verified: user.verified,
            created_at: user.created_at.to_rfc3339(),
            last_login_at: user.last_login_at.map(|dt| dt.to_rfc3339()),
        }
    }
}

/// Coin balance response with recent ledger entries.
#[derive(Debug, Serialize, Deserialize)]
pub struct CoinsResponse {
    pub balance: i64,
    pub history: Vec<LedgerEntry>,
}

/// Coin transfer request body.
#[derive(Debug, Deserialize)]
pub struct TransferRequest {
    pub to_username: String,
    pub amount: u64,
}

/// Bot deployment request body.
#[derive(Debug, Deserialize)]
pub struct DeployBotRequest {
    pub name: String,
}

/// Deployment response with the live connection view.
#[derive(Debug, Serialize, Deserialize)]
pub struct BotResponse {
    pub deployment: Deployment,
    pub connected: bool,
    /// One-shot pairing value to display to the user. Present only when a
    /// fresh pairing is required.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pairing_artifact: Option<String>,
}

/// List bots response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ListBotsResponse {
    pub bots: Vec<BotResponse>,
    pub total: usize,
}

type HandlerError = (StatusCode, Json<ErrorResponse>);

fn error_response(status: StatusCode, error: &str, code: &str) -> HandlerError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: code.into(),
        }),
    )
}

fn internal_error(error: &str, code: &str) -> HandlerError {
    error_response(StatusCode::INTERNAL_SERVER_ERROR, error, code)
}

/// Build the complete router with all routes.
pub fn build_all_routes(state: AppState) -> Router {
    let auth_state = state.auth.clone();

    let public_routes = Router::new()
        .route("/api/v1/auth/register", post(register_handler))
        .route("/api/v1/auth/verify", post(verify_handler))
        .route("/api/v1/auth/login", post(login_handler));

    let protected_routes = Router::new()
        .route("/api/v1/auth/me", get(me_handler))
        .route("/api/v1/coins", get(get_coins_handler))
        .route("/api/v1/coins/transfer", post(transfer_handler))
        .route("/api/v1/bots", get(list_bots_handler).post(deploy_bot_handler))
        .route("/api/v1/bots/:id/status", get(bot_status_handler))
        .route("/api/v1/bots/:id", delete(stop_bot_handler))
        .layer(middleware::from_fn_with_state(auth_state, auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
        .merge(health_routes())
}

/// Build health check routes.
pub fn health_routes() -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/v1/health", get(health_handler))
}

// ─────────────────────────────────────────────────────────────────────────────
// Auth Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Register a new account, credit the signup bonus, and send the
/// verification code.
async fn register_handler(
    State(state): State<AppState>,
    Json(request): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), HandlerError> {
    if state
        .users
        .get_by_username(&request.username)
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to check username");
            internal_error("Registration failed", "USER_ERROR")
        })?
        .is_some()
    {
        return Err(error_response(
            StatusCode::CONFLICT,
            "Username already taken",
            "USER_EXISTS",
        ));
    }

    let (user, code) = state.users.create(&request).map_err(|e| {
        error_response(StatusCode::BAD_REQUEST, &e.to_string(), "USER_INVALID")
    })?;

    let balance = state
        .coins
        .credit(&user.id, state.signup_bonus, "signup bonus")
        .map_err(|e| {
            tracing::error!(error = %e, user = %user.id, "Failed to credit signup bonus");
            internal_error("Registration failed", "COINS_ERROR")
        })?;

    // SMTP is blocking; keep it off the async runtime.
    let mailer = state.mailer.clone();
    let (email, username) = (user.email.clone(), user.username.clone());
    tokio::task::spawn_blocking(move || {
        if let Err(e) = mailer.send_verification_code(&email, &username, &code) {
            tracing::error!(error = %e, recipient = %email, "Failed to send verification email");
        }
    });

    tracing::info!(user = %user.id, username = %user.username, "User registered");

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user: user.into(),
            balance,
            message: "Check your email for the verification code".into(),
        }),
    ))
}

/// Confirm the email verification code.
async fn verify_handler(
    State(state): State<AppState>,
    Json(request): Json<VerifyRequest>,
) -> Result<Json<UserResponse>, HandlerError> {
    let matched = state
        .users
        .confirm_email(&request.username, &request.code)
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to verify email");
            internal_error("Verification failed", "USER_ERROR")
        })?;

    if !matched {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "Invalid verification code",
            "VERIFY_INVALID_CODE",
        ));
    }

    let user = state
        .users
        .get_by_username(&request.username)
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to get user");
            internal_error("Verification failed", "USER_ERROR")
        })?
        .ok_or_else(|| {
            error_response(StatusCode::NOT_FOUND, "User not found", "USER_NOT_FOUND")
        })?;

    tracing::info!(username = %user.username, "Email verified");
    Ok(Json(user.into()))
}

/// Login handler with password verification. Only verified accounts may
/// log in.
async fn login_handler(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, HandlerError> {
    if request.username.is_empty() || request.password.is_empty() {
        return Err(error_response(
            StatusCode::UNAUTHORIZED,
            "Invalid credentials",
            "AUTH_INVALID_CREDENTIALS",
        ));
    }

    let user = state
        .users
        .verify_password(&request.username, &request.password)
        .map_err(|e| {
            tracing::error!(error = %e, "Password verification error");
            internal_error("Authentication error", "AUTH_ERROR")
        })?
        .ok_or_else(|| {
            error_response(
                StatusCode::UNAUTHORIZED,
                "Invalid credentials",
                "AUTH_INVALID_CREDENTIALS",
            )
        })?;

    if !user.verified {
        return Err(error_response(
            StatusCode::FORBIDDEN,
            "Email not verified",
            "AUTH_NOT_VERIFIED",
        ));
    }

    let token = state.auth.generate_token(&user.id).map_err(|e| {
        tracing::error!(error = %e, "Failed to generate token");
        internal_error("Failed to generate token", "AUTH_TOKEN_ERROR")
    })?;

    Ok(Json(LoginResponse {
        token,
        expires_in: state.auth.token_expiry_secs(),
        user: user.into(),
    }))
}

/// Get current user info.
async fn me_handler(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<UserResponse>, HandlerError> {
    let user = state
        .users
        .get(&auth_user.user_id)
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to get user");
            internal_error("Failed to get user", "USER_ERROR")
        })?
        .ok_or_else(|| {
            error_response(StatusCode::NOT_FOUND, "User not found", "USER_NOT_FOUND")
        })?;

    Ok(Json(user.into()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Coin Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Current balance plus recent ledger entries.
async fn get_coins_handler(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<CoinsResponse>, HandlerError> {
    let balance = state.coins.balance(&auth_user.user_id).map_err(|e| {
        tracing::error!(error = %e, "Failed to read balance");
        internal_error("Failed to read balance", "COINS_ERROR")
    })?;
    let history = state.coins.history(&auth_user.user_id, 50).map_err(|e| {
        tracing::error!(error = %e, "Failed to read ledger");
        internal_error("Failed to read ledger", "COINS_ERROR")
    })?;

    Ok(Json(CoinsResponse { balance, history }))
}

/// Transfer coins to another user by username.
async fn transfer_handler(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(request): Json<TransferRequest>,
) -> Result<Json<CoinsResponse>, HandlerError> {
    let recipient = state
        .users
        .get_by_username(&request.to_username)
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to look up recipient");
            internal_error("Transfer failed", "COINS_ERROR")
        })?
        .ok_or_else(|| {
            error_response(
                StatusCode::NOT_FOUND,
                "Recipient not found",
                "USER_NOT_FOUND",
            )
        })?;

    state
        .coins
        .transfer(&auth_user.user_id, &recipient.id, request.amount)
        .map_err(|e| match e {
            Error::InsufficientFunds(_) => error_response(
                StatusCode::PAYMENT_REQUIRED,
                &e.to_string(),
                "COINS_INSUFFICIENT",
            ),
            Error::InvalidInput(_) => {
                error_response(StatusCode::BAD_REQUEST, &e.to_string(), "COINS_INVALID")
            }
            _ => {
                tracing::error!(error = %e, "Transfer failed");
                internal_error("Transfer failed", "COINS_ERROR")
            }
        })?;

    tracing::info!(
        from = %auth_user.user_id,
        to = %recipient.id,
        amount = request.amount,
        "Coins transferred"
    );

    let balance = state.coins.balance(&auth_user.user_id).map_err(|e| {
        tracing::error!(error = %e, "Failed to read balance");
        internal_error("Failed to read balance", "COINS_ERROR")
    })?;
    let history = state.coins.history(&auth_user.user_id, 50).map_err(|e| {
        tracing::error!(error = %e, "Failed to read ledger");
        internal_error("Failed to read ledger", "COINS_ERROR")
    })?;

    Ok(Json(CoinsResponse { balance, history }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Bot Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Deploy a bot: debit the deployment cost, record the deployment, then
/// create the session and wait for its pairing artifact. A pairing timeout
/// or session failure refunds the coins and marks the deployment failed.
async fn deploy_bot_handler(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(request): Json<DeployBotRequest>,
) -> Result<(StatusCode, Json<BotResponse>), HandlerError> {
    let existing = state
        .deployments
        .get_by_name(&auth_user.user_id, &request.name)
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to check deployment name");
            internal_error("Deployment failed", "BOT_ERROR")
        })?;

    // A live deployment under the same name cannot be redeployed; a failed
    // or stopped one is revived in place.
    if let Some(ref dep) = existing {
        if !matches!(
            dep.status,
            DeploymentStatus::Failed | DeploymentStatus::Stopped
        ) {
            return Err(error_response(
                StatusCode::CONFLICT,
                "A bot with this name is already deployed",
                "BOT_EXISTS",
            ));
        }
    }

    state
        .coins
        .debit(&auth_user.user_id, state.deploy_cost, "bot deployment")
        .map_err(|e| match e {
            Error::InsufficientFunds(_) => error_response(
                StatusCode::PAYMENT_REQUIRED,
                &e.to_string(),
                "COINS_INSUFFICIENT",
            ),
            _ => {
                tracing::error!(error = %e, "Failed to debit deployment cost");
                internal_error("Deployment failed", "COINS_ERROR")
            }
        })?;

    let session_id = SessionId::derive(&auth_user.user_id, &request.name);
    let deployment = match existing {
        Some(dep) => {
            state
                .deployments
                .set_status(&dep.id, DeploymentStatus::Pending)
                .map_err(|e| {
                    tracing::error!(error = %e, "Failed to revive deployment");
                    internal_error("Deployment failed", "BOT_ERROR")
                })?;
            dep
        }
        None => state
            .deployments
            .create(&auth_user.user_id, &request.name, session_id.as_str())
            .map_err(|e| {
                // Compensate the debit before surfacing the failure.
                refund(&state, &auth_user.user_id);
                error_response(StatusCode::BAD_REQUEST, &e.to_string(), "BOT_INVALID")
            })?,
    };

    let _ = state
        .deployments
        .set_status(&deployment.id, DeploymentStatus::Deploying);

    match state
        .sessions
        .create_session(&request.name, &auth_user.user_id)
        .await
    {
        Ok(outcome) => {
            let status = if outcome.pairing_artifact.is_some() {
                DeploymentStatus::Pairing
            } else {
                // Stored credentials resumed straight to the open state.
                DeploymentStatus::Active
            };
            let _ = state.deployments.set_status(&deployment.id, status);
            let deployment = state
                .deployments
                .get(&deployment.id)
                .ok()
                .flatten()
                .unwrap_or(deployment);

            tracing::info!(
                deployment = %deployment.id,
                session = %outcome.session_id,
                pairing = outcome.pairing_artifact.is_some(),
                "Bot deployed"
            );

            Ok((
                StatusCode::CREATED,
                Json(BotResponse {
                    connected: status == DeploymentStatus::Active,
                    deployment,
                    pairing_artifact: outcome.pairing_artifact,
                }),
            ))
        }
        Err(SessionError::PairingTimeout) => {
            refund(&state, &auth_user.user_id);
            let _ = state
                .deployments
                .set_status(&deployment.id, DeploymentStatus::Failed);
            // The session entry may still be live; tear it down so the next
            // deploy starts clean.
            state.sessions.disconnect(&session_id).await;
            Err(error_response(
                StatusCode::REQUEST_TIMEOUT,
                "Pairing timed out, coins refunded",
                "BOT_PAIRING_TIMEOUT",
            ))
        }
        Err(e) => {
            tracing::error!(error = %e, deployment = %deployment.id, "Session creation failed");
            refund(&state, &auth_user.user_id);
            let _ = state
                .deployments
                .set_status(&deployment.id, DeploymentStatus::Failed);
            Err(error_response(
                StatusCode::BAD_GATEWAY,
                "Failed to start the bot session, coins refunded",
                "BOT_SESSION_ERROR",
            ))
        }
    }
}

/// Compensating refund for a failed deployment. Failures are logged, not
/// surfaced; the deployment error is the one the caller needs to see.
fn refund(state: &AppState, user_id: &str) {
    if let Err(e) = state
        .coins
        .credit(user_id, state.deploy_cost, "deployment refund")
    {
        tracing::error!(error = %e, user = %user_id, "Failed to refund deployment cost");
    }
}

/// List the caller's bots with their live connection state.
async fn list_bots_handler(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<ListBotsResponse>, HandlerError> {
    let deployments = state
        .deployments
        .list_for_owner(&auth_user.user_id)
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to list deployments");
            internal_error("Failed to list bots", "BOT_ERROR")
        })?;

    let mut bots = Vec::with_capacity(deployments.len());
    for deployment in deployments {
        let live = state
            .sessions
            .get_status(&SessionId::from(deployment.session_id.as_str()))
            .await;
        bots.push(BotResponse {
            connected: live.map(|s| s.connected).unwrap_or(false),
            deployment,
            pairing_artifact: None,
        });
    }

    Ok(Json(ListBotsResponse {
        total: bots.len(),
        bots,
    }))
}

/// Live status of one bot, owner-checked.
async fn bot_status_handler(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<BotResponse>, HandlerError> {
    let deployment = owned_deployment(&state, &auth_user, &id)?;

    let live = state
        .sessions
        .get_status(&SessionId::from(deployment.session_id.as_str()))
        .await;

    Ok(Json(BotResponse {
        connected: live.map(|s| s.connected).unwrap_or(false),
        deployment,
        pairing_artifact: None,
    }))
}

/// Stop a bot: tear down its session and mark the deployment stopped.
async fn stop_bot_handler(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<BotResponse>, HandlerError> {
    let deployment = owned_deployment(&state, &auth_user, &id)?;

    state
        .sessions
        .disconnect(&SessionId::from(deployment.session_id.as_str()))
        .await;
    let _ = state
        .deployments
        .set_status(&deployment.id, DeploymentStatus::Stopped);

    let deployment = state
        .deployments
        .get(&deployment.id)
        .ok()
        .flatten()
        .unwrap_or(deployment);

    tracing::info!(deployment = %deployment.id, "Bot stopped");

    Ok(Json(BotResponse {
        connected: false,
        deployment,
        pairing_artifact: None,
    }))
}

/// Fetch a deployment and check the caller owns it.
fn owned_deployment(
    state: &AppState,
    auth_user: &AuthUser,
    id: &str,
) -> Result<Deployment, HandlerError> {
    let deployment = state
        .deployments
        .get(id)
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to get deployment");
            internal_error("Failed to get bot", "BOT_ERROR")
        })?
        .ok_or_else(|| {
            error_response(StatusCode::NOT_FOUND, "Bot not found", "BOT_NOT_FOUND")
        })?;

    if deployment.owner_user_id != auth_user.user_id {
        return Err(error_response(
            StatusCode::FORBIDDEN,
            "Not your bot",
            "FORBIDDEN",
        ));
    }

    Ok(deployment)
}

// ─────────────────────────────────────────────────────────────────────────────
// Health Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Health check handler.
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        service: "roost-gateway".into(),
    })
}
