//! Roost Gateway - Accounts, coins, and bot deployment.
//!
//! This crate provides the HTTP service for the Roost platform:
//! - Registration with email verification and JWT login
//! - Coin ledger (signup bonus, deployment debits, transfers)
//! - Bot deployments driving the session subsystem
//!
//! ## Architecture
//!
//! ```text
//! Client → Gateway (auth → coin debit → deployment record)
//!                         ↓
//!                  SessionManager → protocol daemon
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod auth;
pub mod coins;
pub mod deployments;
pub mod mailer;
pub mod routes;
pub mod user;

pub use routes::{build_all_routes, AppState};

use axum::Router;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use roost_common::config::Config;
use roost_sessions::{BridgeTransport, SessionManager, Transport};

use crate::auth::AuthState;
use crate::coins::CoinLedger;
use crate::deployments::{DeploymentStatus, DeploymentStore};
use crate::mailer::mailer_from_config;
use crate::user::UserStore;

/// Where the gateway keeps its SQLite databases.
fn data_dir() -> PathBuf {
    roost_common::config::config_dir().join("data")
}

/// Assemble the application state from configuration. The transport is
/// injected so tests can run the whole stack against a scripted double.
pub fn build_state(
    config: &Config,
    transport: Arc<dyn Transport>,
    db_dir: Option<PathBuf>,
) -> anyhow::Result<AppState> {
    let jwt_secret = config
        .auth
        .jwt_secret
        .clone()
        .or_else(|| std::env::var("ROOST_JWT_SECRET").ok())
        .unwrap_or_else(|| "roost-default-secret-change-me!".to_string());
    let auth = AuthState::new(jwt_secret, config.auth.token_expiry_secs);

    let db_dir = db_dir.unwrap_or_else(data_dir);
    std::fs::create_dir_all(&db_dir)?;

    let users = Arc::new(UserStore::new(&db_dir.join("users.db"))?);
    let coins = Arc::new(CoinLedger::new(&db_dir.join("coins.db"))?);
    let deployments = Arc::new(DeploymentStore::new(&db_dir.join("deployments.db"))?);
    let sessions = SessionManager::from_config(transport, &config.sessions);
    let mailer = mailer_from_config(&config.smtp)?;

    Ok(AppState {
        auth,
        users,
        coins,
        deployments,
        sessions,
        mailer,
        signup_bonus: config.coins.signup_bonus.max(0) as u64,
        deploy_cost: config.coins.deploy_cost.max(0) as u64,
    })
}

/// Build the gateway router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    routes::build_all_routes(state).layer(cors)
}

/// Re-create sessions for deployments that were live before a restart.
/// Stored credentials resume straight to the open state; sessions whose
/// credentials are gone fail pairing and are marked failed without a refund
/// (the deployment already consumed its coins).
pub async fn resume_deployments(state: &AppState) {
    let resumable = match state.deployments.list_resumable() {
        Ok(deployments) => deployments,
        Err(e) => {
            tracing::error!(error = %e, "Failed to list resumable deployments");
            return;
        }
    };

    // Credentials without a live deployment are inert until the owner
    // redeploys under the same name; surface them for operators.
    if let Ok(stored) = state.sessions.stored_sessions() {
        for id in &stored {
            if !resumable.iter().any(|d| d.session_id == id.as_str()) {
                tracing::debug!(session = %id, "stored credentials with no resumable deployment");
            }
        }
    }

    for deployment in resumable {
        match state
            .sessions
            .create_session(&deployment.name, &deployment.owner_user_id)
            .await
        {
            Ok(outcome) if outcome.pairing_artifact.is_none() => {
                let _ = state
                    .deployments
                    .set_status(&deployment.id, DeploymentStatus::Active);
                tracing::info!(
                    deployment = %deployment.id,
                    session = %outcome.session_id,
                    "Session resumed"
                );
            }
            Ok(outcome) => {
                // Needs a fresh pairing; nobody is watching for the artifact,
                // so drop the session and let the owner redeploy.
                state.sessions.disconnect(&outcome.session_id).await;
                let _ = state
                    .deployments
                    .set_status(&deployment.id, DeploymentStatus::Failed);
                tracing::warn!(
                    deployment = %deployment.id,
                    "Stored credentials no longer valid, deployment marked failed"
                );
            }
            Err(e) => {
                let _ = state
                    .deployments
                    .set_status(&deployment.id, DeploymentStatus::Failed);
                tracing::warn!(
                    deployment = %deployment.id,
                    error = %e,
                    "Failed to resume session"
                );
            }
        }
    }
}

/// Start the gateway server.
pub async fn start_server(config: &Config) -> anyhow::Result<()> {
    let addr = SocketAddr::from((
        config.network.bind.parse::<std::net::IpAddr>()?,
        config.network.port,
    ));

    let transport: Arc<dyn Transport> =
        Arc::new(BridgeTransport::new(config.sessions.bridge_url.clone()));
    let state = build_state(config, transport, None)?;

    resume_deployments(&state).await;

    let router = build_router(state);

    tracing::info!("Starting Roost Gateway on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
