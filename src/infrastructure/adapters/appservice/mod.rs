//! Application-service webhook: the homeserver pushes event batches to us
//!
//! Each `PUT /transactions/{txn_id}` is handled on its own task; the events
//! inside one transaction are handled sequentially, in order.

use std::future::Future;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::put;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::application::errors::RelayError;
use crate::domain::entities::Identity;
use crate::domain::traits::EventHandler;
use crate::infrastructure::adapters::matrix::events::decode_events;

/// Body of a pushed transaction. Events stay raw until each is decoded.
#[derive(Debug, Default, Deserialize)]
pub struct Transaction {
    #[serde(default)]
    pub events: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct AuthQuery {
    access_token: Option<String>,
}

struct AppserviceState<H> {
    handler: Arc<H>,
    hs_token: Arc<str>,
    bot: Identity,
}

impl<H> Clone for AppserviceState<H> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
            hs_token: self.hs_token.clone(),
            bot: self.bot.clone(),
        }
    }
}

/// Routes for the legacy and the versioned transaction endpoints
pub fn router<H: EventHandler + 'static>(handler: Arc<H>, hs_token: &str, bot: Identity) -> Router {
    let state = AppserviceState {
        handler,
        hs_token: Arc::from(hs_token),
        bot,
    };

    Router::new()
        .route("/transactions/{txn_id}", put(on_transaction::<H>))
        .route("/_matrix/app/v1/transactions/{txn_id}", put(on_transaction::<H>))
        .with_state(state)
}

/// Bind and serve until `shutdown` resolves
pub async fn serve(
    router: Router,
    bind_address: &str,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), RelayError> {
    let listener = tokio::net::TcpListener::bind(bind_address)
        .await
        .map_err(|e| RelayError::Server(format!("bind {} failed: {}", bind_address, e)))?;
    tracing::info!("Listening for transactions on {}", bind_address);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| RelayError::Server(e.to_string()))
}

async fn on_transaction<H: EventHandler + 'static>(
    State(state): State<AppserviceState<H>>,
    Path(txn_id): Path<String>,
    Query(query): Query<AuthQuery>,
    headers: HeaderMap,
    Json(transaction): Json<Transaction>,
) -> (StatusCode, Json<Value>) {
    if !token_matches(&state.hs_token, query.access_token.as_deref(), &headers) {
        tracing::warn!("Rejecting transaction {}: bad hs_token", txn_id);
        return (
            StatusCode::FORBIDDEN,
            Json(json!({ "errcode": "M_FORBIDDEN", "error": "Bad hs_token" })),
        );
    }

    tracing::debug!("Transaction {} with {} events", txn_id, transaction.events.len());
    for raw in decode_events(transaction.events) {
        let kind = raw.kind.clone();
        match raw.into_room_event(&state.bot) {
            Some(event) => state.handler.dispatch(event).await,
            None => tracing::debug!("Skipping {} event in transaction {}", kind, txn_id),
        }
    }

    (StatusCode::OK, Json(json!({})))
}

fn token_matches(expected: &str, query_token: Option<&str>, headers: &HeaderMap) -> bool {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    query_token.or(bearer) == Some(expected)
}
