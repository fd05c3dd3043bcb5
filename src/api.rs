//! Inbound HTTP API.
//!
//! | Route | Purpose |
//! |-------|---------|
//! | `POST /api/stamp` | stamp (server key) or confirm (wallet `txHash`) an upload |
//! | `POST /api/verify` | verify an upload |
//! | `GET /api/history/:address` | on-chain history, `?fromBlock=N` |
//! | `GET /api/stamps/:address` | side-store rows |
//! | `GET /health` | liveness |
//!
//! Error bodies are `{"error", "classification", "message"}`, with the
//! status picked from [`Classification`].

use crate::address::Address;
use crate::chain::TxHash;
use crate::digest::Fingerprint;
use crate::error::{Classification, Error};
use crate::service::{ConfirmRequest, StampRequest, StampService};
use crate::session::WalletSession;
use crate::verify::VerifyRequest;
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Shared handler state.
#[derive(Clone)]
pub struct ApiState {
    service: StampService,
    signer: Option<Arc<WalletSession>>,
}

impl ApiState {
    /// State for a server with an optional signing key for server-side stamps.
    #[must_use]
    pub fn new(service: StampService, signer: Option<WalletSession>) -> Self {
        Self {
            service,
            signer: signer.map(Arc::new),
        }
    }
}

/// HTTP form of a library [`Error`].
#[derive(Debug)]
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn bad_request(msg: impl Into<String>) -> Self {
        Self(Error::InvalidInput(msg.into()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let class = self.0.classification();
        let status = match class {
            Classification::InvalidInput => StatusCode::BAD_REQUEST,
            Classification::AlreadyStamped => StatusCode::CONFLICT,
            Classification::Unavailable | Classification::Partial => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        };
        if status == StatusCode::SERVICE_UNAVAILABLE {
            warn!("Request failed: {}", self.0);
        }
        let body = Json(json!({
            "error": self.0.to_string(),
            "classification": format!("{class:?}"),
            "message": class.message(),
        }));
        (status, body).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Build the router.
pub fn router(state: ApiState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/api/stamp", post(stamp))
        .route("/api/verify", post(verify))
        .route("/api/history/:address", get(history))
        .route("/api/stamps/:address", get(stamps))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the API on `bind` until Ctrl-C.
///
/// # Errors
///
/// Returns [`Error::Io`] if the listener cannot be bound or the server fails.
pub async fn serve(state: ApiState, bind: SocketAddr, max_upload_bytes: usize) -> crate::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("Listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(state, max_upload_bytes))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Ctrl-C received, shutting down");
        })
        .await?;
    Ok(())
}

async fn index() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "message": "chainstamp API",
        "endpoints": {
            "health": "/health",
            "stamp": "/api/stamp",
            "verify": "/api/verify",
            "stamps": "/api/stamps/:address",
            "history": "/api/history/:address",
        }
    }))
}

async fn health(State(state): State<ApiState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "sideStore": state.service.has_side_store(),
        "serverSigning": state.signer.is_some(),
    }))
}

/// A parsed multipart upload.
#[derive(Default)]
struct Upload {
    file: Option<(String, Bytes)>,
    fields: HashMap<String, String>,
}

impl Upload {
    async fn read(mut multipart: Multipart) -> ApiResult<Self> {
        let mut upload = Self::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::bad_request(format!("malformed upload: {e}")))?
        {
            let name = field.name().unwrap_or_default().to_string();
            if name == "file" {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("file upload failed: {e}")))?;
                upload.file = Some((file_name, data));
            } else {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("field {name}: {e}")))?;
                upload.fields.insert(name, value);
            }
        }
        Ok(upload)
    }

    fn take_file(&mut self) -> ApiResult<(String, Bytes)> {
        self.file
            .take()
            .ok_or_else(|| ApiError::bad_request("No file uploaded"))
    }

    fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str) -> ApiResult<Option<T>>
    where
        T: std::str::FromStr<Err = Error>,
    {
        self.field(name).map(str::parse).transpose().map_err(ApiError)
    }

    fn flag(&self, name: &str, default: bool) -> ApiResult<bool> {
        match self.field(name) {
            None => Ok(default),
            Some(v) if v.eq_ignore_ascii_case("true") || v == "1" => Ok(true),
            Some(v) if v.eq_ignore_ascii_case("false") || v == "0" => Ok(false),
            Some(v) => Err(ApiError::bad_request(format!("{name} must be true or false, got {v:?}"))),
        }
    }
}

#[derive(Serialize)]
struct Created<T> {
    success: bool,
    #[serde(flatten)]
    body: T,
}

async fn stamp(State(state): State<ApiState>, multipart: Multipart) -> ApiResult<Response> {
    let mut upload = Upload::read(multipart).await?;
    let (file_name, bytes) = upload.take_file()?;
    let is_public = upload.flag("isPublic", true)?;

    let receipt = if let Some(tx_hash) = upload.parsed::<TxHash>("txHash")? {
        let claimed_owner: Address = upload
            .parsed("ownerAddress")?
            .ok_or_else(|| ApiError::bad_request("Owner address is required"))?;
        state
            .service
            .confirm(ConfirmRequest {
                bytes,
                file_name,
                claimed_owner,
                tx_hash,
                fingerprint: upload.parsed::<Fingerprint>("fileHash")?,
            })
            .await?
    } else {
        let signer = state.signer.as_ref().ok_or_else(|| {
            ApiError(Error::GatewayMisconfigured(
                "server signing key not configured; sign with your wallet and pass txHash"
                    .to_string(),
            ))
        })?;
        state
            .service
            .stamp(
                signer,
                StampRequest {
                    bytes,
                    file_name,
                    pin: upload.field("pin").map(str::to_string),
                    is_public,
                },
            )
            .await?
    };

    Ok((
        StatusCode::CREATED,
        Json(Created {
            success: true,
            body: receipt,
        }),
    )
        .into_response())
}

async fn verify(State(state): State<ApiState>, multipart: Multipart) -> ApiResult<Response> {
    let mut upload = Upload::read(multipart).await?;
    let claimed = upload.parsed::<Fingerprint>("fileHash")?;

    // A precomputed fileHash makes the file optional.
    let request = match (upload.file.take(), claimed) {
        (Some((file_name, bytes)), claimed) => VerifyRequest::from_bytes(bytes)
            .with_pin(upload.field("pin").map(str::to_string))
            .with_fingerprint(claimed)
            .with_file_name(Some(file_name)),
        (None, Some(fp)) => VerifyRequest::from_fingerprint(fp),
        (None, None) => return Err(ApiError::bad_request("No file uploaded")),
    };
    let answer = state.service.verify(request).await?;

    let mut body = serde_json::to_value(&answer).map_err(|e| ApiError(e.into()))?;
    if !answer.exists {
        body["message"] = json!("File not found on blockchain");
    }
    Ok(Json(body).into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryQuery {
    from_block: Option<u64>,
}

fn parse_address(raw: &str) -> ApiResult<Address> {
    raw.parse()
        .map_err(|_| ApiError::bad_request("Invalid address format"))
}

async fn history(
    State(state): State<ApiState>,
    Path(address): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let owner = parse_address(&address)?;
    let history = state.service.history(&owner, query.from_block).await?;
    Ok(Json(json!({
        "address": owner,
        "count": history.entries.len(),
        "fromBlock": history.from_block,
        "toBlock": history.to_block,
        "narrowed": history.narrowed,
        "transactions": history.entries,
    })))
}

async fn stamps(
    State(state): State<ApiState>,
    Path(address): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let owner = parse_address(&address)?;
    let rows = state.service.stamps(&owner).await?;
    Ok(Json(json!({
        "address": owner,
        "count": rows.len(),
        "stamps": rows,
    })))
}
