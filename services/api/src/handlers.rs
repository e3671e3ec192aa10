//! Axum Handlers for the REST API
//!
//! This module contains the logic for handling HTTP requests for voice
//! session credentials. It uses `utoipa` doc comments to generate OpenAPI
//! documentation.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use std::sync::Arc;
use tracing::error;
use utoipa::ToSchema;

use crate::{minter::MintedSession, state::AppState};

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}

pub enum ApiError {
    /// The provider refused or failed the mint request.
    Upstream(anyhow::Error),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Upstream(err) => {
                error!("Upstream minting error: {:?}", err);
                let message = "The voice provider rejected the session request.".to_string();
                (StatusCode::BAD_GATEWAY, Json(ErrorResponse { message })).into_response()
            }
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                let message = "An internal server error occurred.".to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse { message }),
                )
                    .into_response()
            }
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::InternalServerError(err.into())
    }
}

/// Mint an ephemeral credential for a realtime voice session.
///
/// The credential is short-lived and single-use; callers exchange it against
/// the provider's signaling endpoint and discard it.
#[utoipa::path(
    get,
    path = "/voice/session",
    responses(
        (status = 200, description = "Ephemeral credential minted", body = MintedSession),
        (status = 502, description = "The provider rejected the mint request", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn create_voice_session(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.minter.mint().await.map_err(ApiError::Upstream)?;
    Ok((StatusCode::OK, Json(session)))
}
