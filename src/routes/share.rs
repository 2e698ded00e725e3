use axum::{
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Redirect},
    Json,
};

use super::routes_state::RouteState;
use crate::http_objects::{ApiError, DeleteResponse, ShareInfo};

/// Get the metadata behind a share link
#[utoipa::path(
    get,
    path = "/share/{share_id}",
    tag = "shares",
    responses(
        (status = 200, description = "Share metadata", body = ShareInfo),
        (status = NOT_FOUND, description = "Unknown share id", body = ApiError)
    ),
)]
pub async fn get_share(
    Path(share_id): Path<String>,
    State(state): State<RouteState>,
) -> Result<Json<ShareInfo>, ApiError> {
    let details = state.resolver.describe(&share_id)?;
    Ok(Json(details.into()))
}

/// Redirect to the stored file
#[utoipa::path(
    get,
    path = "/s/{share_id}",
    tag = "shares",
    responses(
        (status = TEMPORARY_REDIRECT, description = "Redirect to the file"),
        (status = NOT_FOUND, description = "Unknown share id or no public url", body = ApiError)
    ),
)]
pub async fn redirect_to_file(
    Path(share_id): Path<String>,
    State(state): State<RouteState>,
) -> Result<Redirect, ApiError> {
    let url = state.resolver.resolve(&share_id)?;
    Ok(Redirect::temporary(&url))
}

/// Delete a shared file
#[utoipa::path(
    delete,
    path = "/delete/{share_id}",
    tag = "shares",
    responses(
        (status = 200, description = "File and share link deleted", body = DeleteResponse),
        (status = NOT_FOUND, description = "Unknown share id", body = ApiError),
        (status = INTERNAL_SERVER_ERROR, description = "Storage refused the delete", body = ApiError)
    ),
)]
pub async fn delete_share(
    Path(share_id): Path<String>,
    State(state): State<RouteState>,
) -> Result<Json<DeleteResponse>, ApiError> {
    state.resolver.delete(&share_id).await?;
    Ok(Json(DeleteResponse {
        ok: true,
        message: "File deleted successfully".to_string(),
        share_id,
    }))
}

/// QR code of the share link
#[utoipa::path(
    get,
    path = "/qrcode/{share_id}",
    tag = "shares",
    responses(
        (status = 200, description = "PNG image of the share link"),
        (status = NOT_FOUND, description = "Unknown share id", body = ApiError)
    ),
)]
pub async fn share_qr_code(
    Path(share_id): Path<String>,
    State(state): State<RouteState>,
) -> Result<impl IntoResponse, ApiError> {
    let png = state.resolver.qr_code(&share_id)?;
    Ok(([(header::CONTENT_TYPE, "image/png")], png))
}
