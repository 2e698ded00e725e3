use std::any::Any;

use axum::{
    extract::{DefaultBodyLimit, State},
    http::{HeaderValue, Method},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json,
    Router,
};
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{self, AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    config::ServerConfig,
    error::ShareError,
    http_objects::{
        ApiError,
        BatchUploadResponse,
        DeleteResponse,
        FailedUpload,
        HealthResponse,
        ShareInfo,
        UploadResponse,
    },
    middleware::InstanceRequestSpan,
};

pub mod routes_state;
pub mod share;
pub mod upload;

use routes_state::RouteState;
use share::{delete_share, get_share, redirect_to_file, share_qr_code};
use upload::{upload_file, upload_files};

#[derive(OpenApi)]
#[openapi(
        paths(
            upload::upload_file,
            upload::upload_files,
            share::get_share,
            share::redirect_to_file,
            share::delete_share,
            share::share_qr_code,
            health,
        ),
        components(
            schemas(
                ApiError,
                UploadResponse,
                BatchUploadResponse,
                FailedUpload,
                ShareInfo,
                DeleteResponse,
                HealthResponse,
            )
        ),
        tags(
            (name = "fileshare", description = "File upload and share link API")
        )
    )]
struct ApiDoc;

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(cors::Any);
    if config.cors_allowed_origins.is_empty() {
        return layer.allow_origin(cors::Any);
    }
    let origins = config
        .cors_allowed_origins
        .iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect::<Vec<_>>();
    layer.allow_origin(AllowOrigin::list(origins))
}

fn handle_panic(_: Box<dyn Any + Send + 'static>) -> Response {
    ApiError::from(ShareError::Unexpected("request handler panicked".to_string())).into_response()
}

pub fn create_routes(route_state: RouteState) -> Router {
    let config = route_state.config.clone();
    let request_span = InstanceRequestSpan::new(&config.env, &config.instance_id());

    Router::new()
        .merge(SwaggerUi::new("/docs/swagger").url("/docs/openapi.json", ApiDoc::openapi()))
        .route("/", get(index))
        .route("/health", get(health))
        .route("/upload", post(upload_file))
        .route("/upload-multiple", post(upload_files))
        .route("/share/{share_id}", get(get_share))
        .route("/s/{share_id}", get(redirect_to_file))
        .route("/delete/{share_id}", delete(delete_share))
        .route("/qrcode/{share_id}", get(share_qr_code))
        .with_state(route_state)
        .layer(TraceLayer::new_for_http().make_span_with(request_span))
        .layer(cors_layer(&config))
        .layer(CatchPanicLayer::custom(handle_panic))
        // size limits are enforced while streaming uploads
        .layer(DefaultBodyLimit::disable())
}

async fn index() -> &'static str {
    "Fileshare Server"
}

/// Service health
#[utoipa::path(
    get,
    path = "/health",
    tag = "operations",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = INTERNAL_SERVER_ERROR, description = "Share registry unavailable", body = ApiError)
    ),
)]
async fn health(State(state): State<RouteState>) -> Result<Json<HealthResponse>, ApiError> {
    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        bucket: state.config.blob_storage.path.clone(),
        registry: state.config.registry.backend_name().to_string(),
        shares: state.resolver.share_count()?,
    }))
}
