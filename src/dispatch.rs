//! 请求分发：限流、团队解析、认证、查询解析与存储操作。

use axum::body::Body as AxumBody;
use axum::extract::Extension;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Json as JsonResponse, Response};
use futures_util::TryStreamExt;
use http_body_util::BodyExt;
use httpdate::fmt_http_date;
use serde::Serialize;
use std::io;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{debug, info, warn};

use crate::auth::{TeamRegistry, basic_credentials};
use crate::error::ApiError;
use crate::query::{Operation, parse_action};
use crate::rate_limit::TokenBucket;
use crate::storage::{Storage, StorageError, TeamStore};

#[derive(Debug)]
pub struct UploadConfig {
    pub model_max_size: u64,
    pub result_max_size: u64,
}

#[derive(Serialize)]
struct SuccessBody {
    success: bool,
}

/// 所有入站请求的唯一入口。
pub async fn handle_request(
    Extension(limiter): Extension<Arc<TokenBucket>>,
    Extension(teams): Extension<Arc<TeamRegistry>>,
    Extension(storage): Extension<Arc<Storage>>,
    Extension(upload): Extension<Arc<UploadConfig>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: AxumBody,
) -> Response {
    dispatch(&limiter, &teams, &storage, &upload, method, uri, headers, body)
        .await
        .unwrap_or_else(|err| err.into_response())
}

#[allow(clippy::too_many_arguments)]
async fn dispatch(
    limiter: &TokenBucket,
    teams: &TeamRegistry,
    storage: &Storage,
    upload: &UploadConfig,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: AxumBody,
) -> Result<Response, ApiError> {
    if !limiter.try_consume(1) {
        warn!(path = uri.path(), "rate limit exceeded");
        return Err(ApiError::RateLimited);
    }

    let Some(credentials) = basic_credentials(&headers) else {
        return Err(unauthorized());
    };

    let team = teams
        .resolve(uri.path())
        .ok_or_else(|| ApiError::BadRequest("Invalid team name".into()))?;

    if !team.authenticate(&credentials) {
        warn!(team = team.name(), "invalid credentials");
        return Err(unauthorized());
    }

    let operation = parse_action(uri.query())?.with_method(&method)?;
    let store = storage.team(team.name());
    run_operation(&store, team.name(), operation, &headers, body, upload).await
}

async fn run_operation(
    store: &TeamStore,
    team: &str,
    operation: Operation,
    headers: &HeaderMap,
    body: AxumBody,
    upload: &UploadConfig,
) -> Result<Response, ApiError> {
    match operation {
        Operation::PutModel(name) => {
            let mut reader = body_reader(body);
            let written = store
                .put_model(&name, &mut reader, upload.model_max_size)
                .await
                .inspect_err(|err| log_rejected_upload(team, err))?;
            info!(team, model = name, bytes = written, "model uploaded");
            Ok(success())
        }
        Operation::GetModel(name) => {
            let (file, metadata) = store.open_model(&name).await?;
            debug!(team, model = name, size = metadata.len(), "model download");

            let mut response_headers = HeaderMap::new();
            response_headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            );
            response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(metadata.len()));
            if let Ok(modified) = metadata.modified()
                && let Ok(value) = HeaderValue::from_str(&fmt_http_date(modified))
            {
                response_headers.insert(header::LAST_MODIFIED, value);
            }
            Ok((
                StatusCode::OK,
                response_headers,
                AxumBody::from_stream(ReaderStream::new(file)),
            )
                .into_response())
        }
        Operation::ListModels => {
            let names = store.list_models().await?;
            debug!(team, count = names.len(), "list models");
            Ok(JsonResponse(names).into_response())
        }
        Operation::ResetModels => {
            let removed = store.reset_models().await?;
            info!(team, removed, "models reset");
            Ok(success())
        }
        Operation::UploadResult => {
            if !is_json_content_type(headers) {
                return Err(ApiError::BadRequest(
                    "Content-Type must be 'application/json'".into(),
                ));
            }
            let mut reader = body_reader(body);
            let stored = store
                .upload_result(&mut reader, upload.result_max_size)
                .await
                .inspect_err(|err| log_rejected_upload(team, err))?;
            info!(team, result = stored, "result uploaded");
            Ok(success())
        }
        Operation::ViewResults => {
            let stream = store.results_stream().await?;
            Ok((
                StatusCode::OK,
                [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
                AxumBody::from_stream(stream),
            )
                .into_response())
        }
        Operation::ResetResults => {
            let removed = store.reset_results().await?;
            info!(team, removed, "results reset");
            Ok(success())
        }
    }
}

fn body_reader(body: AxumBody) -> impl AsyncRead + Unpin {
    StreamReader::new(BodyExt::into_data_stream(body).map_err(io::Error::other))
}

fn success() -> Response {
    JsonResponse(SuccessBody { success: true }).into_response()
}

fn unauthorized() -> ApiError {
    ApiError::Unauthorized("Missing or invalid 'Authorization' header".into())
}

fn log_rejected_upload(team: &str, err: &StorageError) {
    if let StorageError::TooLarge(limit) = err {
        warn!(team, limit, "upload exceeds size limit");
    }
}

/// 仅接受 `application/json`（允许附带参数）。
fn is_json_content_type(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .is_some_and(|essence| essence.trim().eq_ignore_ascii_case("application/json"))
}
