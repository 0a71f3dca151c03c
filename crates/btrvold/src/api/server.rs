//! Docker volume plugin protocol.
//!
//! Every endpoint is a `POST` with a JSON body. Failures are reported as
//! HTTP 500 with `{"Err": "..."}`, which the engine surfaces to the user.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use btrvol::VolumeDriver;
use btrvol_common::{BtrvolError, BtrvolResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

/// Media type of plugin protocol responses.
pub const PLUGIN_CONTENT_TYPE: &str = "application/vnd.docker.plugins.v1+json";

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    driver: Arc<VolumeDriver>,
}

/// Build the plugin router around a shared driver.
pub fn app(driver: Arc<VolumeDriver>) -> Router {
    Router::new()
        .route("/Plugin.Activate", post(activate))
        .route("/VolumeDriver.Create", post(create))
        .route("/VolumeDriver.Remove", post(remove))
        .route("/VolumeDriver.Mount", post(mount))
        .route("/VolumeDriver.Unmount", post(unmount))
        .route("/VolumeDriver.Path", post(path))
        .route("/VolumeDriver.Get", post(get))
        .route("/VolumeDriver.List", post(list))
        .route("/VolumeDriver.Capabilities", post(capabilities))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { driver })
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NameRequest {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateRequest {
    #[serde(default)]
    name: String,
    #[serde(default)]
    opts: Option<HashMap<String, String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MountRequest {
    #[serde(default)]
    name: String,
    #[serde(rename = "ID", default)]
    id: String,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ErrResponse {
    err: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct MountpointResponse {
    mountpoint: String,
    err: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct VolumeBody {
    name: String,
    mountpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    created_at: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct GetResponse {
    volume: VolumeBody,
    err: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ListResponse {
    volumes: Vec<VolumeBody>,
    err: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CapabilitiesResponse {
    capabilities: CapabilitiesBody,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CapabilitiesBody {
    scope: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ActivateResponse {
    implements: Vec<&'static str>,
}

/// JSON body tagged with the plugin media type.
struct PluginJson<T>(T);

impl<T: Serialize> IntoResponse for PluginJson<T> {
    fn into_response(self) -> Response {
        let mut response = Json(self.0).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static(PLUGIN_CONTENT_TYPE),
        );
        response
    }
}

/// Handler failure, rendered as `{"Err": ...}`.
#[derive(Debug)]
enum ApiError {
    BadRequest(String),
    Driver(BtrvolError),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, err) = match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            Self::Driver(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            Self::Internal(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
        };
        (status, PluginJson(ErrResponse { err })).into_response()
    }
}

type ApiResult<T> = Result<PluginJson<T>, ApiError>;

/// Decode a request body; the engine may send none at all.
fn parse<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("invalid request: {e}")))
}

/// Run a driver call off the async runtime; adapter calls block.
async fn blocking<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&VolumeDriver) -> BtrvolResult<T> + Send + 'static,
    T: Send + 'static,
{
    let driver = Arc::clone(&state.driver);
    tokio::task::spawn_blocking(move || f(driver.as_ref()))
        .await
        .map_err(|e| ApiError::Internal(format!("driver task failed: {e}")))?
        .map_err(ApiError::Driver)
}

async fn activate() -> PluginJson<ActivateResponse> {
    PluginJson(ActivateResponse {
        implements: vec!["VolumeDriver"],
    })
}

async fn create(State(state): State<AppState>, body: Bytes) -> ApiResult<ErrResponse> {
    let req: CreateRequest = parse(&body)?;
    let opts = req.opts.unwrap_or_default();
    blocking(&state, move |driver| driver.create(&req.name, &opts)).await?;
    Ok(PluginJson(ErrResponse::default()))
}

async fn remove(State(state): State<AppState>, body: Bytes) -> ApiResult<ErrResponse> {
    let req: NameRequest = parse(&body)?;
    blocking(&state, move |driver| driver.remove(&req.name)).await?;
    Ok(PluginJson(ErrResponse::default()))
}

async fn mount(State(state): State<AppState>, body: Bytes) -> ApiResult<MountpointResponse> {
    let req: MountRequest = parse(&body)?;
    tracing::debug!(name = %req.name, consumer = %req.id, "Mount requested");
    let mountpoint = blocking(&state, move |driver| driver.mount(&req.name)).await?;
    Ok(PluginJson(MountpointResponse {
        mountpoint: mountpoint.display().to_string(),
        err: String::new(),
    }))
}

async fn unmount(State(state): State<AppState>, body: Bytes) -> ApiResult<ErrResponse> {
    let req: MountRequest = parse(&body)?;
    tracing::debug!(name = %req.name, consumer = %req.id, "Unmount requested");
    blocking(&state, move |driver| driver.unmount(&req.name)).await?;
    Ok(PluginJson(ErrResponse::default()))
}

async fn path(State(state): State<AppState>, body: Bytes) -> ApiResult<MountpointResponse> {
    let req: NameRequest = parse(&body)?;
    Ok(PluginJson(MountpointResponse {
        mountpoint: state.driver.path(&req.name).display().to_string(),
        err: String::new(),
    }))
}

async fn get(State(state): State<AppState>, body: Bytes) -> ApiResult<GetResponse> {
    let req: NameRequest = parse(&body)?;
    let info = blocking(&state, move |driver| driver.get(&req.name)).await?;
    Ok(PluginJson(GetResponse {
        volume: VolumeBody {
            name: info.name,
            mountpoint: info.mountpoint.display().to_string(),
            created_at: Some(info.created_at.to_rfc3339()),
        },
        err: String::new(),
    }))
}

async fn list(State(state): State<AppState>) -> ApiResult<ListResponse> {
    let volumes = blocking(&state, |driver| Ok(driver.list())).await?;
    Ok(PluginJson(ListResponse {
        volumes: volumes
            .into_iter()
            .map(|v| VolumeBody {
                name: v.name,
                mountpoint: v.mountpoint.display().to_string(),
                created_at: None,
            })
            .collect(),
        err: String::new(),
    }))
}

async fn capabilities(State(state): State<AppState>) -> PluginJson<CapabilitiesResponse> {
    PluginJson(CapabilitiesResponse {
        capabilities: CapabilitiesBody {
            scope: state.driver.capabilities().scope.as_str(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use btrvol::{JsonFileStore, MemoryAdapter};
    use btrvol_common::BtrvolPaths;
    use serde_json::{Value, json};
    use tempfile::TempDir;

    fn state() -> (AppState, TempDir) {
        let temp = tempfile::tempdir().unwrap();
        let paths = BtrvolPaths::with_home(temp.path());
        let driver = VolumeDriver::new(
            paths.clone(),
            MemoryAdapter::new(),
            JsonFileStore::new(paths),
        );
        (
            AppState {
                driver: Arc::new(driver),
            },
            temp,
        )
    }

    async fn body_of(response: Response) -> (StatusCode, Value) {
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn request(value: Value) -> Bytes {
        Bytes::from(serde_json::to_vec(&value).unwrap())
    }

    #[tokio::test]
    async fn activate_advertises_volume_driver() {
        let (status, body) = body_of(activate().await.into_response()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"Implements": ["VolumeDriver"]}));
    }

    #[tokio::test]
    async fn create_mount_and_list() {
        let (state, temp) = state();
        let mountpoint = temp.path().join("data").display().to_string();

        let response = create(
            State(state.clone()),
            request(json!({"Name": "data", "Opts": null})),
        )
        .await
        .into_response();
        assert_eq!(response.headers()[header::CONTENT_TYPE], PLUGIN_CONTENT_TYPE);
        let (status, body) = body_of(response).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"Err": ""}));

        let response = mount(
            State(state.clone()),
            request(json!({"Name": "data", "ID": "c1"})),
        )
        .await
        .into_response();
        let (_, body) = body_of(response).await;
        assert_eq!(body, json!({"Mountpoint": mountpoint, "Err": ""}));
        assert_eq!(state.driver.mount_count("data"), Some(1));

        let (_, body) = body_of(list(State(state.clone())).await.into_response()).await;
        assert_eq!(
            body,
            json!({"Volumes": [{"Name": "data", "Mountpoint": mountpoint}], "Err": ""})
        );
    }

    #[tokio::test]
    async fn snapshot_option_is_forwarded() {
        let (state, _temp) = state();
        create(State(state.clone()), request(json!({"Name": "a"})))
            .await
            .into_response();
        let response = create(
            State(state.clone()),
            request(json!({"Name": "b", "Opts": {"snapshot": "a"}})),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let response = remove(State(state.clone()), request(json!({"Name": "a"})))
            .await
            .into_response();
        let (status, body) = body_of(response).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({"Err": "Volume a has dependent snapshots: b"}));
    }

    #[tokio::test]
    async fn get_unknown_volume_is_error() {
        let (state, _temp) = state();
        let response = get(State(state), request(json!({"Name": "ghost"})))
            .await
            .into_response();
        let (status, body) = body_of(response).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({"Err": "No such volume: ghost"}));
    }

    #[tokio::test]
    async fn get_includes_created_at() {
        let (state, _temp) = state();
        create(State(state.clone()), request(json!({"Name": "v"})))
            .await
            .into_response();
        let (status, body) =
            body_of(get(State(state), request(json!({"Name": "v"}))).await.into_response()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["Volume"]["Name"], "v");
        assert!(body["Volume"]["CreatedAt"].is_string());
    }

    #[tokio::test]
    async fn path_of_unknown_volume_is_derived() {
        let (state, temp) = state();
        let response = path(State(state), request(json!({"Name": "ghost"})))
            .await
            .into_response();
        let (status, body) = body_of(response).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["Mountpoint"],
            temp.path().join("ghost").display().to_string()
        );
    }

    #[tokio::test]
    async fn capabilities_scope_is_local() {
        let (state, _temp) = state();
        let (_, body) = body_of(capabilities(State(state)).await.into_response()).await;
        assert_eq!(body, json!({"Capabilities": {"Scope": "local"}}));
    }

    #[tokio::test]
    async fn malformed_body_is_bad_request() {
        let (state, _temp) = state();
        let response = create(State(state), Bytes::from_static(b"{nope"))
            .await
            .into_response();
        let (status, body) = body_of(response).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["Err"].as_str().unwrap().starts_with("invalid request"));
    }

    #[tokio::test]
    async fn empty_body_uses_defaults() {
        let (state, _temp) = state();
        let response = create(State(state), Bytes::new()).await.into_response();
        let (status, body) = body_of(response).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({"Err": "Invalid volume name: \"\""}));
    }
}
