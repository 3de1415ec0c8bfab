use crate::session::{SessionError, SessionHandle, SessionView};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use twin_common::{
    extract, CommandOutcome, ControlCommand, FoodEntry, FoodItem, FoodLog, FoodLogError, ParameterSnapshot,
    PlaybackStatus, RangeError, SerializableFrame, SnapshotRenderer, StaleRequestError, StatisticsSummary,
    ValidationError,
};

/// Window for the carbohydrate total reported with the food log.
const CARB_TOTAL_HOURS: f64 = 24.0;

/// Shared application state for the web front end.
#[derive(Clone)]
pub struct AppState {
    pub session: SessionHandle,
    /// Label per model id, for status output.
    pub model_labels: Vec<String>,
    pub food_log: Arc<Mutex<FoodLog>>,
}

/// Standard JSON response for control endpoints and errors.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct JumpRequest {
    pub frame: usize,
}

/// `value` may be sent as a string or a bare JSON number; `null` clears optional fields.
#[derive(Debug, Deserialize)]
pub struct ParameterRequest {
    pub field: String,
    pub value: serde_json::Value,
}

/// Frame requests must name the result generation they were paged from.
#[derive(Debug, Deserialize)]
pub struct FrameQuery {
    pub generation: u64,
}

fn one_serving() -> f64 {
    1.0
}

fn default_unit() -> String {
    "serving".to_string()
}

fn default_recent() -> usize {
    10
}

#[derive(Debug, Deserialize)]
pub struct FoodRequest {
    pub food_name: String,
    #[serde(default = "one_serving")]
    pub quantity: f64,
    #[serde(default = "default_unit")]
    pub unit: String,
    /// Also set `meal_size` to the logged carbohydrate.
    #[serde(default)]
    pub apply_to_meal: bool,
}

#[derive(Debug, Serialize)]
pub struct FoodLoggedResponse {
    pub success: bool,
    pub entry: FoodEntry,
    pub total_carbs_24h: f64,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct FoodLogQuery {
    #[serde(default = "default_recent")]
    pub limit: usize,
}

#[derive(Debug, Serialize)]
pub struct FoodLogResponse {
    pub recent: Vec<FoodEntry>,
    pub total_carbs_24h: f64,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub playback: PlaybackStatus,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: PlaybackStatus,
    pub frame: usize,
    pub total_frames: usize,
    /// Generation of the cached result; frame requests must quote it.
    pub generation: Option<u64>,
    pub window_steps: usize,
    pub tick_interval_ms: u64,
    pub model_label: Option<String>,
    pub parameters: ParameterSnapshot,
    pub last_error: Option<String>,
}

// --- Errors ---

#[derive(Debug)]
pub enum ApiError {
    Validation(ValidationError),
    Range(RangeError),
    Stale(StaleRequestError),
    Unavailable(String),
    Session(SessionError),
    Food(FoodLogError),
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Validation(e) => ApiError::Validation(e),
            other => ApiError::Session(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Validation(e) => (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
            ApiError::Range(e) => (StatusCode::NOT_FOUND, e.to_string()),
            ApiError::Stale(e) => (StatusCode::CONFLICT, e.to_string()),
            ApiError::Unavailable(message) => (StatusCode::SERVICE_UNAVAILABLE, message),
            ApiError::Session(e) => {
                error!("Session error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            ApiError::Food(e @ (FoodLogError::UnknownFood(_) | FoodLogError::InvalidQuantity(_))) => {
                (StatusCode::UNPROCESSABLE_ENTITY, e.to_string())
            }
            ApiError::Food(e) => {
                error!("Food log error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        };
        (
            status,
            Json(ApiResponse {
                success: false,
                message,
            }),
        )
            .into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/status", get(status_handler))
        .route("/api/stats", get(stats_handler))
        .route("/api/frames/:index", get(frame_handler))
        .route("/api/play", post(play_handler))
        .route("/api/pause", post(pause_handler))
        .route("/api/reset", post(reset_handler))
        .route("/api/jump", post(jump_handler))
        .route("/api/parameters", post(parameter_handler))
        .route("/api/food", get(food_log_handler).post(log_food_handler))
        .route("/api/food/clear", post(clear_food_handler))
        .route("/api/food/database", get(food_database_handler))
        .with_state(state)
}

// --- Read-only endpoints ---

/// GET `/health`
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        playback: state.session.view().status,
    })
}

/// GET `/api/status`
pub async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    let view = state.session.view();
    let model_label = state
        .model_labels
        .get(view.parameters.model.id() as usize)
        .cloned();
    Json(StatusResponse {
        status: view.status,
        frame: view.frame,
        total_frames: view.result.as_ref().map_or(0, |r| r.len()),
        generation: view.result.as_ref().map(|r| r.generation),
        window_steps: view.window_steps,
        tick_interval_ms: view.tick_interval_ms,
        model_label,
        parameters: view.parameters,
        last_error: view.last_error,
    })
}

/// GET `/api/frames/:index?generation=N`
///
/// Renders the window ending at `index` from the cached result. Independent
/// of the playback frame.
/// - `400` when `generation` is missing
/// - `404` when `index` is past the end of the series
/// - `409` when `generation` does not match the cached result
/// - `503` while no result is available
pub async fn frame_handler(
    State(state): State<AppState>,
    Path(index): Path<usize>,
    Query(query): Query<FrameQuery>,
) -> Result<Json<SerializableFrame>, ApiError> {
    let view = state.session.view();
    let cached = match view.result {
        Some(cached) => cached,
        None => return Err(unavailable(&view)),
    };
    if query.generation != cached.generation {
        return Err(ApiError::Stale(StaleRequestError {
            requested: query.generation,
            current: cached.generation,
        }));
    }
    if index >= cached.len() {
        return Err(ApiError::Range(RangeError {
            frame: index,
            len: cached.len(),
        }));
    }
    let slice = extract(&cached.result, index, view.window_steps);
    Ok(Json(SnapshotRenderer.render(&slice)))
}

/// GET `/api/stats`
pub async fn stats_handler(State(state): State<AppState>) -> Result<Json<StatisticsSummary>, ApiError> {
    let view = state.session.view();
    match &view.result {
        Some(cached) => Ok(Json(StatisticsSummary::summarize(&cached.result))),
        None => Err(unavailable(&view)),
    }
}

fn unavailable(view: &SessionView) -> ApiError {
    let message = match (&view.last_error, view.status) {
        (_, PlaybackStatus::Invalidated) => "Re-simulation in progress".to_string(),
        (Some(e), _) => format!("No simulation result: {}", e),
        (None, _) => "No simulation result".to_string(),
    };
    ApiError::Unavailable(message)
}

// --- Control endpoints ---

async fn control(state: &AppState, command: ControlCommand) -> Result<Json<ApiResponse>, ApiError> {
    info!("Control request: {}", command);
    let outcome = state.session.send(command).await.map_err(|e| {
        if let SessionError::Validation(e) = &e {
            warn!("Rejected: {}", e);
        }
        ApiError::from(e)
    })?;
    Ok(Json(ApiResponse {
        success: true,
        message: describe(&outcome),
    }))
}

fn describe(outcome: &CommandOutcome) -> String {
    match outcome {
        CommandOutcome::Playback { changed: true } => "ok".to_string(),
        CommandOutcome::Playback { changed: false } => "no change".to_string(),
        CommandOutcome::Jumped(jump) => match jump.clamped {
            Some(e) => format!("jumped to frame {} ({})", jump.frame, e),
            None => format!("jumped to frame {}", jump.frame),
        },
        CommandOutcome::Resimulate(request) => format!("re-simulating for generation {}", request.generation),
        CommandOutcome::Updated => "updated".to_string(),
    }
}

/// POST `/api/play`
pub async fn play_handler(State(state): State<AppState>) -> Result<Json<ApiResponse>, ApiError> {
    control(&state, ControlCommand::Play).await
}

/// POST `/api/pause`
pub async fn pause_handler(State(state): State<AppState>) -> Result<Json<ApiResponse>, ApiError> {
    control(&state, ControlCommand::Pause).await
}

/// POST `/api/reset`
pub async fn reset_handler(State(state): State<AppState>) -> Result<Json<ApiResponse>, ApiError> {
    control(&state, ControlCommand::Reset).await
}

/// POST `/api/jump` with `{"frame": N}`. Out-of-range targets are clamped, not rejected.
pub async fn jump_handler(
    State(state): State<AppState>,
    Json(payload): Json<JumpRequest>,
) -> Result<Json<ApiResponse>, ApiError> {
    control(&state, ControlCommand::Jump { frame: payload.frame }).await
}

/// POST `/api/parameters` with `{"field": "...", "value": ...}`
pub async fn parameter_handler(
    State(state): State<AppState>,
    Json(payload): Json<ParameterRequest>,
) -> Result<Json<ApiResponse>, ApiError> {
    let value = match payload.value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => "none".to_string(),
        other => other.to_string(),
    };
    control(
        &state,
        ControlCommand::SetParameter {
            field: payload.field,
            value,
        },
    )
    .await
}

// --- Food log ---

/// POST `/api/food` with `{"food_name": "...", "quantity": 1, "unit": "serving", "apply_to_meal": false}`
pub async fn log_food_handler(
    State(state): State<AppState>,
    Json(payload): Json<FoodRequest>,
) -> Result<Json<FoodLoggedResponse>, ApiError> {
    let (entry, total_carbs_24h) = {
        let mut log = state.food_log.lock().await;
        let entry = log
            .record(&payload.food_name, payload.quantity, &payload.unit)
            .map_err(|e| {
                warn!("Food not logged: {}", e);
                ApiError::Food(e)
            })?;
        (entry, log.carbs_last(CARB_TOTAL_HOURS))
    };

    let mut message = format!(
        "Logged {} with {:.0} grams of carbohydrates",
        entry.food_name, entry.carbs
    );
    if payload.apply_to_meal {
        let command = ControlCommand::SetParameter {
            field: "meal_size".to_string(),
            value: entry.carbs.to_string(),
        };
        let outcome = state.session.send(command).await?;
        message = format!("{}; meal size {}", message, describe(&outcome));
    }
    Ok(Json(FoodLoggedResponse {
        success: true,
        entry,
        total_carbs_24h,
        message,
    }))
}

/// GET `/api/food?limit=N`
pub async fn food_log_handler(
    State(state): State<AppState>,
    Query(query): Query<FoodLogQuery>,
) -> Json<FoodLogResponse> {
    let log = state.food_log.lock().await;
    Json(FoodLogResponse {
        recent: log.recent(query.limit).to_vec(),
        total_carbs_24h: log.carbs_last(CARB_TOTAL_HOURS),
    })
}

/// POST `/api/food/clear`
pub async fn clear_food_handler(State(state): State<AppState>) -> Result<Json<ApiResponse>, ApiError> {
    state.food_log.lock().await.clear().map_err(ApiError::Food)?;
    Ok(Json(ApiResponse {
        success: true,
        message: "Food log cleared".to_string(),
    }))
}

/// GET `/api/food/database`
pub async fn food_database_handler(State(state): State<AppState>) -> Json<Vec<FoodItem>> {
    Json(state.food_log.lock().await.database().items().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::tests::{ready, start_session};
    use twin_common::{FoodDatabase, ModelCatalog};

    async fn app_state() -> AppState {
        let (session, _task) = start_session();
        ready(&session).await;
        AppState {
            session,
            model_labels: ModelCatalog::reference().labels().to_vec(),
            food_log: Arc::new(Mutex::new(FoodLog::in_memory(FoodDatabase::default()))),
        }
    }

    fn food(name: &str, quantity: f64, apply_to_meal: bool) -> Json<FoodRequest> {
        Json(FoodRequest {
            food_name: name.to_string(),
            quantity,
            unit: "serving".to_string(),
            apply_to_meal,
        })
    }

    fn status_of(result: Result<impl IntoResponse, ApiError>) -> StatusCode {
        match result {
            Ok(response) => response.into_response().status(),
            Err(e) => e.into_response().status(),
        }
    }

    #[tokio::test]
    async fn status_reports_result_and_model() {
        let state = app_state().await;
        let Json(status) = status_handler(State(state)).await;
        assert_eq!(status.total_frames, 60);
        assert_eq!(status.generation, Some(0));
        assert_eq!(status.model_label.as_deref(), Some("T1DEXI-01-0102"));
    }

    #[tokio::test]
    async fn frame_request_renders_window() {
        let state = app_state().await;
        let Json(frame) = frame_handler(
            State(state),
            Path(20),
            Query(FrameQuery { generation: 0 }),
        )
        .await
        .unwrap();
        let SerializableFrame::Window(payload) = frame else {
            panic!("expected a window frame");
        };
        assert_eq!(payload.frame, 20);
        assert_eq!(payload.index.len(), 12);
        assert_eq!(payload.total_frames, 60);
    }

    #[tokio::test]
    async fn frame_request_errors() {
        let state = app_state().await;
        let out_of_range = frame_handler(State(state.clone()), Path(60), Query(FrameQuery { generation: 0 })).await;
        assert_eq!(status_of(out_of_range), StatusCode::NOT_FOUND);

        let stale = frame_handler(State(state), Path(0), Query(FrameQuery { generation: 7 })).await;
        assert_eq!(status_of(stale), StatusCode::CONFLICT);

        let uri: axum::http::Uri = "/api/frames/3".parse().unwrap();
        let missing = Query::<FrameQuery>::try_from_uri(&uri).unwrap_err();
        assert_eq!(missing.into_response().status(), StatusCode::BAD_REQUEST);

        let uri: axum::http::Uri = "/api/frames/3?generation=0".parse().unwrap();
        let Query(query) = Query::<FrameQuery>::try_from_uri(&uri).unwrap();
        assert_eq!(query.generation, 0);
    }

    #[tokio::test]
    async fn control_vocabulary() {
        let state = app_state().await;
        let jumped = jump_handler(State(state.clone()), Json(JumpRequest { frame: 1000 }))
            .await
            .unwrap();
        assert!(jumped.message.contains("frame 59"));
        assert_eq!(state.session.view().frame, 59);

        let Json(reset) = reset_handler(State(state.clone())).await.unwrap();
        assert!(reset.success);
        assert_eq!(state.session.view().frame, 0);

        let Json(paused) = pause_handler(State(state.clone())).await.unwrap();
        assert_eq!(paused.message, "no change");
    }

    #[tokio::test]
    async fn parameter_validation_maps_to_422() {
        let state = app_state().await;
        let bad = parameter_handler(
            State(state.clone()),
            Json(ParameterRequest {
                field: "digital_twin".into(),
                value: serde_json::json!(12),
            }),
        )
        .await;
        assert_eq!(status_of(bad), StatusCode::UNPROCESSABLE_ENTITY);

        let Json(accepted) = parameter_handler(
            State(state.clone()),
            Json(ParameterRequest {
                field: "meal_size".into(),
                value: serde_json::json!(45),
            }),
        )
        .await
        .unwrap();
        assert!(accepted.message.contains("generation 1"));

        let stale = frame_handler(State(state), Path(0), Query(FrameQuery { generation: 0 })).await;
        assert_ne!(status_of(stale), StatusCode::OK);
    }

    #[tokio::test]
    async fn stats_summarize_cached_result() {
        let state = app_state().await;
        let Json(stats) = stats_handler(State(state)).await.unwrap();
        let twin = stats.digital_twin.unwrap();
        assert!(twin.min <= twin.mean && twin.mean <= twin.max);
        assert!((0.0..=1.0).contains(&twin.time_in_range));
    }

    #[tokio::test]
    async fn food_is_logged_and_listed() {
        let state = app_state().await;
        let Json(logged) = log_food_handler(State(state.clone()), food("banana", 2.0, false))
            .await
            .unwrap();
        assert_eq!(logged.entry.carbs, 54.0);
        assert_eq!(logged.total_carbs_24h, 54.0);
        log_food_handler(State(state.clone()), food("Apple", 1.0, false))
            .await
            .unwrap();

        let Json(listed) = food_log_handler(State(state.clone()), Query(FoodLogQuery { limit: 1 })).await;
        assert_eq!(listed.recent.len(), 1);
        assert_eq!(listed.recent[0].food_name, "apple");
        assert_eq!(listed.total_carbs_24h, 79.0);
        // logging alone does not touch the simulation
        assert_eq!(state.session.view().parameters.generation, 0);

        let Json(cleared) = clear_food_handler(State(state.clone())).await.unwrap();
        assert!(cleared.success);
        let Json(listed) = food_log_handler(State(state), Query(FoodLogQuery { limit: 10 })).await;
        assert!(listed.recent.is_empty());
        assert_eq!(listed.total_carbs_24h, 0.0);
    }

    #[tokio::test]
    async fn logged_food_can_set_the_meal() {
        let state = app_state().await;
        let Json(logged) = log_food_handler(State(state.clone()), food("rice", 1.5, true))
            .await
            .unwrap();
        assert!(logged.message.contains("generation 1"), "{}", logged.message);

        let view = state.session.view();
        assert_eq!(view.parameters.generation, 1);
        assert_eq!(view.parameters.scenario.meal_size, 67.5);
    }

    #[tokio::test]
    async fn food_errors_map_to_422() {
        let state = app_state().await;
        let unknown = log_food_handler(State(state.clone()), food("durian", 1.0, true)).await;
        assert_eq!(status_of(unknown), StatusCode::UNPROCESSABLE_ENTITY);
        let negative = log_food_handler(State(state.clone()), food("apple", -1.0, false)).await;
        assert_eq!(status_of(negative), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(state.session.view().parameters.generation, 0);

        let Json(database) = food_database_handler(State(state)).await;
        assert!(database.iter().any(|item| item.name == "pizza" && item.carbs == 30.0));
    }
}
