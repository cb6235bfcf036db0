use std::net::SocketAddr;

use anyhow::{Context, Result as AnyResult};
use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{Value, json};
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use vanguard_core::{
    CommissionRateTable, CommissionStatus, CustomerDirectory, CustomerLocation, GeoPoint,
    GpsActivity, GpsConfidence, SurveyCatalog, SurveySummary, TaskKind, TaskStatus, VisitStatus,
    VisitTask, WorkflowError, accrue, blocking_task_ids, generate_task_drafts, haversine_meters,
    total_amount, validate_proximity,
};
use vanguard_platform::{
    AgentTrackQuery, AgentTrackResponse, CancelVisitRequest, CancelVisitResponse, CheckInRequest,
    CheckInResponse, CheckOutRequest, CheckOutResponse, CommissionLineListResponse,
    CommissionLineView, CompleteTaskRequest,
    GpsSampleView, LocationValidationView, LogGpsSampleRequest, LogGpsSampleResponse,
    MyVisitsQuery, NearbyCustomerView, NearbyCustomersRequest, NearbyCustomersResponse, RedisBus,
    ServiceConfig, SkipTaskRequest, TaskResponse, TaskView, VISITS_COMPLETED_CHANNEL,
    ValidateProximityRequest, ValidateProximityResponse, VisitCommissionsQuery,
    VisitCompletedEvent, VisitListResponse, VisitTasksQuery, VisitTasksResponse, VisitView,
    connect_database,
};

#[derive(Clone)]
struct AppState {
    pool: PgPool,
    bus: RedisBus,
    rates: CommissionRateTable,
    check_in_radius_m: f64,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

/// Boundary error. Workflow errors map onto it with their machine codes;
/// store failures are the only 5xx and every operation is safe to retry
/// (commission emission is guarded by the deterministic emission key).
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    details: Option<Value>,
}

impl ApiError {
    fn validation(message: impl Into<String>) -> Self {
        WorkflowError::validation(message).into()
    }

    fn not_found(message: impl Into<String>) -> Self {
        WorkflowError::not_found(message).into()
    }

    fn store(err: impl std::fmt::Display) -> Self {
        WorkflowError::store(err.to_string()).into()
    }
}

impl From<WorkflowError> for ApiError {
    fn from(err: WorkflowError) -> Self {
        let message = err.to_string();
        let code = err.code();
        let (status, details) = match &err {
            WorkflowError::Validation(_) => (StatusCode::BAD_REQUEST, None),
            WorkflowError::LocationRejected {
                distance_m,
                radius_m,
            } => (
                StatusCode::BAD_REQUEST,
                Some(json!({
                    "distance_m": (distance_m * 10.0).round() / 10.0,
                    "radius_m": radius_m,
                })),
            ),
            WorkflowError::NotFound(_) => (StatusCode::NOT_FOUND, None),
            WorkflowError::StateConflict {
                blocking_task_ids, ..
            } => {
                let details = (!blocking_task_ids.is_empty()).then(|| {
                    json!({
                        "blocking_tasks": blocking_task_ids.len(),
                        "blocking_task_ids": blocking_task_ids,
                    })
                });
                (StatusCode::BAD_REQUEST, details)
            }
            WorkflowError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, None),
        };

        Self {
            status,
            code,
            message,
            details,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(code = self.code, message = %self.message, "request failed");
        } else {
            debug!(code = self.code, message = %self.message, "request rejected");
        }

        let body = ErrorBody {
            error: self.code,
            message: self.message,
            details: self.details,
        };
        (self.status, Json(body)).into_response()
    }
}

#[tokio::main]
async fn main() -> AnyResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "vanguard_gateway=info".to_string()),
        )
        .init();

    let config = ServiceConfig::from_env("0.0.0.0:8080")?;
    let pool = connect_database(&config.database_url).await?;
    let bus = RedisBus::connect(&config.redis_url)?;
    let rates = commission_rates_from_env()?;

    let state = AppState {
        pool,
        bus,
        rates,
        check_in_radius_m: config.check_in_radius_m,
    };
    let router = Router::new()
        .route("/healthz", get(healthz))
        .route("/field/check-in", post(check_in))
        .route("/field/visits/{visit_id}/tasks", get(visit_tasks))
        .route("/field/tasks/complete", post(complete_task))
        .route("/field/tasks/skip", post(skip_task))
        .route("/field/check-out", post(check_out))
        .route("/field/visits/{visit_id}/cancel", post(cancel_visit))
        .route("/field/my-visits", get(my_visits))
        .route(
            "/field/visits/{visit_id}/commissions",
            get(visit_commissions),
        )
        .route("/gps/validate-proximity", post(validate_proximity_check))
        .route("/gps/samples", post(log_gps_sample))
        .route("/gps/agents/{agent_id}/track", get(agent_track))
        .route("/gps/nearby-customers", post(nearby_customers))
        .with_state(state);

    let addr: SocketAddr = config.http_addr.parse()?;
    info!("gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn check_in(
    State(state): State<AppState>,
    Json(payload): Json<CheckInRequest>,
) -> Result<(StatusCode, Json<CheckInResponse>), ApiError> {
    let agent_fix = GeoPoint::new(payload.latitude, payload.longitude).map_err(ApiError::from)?;

    let location = state
        .customer_location(payload.tenant_id, payload.customer_id)
        .await
        .map_err(ApiError::store)?
        .ok_or_else(|| ApiError::not_found("customer not found"))?;

    // Hard gate whenever the customer has coordinates on file. A customer
    // without a stored location is a fresh registration and is admitted
    // without a verdict.
    let validation = match (location.latitude, location.longitude) {
        (Some(latitude), Some(longitude)) => {
            let target = GeoPoint::new(latitude, longitude).map_err(|err| {
                ApiError::store(format!("stored customer coordinates are invalid: {err}"))
            })?;
            let check = validate_proximity(
                agent_fix,
                target,
                state.check_in_radius_m,
                payload.accuracy,
            );
            if !check.within_radius {
                return Err(WorkflowError::LocationRejected {
                    distance_m: check.distance_m,
                    radius_m: state.check_in_radius_m,
                }
                .into());
            }
            Some(LocationValidationView {
                within_radius: check.within_radius,
                distance_m: check.distance_m,
                radius_m: state.check_in_radius_m,
                confidence: check.confidence.as_str().to_string(),
            })
        }
        _ => None,
    };

    let now = Utc::now();
    let mut tx = state.pool.begin().await.map_err(ApiError::store)?;

    let visit_id = match payload.visit_id {
        Some(visit_id) => {
            let row = sqlx::query(
                "SELECT customer_id, status FROM visits WHERE id = $1 AND tenant_id = $2 FOR UPDATE",
            )
            .bind(visit_id)
            .bind(payload.tenant_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(ApiError::store)?;

            let Some(row) = row else {
                return Err(ApiError::not_found("visit not found"));
            };

            let scheduled_customer: Uuid = row.try_get("customer_id").map_err(ApiError::store)?;
            if scheduled_customer != payload.customer_id {
                return Err(WorkflowError::conflict(
                    "visit is scheduled for a different customer",
                )
                .into());
            }

            let status: String = row.try_get("status").map_err(ApiError::store)?;
            let status = VisitStatus::parse(&status).map_err(ApiError::store)?;
            status
                .transition(VisitStatus::InProgress)
                .map_err(ApiError::from)?;

            sqlx::query(
                r#"
                UPDATE visits SET
                    status = $3,
                    agent_id = $4,
                    check_in_time = $5,
                    check_in_latitude = $6,
                    check_in_longitude = $7,
                    check_in_accuracy = $8,
                    updated_at = $5
                WHERE id = $1 AND tenant_id = $2
                "#,
            )
            .bind(visit_id)
            .bind(payload.tenant_id)
            .bind(VisitStatus::InProgress.as_str())
            .bind(payload.agent_id)
            .bind(now)
            .bind(payload.latitude)
            .bind(payload.longitude)
            .bind(payload.accuracy)
            .execute(&mut *tx)
            .await
            .map_err(ApiError::store)?;

            visit_id
        }
        None => {
            let visit_id = Uuid::new_v4();
            sqlx::query(
                r#"
                INSERT INTO visits (
                    id, tenant_id, agent_id, customer_id, status, scheduled_date,
                    check_in_time, check_in_latitude, check_in_longitude, check_in_accuracy,
                    created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $6, $7, $8, $9, $6, $6)
                "#,
            )
            .bind(visit_id)
            .bind(payload.tenant_id)
            .bind(payload.agent_id)
            .bind(payload.customer_id)
            .bind(VisitStatus::InProgress.as_str())
            .bind(now)
            .bind(payload.latitude)
            .bind(payload.longitude)
            .bind(payload.accuracy)
            .execute(&mut *tx)
            .await
            .map_err(ApiError::store)?;

            visit_id
        }
    };

    insert_gps_sample(
        &mut *tx,
        NewGpsSample {
            tenant_id: payload.tenant_id,
            agent_id: payload.agent_id,
            latitude: payload.latitude,
            longitude: payload.longitude,
            accuracy: payload.accuracy,
            altitude: None,
            speed: None,
            bearing: None,
            recorded_at: now,
            activity: GpsActivity::CheckIn,
            reference_type: Some("visit"),
            reference_id: Some(visit_id),
        },
    )
    .await
    .map_err(ApiError::store)?;

    if !payload.brand_ids.is_empty() {
        ensure_visit_tasks(
            &mut tx,
            &state,
            payload.tenant_id,
            visit_id,
            &payload.brand_ids,
        )
        .await?;
    }

    tx.commit().await.map_err(ApiError::store)?;

    info!(%visit_id, agent_id = %payload.agent_id, "agent checked in");

    Ok((
        StatusCode::CREATED,
        Json(CheckInResponse {
            visit_id,
            location_validation: validation,
            start_time: now,
        }),
    ))
}

async fn visit_tasks(
    State(state): State<AppState>,
    Path(visit_id): Path<Uuid>,
    Query(query): Query<VisitTasksQuery>,
) -> Result<Json<VisitTasksResponse>, ApiError> {
    let brand_ids = parse_brand_ids(query.brand_ids.as_deref())?;

    let mut tx = state.pool.begin().await.map_err(ApiError::store)?;

    // Lock the visit row so two first calls cannot both generate.
    let visit_row = sqlx::query(
        r#"
        SELECT
            id, tenant_id, agent_id, customer_id, status, scheduled_date,
            check_in_time, check_in_latitude, check_in_longitude, check_in_accuracy,
            check_out_time, check_out_latitude, check_out_longitude, check_out_accuracy,
            notes, rating, total_commission, created_at, updated_at
        FROM visits
        WHERE id = $1 AND tenant_id = $2
        FOR UPDATE
        "#,
    )
    .bind(visit_id)
    .bind(query.tenant_id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(ApiError::store)?;

    let Some(visit_row) = visit_row else {
        return Err(ApiError::not_found("visit not found"));
    };
    let visit = visit_view_from_row(&visit_row)?;

    // Lazy generation stops once the visit is closed; a terminal visit
    // with no tasks stays that way.
    let status = VisitStatus::parse(&visit.status).map_err(ApiError::store)?;
    if !status.is_terminal() {
        ensure_visit_tasks(&mut tx, &state, query.tenant_id, visit_id, &brand_ids).await?;
    }

    let task_rows = sqlx::query(
        r#"
        SELECT
            id, visit_id, task_type, name, description, mandatory, sequence_order,
            brand_id, survey_id, board_id, product_id, status, completed_by,
            completed_at, result_data
        FROM visit_tasks
        WHERE visit_id = $1 AND tenant_id = $2
        ORDER BY sequence_order
        "#,
    )
    .bind(visit_id)
    .bind(query.tenant_id)
    .fetch_all(&mut *tx)
    .await
    .map_err(ApiError::store)?;

    tx.commit().await.map_err(ApiError::store)?;

    let mut tasks = Vec::with_capacity(task_rows.len());
    for row in &task_rows {
        tasks.push(task_view_from_row(row)?);
    }

    Ok(Json(VisitTasksResponse { visit, tasks }))
}

async fn complete_task(
    State(state): State<AppState>,
    Json(payload): Json<CompleteTaskRequest>,
) -> Result<Json<TaskResponse>, ApiError> {
    transition_task(
        &state,
        payload.tenant_id,
        payload.agent_id,
        payload.task_id,
        TaskStatus::Completed,
        payload.result_data,
    )
    .await
    .map(|task| Json(TaskResponse { task }))
}

async fn skip_task(
    State(state): State<AppState>,
    Json(payload): Json<SkipTaskRequest>,
) -> Result<Json<TaskResponse>, ApiError> {
    let result_data = payload
        .reason
        .filter(|reason| !reason.trim().is_empty())
        .map(|reason| json!({ "skip_reason": reason.trim() }));

    transition_task(
        &state,
        payload.tenant_id,
        payload.agent_id,
        payload.task_id,
        TaskStatus::Skipped,
        result_data,
    )
    .await
    .map(|task| Json(TaskResponse { task }))
}

/// Shared task transition. Locks the parent visit row alongside the task
/// so completions serialize with a concurrent check-out on the same visit.
async fn transition_task(
    state: &AppState,
    tenant_id: Uuid,
    agent_id: Uuid,
    task_id: Uuid,
    next: TaskStatus,
    result_data: Option<Value>,
) -> Result<TaskView, ApiError> {
    let mut tx = state.pool.begin().await.map_err(ApiError::store)?;

    let row = sqlx::query(
        r#"
        SELECT t.mandatory, t.status, v.status AS visit_status
        FROM visit_tasks t
        INNER JOIN visits v ON v.id = t.visit_id
        WHERE t.id = $1 AND t.tenant_id = $2
        FOR UPDATE OF t, v
        "#,
    )
    .bind(task_id)
    .bind(tenant_id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(ApiError::store)?;

    let Some(row) = row else {
        return Err(ApiError::not_found("task not found"));
    };

    let visit_status: String = row.try_get("visit_status").map_err(ApiError::store)?;
    let visit_status = VisitStatus::parse(&visit_status).map_err(ApiError::store)?;
    if visit_status != VisitStatus::InProgress {
        return Err(WorkflowError::conflict("visit is not in progress").into());
    }

    let mandatory: bool = row.try_get("mandatory").map_err(ApiError::store)?;
    let status: String = row.try_get("status").map_err(ApiError::store)?;
    let status = TaskStatus::parse(&status).map_err(ApiError::store)?;
    let next = status.transition(next, mandatory).map_err(ApiError::from)?;

    let now = Utc::now();
    let updated = sqlx::query(
        r#"
        UPDATE visit_tasks SET
            status = $3,
            completed_by = $4,
            completed_at = $5,
            result_data = $6
        WHERE id = $1 AND tenant_id = $2
        RETURNING
            id, visit_id, task_type, name, description, mandatory, sequence_order,
            brand_id, survey_id, board_id, product_id, status, completed_by,
            completed_at, result_data
        "#,
    )
    .bind(task_id)
    .bind(tenant_id)
    .bind(next.as_str())
    .bind(agent_id)
    .bind(now)
    .bind(result_data)
    .fetch_one(&mut *tx)
    .await
    .map_err(ApiError::store)?;

    tx.commit().await.map_err(ApiError::store)?;

    task_view_from_row(&updated)
}

async fn check_out(
    State(state): State<AppState>,
    Json(payload): Json<CheckOutRequest>,
) -> Result<Json<CheckOutResponse>, ApiError> {
    if let Some(rating) = payload.rating {
        if !(1..=5).contains(&rating) {
            return Err(ApiError::validation("rating must be between 1 and 5"));
        }
    }
    let check_out_fix = match (payload.latitude, payload.longitude) {
        (Some(latitude), Some(longitude)) => {
            Some(GeoPoint::new(latitude, longitude).map_err(ApiError::from)?)
        }
        (None, None) => None,
        _ => {
            return Err(ApiError::validation(
                "latitude and longitude must be supplied together",
            ));
        }
    };

    let now = Utc::now();
    let mut tx = state.pool.begin().await.map_err(ApiError::store)?;

    let visit_row = sqlx::query(
        "SELECT agent_id, customer_id, status FROM visits WHERE id = $1 AND tenant_id = $2 FOR UPDATE",
    )
    .bind(payload.visit_id)
    .bind(payload.tenant_id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(ApiError::store)?;

    let Some(visit_row) = visit_row else {
        return Err(ApiError::not_found("visit not found or already completed"));
    };

    let status: String = visit_row.try_get("status").map_err(ApiError::store)?;
    let status = VisitStatus::parse(&status).map_err(ApiError::store)?;
    if status.is_terminal() {
        // Second check-out must not emit a second set of commission lines.
        return Err(ApiError::not_found("visit not found or already completed"));
    }
    status
        .transition(VisitStatus::Completed)
        .map_err(ApiError::from)?;

    let visit_agent_id: Uuid = visit_row.try_get("agent_id").map_err(ApiError::store)?;
    let customer_id: Uuid = visit_row.try_get("customer_id").map_err(ApiError::store)?;

    let task_rows = sqlx::query(
        r#"
        SELECT
            id, tenant_id, visit_id, task_type, name, description, mandatory,
            sequence_order, brand_id, survey_id, board_id, product_id, status,
            completed_by, completed_at, result_data, created_at
        FROM visit_tasks
        WHERE visit_id = $1 AND tenant_id = $2
        ORDER BY sequence_order
        "#,
    )
    .bind(payload.visit_id)
    .bind(payload.tenant_id)
    .fetch_all(&mut *tx)
    .await
    .map_err(ApiError::store)?;

    let mut tasks = Vec::with_capacity(task_rows.len());
    for row in &task_rows {
        tasks.push(task_from_row(row)?);
    }

    let blocking = blocking_task_ids(&tasks);
    if !blocking.is_empty() {
        return Err(WorkflowError::StateConflict {
            message: format!(
                "cannot check out: {} mandatory tasks are not completed",
                blocking.len()
            ),
            blocking_task_ids: blocking,
        }
        .into());
    }

    let drafts = accrue(&state.rates, payload.visit_id, &tasks);
    let total_commission = total_amount(&drafts);

    let mut inserted_lines = 0i64;
    for draft in &drafts {
        let result = sqlx::query(
            r#"
            INSERT INTO commission_lines (
                id, tenant_id, agent_id, visit_id, task_id, activity_type,
                amount, currency, status, needs_review, emission_key, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (emission_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(payload.tenant_id)
        .bind(visit_agent_id)
        .bind(payload.visit_id)
        .bind(draft.task_id)
        .bind(draft.activity.as_str())
        .bind(draft.amount)
        .bind(&state.rates.currency)
        .bind(CommissionStatus::Pending.as_str())
        .bind(draft.needs_review)
        .bind(draft.emission_key)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::store)?;
        inserted_lines += result.rows_affected() as i64;
    }

    sqlx::query(
        r#"
        UPDATE visits SET
            status = $3,
            check_out_time = $4,
            check_out_latitude = $5,
            check_out_longitude = $6,
            check_out_accuracy = $7,
            notes = COALESCE($8, notes),
            rating = COALESCE($9, rating),
            total_commission = $10,
            updated_at = $4
        WHERE id = $1 AND tenant_id = $2
        "#,
    )
    .bind(payload.visit_id)
    .bind(payload.tenant_id)
    .bind(VisitStatus::Completed.as_str())
    .bind(now)
    .bind(payload.latitude)
    .bind(payload.longitude)
    .bind(payload.accuracy)
    .bind(payload.notes.as_deref())
    .bind(payload.rating)
    .bind(total_commission)
    .execute(&mut *tx)
    .await
    .map_err(ApiError::store)?;

    if let Some(fix) = check_out_fix {
        insert_gps_sample(
            &mut *tx,
            NewGpsSample {
                tenant_id: payload.tenant_id,
                agent_id: payload.agent_id,
                latitude: fix.latitude(),
                longitude: fix.longitude(),
                accuracy: payload.accuracy,
                altitude: None,
                speed: None,
                bearing: None,
                recorded_at: now,
                activity: GpsActivity::CheckOut,
                reference_type: Some("visit"),
                reference_id: Some(payload.visit_id),
            },
        )
        .await
        .map_err(ApiError::store)?;
    }

    tx.commit().await.map_err(ApiError::store)?;

    info!(
        visit_id = %payload.visit_id,
        %total_commission,
        lines = inserted_lines,
        "visit checked out"
    );

    // The completion is already durable; a failed publish is the payroll
    // collaborator's loss to recover from the store, not a request error.
    let event = VisitCompletedEvent {
        tenant_id: payload.tenant_id,
        visit_id: payload.visit_id,
        agent_id: visit_agent_id,
        customer_id,
        total_commission,
        currency: state.rates.currency.clone(),
        commission_lines: inserted_lines,
        completed_at: now,
    };
    if let Err(err) = state.bus.publish_json(VISITS_COMPLETED_CHANNEL, &event).await {
        error!(visit_id = %payload.visit_id, "failed to publish visit event: {err}");
    }

    Ok(Json(CheckOutResponse {
        visit_id: payload.visit_id,
        check_out_time: now,
        total_commission,
        currency: state.rates.currency.clone(),
        commission_lines: inserted_lines,
    }))
}

/// Soft cancellation: the visit leaves the active flow but its rows stay.
/// Tasks are not touched; a cancelled visit never reaches check-out.
async fn cancel_visit(
    State(state): State<AppState>,
    Path(visit_id): Path<Uuid>,
    Json(payload): Json<CancelVisitRequest>,
) -> Result<Json<CancelVisitResponse>, ApiError> {
    let now = Utc::now();
    let mut tx = state.pool.begin().await.map_err(ApiError::store)?;

    let row = sqlx::query("SELECT status FROM visits WHERE id = $1 AND tenant_id = $2 FOR UPDATE")
        .bind(visit_id)
        .bind(payload.tenant_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(ApiError::store)?;

    let Some(row) = row else {
        return Err(ApiError::not_found("visit not found"));
    };

    let status: String = row.try_get("status").map_err(ApiError::store)?;
    let status = VisitStatus::parse(&status).map_err(ApiError::store)?;
    let next = status
        .transition(VisitStatus::Cancelled)
        .map_err(ApiError::from)?;

    sqlx::query(
        r#"
        UPDATE visits SET
            status = $3,
            notes = COALESCE($4, notes),
            updated_at = $5
        WHERE id = $1 AND tenant_id = $2
        "#,
    )
    .bind(visit_id)
    .bind(payload.tenant_id)
    .bind(next.as_str())
    .bind(payload.reason.as_deref())
    .bind(now)
    .execute(&mut *tx)
    .await
    .map_err(ApiError::store)?;

    tx.commit().await.map_err(ApiError::store)?;

    info!(%visit_id, agent_id = %payload.agent_id, "visit cancelled");

    Ok(Json(CancelVisitResponse {
        visit_id,
        status: next.as_str().to_string(),
        cancelled_at: now,
    }))
}

async fn my_visits(
    State(state): State<AppState>,
    Query(query): Query<MyVisitsQuery>,
) -> Result<Json<VisitListResponse>, ApiError> {
    let status_filter = query
        .status
        .as_deref()
        .map(|status| VisitStatus::parse(&status.to_ascii_uppercase()))
        .transpose()
        .map_err(ApiError::from)?
        .map(VisitStatus::as_str);
    let limit = query.limit.unwrap_or(100).clamp(1, 500);

    let rows = sqlx::query(
        r#"
        SELECT
            id, tenant_id, agent_id, customer_id, status, scheduled_date,
            check_in_time, check_in_latitude, check_in_longitude, check_in_accuracy,
            check_out_time, check_out_latitude, check_out_longitude, check_out_accuracy,
            notes, rating, total_commission, created_at, updated_at
        FROM visits
        WHERE agent_id = $1 AND tenant_id = $2
          AND ($3::text IS NULL OR status = $3)
          AND ($4::date IS NULL OR scheduled_date::date >= $4)
          AND ($5::date IS NULL OR scheduled_date::date <= $5)
        ORDER BY scheduled_date DESC NULLS LAST, created_at DESC
        LIMIT $6
        "#,
    )
    .bind(query.agent_id)
    .bind(query.tenant_id)
    .bind(status_filter)
    .bind(query.from_date)
    .bind(query.to_date)
    .bind(limit)
    .fetch_all(&state.pool)
    .await
    .map_err(ApiError::store)?;

    let mut items = Vec::with_capacity(rows.len());
    for row in &rows {
        items.push(visit_view_from_row(row)?);
    }

    Ok(Json(VisitListResponse { items }))
}

async fn visit_commissions(
    State(state): State<AppState>,
    Path(visit_id): Path<Uuid>,
    Query(query): Query<VisitCommissionsQuery>,
) -> Result<Json<CommissionLineListResponse>, ApiError> {
    let exists = sqlx::query("SELECT id FROM visits WHERE id = $1 AND tenant_id = $2")
        .bind(visit_id)
        .bind(query.tenant_id)
        .fetch_optional(&state.pool)
        .await
        .map_err(ApiError::store)?;
    if exists.is_none() {
        return Err(ApiError::not_found("visit not found"));
    }

    let rows = sqlx::query(
        r#"
        SELECT
            id, agent_id, visit_id, task_id, activity_type, amount, currency,
            status, needs_review, created_at
        FROM commission_lines
        WHERE visit_id = $1 AND tenant_id = $2
        ORDER BY created_at, activity_type
        "#,
    )
    .bind(visit_id)
    .bind(query.tenant_id)
    .fetch_all(&state.pool)
    .await
    .map_err(ApiError::store)?;

    let mut items = Vec::with_capacity(rows.len());
    for row in &rows {
        items.push(CommissionLineView {
            id: row.try_get("id").map_err(ApiError::store)?,
            agent_id: row.try_get("agent_id").map_err(ApiError::store)?,
            visit_id: row.try_get("visit_id").map_err(ApiError::store)?,
            task_id: row.try_get("task_id").map_err(ApiError::store)?,
            activity_type: row.try_get("activity_type").map_err(ApiError::store)?,
            amount: row.try_get("amount").map_err(ApiError::store)?,
            currency: row.try_get("currency").map_err(ApiError::store)?,
            status: row.try_get("status").map_err(ApiError::store)?,
            needs_review: row.try_get("needs_review").map_err(ApiError::store)?,
            created_at: row.try_get("created_at").map_err(ApiError::store)?,
        });
    }

    Ok(Json(CommissionLineListResponse { items }))
}

async fn validate_proximity_check(
    State(state): State<AppState>,
    Json(payload): Json<ValidateProximityRequest>,
) -> Result<Json<ValidateProximityResponse>, ApiError> {
    let agent_fix = GeoPoint::new(payload.latitude, payload.longitude).map_err(ApiError::from)?;

    let location = state
        .customer_location(payload.tenant_id, payload.customer_id)
        .await
        .map_err(ApiError::store)?
        .ok_or_else(|| ApiError::not_found("customer not found"))?;

    let radius_m = state.check_in_radius_m;
    let response = match (location.latitude, location.longitude) {
        (Some(latitude), Some(longitude)) => {
            let target = GeoPoint::new(latitude, longitude).map_err(|err| {
                ApiError::store(format!("stored customer coordinates are invalid: {err}"))
            })?;
            let check = validate_proximity(agent_fix, target, radius_m, payload.accuracy);
            let message = if check.within_radius {
                "agent is within the check-in radius".to_string()
            } else {
                format!(
                    "agent is {:.0}m away from the customer location",
                    check.distance_m
                )
            };

            ValidateProximityResponse {
                customer_id: payload.customer_id,
                within_radius: Some(check.within_radius),
                distance_m: Some(check.distance_m),
                radius_m,
                confidence: check.confidence.as_str().to_string(),
                message,
            }
        }
        _ => ValidateProximityResponse {
            customer_id: payload.customer_id,
            within_radius: None,
            distance_m: None,
            radius_m,
            confidence: GpsConfidence::from_accuracy(payload.accuracy)
                .as_str()
                .to_string(),
            message: "customer location not set; this is a new customer registration".to_string(),
        },
    };

    insert_gps_sample(
        &state.pool,
        NewGpsSample {
            tenant_id: payload.tenant_id,
            agent_id: payload.agent_id,
            latitude: payload.latitude,
            longitude: payload.longitude,
            accuracy: payload.accuracy,
            altitude: None,
            speed: None,
            bearing: None,
            recorded_at: Utc::now(),
            activity: GpsActivity::ProximityCheck,
            reference_type: Some("customer"),
            reference_id: Some(payload.customer_id),
        },
    )
    .await
    .map_err(ApiError::store)?;

    Ok(Json(response))
}

async fn log_gps_sample(
    State(state): State<AppState>,
    Json(payload): Json<LogGpsSampleRequest>,
) -> Result<(StatusCode, Json<LogGpsSampleResponse>), ApiError> {
    GeoPoint::new(payload.latitude, payload.longitude).map_err(ApiError::from)?;
    let activity = GpsActivity::parse(&payload.activity).map_err(ApiError::from)?;
    let recorded_at = payload.recorded_at.unwrap_or_else(Utc::now);

    let sample_id = insert_gps_sample(
        &state.pool,
        NewGpsSample {
            tenant_id: payload.tenant_id,
            agent_id: payload.agent_id,
            latitude: payload.latitude,
            longitude: payload.longitude,
            accuracy: payload.accuracy,
            altitude: payload.altitude,
            speed: payload.speed,
            bearing: payload.bearing,
            recorded_at,
            activity,
            reference_type: payload.reference_type.as_deref(),
            reference_id: payload.reference_id,
        },
    )
    .await
    .map_err(ApiError::store)?;

    Ok((
        StatusCode::CREATED,
        Json(LogGpsSampleResponse {
            sample_id,
            recorded_at,
        }),
    ))
}

async fn agent_track(
    State(state): State<AppState>,
    Path(agent_id): Path<Uuid>,
    Query(query): Query<AgentTrackQuery>,
) -> Result<Json<AgentTrackResponse>, ApiError> {
    let activity_filter = query
        .activity
        .as_deref()
        .map(GpsActivity::parse)
        .transpose()
        .map_err(ApiError::from)?
        .map(GpsActivity::as_str);
    let limit = query.limit.unwrap_or(500).clamp(1, 1000);

    // Retried submissions land out of insertion order; the recorded
    // timestamp is the only trail order that means anything.
    let rows = sqlx::query(
        r#"
        SELECT
            id, agent_id, latitude, longitude, accuracy, altitude, speed,
            bearing, recorded_at, activity, reference_type, reference_id
        FROM agent_gps_samples
        WHERE agent_id = $1 AND tenant_id = $2
          AND ($3::timestamptz IS NULL OR recorded_at >= $3)
          AND ($4::timestamptz IS NULL OR recorded_at <= $4)
          AND ($5::text IS NULL OR activity = $5)
        ORDER BY recorded_at DESC
        LIMIT $6
        "#,
    )
    .bind(agent_id)
    .bind(query.tenant_id)
    .bind(query.from_date)
    .bind(query.to_date)
    .bind(activity_filter)
    .bind(limit)
    .fetch_all(&state.pool)
    .await
    .map_err(ApiError::store)?;

    let mut items = Vec::with_capacity(rows.len());
    for row in &rows {
        items.push(GpsSampleView {
            id: row.try_get("id").map_err(ApiError::store)?,
            agent_id: row.try_get("agent_id").map_err(ApiError::store)?,
            latitude: row.try_get("latitude").map_err(ApiError::store)?,
            longitude: row.try_get("longitude").map_err(ApiError::store)?,
            accuracy: row.try_get("accuracy").map_err(ApiError::store)?,
            altitude: row.try_get("altitude").map_err(ApiError::store)?,
            speed: row.try_get("speed").map_err(ApiError::store)?,
            bearing: row.try_get("bearing").map_err(ApiError::store)?,
            recorded_at: row.try_get("recorded_at").map_err(ApiError::store)?,
            activity: row.try_get("activity").map_err(ApiError::store)?,
            reference_type: row.try_get("reference_type").map_err(ApiError::store)?,
            reference_id: row.try_get("reference_id").map_err(ApiError::store)?,
        });
    }

    Ok(Json(AgentTrackResponse { items }))
}

async fn nearby_customers(
    State(state): State<AppState>,
    Json(payload): Json<NearbyCustomersRequest>,
) -> Result<Json<NearbyCustomersResponse>, ApiError> {
    let origin = GeoPoint::new(payload.latitude, payload.longitude).map_err(ApiError::from)?;
    if !payload.radius_m.is_finite() || payload.radius_m <= 0.0 {
        return Err(ApiError::validation("radius_m must be a positive number"));
    }

    let rows = sqlx::query(
        r#"
        SELECT id, name, code, phone, address, latitude, longitude
        FROM customers
        WHERE tenant_id = $1
          AND latitude IS NOT NULL AND longitude IS NOT NULL
          AND status = 'active'
        "#,
    )
    .bind(payload.tenant_id)
    .fetch_all(&state.pool)
    .await
    .map_err(ApiError::store)?;

    let mut items = Vec::new();
    for row in &rows {
        let id: Uuid = row.try_get("id").map_err(ApiError::store)?;
        let latitude: f64 = row.try_get("latitude").map_err(ApiError::store)?;
        let longitude: f64 = row.try_get("longitude").map_err(ApiError::store)?;
        let Ok(point) = GeoPoint::new(latitude, longitude) else {
            warn!(customer_id = %id, "skipping customer with invalid stored coordinates");
            continue;
        };

        let distance_m = haversine_meters(origin, point);
        if distance_m > payload.radius_m {
            continue;
        }

        items.push(NearbyCustomerView {
            id,
            name: row.try_get("name").map_err(ApiError::store)?,
            code: row.try_get("code").map_err(ApiError::store)?,
            phone: row.try_get("phone").map_err(ApiError::store)?,
            address: row.try_get("address").map_err(ApiError::store)?,
            latitude,
            longitude,
            distance_m,
        });
    }
    items.sort_by(|a, b| a.distance_m.total_cmp(&b.distance_m));

    Ok(Json(NearbyCustomersResponse {
        radius_m: payload.radius_m,
        count: items.len(),
        items,
    }))
}

#[async_trait]
impl CustomerDirectory for AppState {
    async fn customer_location(
        &self,
        tenant_id: Uuid,
        customer_id: Uuid,
    ) -> anyhow::Result<Option<CustomerLocation>> {
        let row = sqlx::query("SELECT latitude, longitude FROM customers WHERE id = $1 AND tenant_id = $2")
            .bind(customer_id)
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(CustomerLocation {
                latitude: row.try_get("latitude")?,
                longitude: row.try_get("longitude")?,
            })),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl SurveyCatalog for AppState {
    async fn mandatory_surveys_for_brands(
        &self,
        tenant_id: Uuid,
        brand_ids: &[Uuid],
    ) -> anyhow::Result<Vec<SurveySummary>> {
        if brand_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT id, brand_id, title, description
            FROM surveys
            WHERE tenant_id = $1 AND brand_id = ANY($2)
              AND mandatory AND status = 'active'
            ORDER BY array_position($2, brand_id), title
            "#,
        )
        .bind(tenant_id)
        .bind(brand_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut surveys = Vec::with_capacity(rows.len());
        for row in &rows {
            surveys.push(SurveySummary {
                id: row.try_get("id")?,
                brand_id: row.try_get("brand_id")?,
                title: row.try_get("title")?,
                description: row.try_get("description")?,
            });
        }

        Ok(surveys)
    }
}

/// Generates and stores the task list if the visit has none yet. The
/// caller must already hold the visit row lock; repeated calls return the
/// stored list untouched.
async fn ensure_visit_tasks(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    catalog: &AppState,
    tenant_id: Uuid,
    visit_id: Uuid,
    brand_ids: &[Uuid],
) -> Result<(), ApiError> {
    let existing = sqlx::query(
        "SELECT COUNT(*) AS task_count FROM visit_tasks WHERE visit_id = $1 AND tenant_id = $2",
    )
    .bind(visit_id)
    .bind(tenant_id)
    .fetch_one(&mut **tx)
    .await
    .map_err(ApiError::store)?;
    let task_count: i64 = existing.try_get("task_count").map_err(ApiError::store)?;
    if task_count > 0 {
        return Ok(());
    }

    let surveys = catalog
        .mandatory_surveys_for_brands(tenant_id, brand_ids)
        .await
        .map_err(ApiError::store)?;
    let drafts = generate_task_drafts(&surveys);
    let now = Utc::now();

    for draft in &drafts {
        sqlx::query(
            r#"
            INSERT INTO visit_tasks (
                id, tenant_id, visit_id, task_type, name, description, mandatory,
                sequence_order, brand_id, survey_id, board_id, product_id,
                status, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NULL, NULL, $11, $12)
            "#,
        )
        .bind(draft.id)
        .bind(tenant_id)
        .bind(visit_id)
        .bind(draft.kind.as_str())
        .bind(&draft.name)
        .bind(draft.description.as_deref())
        .bind(draft.mandatory)
        .bind(draft.sequence_order)
        .bind(draft.brand_id)
        .bind(draft.survey_id)
        .bind(TaskStatus::Pending.as_str())
        .bind(now)
        .execute(&mut **tx)
        .await
        .map_err(ApiError::store)?;
    }

    debug!(%visit_id, tasks = drafts.len(), "generated visit task list");

    Ok(())
}

struct NewGpsSample<'a> {
    tenant_id: Uuid,
    agent_id: Uuid,
    latitude: f64,
    longitude: f64,
    accuracy: Option<f64>,
    altitude: Option<f64>,
    speed: Option<f64>,
    bearing: Option<f64>,
    recorded_at: DateTime<Utc>,
    activity: GpsActivity,
    reference_type: Option<&'a str>,
    reference_id: Option<Uuid>,
}

async fn insert_gps_sample<'e, E>(executor: E, sample: NewGpsSample<'_>) -> Result<Uuid, sqlx::Error>
where
    E: sqlx::PgExecutor<'e>,
{
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO agent_gps_samples (
            id, tenant_id, agent_id, latitude, longitude, accuracy,
            altitude, speed, bearing, recorded_at, activity,
            reference_type, reference_id
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        "#,
    )
    .bind(id)
    .bind(sample.tenant_id)
    .bind(sample.agent_id)
    .bind(sample.latitude)
    .bind(sample.longitude)
    .bind(sample.accuracy)
    .bind(sample.altitude)
    .bind(sample.speed)
    .bind(sample.bearing)
    .bind(sample.recorded_at)
    .bind(sample.activity.as_str())
    .bind(sample.reference_type)
    .bind(sample.reference_id)
    .execute(executor)
    .await?;

    Ok(id)
}

fn visit_view_from_row(row: &PgRow) -> Result<VisitView, ApiError> {
    Ok(VisitView {
        id: row.try_get("id").map_err(ApiError::store)?,
        tenant_id: row.try_get("tenant_id").map_err(ApiError::store)?,
        agent_id: row.try_get("agent_id").map_err(ApiError::store)?,
        customer_id: row.try_get("customer_id").map_err(ApiError::store)?,
        status: row.try_get("status").map_err(ApiError::store)?,
        scheduled_date: row.try_get("scheduled_date").map_err(ApiError::store)?,
        check_in_time: row.try_get("check_in_time").map_err(ApiError::store)?,
        check_in_latitude: row.try_get("check_in_latitude").map_err(ApiError::store)?,
        check_in_longitude: row
            .try_get("check_in_longitude")
            .map_err(ApiError::store)?,
        check_in_accuracy: row.try_get("check_in_accuracy").map_err(ApiError::store)?,
        check_out_time: row.try_get("check_out_time").map_err(ApiError::store)?,
        check_out_latitude: row
            .try_get("check_out_latitude")
            .map_err(ApiError::store)?,
        check_out_longitude: row
            .try_get("check_out_longitude")
            .map_err(ApiError::store)?,
        check_out_accuracy: row
            .try_get("check_out_accuracy")
            .map_err(ApiError::store)?,
        notes: row.try_get("notes").map_err(ApiError::store)?,
        rating: row.try_get("rating").map_err(ApiError::store)?,
        total_commission: row.try_get("total_commission").map_err(ApiError::store)?,
        created_at: row.try_get("created_at").map_err(ApiError::store)?,
        updated_at: row.try_get("updated_at").map_err(ApiError::store)?,
    })
}

fn task_view_from_row(row: &PgRow) -> Result<TaskView, ApiError> {
    Ok(TaskView {
        id: row.try_get("id").map_err(ApiError::store)?,
        visit_id: row.try_get("visit_id").map_err(ApiError::store)?,
        task_type: row.try_get("task_type").map_err(ApiError::store)?,
        name: row.try_get("name").map_err(ApiError::store)?,
        description: row.try_get("description").map_err(ApiError::store)?,
        mandatory: row.try_get("mandatory").map_err(ApiError::store)?,
        sequence_order: row.try_get("sequence_order").map_err(ApiError::store)?,
        brand_id: row.try_get("brand_id").map_err(ApiError::store)?,
        survey_id: row.try_get("survey_id").map_err(ApiError::store)?,
        board_id: row.try_get("board_id").map_err(ApiError::store)?,
        product_id: row.try_get("product_id").map_err(ApiError::store)?,
        status: row.try_get("status").map_err(ApiError::store)?,
        completed_by: row.try_get("completed_by").map_err(ApiError::store)?,
        completed_at: row.try_get("completed_at").map_err(ApiError::store)?,
        result_data: row.try_get("result_data").map_err(ApiError::store)?,
    })
}

/// Full task record for the accrual calculator.
fn task_from_row(row: &PgRow) -> Result<VisitTask, ApiError> {
    let kind: String = row.try_get("task_type").map_err(ApiError::store)?;
    let status: String = row.try_get("status").map_err(ApiError::store)?;

    Ok(VisitTask {
        id: row.try_get("id").map_err(ApiError::store)?,
        tenant_id: row.try_get("tenant_id").map_err(ApiError::store)?,
        visit_id: row.try_get("visit_id").map_err(ApiError::store)?,
        kind: TaskKind::parse(&kind).map_err(ApiError::store)?,
        name: row.try_get("name").map_err(ApiError::store)?,
        description: row.try_get("description").map_err(ApiError::store)?,
        mandatory: row.try_get("mandatory").map_err(ApiError::store)?,
        sequence_order: row.try_get("sequence_order").map_err(ApiError::store)?,
        brand_id: row.try_get("brand_id").map_err(ApiError::store)?,
        survey_id: row.try_get("survey_id").map_err(ApiError::store)?,
        board_id: row.try_get("board_id").map_err(ApiError::store)?,
        product_id: row.try_get("product_id").map_err(ApiError::store)?,
        status: TaskStatus::parse(&status).map_err(ApiError::store)?,
        completed_by: row.try_get("completed_by").map_err(ApiError::store)?,
        completed_at: row.try_get("completed_at").map_err(ApiError::store)?,
        result_data: row.try_get("result_data").map_err(ApiError::store)?,
        created_at: row.try_get("created_at").map_err(ApiError::store)?,
    })
}

fn parse_brand_ids(raw: Option<&str>) -> Result<Vec<Uuid>, ApiError> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };

    let mut brand_ids = Vec::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let brand_id = Uuid::parse_str(part)
            .map_err(|_| ApiError::validation(format!("invalid brand id {part}")))?;
        brand_ids.push(brand_id);
    }

    Ok(brand_ids)
}

fn commission_rates_from_env() -> AnyResult<CommissionRateTable> {
    let defaults = CommissionRateTable::default();

    Ok(CommissionRateTable {
        survey_rate: decimal_env("COMMISSION_SURVEY_RATE", defaults.survey_rate)?,
        board_placement_rate: decimal_env(
            "COMMISSION_BOARD_PLACEMENT_RATE",
            defaults.board_placement_rate,
        )?,
        product_distribution_unit_rate: decimal_env(
            "COMMISSION_DISTRIBUTION_UNIT_RATE",
            defaults.product_distribution_unit_rate,
        )?,
        default_rate: decimal_env("COMMISSION_DEFAULT_RATE", defaults.default_rate)?,
        currency: std::env::var("COMMISSION_CURRENCY").unwrap_or(defaults.currency),
    })
}

fn decimal_env(name: &str, default: Decimal) -> AnyResult<Decimal> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<Decimal>()
            .with_context(|| format!("{name} must be a decimal amount")),
        Err(_) => Ok(default),
    }
}
