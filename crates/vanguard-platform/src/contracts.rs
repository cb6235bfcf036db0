use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// Identity arrives pre-authenticated: every request names its
// (tenant_id, agent_id) pair and the engine trusts it.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckInRequest {
    pub tenant_id: Uuid,
    pub agent_id: Uuid,
    pub customer_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub brand_ids: Vec<Uuid>,
    /// A previously scheduled visit to transition; omitted for ad-hoc
    /// visits.
    pub visit_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationValidationView {
    pub within_radius: bool,
    pub distance_m: f64,
    pub radius_m: f64,
    pub confidence: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckInResponse {
    pub visit_id: Uuid,
    /// Absent when the customer has no stored coordinates yet.
    pub location_validation: Option<LocationValidationView>,
    pub start_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisitView {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub agent_id: Uuid,
    pub customer_id: Uuid,
    pub status: String,
    pub scheduled_date: Option<DateTime<Utc>>,
    pub check_in_time: Option<DateTime<Utc>>,
    pub check_in_latitude: Option<f64>,
    pub check_in_longitude: Option<f64>,
    pub check_in_accuracy: Option<f64>,
    pub check_out_time: Option<DateTime<Utc>>,
    pub check_out_latitude: Option<f64>,
    pub check_out_longitude: Option<f64>,
    pub check_out_accuracy: Option<f64>,
    pub notes: Option<String>,
    pub rating: Option<i32>,
    pub total_commission: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskView {
    pub id: Uuid,
    pub visit_id: Uuid,
    pub task_type: String,
    pub name: String,
    pub description: Option<String>,
    pub mandatory: bool,
    pub sequence_order: i32,
    pub brand_id: Option<Uuid>,
    pub survey_id: Option<Uuid>,
    pub board_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
    pub status: String,
    pub completed_by: Option<Uuid>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result_data: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisitTasksQuery {
    pub tenant_id: Uuid,
    /// Comma-separated brand ids, e.g. `brand_ids=a,b,c`.
    pub brand_ids: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisitTasksResponse {
    pub visit: VisitView,
    pub tasks: Vec<TaskView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteTaskRequest {
    pub tenant_id: Uuid,
    pub agent_id: Uuid,
    pub task_id: Uuid,
    pub result_data: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkipTaskRequest {
    pub tenant_id: Uuid,
    pub agent_id: Uuid,
    pub task_id: Uuid,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResponse {
    pub task: TaskView,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckOutRequest {
    pub tenant_id: Uuid,
    pub agent_id: Uuid,
    pub visit_id: Uuid,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub accuracy: Option<f64>,
    pub notes: Option<String>,
    /// Agent's 1-5 rating of the visit.
    pub rating: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckOutResponse {
    pub visit_id: Uuid,
    pub check_out_time: DateTime<Utc>,
    pub total_commission: Decimal,
    pub currency: String,
    pub commission_lines: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelVisitRequest {
    pub tenant_id: Uuid,
    pub agent_id: Uuid,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelVisitResponse {
    pub visit_id: Uuid,
    pub status: String,
    pub cancelled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MyVisitsQuery {
    pub tenant_id: Uuid,
    pub agent_id: Uuid,
    pub status: Option<String>,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisitListResponse {
    pub items: Vec<VisitView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisitCommissionsQuery {
    pub tenant_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommissionLineView {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub visit_id: Uuid,
    pub task_id: Option<Uuid>,
    pub activity_type: String,
    pub amount: Decimal,
    pub currency: String,
    pub status: String,
    pub needs_review: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommissionLineListResponse {
    pub items: Vec<CommissionLineView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateProximityRequest {
    pub tenant_id: Uuid,
    pub agent_id: Uuid,
    pub customer_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateProximityResponse {
    pub customer_id: Uuid,
    /// Absent when the customer has no stored coordinates.
    pub within_radius: Option<bool>,
    pub distance_m: Option<f64>,
    pub radius_m: f64,
    pub confidence: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogGpsSampleRequest {
    pub tenant_id: Uuid,
    pub agent_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
    pub altitude: Option<f64>,
    pub speed: Option<f64>,
    pub bearing: Option<f64>,
    #[serde(default = "default_gps_activity")]
    pub activity: String,
    /// Client-side fix time; retried submissions may arrive out of order,
    /// so readers sort by this, never by insertion order.
    pub recorded_at: Option<DateTime<Utc>>,
    pub reference_type: Option<String>,
    pub reference_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogGpsSampleResponse {
    pub sample_id: Uuid,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTrackQuery {
    pub tenant_id: Uuid,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    pub activity: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpsSampleView {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
    pub altitude: Option<f64>,
    pub speed: Option<f64>,
    pub bearing: Option<f64>,
    pub recorded_at: DateTime<Utc>,
    pub activity: String,
    pub reference_type: Option<String>,
    pub reference_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTrackResponse {
    pub items: Vec<GpsSampleView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NearbyCustomersRequest {
    pub tenant_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default = "default_nearby_radius")]
    pub radius_m: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NearbyCustomerView {
    pub id: Uuid,
    pub name: String,
    pub code: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub distance_m: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NearbyCustomersResponse {
    pub radius_m: f64,
    pub count: usize,
    pub items: Vec<NearbyCustomerView>,
}

/// Published on the bus after a check-out commits. Consumed by the
/// payroll/commission collaborator, which owns the lines from here on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisitCompletedEvent {
    pub tenant_id: Uuid,
    pub visit_id: Uuid,
    pub agent_id: Uuid,
    pub customer_id: Uuid,
    pub total_commission: Decimal,
    pub currency: String,
    pub commission_lines: i64,
    pub completed_at: DateTime<Utc>,
}

fn default_gps_activity() -> String {
    "ping".to_string()
}

fn default_nearby_radius() -> f64 {
    1_000.0
}
