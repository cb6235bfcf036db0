use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::WorkflowError;

/// Visit life-cycle. Transitions go through [`VisitStatus::transition`];
/// the store never sees a status that function did not produce.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum VisitStatus {
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
}

impl VisitStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "SCHEDULED",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(value: &str) -> Result<Self, WorkflowError> {
        match value {
            "SCHEDULED" => Ok(Self::Scheduled),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "COMPLETED" => Ok(Self::Completed),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(WorkflowError::validation(format!(
                "unknown visit status {other}"
            ))),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    pub fn can_transition(self, next: VisitStatus) -> bool {
        matches!(
            (self, next),
            (Self::Scheduled, Self::InProgress)
                | (Self::Scheduled, Self::Cancelled)
                | (Self::InProgress, Self::Completed)
                | (Self::InProgress, Self::Cancelled)
        )
    }

    pub fn transition(self, next: VisitStatus) -> Result<VisitStatus, WorkflowError> {
        if self.can_transition(next) {
            Ok(next)
        } else {
            Err(WorkflowError::conflict(format!(
                "illegal visit transition {} -> {}",
                self.as_str(),
                next.as_str()
            )))
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Completed,
    Skipped,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Completed => "COMPLETED",
            Self::Skipped => "SKIPPED",
        }
    }

    pub fn parse(value: &str) -> Result<Self, WorkflowError> {
        match value {
            "PENDING" => Ok(Self::Pending),
            "COMPLETED" => Ok(Self::Completed),
            "SKIPPED" => Ok(Self::Skipped),
            other => Err(WorkflowError::validation(format!(
                "unknown task status {other}"
            ))),
        }
    }

    /// Mandatory tasks can only complete; skipping one is a conflict, not
    /// a validation problem, because the request itself is well-formed.
    pub fn transition(self, next: TaskStatus, mandatory: bool) -> Result<TaskStatus, WorkflowError> {
        match (self, next) {
            (Self::Pending, Self::Completed) => Ok(next),
            (Self::Pending, Self::Skipped) if !mandatory => Ok(next),
            (Self::Pending, Self::Skipped) => Err(WorkflowError::conflict(
                "mandatory task cannot be skipped".to_string(),
            )),
            _ => Err(WorkflowError::conflict(format!(
                "illegal task transition {} -> {}",
                self.as_str(),
                next.as_str()
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Survey,
    BoardPlacement,
    ProductDistribution,
    PhotoDocumentation,
    Merchandising,
    CustomerRegistration,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Survey => "survey",
            Self::BoardPlacement => "board_placement",
            Self::ProductDistribution => "product_distribution",
            Self::PhotoDocumentation => "photo_documentation",
            Self::Merchandising => "merchandising",
            Self::CustomerRegistration => "customer_registration",
        }
    }

    pub fn parse(value: &str) -> Result<Self, WorkflowError> {
        match value {
            "survey" => Ok(Self::Survey),
            "board_placement" => Ok(Self::BoardPlacement),
            "product_distribution" => Ok(Self::ProductDistribution),
            "photo_documentation" => Ok(Self::PhotoDocumentation),
            "merchandising" => Ok(Self::Merchandising),
            "customer_registration" => Ok(Self::CustomerRegistration),
            other => Err(WorkflowError::validation(format!(
                "unknown task type {other}"
            ))),
        }
    }
}

/// Activity tag on a GPS sample.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GpsActivity {
    CheckIn,
    CheckOut,
    Ping,
    ProximityCheck,
}

impl GpsActivity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CheckIn => "check_in",
            Self::CheckOut => "check_out",
            Self::Ping => "ping",
            Self::ProximityCheck => "proximity_check",
        }
    }

    pub fn parse(value: &str) -> Result<Self, WorkflowError> {
        match value {
            "check_in" => Ok(Self::CheckIn),
            "check_out" => Ok(Self::CheckOut),
            "ping" => Ok(Self::Ping),
            "proximity_check" => Ok(Self::ProximityCheck),
            other => Err(WorkflowError::validation(format!(
                "unknown gps activity {other}"
            ))),
        }
    }
}

/// Commission line status. The engine only ever emits `Pending`; the
/// payroll collaborator owns the later transitions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CommissionStatus {
    Pending,
    Approved,
    Paid,
}

impl CommissionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Paid => "PAID",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Visit {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub agent_id: Uuid,
    pub customer_id: Uuid,
    pub status: VisitStatus,
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
pub struct VisitTask {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub visit_id: Uuid,
    pub kind: TaskKind,
    pub name: String,
    pub description: Option<String>,
    pub mandatory: bool,
    pub sequence_order: i32,
    pub brand_id: Option<Uuid>,
    pub survey_id: Option<Uuid>,
    pub board_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
    pub status: TaskStatus,
    pub completed_by: Option<Uuid>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result_data: Option<Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpsSample {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub agent_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
    pub altitude: Option<f64>,
    pub speed: Option<f64>,
    pub bearing: Option<f64>,
    pub recorded_at: DateTime<Utc>,
    pub activity: GpsActivity,
    pub reference_type: Option<String>,
    pub reference_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommissionLine {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub agent_id: Uuid,
    pub visit_id: Uuid,
    pub task_id: Option<Uuid>,
    pub activity: TaskKind,
    pub amount: Decimal,
    pub currency: String,
    pub status: CommissionStatus,
    pub needs_review: bool,
    pub emission_key: Uuid,
    pub created_at: DateTime<Utc>,
}

/// The check-out gate: ids of mandatory tasks that have not completed.
/// Check-out is legal exactly when this is empty.
pub fn blocking_task_ids(tasks: &[VisitTask]) -> Vec<Uuid> {
    tasks
        .iter()
        .filter(|task| task.mandatory && task.status != TaskStatus::Completed)
        .map(|task| task.id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(mandatory: bool, status: TaskStatus) -> VisitTask {
        VisitTask {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            visit_id: Uuid::new_v4(),
            kind: TaskKind::Survey,
            name: "Survey".to_string(),
            description: None,
            mandatory,
            sequence_order: 0,
            brand_id: None,
            survey_id: None,
            board_id: None,
            product_id: None,
            status,
            completed_by: None,
            completed_at: None,
            result_data: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn visit_transitions_follow_the_state_machine() {
        assert!(VisitStatus::Scheduled.can_transition(VisitStatus::InProgress));
        assert!(VisitStatus::Scheduled.can_transition(VisitStatus::Cancelled));
        assert!(VisitStatus::InProgress.can_transition(VisitStatus::Completed));
        assert!(VisitStatus::InProgress.can_transition(VisitStatus::Cancelled));

        assert!(!VisitStatus::Scheduled.can_transition(VisitStatus::Completed));
        assert!(!VisitStatus::Completed.can_transition(VisitStatus::InProgress));
        assert!(!VisitStatus::Completed.can_transition(VisitStatus::Cancelled));
        assert!(!VisitStatus::Cancelled.can_transition(VisitStatus::InProgress));
        assert!(!VisitStatus::InProgress.can_transition(VisitStatus::Scheduled));
    }

    #[test]
    fn illegal_visit_transition_is_a_state_conflict() {
        let err = VisitStatus::Completed
            .transition(VisitStatus::InProgress)
            .unwrap_err();
        assert_eq!(err.code(), "STATE_CONFLICT");
    }

    #[test]
    fn terminal_states_are_terminal() {
        assert!(VisitStatus::Completed.is_terminal());
        assert!(VisitStatus::Cancelled.is_terminal());
        assert!(!VisitStatus::Scheduled.is_terminal());
        assert!(!VisitStatus::InProgress.is_terminal());
    }

    #[test]
    fn pending_task_can_complete() {
        let next = TaskStatus::Pending
            .transition(TaskStatus::Completed, true)
            .unwrap();
        assert_eq!(next, TaskStatus::Completed);
    }

    #[test]
    fn optional_task_can_be_skipped() {
        let next = TaskStatus::Pending
            .transition(TaskStatus::Skipped, false)
            .unwrap();
        assert_eq!(next, TaskStatus::Skipped);
    }

    #[test]
    fn mandatory_task_cannot_be_skipped() {
        let err = TaskStatus::Pending
            .transition(TaskStatus::Skipped, true)
            .unwrap_err();
        assert_eq!(err.code(), "STATE_CONFLICT");
    }

    #[test]
    fn completed_task_cannot_transition_again() {
        assert!(
            TaskStatus::Completed
                .transition(TaskStatus::Completed, false)
                .is_err()
        );
        assert!(
            TaskStatus::Skipped
                .transition(TaskStatus::Completed, false)
                .is_err()
        );
    }

    #[test]
    fn status_codes_round_trip() {
        for status in [
            VisitStatus::Scheduled,
            VisitStatus::InProgress,
            VisitStatus::Completed,
            VisitStatus::Cancelled,
        ] {
            assert_eq!(VisitStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(VisitStatus::parse("in_progress").is_err());
    }

    #[test]
    fn pending_mandatory_tasks_block_check_out() {
        let blocked = task(true, TaskStatus::Pending);
        let optional = task(false, TaskStatus::Pending);
        let done = task(true, TaskStatus::Completed);

        let blocking = blocking_task_ids(&[blocked.clone(), optional, done]);
        assert_eq!(blocking, vec![blocked.id]);
    }

    #[test]
    fn check_out_gate_clears_when_mandatory_work_is_done() {
        let tasks = vec![task(true, TaskStatus::Completed), task(false, TaskStatus::Pending)];
        assert!(blocking_task_ids(&tasks).is_empty());
    }

    #[test]
    fn skipped_mandatory_task_still_blocks() {
        // Should be unreachable through the transition function, but the
        // gate must not trust call-site discipline.
        let tasks = vec![task(true, TaskStatus::Skipped)];
        assert_eq!(blocking_task_ids(&tasks).len(), 1);
    }
}
