use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::models::{TaskKind, TaskStatus, VisitTask};

/// Namespace for deterministic commission emission keys. Fixed forever;
/// changing it would re-open the door to duplicate emission after a
/// mid-transaction crash.
const EMISSION_NAMESPACE: Uuid = Uuid::from_u128(0x7c9e_a1b4_52d8_4f0e_9b3a_6d1c_8e2f_5a70);

/// Per-activity commission rates. Injected configuration, never a hidden
/// static table, so tenants can eventually override rates without code
/// changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommissionRateTable {
    pub survey_rate: Decimal,
    pub board_placement_rate: Decimal,
    pub product_distribution_unit_rate: Decimal,
    pub default_rate: Decimal,
    pub currency: String,
}

impl Default for CommissionRateTable {
    fn default() -> Self {
        Self {
            survey_rate: Decimal::new(500, 2),
            board_placement_rate: Decimal::new(1000, 2),
            product_distribution_unit_rate: Decimal::new(50, 2),
            default_rate: Decimal::new(200, 2),
            currency: "USD".to_string(),
        }
    }
}

/// An unstored commission line for one completed task.
#[derive(Debug, Clone)]
pub struct CommissionLineDraft {
    pub task_id: Option<Uuid>,
    pub activity: TaskKind,
    pub amount: Decimal,
    pub needs_review: bool,
    pub emission_key: Uuid,
}

/// Deterministic key for one commission line. The same visit and task
/// always hash to the same key, so a retried check-out inserts nothing
/// new even across process restarts.
pub fn emission_key(visit_id: Uuid, task_id: Option<Uuid>) -> Uuid {
    let mut name = [0u8; 32];
    name[..16].copy_from_slice(visit_id.as_bytes());
    if let Some(task_id) = task_id {
        name[16..].copy_from_slice(task_id.as_bytes());
    }
    Uuid::new_v5(&EMISSION_NAMESPACE, &name)
}

/// Computes commission lines for the completed tasks of one visit. Pure:
/// the caller invokes it exactly once, inside the check-out transaction.
///
/// Product distribution pays per distributed unit, read from the task's
/// result payload. A missing or malformed quantity fails closed: the line
/// is emitted with amount zero and flagged for manual review, never
/// guessed and never dropped.
pub fn accrue(
    rates: &CommissionRateTable,
    visit_id: Uuid,
    tasks: &[VisitTask],
) -> Vec<CommissionLineDraft> {
    tasks
        .iter()
        .filter(|task| task.status == TaskStatus::Completed)
        .map(|task| {
            let (amount, needs_review) = match task.kind {
                TaskKind::Survey => (rates.survey_rate, false),
                TaskKind::BoardPlacement => (rates.board_placement_rate, false),
                TaskKind::ProductDistribution => {
                    match distributed_quantity(task.result_data.as_ref()) {
                        Some(quantity) => (
                            (rates.product_distribution_unit_rate * Decimal::from(quantity))
                                .round_dp(2),
                            false,
                        ),
                        None => (Decimal::ZERO, true),
                    }
                }
                _ => (rates.default_rate, false),
            };

            CommissionLineDraft {
                task_id: Some(task.id),
                activity: task.kind,
                amount,
                needs_review,
                emission_key: emission_key(visit_id, Some(task.id)),
            }
        })
        .collect()
}

pub fn total_amount(drafts: &[CommissionLineDraft]) -> Decimal {
    drafts
        .iter()
        .map(|draft| draft.amount)
        .sum::<Decimal>()
        .round_dp(2)
}

/// Positive integral `quantity` from a distribution result payload.
/// Anything else is treated as malformed.
fn distributed_quantity(result_data: Option<&Value>) -> Option<u64> {
    let quantity = result_data?.get("quantity")?;
    match quantity.as_u64() {
        Some(value) if value > 0 => Some(value),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::*;

    fn completed_task(kind: TaskKind, result_data: Option<Value>) -> VisitTask {
        VisitTask {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            visit_id: Uuid::new_v4(),
            kind,
            name: kind.as_str().to_string(),
            description: None,
            mandatory: kind == TaskKind::Survey,
            sequence_order: 0,
            brand_id: None,
            survey_id: None,
            board_id: None,
            product_id: None,
            status: TaskStatus::Completed,
            completed_by: Some(Uuid::new_v4()),
            completed_at: Some(Utc::now()),
            result_data,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn survey_and_board_pay_fixed_rates() {
        let rates = CommissionRateTable::default();
        let visit = Uuid::new_v4();
        let tasks = vec![
            completed_task(TaskKind::Survey, None),
            completed_task(TaskKind::BoardPlacement, None),
        ];

        let drafts = accrue(&rates, visit, &tasks);
        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[0].amount, Decimal::new(500, 2));
        assert_eq!(drafts[1].amount, Decimal::new(1000, 2));
        assert!(drafts.iter().all(|d| !d.needs_review));
    }

    #[test]
    fn forty_units_at_fifty_cents_pays_twenty() {
        let rates = CommissionRateTable::default();
        let task = completed_task(TaskKind::ProductDistribution, Some(json!({"quantity": 40})));

        let drafts = accrue(&rates, Uuid::new_v4(), &[task]);
        assert_eq!(drafts[0].amount, Decimal::new(2000, 2));
        assert!(!drafts[0].needs_review);
    }

    #[test]
    fn unlisted_kinds_pay_the_default_rate() {
        let rates = CommissionRateTable::default();
        let task = completed_task(TaskKind::PhotoDocumentation, None);

        let drafts = accrue(&rates, Uuid::new_v4(), &[task]);
        assert_eq!(drafts[0].amount, Decimal::new(200, 2));
    }

    #[test]
    fn malformed_quantity_fails_closed() {
        let rates = CommissionRateTable::default();
        let payloads = [
            None,
            Some(json!({})),
            Some(json!({"quantity": "forty"})),
            Some(json!({"quantity": 0})),
            Some(json!({"quantity": -3})),
            Some(json!({"quantity": 40.5})),
        ];

        for payload in payloads {
            let task = completed_task(TaskKind::ProductDistribution, payload.clone());
            let drafts = accrue(&rates, Uuid::new_v4(), &[task]);
            assert_eq!(drafts[0].amount, Decimal::ZERO, "payload {payload:?}");
            assert!(drafts[0].needs_review, "payload {payload:?}");
        }
    }

    #[test]
    fn only_completed_tasks_accrue() {
        let rates = CommissionRateTable::default();
        let mut pending = completed_task(TaskKind::Survey, None);
        pending.status = TaskStatus::Pending;
        let mut skipped = completed_task(TaskKind::BoardPlacement, None);
        skipped.status = TaskStatus::Skipped;
        let done = completed_task(TaskKind::Survey, None);

        let drafts = accrue(&rates, Uuid::new_v4(), &[pending, skipped, done.clone()]);
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].task_id, Some(done.id));
    }

    #[test]
    fn one_mandatory_survey_yields_one_line() {
        // Scenario: visit closed with a completed survey and an untouched
        // optional photo task; exactly one line is payable.
        let rates = CommissionRateTable::default();
        let survey = completed_task(TaskKind::Survey, Some(json!({"responses": [1, 2, 3]})));
        let mut photo = completed_task(TaskKind::PhotoDocumentation, None);
        photo.status = TaskStatus::Pending;

        let drafts = accrue(&rates, Uuid::new_v4(), &[survey, photo]);
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].activity, TaskKind::Survey);
        assert_eq!(drafts[0].amount, Decimal::new(500, 2));
    }

    #[test]
    fn emission_keys_are_deterministic_per_visit_and_task() {
        let visit = Uuid::new_v4();
        let task = Uuid::new_v4();

        assert_eq!(emission_key(visit, Some(task)), emission_key(visit, Some(task)));
        assert_ne!(emission_key(visit, Some(task)), emission_key(visit, None));
        assert_ne!(
            emission_key(visit, Some(task)),
            emission_key(Uuid::new_v4(), Some(task))
        );
    }

    #[test]
    fn totals_round_to_cents() {
        let rates = CommissionRateTable {
            survey_rate: Decimal::new(3333, 3),
            ..CommissionRateTable::default()
        };
        let tasks = vec![
            completed_task(TaskKind::Survey, None),
            completed_task(TaskKind::Survey, None),
        ];

        let drafts = accrue(&rates, Uuid::new_v4(), &tasks);
        assert_eq!(total_amount(&drafts), Decimal::new(667, 2));
    }
}
