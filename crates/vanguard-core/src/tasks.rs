use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::TaskKind;

/// A mandatory, active survey as served by the survey collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurveySummary {
    pub id: Uuid,
    pub brand_id: Uuid,
    pub title: String,
    pub description: Option<String>,
}

/// An unstored task row. The store assigns visit/tenant scope and
/// timestamps when the draft is inserted.
#[derive(Debug, Clone)]
pub struct TaskDraft {
    pub id: Uuid,
    pub kind: TaskKind,
    pub name: String,
    pub description: Option<String>,
    pub mandatory: bool,
    pub sequence_order: i32,
    pub brand_id: Option<Uuid>,
    pub survey_id: Option<Uuid>,
}

/// Materializes the task list for a visit: one mandatory survey task per
/// brand survey, in encounter order, followed by the three standard
/// non-mandatory field tasks. With no surveys the standard tasks are all
/// a visit gets, which leaves the check-out gate vacuously satisfiable.
pub fn generate_task_drafts(surveys: &[SurveySummary]) -> Vec<TaskDraft> {
    let mut drafts = Vec::with_capacity(surveys.len() + 3);
    let mut sequence = 0;

    for survey in surveys {
        drafts.push(TaskDraft {
            id: Uuid::new_v4(),
            kind: TaskKind::Survey,
            name: survey.title.clone(),
            description: survey.description.clone(),
            mandatory: true,
            sequence_order: next_sequence(&mut sequence),
            brand_id: Some(survey.brand_id),
            survey_id: Some(survey.id),
        });
    }

    drafts.push(TaskDraft {
        id: Uuid::new_v4(),
        kind: TaskKind::BoardPlacement,
        name: "Board Placement".to_string(),
        description: Some("Install promotional board at customer location".to_string()),
        mandatory: false,
        sequence_order: next_sequence(&mut sequence),
        brand_id: None,
        survey_id: None,
    });
    drafts.push(TaskDraft {
        id: Uuid::new_v4(),
        kind: TaskKind::ProductDistribution,
        name: "Product Distribution".to_string(),
        description: Some("Distribute products to customers".to_string()),
        mandatory: false,
        sequence_order: next_sequence(&mut sequence),
        brand_id: None,
        survey_id: None,
    });
    drafts.push(TaskDraft {
        id: Uuid::new_v4(),
        kind: TaskKind::PhotoDocumentation,
        name: "Photo Documentation".to_string(),
        description: Some("Take photos of store and products".to_string()),
        mandatory: false,
        sequence_order: next_sequence(&mut sequence),
        brand_id: None,
        survey_id: None,
    });

    drafts
}

fn next_sequence(sequence: &mut i32) -> i32 {
    let current = *sequence;
    *sequence += 1;
    current
}

#[cfg(test)]
mod tests {
    use super::*;

    fn survey(title: &str) -> SurveySummary {
        SurveySummary {
            id: Uuid::new_v4(),
            brand_id: Uuid::new_v4(),
            title: title.to_string(),
            description: Some(format!("{title} questionnaire")),
        }
    }

    #[test]
    fn surveys_come_first_in_encounter_order() {
        let surveys = vec![survey("Acme Cola Survey"), survey("Beacon Tea Survey")];
        let drafts = generate_task_drafts(&surveys);

        assert_eq!(drafts.len(), 5);
        assert_eq!(drafts[0].name, "Acme Cola Survey");
        assert_eq!(drafts[1].name, "Beacon Tea Survey");
        assert_eq!(drafts[0].survey_id, Some(surveys[0].id));
        assert_eq!(drafts[1].brand_id, Some(surveys[1].brand_id));
        for draft in &drafts[..2] {
            assert_eq!(draft.kind, TaskKind::Survey);
            assert!(draft.mandatory);
        }
    }

    #[test]
    fn standard_tasks_follow_surveys_and_are_optional() {
        let drafts = generate_task_drafts(&[survey("Survey")]);

        let tail: Vec<TaskKind> = drafts[1..].iter().map(|d| d.kind).collect();
        assert_eq!(
            tail,
            vec![
                TaskKind::BoardPlacement,
                TaskKind::ProductDistribution,
                TaskKind::PhotoDocumentation,
            ]
        );
        assert!(drafts[1..].iter().all(|d| !d.mandatory));
        assert!(drafts[1..].iter().all(|d| d.survey_id.is_none()));
    }

    #[test]
    fn sequence_numbers_are_dense_from_zero() {
        let drafts = generate_task_drafts(&[survey("A"), survey("B")]);
        let sequences: Vec<i32> = drafts.iter().map(|d| d.sequence_order).collect();
        assert_eq!(sequences, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn no_brands_yields_only_the_standard_tasks() {
        let drafts = generate_task_drafts(&[]);

        assert_eq!(drafts.len(), 3);
        assert!(drafts.iter().all(|d| !d.mandatory));
        assert_eq!(drafts[0].kind, TaskKind::BoardPlacement);
        assert_eq!(drafts[2].sequence_order, 2);
    }

    #[test]
    fn draft_ids_are_unique() {
        let drafts = generate_task_drafts(&[survey("A"), survey("B")]);
        let mut ids: Vec<Uuid> = drafts.iter().map(|d| d.id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), drafts.len());
    }
}
