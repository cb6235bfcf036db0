pub mod collab;
pub mod commission;
pub mod error;
pub mod geo;
pub mod models;
pub mod tasks;

pub use collab::{CustomerDirectory, CustomerLocation, SurveyCatalog};
pub use commission::{CommissionLineDraft, CommissionRateTable, accrue, emission_key, total_amount};
pub use error::WorkflowError;
pub use geo::{
    CHECK_IN_RADIUS_M, GeoPoint, GpsConfidence, ProximityCheck, haversine_meters,
    validate_proximity,
};
pub use models::{
    CommissionLine, CommissionStatus, GpsActivity, GpsSample, TaskKind, TaskStatus, Visit,
    VisitStatus, VisitTask, blocking_task_ids,
};
pub use tasks::{SurveySummary, TaskDraft, generate_task_drafts};
