pub mod bus;
pub mod config;
pub mod contracts;
pub mod db;

pub use bus::{RedisBus, VISITS_COMPLETED_CHANNEL};
pub use config::ServiceConfig;
pub use contracts::{
    AgentTrackQuery, AgentTrackResponse, CancelVisitRequest, CancelVisitResponse, CheckInRequest,
    CheckInResponse, CheckOutRequest, CheckOutResponse, CommissionLineListResponse,
    CommissionLineView, CompleteTaskRequest,
    GpsSampleView, LocationValidationView, LogGpsSampleRequest, LogGpsSampleResponse,
    MyVisitsQuery, NearbyCustomerView, NearbyCustomersRequest, NearbyCustomersResponse,
    SkipTaskRequest, TaskResponse, TaskView, ValidateProximityRequest, ValidateProximityResponse,
    VisitCommissionsQuery, VisitCompletedEvent, VisitListResponse, VisitTasksQuery,
    VisitTasksResponse, VisitView,
};
pub use db::connect_database;
