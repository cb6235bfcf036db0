use async_trait::async_trait;
use uuid::Uuid;

use crate::tasks::SurveySummary;

/// Stored location of a customer, as the customer collaborator keeps it.
/// Coordinates are optional: newly registered customers have none until a
/// field agent records them.
#[derive(Debug, Clone, Copy)]
pub struct CustomerLocation {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Customer lookups the workflow engine depends on. Owned elsewhere; the
/// engine only reads.
#[async_trait]
pub trait CustomerDirectory: Send + Sync {
    /// `None` means the customer is unknown to this tenant.
    async fn customer_location(
        &self,
        tenant_id: Uuid,
        customer_id: Uuid,
    ) -> anyhow::Result<Option<CustomerLocation>>;
}

/// Survey lookups used by the task list generator.
#[async_trait]
pub trait SurveyCatalog: Send + Sync {
    /// Mandatory, active surveys for the given brands, tenant-scoped,
    /// in a stable order.
    async fn mandatory_surveys_for_brands(
        &self,
        tenant_id: Uuid,
        brand_ids: &[Uuid],
    ) -> anyhow::Result<Vec<SurveySummary>>;
}
