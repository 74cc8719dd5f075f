//! Read-only view of the dispatcher for control and reporting surfaces

use formflow_common::{DispatchId, DispatchState};

use crate::orchestrator::{DispatchRecord, Orchestrator, StatusSnapshot};

/// Queries a running dispatcher without access to its internals.
///
/// # Example
///
/// ```rust,ignore
/// fn busy(service: &dyn DispatchQueryService) -> bool {
///     service.status().in_flight > 0
/// }
/// ```
pub trait DispatchQueryService: Send + Sync {
    fn status(&self) -> StatusSnapshot;

    /// Current state of one dispatch, or `None` if the id is unknown.
    fn state(&self, id: &DispatchId) -> Option<DispatchState>;

    /// Every retained dispatch, ordered by id.
    fn records(&self) -> Vec<(DispatchId, DispatchRecord)>;

    /// The dispatches created from one submission.
    fn records_for_request(&self, request_id: &str) -> Vec<(DispatchId, DispatchRecord)> {
        self.records()
            .into_iter()
            .filter(|(_, record)| record.request_id == request_id)
            .collect()
    }

    /// Queued ids with their priorities, in service order.
    fn pending(&self) -> Vec<(DispatchId, u32)>;
}

impl DispatchQueryService for Orchestrator {
    fn status(&self) -> StatusSnapshot {
        Self::status(self)
    }

    fn state(&self, id: &DispatchId) -> Option<DispatchState> {
        Self::state(self, id)
    }

    fn records(&self) -> Vec<(DispatchId, DispatchRecord)> {
        Self::records(self)
    }

    fn pending(&self) -> Vec<(DispatchId, u32)> {
        Self::pending(self)
    }
}
