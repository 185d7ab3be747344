//! Wire types of the control surface
//!
//! Requests are internally tagged JSON objects, e.g.
//! `{"type": "CANCEL_SYNC", "operationId": "op-1"}`. Responses carry their
//! kind in `type` and the payload in `data`.

use serde::{Deserialize, Serialize};

use trektrack_conflict::ReviewChoice;
use trektrack_core::domain::{
    CapabilitySnapshot, EntityId, Operation, OperationId, PendingConflicts, SyncRequest,
};
use trektrack_sync::StartSyncResponse;

// ============================================================================
// Request
// ============================================================================

/// A message sent to the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Request {
    /// Start synchronizing the given entities
    StartSync(SyncRequest),
    #[serde(rename_all = "camelCase")]
    CancelSync { operation_id: OperationId },
    /// Progress of one operation, or of the latest one when no id is given
    #[serde(rename_all = "camelCase")]
    GetProgress {
        #[serde(default)]
        operation_id: Option<OperationId>,
    },
    /// Every operation still running
    GetAllProgress,
    GetSyncCapability,
    ListConflicts,
    #[serde(rename_all = "camelCase")]
    ResolveConflict {
        entity_id: EntityId,
        field: String,
        choice: ReviewChoice,
    },
    /// Drop cached metadata for one entity, or for all of them
    #[serde(rename_all = "camelCase")]
    ClearCache {
        #[serde(default)]
        entity_id: Option<EntityId>,
    },
    /// Prometheus text exposition of the engine metrics
    GetMetrics,
}

impl Request {
    /// Wire name of the request
    pub fn name(&self) -> &'static str {
        match self {
            Request::StartSync(_) => "START_SYNC",
            Request::CancelSync { .. } => "CANCEL_SYNC",
            Request::GetProgress { .. } => "GET_PROGRESS",
            Request::GetAllProgress => "GET_ALL_PROGRESS",
            Request::GetSyncCapability => "GET_SYNC_CAPABILITY",
            Request::ListConflicts => "LIST_CONFLICTS",
            Request::ResolveConflict { .. } => "RESOLVE_CONFLICT",
            Request::ClearCache { .. } => "CLEAR_CACHE",
            Request::GetMetrics => "GET_METRICS",
        }
    }

    /// Parses a JSON request
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

// ============================================================================
// Response
// ============================================================================

/// The engine's answer to a [`Request`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Response {
    SyncStarted(StartSyncResponse),
    #[serde(rename_all = "camelCase")]
    SyncCancelled {
        operation_id: OperationId,
        cancelled: bool,
    },
    Progress(Option<Operation>),
    AllProgress(Vec<Operation>),
    Capability(CapabilitySnapshot),
    Conflicts(Vec<PendingConflicts>),
    ConflictResolved(bool),
    CacheCleared(u64),
    Metrics(String),
    /// The request was rejected or failed
    Error { message: String },
}

impl Response {
    /// Wire name of the response
    pub fn name(&self) -> &'static str {
        match self {
            Response::SyncStarted(_) => "SYNC_STARTED",
            Response::SyncCancelled { .. } => "SYNC_CANCELLED",
            Response::Progress(_) => "PROGRESS",
            Response::AllProgress(_) => "ALL_PROGRESS",
            Response::Capability(_) => "CAPABILITY",
            Response::Conflicts(_) => "CONFLICTS",
            Response::ConflictResolved(_) => "CONFLICT_RESOLVED",
            Response::CacheCleared(_) => "CACHE_CLEARED",
            Response::Metrics(_) => "METRICS",
            Response::Error { .. } => "ERROR",
        }
    }

    pub(crate) fn error(err: impl std::fmt::Display) -> Self {
        Response::Error {
            message: err.to_string(),
        }
    }

    /// Serializes the response to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use trektrack_core::domain::Priority;

    #[test]
    fn test_start_sync_request_from_json() {
        let request = Request::from_json(
            r#"{
                "type": "START_SYNC",
                "operationId": "ui-42",
                "entityIds": ["tng-s03e15", "tng-s03e16"],
                "sources": ["TMDB"],
                "priority": "high"
            }"#,
        )
        .unwrap();

        let Request::StartSync(sync) = request else {
            panic!("expected START_SYNC");
        };
        assert_eq!(sync.operation_id.unwrap().as_str(), "ui-42");
        assert_eq!(sync.entity_ids.len(), 2);
        assert_eq!(sync.sources[0].as_str(), "tmdb");
        assert_eq!(sync.priority, Some(Priority::High));
    }

    #[test]
    fn test_optional_ids_default_to_none() {
        assert_eq!(
            Request::from_json(r#"{"type": "GET_PROGRESS"}"#).unwrap(),
            Request::GetProgress { operation_id: None }
        );
        assert_eq!(
            Request::from_json(r#"{"type": "CLEAR_CACHE"}"#).unwrap(),
            Request::ClearCache { entity_id: None }
        );
    }

    #[test]
    fn test_resolve_conflict_request_from_json() {
        let request = Request::from_json(
            r#"{"type": "RESOLVE_CONFLICT", "entityId": "ds9-s01e01", "field": "title", "choice": "take-new"}"#,
        )
        .unwrap();
        assert_eq!(request.name(), "RESOLVE_CONFLICT");
        assert!(matches!(
            request,
            Request::ResolveConflict { choice: ReviewChoice::TakeNew, .. }
        ));
    }

    #[test]
    fn test_malformed_ids_are_rejected() {
        assert!(Request::from_json(r#"{"type": "CANCEL_SYNC", "operationId": ""}"#).is_err());
        assert!(Request::from_json(r#"{"type": "CLEAR_CACHE", "entityId": "a/b"}"#).is_err());
        assert!(Request::from_json(r#"{"type": "PAUSE_SYNC"}"#).is_err());
    }

    #[test]
    fn test_response_json_shape() {
        let response = Response::SyncCancelled {
            operation_id: "op-7".parse().unwrap(),
            cancelled: true,
        };
        let value: serde_json::Value = serde_json::from_str(&response.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type": "SYNC_CANCELLED", "data": {"operationId": "op-7", "cancelled": true}})
        );

        let value: serde_json::Value =
            serde_json::from_str(&Response::Progress(None).to_json().unwrap()).unwrap();
        assert_eq!(value, json!({"type": "PROGRESS", "data": null}));
    }
}
