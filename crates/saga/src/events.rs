//! Saga lifecycle events.
//!
//! These make up the in-memory journal of a single run. They are returned in
//! [`SagaResult::journal`](crate::SagaResult::journal) and are not published.

use chrono::{DateTime, Utc};
use common::AggregateId;
use serde::{Deserialize, Serialize};

/// Events that can occur during saga execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SagaEvent {
    /// Saga execution started.
    SagaStarted(SagaStartedData),

    /// A step started execution.
    StepStarted(StepData),

    /// A step completed successfully.
    StepCompleted(StepData),

    /// A step failed.
    StepFailed(StepFailedData),

    /// Compensation started after a step failure.
    CompensationStarted(CompensationData),

    /// A compensation completed successfully.
    CompensationStepCompleted(StepData),

    /// A compensation failed (logged, compensation continues).
    CompensationStepFailed(StepFailedData),

    /// Saga completed successfully.
    SagaCompleted(SagaFinishedData),

    /// Saga failed after compensation.
    SagaFailed(SagaFailedData),
}

impl SagaEvent {
    /// Returns the event name.
    pub fn event_type(&self) -> &'static str {
        match self {
            SagaEvent::SagaStarted(_) => "SagaStarted",
            SagaEvent::StepStarted(_) => "StepStarted",
            SagaEvent::StepCompleted(_) => "StepCompleted",
            SagaEvent::StepFailed(_) => "StepFailed",
            SagaEvent::CompensationStarted(_) => "CompensationStarted",
            SagaEvent::CompensationStepCompleted(_) => "CompensationStepCompleted",
            SagaEvent::CompensationStepFailed(_) => "CompensationStepFailed",
            SagaEvent::SagaCompleted(_) => "SagaCompleted",
            SagaEvent::SagaFailed(_) => "SagaFailed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaStartedData {
    pub saga_id: AggregateId,
    /// The kind of saga, e.g. "OrderReservation".
    pub saga_type: String,
    pub step_count: usize,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepData {
    pub step_name: String,
    /// Zero-based position in the step list.
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepFailedData {
    pub step_name: String,
    pub index: usize,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationData {
    /// The step whose failure triggered compensation.
    pub from_step: String,
    /// How many completed steps will be walked back.
    pub completed_steps: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaFinishedData {
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaFailedData {
    pub reason: String,
    pub compensated_steps: Vec<String>,
    pub failed_compensations: Vec<String>,
    pub failed_at: DateTime<Utc>,
}

// Convenience constructors
impl SagaEvent {
    pub fn saga_started(
        saga_id: AggregateId,
        saga_type: impl Into<String>,
        step_count: usize,
    ) -> Self {
        SagaEvent::SagaStarted(SagaStartedData {
            saga_id,
            saga_type: saga_type.into(),
            step_count,
            started_at: Utc::now(),
        })
    }

    pub fn step_started(step_name: impl Into<String>, index: usize) -> Self {
        SagaEvent::StepStarted(StepData {
            step_name: step_name.into(),
            index,
        })
    }

    pub fn step_completed(step_name: impl Into<String>, index: usize) -> Self {
        SagaEvent::StepCompleted(StepData {
            step_name: step_name.into(),
            index,
        })
    }

    pub fn step_failed(step_name: impl Into<String>, index: usize, error: impl Into<String>) -> Self {
        SagaEvent::StepFailed(StepFailedData {
            step_name: step_name.into(),
            index,
            error: error.into(),
        })
    }

    pub fn compensation_started(from_step: impl Into<String>, completed_steps: usize) -> Self {
        SagaEvent::CompensationStarted(CompensationData {
            from_step: from_step.into(),
            completed_steps,
        })
    }

    pub fn compensation_step_completed(step_name: impl Into<String>, index: usize) -> Self {
        SagaEvent::CompensationStepCompleted(StepData {
            step_name: step_name.into(),
            index,
        })
    }

    pub fn compensation_step_failed(
        step_name: impl Into<String>,
        index: usize,
        error: impl Into<String>,
    ) -> Self {
        SagaEvent::CompensationStepFailed(StepFailedData {
            step_name: step_name.into(),
            index,
            error: error.into(),
        })
    }

    pub fn saga_completed() -> Self {
        SagaEvent::SagaCompleted(SagaFinishedData {
            finished_at: Utc::now(),
        })
    }

    pub fn saga_failed(
        reason: impl Into<String>,
        compensated_steps: Vec<String>,
        failed_compensations: Vec<String>,
    ) -> Self {
        SagaEvent::SagaFailed(SagaFailedData {
            reason: reason.into(),
            compensated_steps,
            failed_compensations,
            failed_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type() {
        assert_eq!(
            SagaEvent::saga_started(AggregateId::new(), "OrderReservation", 2).event_type(),
            "SagaStarted"
        );
        assert_eq!(SagaEvent::step_started("a", 0).event_type(), "StepStarted");
        assert_eq!(
            SagaEvent::compensation_step_failed("a", 0, "ledger down").event_type(),
            "CompensationStepFailed"
        );
        assert_eq!(
            SagaEvent::saga_failed("boom", vec![], vec![]).event_type(),
            "SagaFailed"
        );
    }

    #[test]
    fn test_saga_failed_data_roundtrip() {
        let event = SagaEvent::saga_failed(
            "Saga step 'Reserve inventory for item 2' failed",
            vec!["Reserve inventory for item 1".to_string()],
            vec![],
        );

        let json = serde_json::to_string(&event).unwrap();
        let deserialized: SagaEvent = serde_json::from_str(&json).unwrap();

        if let SagaEvent::SagaFailed(data) = deserialized {
            assert_eq!(data.compensated_steps, vec!["Reserve inventory for item 1"]);
            assert!(data.failed_compensations.is_empty());
        } else {
            panic!("Expected SagaFailed event");
        }
    }
}
