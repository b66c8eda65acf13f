//! Generic forward/compensate saga runner.
//!
//! A saga is a list of [`SagaStep`]s: plain data naming an action and an
//! optional compensation. A [`StepInterpreter`] gives the data meaning. The
//! executor runs actions strictly in order; on the first failure it walks the
//! already-succeeded steps in reverse and hands each compensation the output
//! its action produced.

use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use common::AggregateId;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::SagaError;
use crate::events::SagaEvent;
use crate::state::SagaState;

/// One step of a saga.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaStep<A, C> {
    pub name: String,
    pub action: A,
    /// `None` for steps with nothing to undo, such as validation.
    pub compensation: Option<C>,
}

impl<A, C> SagaStep<A, C> {
    /// Creates a step without compensation.
    pub fn new(name: impl Into<String>, action: A) -> Self {
        Self {
            name: name.into(),
            action,
            compensation: None,
        }
    }

    /// Adds a compensation.
    pub fn with_compensation(mut self, compensation: C) -> Self {
        self.compensation = Some(compensation);
        self
    }
}

/// Executes step data.
#[async_trait]
pub trait StepInterpreter: Send + Sync {
    type Action: Send + Sync;
    type Compensation: Send + Sync;
    type Output: Send + Sync;

    /// Runs a forward action.
    async fn perform(&self, action: &Self::Action) -> Result<Self::Output, SagaError>;

    /// Undoes a completed action given the output it produced.
    async fn compensate(
        &self,
        compensation: &Self::Compensation,
        output: &Self::Output,
    ) -> Result<(), SagaError>;
}

/// Executor settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Upper bound for each action and compensation.
    pub step_timeout: Option<Duration>,
}

impl ExecutorConfig {
    pub fn with_step_timeout(timeout: Duration) -> Self {
        Self {
            step_timeout: Some(timeout),
        }
    }
}

/// A compensation that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationFailure {
    pub step: String,
    pub error: String,
}

/// Outcome of a saga run.
#[derive(Debug)]
pub struct SagaResult<O> {
    pub saga_id: AggregateId,
    pub saga_type: String,
    pub state: SagaState,
    pub success: bool,
    /// Outputs of the steps that completed, in step order.
    pub results: Vec<O>,
    /// The error that stopped forward execution.
    pub error: Option<SagaError>,
    /// Names of the steps rolled back, in compensation order.
    pub compensated_steps: Vec<String>,
    pub compensation_failures: Vec<CompensationFailure>,
    pub journal: Vec<SagaEvent>,
    pub duration: Duration,
}

impl<O> SagaResult<O> {
    /// Returns true if a compensation failed and stock may be left partly
    /// rolled back.
    pub fn needs_reconciliation(&self) -> bool {
        !self.compensation_failures.is_empty()
    }

    /// Returns the triggering error as text.
    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(ToString::to_string)
    }
}

/// Stateless saga runner.
#[derive(Debug, Clone, Copy, Default)]
pub struct SagaExecutor {
    config: ExecutorConfig,
}

impl SagaExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Runs `steps` to completion or full compensation.
    pub async fn execute<I>(
        &self,
        saga_type: &str,
        interpreter: &I,
        steps: &[SagaStep<I::Action, I::Compensation>],
    ) -> SagaResult<I::Output>
    where
        I: StepInterpreter,
    {
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        self.execute_with_cancel(saga_type, interpreter, steps, cancel_rx)
            .await
    }

    /// Runs `steps`, treating a `true` on `cancel` as a failure of the step
    /// in progress. Compensations always run to completion.
    #[tracing::instrument(skip_all, fields(saga_type = %saga_type, steps = steps.len()))]
    pub async fn execute_with_cancel<I>(
        &self,
        saga_type: &str,
        interpreter: &I,
        steps: &[SagaStep<I::Action, I::Compensation>],
        mut cancel: watch::Receiver<bool>,
    ) -> SagaResult<I::Output>
    where
        I: StepInterpreter,
    {
        let started = Instant::now();
        let saga_id = AggregateId::new();
        metrics::counter!("saga_executions_total", "saga_type" => saga_type.to_string())
            .increment(1);

        let mut state = SagaState::NotStarted;
        let mut journal = vec![SagaEvent::saga_started(saga_id, saga_type, steps.len())];
        let mut completed: Vec<(usize, I::Output)> = Vec::with_capacity(steps.len());
        let mut failure: Option<(usize, SagaError)> = None;
        debug_assert!(state.can_run());
        state = SagaState::Running;

        for (index, step) in steps.iter().enumerate() {
            journal.push(SagaEvent::step_started(&step.name, index));
            tracing::debug!(%saga_id, step = %step.name, index, "saga step started");

            let outcome = if *cancel.borrow_and_update() {
                Err(SagaError::Cancelled {
                    step: step.name.clone(),
                })
            } else {
                tokio::select! {
                    biased;
                    _ = cancelled(&mut cancel) => Err(SagaError::Cancelled { step: step.name.clone() }),
                    result = self.bounded(&step.name, interpreter.perform(&step.action)) => result,
                }
            };

            match outcome {
                Ok(output) => {
                    journal.push(SagaEvent::step_completed(&step.name, index));
                    completed.push((index, output));
                }
                Err(error) => {
                    tracing::warn!(%saga_id, step = %step.name, error = %error, "saga step failed");
                    journal.push(SagaEvent::step_failed(&step.name, index, error.to_string()));
                    failure = Some((index, error));
                    break;
                }
            }
        }

        let Some((failed_index, error)) = failure else {
            state = SagaState::Completed;
            journal.push(SagaEvent::saga_completed());
            let duration = started.elapsed();
            metrics::counter!("saga_completed", "saga_type" => saga_type.to_string()).increment(1);
            metrics::histogram!("saga_duration_seconds", "saga_type" => saga_type.to_string())
                .record(duration.as_secs_f64());
            tracing::info!(%saga_id, duration_ms = duration.as_millis() as u64, "saga completed");

            return SagaResult {
                saga_id,
                saga_type: saga_type.to_string(),
                state,
                success: true,
                results: completed.into_iter().map(|(_, output)| output).collect(),
                error: None,
                compensated_steps: Vec::new(),
                compensation_failures: Vec::new(),
                journal,
                duration,
            };
        };

        debug_assert!(state.can_compensate());
        state = SagaState::Compensating;
        tracing::info!(%saga_id, state = %state, completed = completed.len(), "compensating saga");
        journal.push(SagaEvent::compensation_started(
            &steps[failed_index].name,
            completed.len(),
        ));

        let mut compensated_steps = Vec::new();
        let mut compensation_failures = Vec::new();
        for (index, output) in completed.iter().rev() {
            let step = &steps[*index];
            let Some(compensation) = &step.compensation else {
                continue;
            };

            match self
                .bounded(&step.name, interpreter.compensate(compensation, output))
                .await
            {
                Ok(()) => {
                    journal.push(SagaEvent::compensation_step_completed(&step.name, *index));
                    compensated_steps.push(step.name.clone());
                }
                Err(e) => {
                    tracing::error!(
                        %saga_id,
                        saga_type,
                        step = %step.name,
                        error = %e,
                        "compensation failed, manual reconciliation required"
                    );
                    metrics::counter!(
                        "saga_compensation_failures_total",
                        "saga_type" => saga_type.to_string()
                    )
                    .increment(1);
                    journal.push(SagaEvent::compensation_step_failed(
                        &step.name,
                        *index,
                        e.to_string(),
                    ));
                    compensation_failures.push(CompensationFailure {
                        step: step.name.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        state = if compensation_failures.is_empty() {
            SagaState::Failed
        } else {
            SagaState::CompensationIncomplete
        };
        journal.push(SagaEvent::saga_failed(
            error.to_string(),
            compensated_steps.clone(),
            compensation_failures.iter().map(|f| f.step.clone()).collect(),
        ));

        let duration = started.elapsed();
        metrics::counter!("saga_failed", "saga_type" => saga_type.to_string()).increment(1);
        metrics::histogram!("saga_duration_seconds", "saga_type" => saga_type.to_string())
            .record(duration.as_secs_f64());
        tracing::warn!(
            %saga_id,
            reason = %error,
            compensated = compensated_steps.len(),
            state = %state,
            "saga failed"
        );

        SagaResult {
            saga_id,
            saga_type: saga_type.to_string(),
            state,
            success: false,
            results: completed.into_iter().map(|(_, output)| output).collect(),
            error: Some(error),
            compensated_steps,
            compensation_failures,
            journal,
            duration,
        }
    }

    async fn bounded<T, F>(&self, step: &str, future: F) -> Result<T, SagaError>
    where
        F: Future<Output = Result<T, SagaError>>,
    {
        match self.config.step_timeout {
            Some(timeout) => tokio::time::timeout(timeout, future)
                .await
                .unwrap_or_else(|_| {
                    Err(SagaError::StepTimedOut {
                        step: step.to_string(),
                        timeout_ms: timeout.as_millis() as u64,
                    })
                }),
            None => future.await,
        }
    }
}

/// Resolves once `true` is observed. A dropped sender never cancels.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
