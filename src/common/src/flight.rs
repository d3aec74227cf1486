//! Contract between workflow steps and the external orchestration engine.
//!
//! A flight is one resumable, multi-step operation. The engine sequences
//! steps, persists the working map between them and calls `undo_step` in
//! reverse order when a flight fails. This module only defines the shapes
//! the steps exchange with that engine.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::shutdown::ShutdownSignal;

/// Outcome of a `do_step` or `undo_step` call.
#[derive(Debug)]
pub enum StepResult {
    Success,
    /// The engine may run the step again later.
    RetryableFailure(Error),
    /// The flight must be undone.
    FatalFailure(Error),
}

impl StepResult {
    pub fn is_success(&self) -> bool {
        matches!(self, StepResult::Success)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, StepResult::RetryableFailure(_))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, StepResult::FatalFailure(_))
    }

    /// Classify an error by its kind.
    pub fn from_error(err: Error) -> Self {
        if err.is_retryable() {
            StepResult::RetryableFailure(err)
        } else {
            StepResult::FatalFailure(err)
        }
    }
}

impl From<Result<()>> for StepResult {
    fn from(result: Result<()>) -> Self {
        match result {
            Ok(()) => StepResult::Success,
            Err(e) => StepResult::from_error(e),
        }
    }
}

/// A unit of work with a compensating action.
#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &'static str;

    async fn do_step(&self, context: &mut FlightContext) -> StepResult;

    /// Must tolerate being invoked more than once and must not fail for
    /// expected conditions.
    async fn undo_step(&self, context: &mut FlightContext) -> StepResult;
}

/// Per-flight state handed to each step.
#[derive(Debug, Clone)]
pub struct FlightContext {
    flight_id: String,
    input: HashMap<String, Value>,
    working: HashMap<String, Value>,
    shutdown: ShutdownSignal,
}

impl FlightContext {
    pub fn new(flight_id: impl Into<String>, input: HashMap<String, Value>) -> Self {
        Self {
            flight_id: flight_id.into(),
            input,
            working: HashMap::new(),
            shutdown: ShutdownSignal::never(),
        }
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Identifier of the flight; used as the lock-holder token.
    pub fn flight_id(&self) -> &str {
        &self.flight_id
    }

    pub fn shutdown(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    /// Typed read of an input parameter; missing or mistyped input is invalid.
    pub fn input<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self
            .input
            .get(key)
            .ok_or_else(|| Error::invalid_input(format!("missing input parameter '{key}'")))?;
        serde_json::from_value(value.clone()).map_err(|e| {
            Error::invalid_input(format!("input parameter '{key}' has the wrong shape: {e}"))
        })
    }

    pub fn working<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.working.get(key) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    pub fn put_working<T: Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        self.working
            .insert(key.to_string(), serde_json::to_value(value)?);
        Ok(())
    }

    pub fn remove_working(&mut self, key: &str) {
        self.working.remove(key);
    }
}

/// Builder for flight input maps.
#[derive(Debug, Default, Clone)]
pub struct FlightInput {
    values: HashMap<String, Value>,
}

impl FlightInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.values.insert(key.to_string(), value);
        self
    }

    pub fn build(self) -> HashMap<String, Value> {
        self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn test_input_round_trip() {
        let input = FlightInput::new()
            .with("datasetId", "ds-1")
            .with("fileIds", vec!["a", "b"])
            .build();
        let ctx = FlightContext::new("flight-1", input);

        assert_eq!(ctx.flight_id(), "flight-1");
        assert_eq!(ctx.input::<String>("datasetId").unwrap(), "ds-1");
        assert_eq!(ctx.input::<Vec<String>>("fileIds").unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_missing_input_is_invalid() {
        let ctx = FlightContext::new("flight-1", HashMap::new());
        let err = ctx.input::<String>("datasetId").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_working_map() {
        let mut ctx = FlightContext::new("flight-1", HashMap::new());
        assert!(ctx.working::<String>("fileId").unwrap().is_none());

        ctx.put_working("fileId", &"f-1").unwrap();
        assert_eq!(ctx.working::<String>("fileId").unwrap().as_deref(), Some("f-1"));

        ctx.remove_working("fileId");
        assert!(ctx.working::<String>("fileId").unwrap().is_none());
    }

    #[test]
    fn test_step_result_classification() {
        assert!(StepResult::from_error(Error::conflict("locked")).is_retryable());
        assert!(StepResult::from_error(Error::not_found("gone")).is_fatal());
        assert!(StepResult::from(Ok(())).is_success());
    }
}
