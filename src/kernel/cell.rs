//! Completion cell
//!
//! Single-write storage for a computation's outcome. The only transitions are
//! Empty → Value and Empty → Failure; once written, a cell never changes.

use super::error::{TaskError, TaskResult};

/// What a cell currently holds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion<T> {
    Empty,
    Value(T),
    /// A kernel fault, or an error a body passed on from a step it observed
    Failure(TaskError),
}

#[derive(Debug)]
pub struct CompletionCell<T> {
    completion: Completion<T>,
}

impl<T> Default for CompletionCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CompletionCell<T> {
    pub const fn new() -> Self {
        Self {
            completion: Completion::Empty,
        }
    }

    /// Store the outcome. Fails with `DoubleWrite` if the cell is already written.
    pub fn write(&mut self, outcome: TaskResult<T>) -> TaskResult<()> {
        if self.is_ready() {
            return Err(TaskError::DoubleWrite);
        }
        self.completion = match outcome {
            Ok(value) => Completion::Value(value),
            Err(err) => Completion::Failure(err),
        };
        Ok(())
    }

    /// True once the cell holds a value or a failure
    pub fn is_ready(&self) -> bool {
        !matches!(self.completion, Completion::Empty)
    }

    /// Read the stored outcome.
    ///
    /// A failure is re-raised unchanged on every read. An empty cell yields
    /// `NotReady`.
    pub fn read(&self) -> TaskResult<T>
    where
        T: Clone,
    {
        match &self.completion {
            Completion::Value(value) => Ok(value.clone()),
            Completion::Failure(err) => Err(err.clone()),
            Completion::Empty => Err(TaskError::NotReady),
        }
    }

    pub fn completion(&self) -> &Completion<T> {
        &self.completion
    }
}
