use crate::{Result, TaskError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Task urgency on a bounded scale.
/// Lower numerical values are more urgent: 1 dispatches before 5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Priority(u8);

impl Priority {
    /// Most urgent value accepted
    pub const HIGHEST: u8 = 1;

    /// Least urgent value accepted
    pub const LOWEST: u8 = 5;

    /// Create a priority, rejecting values outside `HIGHEST..=LOWEST`
    pub fn new(value: u8) -> Result<Self> {
        if (Self::HIGHEST..=Self::LOWEST).contains(&value) {
            Ok(Priority(value))
        } else {
            Err(TaskError::Validation(format!(
                "priority must be between {} and {} (got {})",
                Self::HIGHEST,
                Self::LOWEST,
                value
            )))
        }
    }

    pub fn highest() -> Self {
        Priority(Self::HIGHEST)
    }

    pub fn normal() -> Self {
        Priority(3)
    }

    pub fn lowest() -> Self {
        Priority(Self::LOWEST)
    }

    /// Get the raw priority value
    pub fn value(&self) -> u8 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::normal()
    }
}

impl TryFrom<u8> for Priority {
    type Error = TaskError;

    fn try_from(value: u8) -> Result<Self> {
        Priority::new(value)
    }
}

impl From<Priority> for u8 {
    fn from(priority: Priority) -> Self {
        priority.0
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
