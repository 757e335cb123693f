use crate::error::SchedulerError;

/// Construction parameters for a [`Scheduler`](crate::Scheduler).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
  /// Name used in log fields and completion notifications.
  pub name: String,
  /// Maximum number of tasks running at once. Must be at least 1.
  pub limit: usize,
}

impl Default for SchedulerConfig {
  fn default() -> Self {
    Self {
      name: "scheduler".to_string(),
      limit: 1,
    }
  }
}

impl SchedulerConfig {
  pub fn new(name: &str, limit: usize) -> Self {
    Self {
      name: name.to_string(),
      limit,
    }
  }

  pub fn with_name(mut self, name: &str) -> Self {
    self.name = name.to_string();
    self
  }

  pub fn with_limit(mut self, limit: usize) -> Self {
    self.limit = limit;
    self
  }

  /// Checks the configuration without building anything.
  ///
  /// # Errors
  /// Returns `SchedulerError::InvalidLimit` when `limit` is 0.
  pub fn validate(&self) -> Result<(), SchedulerError> {
    validate_limit(self.limit).map(|_| ())
  }
}

pub(crate) fn validate_limit(limit: usize) -> Result<usize, SchedulerError> {
  if limit == 0 {
    return Err(SchedulerError::InvalidLimit { limit });
  }
  Ok(limit)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn default_config_is_valid() {
    let config = SchedulerConfig::default();
    assert_eq!(config.limit, 1);
    assert!(config.validate().is_ok());
  }

  #[test]
  fn builder_overrides_fields() {
    let config = SchedulerConfig::default().with_name("downloads").with_limit(8);
    assert_eq!(config, SchedulerConfig::new("downloads", 8));
  }

  #[test]
  fn zero_limit_is_rejected() {
    let config = SchedulerConfig::new("broken", 0);
    assert_eq!(config.validate(), Err(SchedulerError::InvalidLimit { limit: 0 }));
  }
}
