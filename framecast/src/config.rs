//! Capture manager configuration

use framecast_core::{CaptureError, CaptureResult};
use serde::{Deserialize, Serialize};

/// Configuration for a [`crate::CaptureManager`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Maximum concurrently-outstanding frame buffers per device
    pub max_buffers_per_device: usize,
    /// Capacity of the manager's broadcast event channel
    pub event_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_buffers_per_device: 3,
            event_capacity: 100,
        }
    }
}

impl ManagerConfig {
    /// Validate the configuration
    pub fn validate(&self) -> CaptureResult<()> {
        if self.max_buffers_per_device == 0 {
            return Err(CaptureError::InvalidConfiguration {
                message: "max_buffers_per_device must be > 0".to_string(),
            });
        }
        if self.event_capacity == 0 {
            return Err(CaptureError::InvalidConfiguration {
                message: "event_capacity must be > 0".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ManagerConfig::default();
        assert_eq!(config.max_buffers_per_device, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_buffers_rejected() {
        let config = ManagerConfig {
            max_buffers_per_device: 0,
            ..ManagerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_survives_serialization() {
        let config = ManagerConfig {
            max_buffers_per_device: 5,
            event_capacity: 16,
        };
        let json = serde_json::to_string(&config).expect("serialize");
        let parsed: ManagerConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed.max_buffers_per_device, 5);
        assert_eq!(parsed.event_capacity, 16);
    }
}
