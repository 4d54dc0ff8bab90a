//! Configuration for the retail core.
//!
//! Environment-variable loading for service settings and AWS client
//! initialization. Every knob has a development default so the services
//! run without any environment set up.

use std::env;
use std::time::Duration;

use crate::errors::{CoreError, CoreResult};
use crate::retry::RetryConfig;

/// Global service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// AWS region
    pub aws_region: String,
    /// Environment name (dev, staging, prod)
    pub environment: String,
    /// Table name prefix
    pub table_prefix: String,
    /// Flat shipping charge applied to non-empty orders
    pub flat_shipping_rate: f64,
    /// Retry attempts for conditional-write loops
    pub retry_max_attempts: u32,
    /// Base backoff delay in milliseconds
    pub retry_base_delay_ms: u64,
}

impl ServiceConfig {
    /// Loads configuration from environment variables.
    pub fn from_env() -> CoreResult<Self> {
        Ok(Self {
            aws_region: env::var("AWS_REGION").unwrap_or_else(|_| "us-west-2".to_string()),
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string()),
            table_prefix: env::var("TABLE_PREFIX").unwrap_or_else(|_| "leafshop".to_string()),
            flat_shipping_rate: env::var("FLAT_SHIPPING_RATE")
                .unwrap_or_else(|_| "10.0".to_string())
                .parse()
                .map_err(|_| CoreError::invalid("invalid FLAT_SHIPPING_RATE"))?,
            retry_max_attempts: env::var("RETRY_MAX_ATTEMPTS")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .map_err(|_| CoreError::invalid("invalid RETRY_MAX_ATTEMPTS"))?,
            retry_base_delay_ms: env::var("RETRY_BASE_DELAY_MS")
                .unwrap_or_else(|_| "25".to_string())
                .parse()
                .map_err(|_| CoreError::invalid("invalid RETRY_BASE_DELAY_MS"))?,
        })
    }

    /// Full name of the single table, e.g. `leafshop-store-dev`.
    pub fn table_name(&self) -> String {
        format!("{}-store-{}", self.table_prefix, self.environment)
    }

    /// Retry policy built from the configured knobs.
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.retry_max_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            ..RetryConfig::default()
        }
    }
}

/// AWS client configuration and initialization.
#[derive(Debug, Clone)]
pub struct AwsConfig {
    /// DynamoDB client
    pub dynamodb: aws_sdk_dynamodb::Client,
    /// AWS configuration
    pub config: aws_config::SdkConfig,
}

impl AwsConfig {
    /// Creates a new AWS configuration with an initialized DynamoDB client.
    pub async fn new(region: &str) -> Self {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()))
            .load()
            .await;

        let dynamodb = aws_sdk_dynamodb::Client::new(&config);

        Self { dynamodb, config }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_name_combines_prefix_and_environment() {
        let config = ServiceConfig {
            aws_region: "us-west-2".to_string(),
            environment: "test".to_string(),
            table_prefix: "leafshop".to_string(),
            flat_shipping_rate: 10.0,
            retry_max_attempts: 3,
            retry_base_delay_ms: 25,
        };

        assert_eq!(config.table_name(), "leafshop-store-test");
    }

    #[test]
    fn retry_config_uses_knobs() {
        let config = ServiceConfig {
            aws_region: "us-west-2".to_string(),
            environment: "test".to_string(),
            table_prefix: "leafshop".to_string(),
            flat_shipping_rate: 10.0,
            retry_max_attempts: 7,
            retry_base_delay_ms: 5,
        };

        let retry = config.retry_config();
        assert_eq!(retry.max_attempts, 7);
        assert_eq!(retry.base_delay, Duration::from_millis(5));
    }

    #[test]
    fn from_env_has_defaults() {
        let config = ServiceConfig::from_env().unwrap();
        assert!(!config.aws_region.is_empty());
        assert!(!config.table_prefix.is_empty());
        assert!(config.flat_shipping_rate >= 0.0);
        assert!(config.retry_max_attempts > 0);
    }
}
