use serde::{Deserialize, Serialize};
use std::env;

/// Connection settings for the S3 checkpoint destination
///
/// The bucket and key prefix come from the destination URL; this only
/// describes how to reach the service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StorageConfig {
    pub endpoint: Option<String>,
    pub region: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub path_style: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: "us-east-1".to_string(),
            access_key: None,
            secret_key: None,
            path_style: false,
        }
    }
}

impl StorageConfig {
    pub fn from_env() -> Self {
        Self {
            endpoint: env::var("S3_ENDPOINT").ok(),
            region: env::var("S3_REGION")
                .or_else(|_| env::var("AWS_REGION"))
                .unwrap_or_else(|_| "us-east-1".to_string()),
            access_key: env::var("S3_ACCESS_KEY")
                .or_else(|_| env::var("AWS_ACCESS_KEY_ID"))
                .ok(),
            secret_key: env::var("S3_SECRET_KEY")
                .or_else(|_| env::var("AWS_SECRET_ACCESS_KEY"))
                .ok(),
            path_style: env::var("S3_PATH_STYLE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
        }
    }

    /// Local MinIO setup used for development
    pub fn for_minio(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            region: "us-east-1".to_string(),
            access_key: Some("minioadmin".to_string()),
            secret_key: Some("minioadmin".to_string()),
            path_style: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_for_minio() {
        let config = StorageConfig::for_minio("http://localhost:9000");
        assert_eq!(config.endpoint.as_deref(), Some("http://localhost:9000"));
        assert!(config.path_style);
        assert_eq!(config.access_key.as_deref(), Some("minioadmin"));
    }

    #[test]
    #[serial]
    fn test_from_env_falls_back_to_aws_variables() {
        env::remove_var("S3_ACCESS_KEY");
        env::remove_var("S3_SECRET_KEY");
        env::set_var("AWS_ACCESS_KEY_ID", "aws_key");
        env::set_var("AWS_SECRET_ACCESS_KEY", "aws_secret");
        env::set_var("S3_PATH_STYLE", "true");

        let config = StorageConfig::from_env();
        assert_eq!(config.access_key.as_deref(), Some("aws_key"));
        assert_eq!(config.secret_key.as_deref(), Some("aws_secret"));
        assert!(config.path_style);

        env::remove_var("AWS_ACCESS_KEY_ID");
        env::remove_var("AWS_SECRET_ACCESS_KEY");
        env::remove_var("S3_PATH_STYLE");
    }
}
