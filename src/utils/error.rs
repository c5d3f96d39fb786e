use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyticsError {
    #[error("Zip operation failed: {0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("API request failed: {0}")]
    ApiError(#[from] reqwest::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("TIFF error: {0}")]
    TiffError(#[from] tiff::TiffError),

    #[error("API returned status {status} for {url}")]
    ApiStatusError { status: u16, url: String },

    #[error("Authentication failed: {message}")]
    AuthError { message: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Configuration validation failed for '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration field: {field}")]
    MissingConfigError { field: String },

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("No {polarization} polarization found in {file}")]
    BandNotFound { polarization: String, file: String },

    #[error("GeoJSON error: {message}")]
    GeoJsonError { message: String },

    #[error("Could not parse date '{value}'")]
    DateParseError { value: String },

    #[error("Data processing error: {message}")]
    ProcessingError { message: String },

    #[error("Validation error: {message}")]
    ValidationError { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Network,
    Authentication,
    Configuration,
    Input,
    Processing,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AnalyticsError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ApiError(_) | Self::ApiStatusError { .. } => ErrorCategory::Network,
            Self::AuthError { .. } => ErrorCategory::Authentication,
            Self::ConfigError { .. }
            | Self::ConfigValidationError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::MissingConfigError { .. } => ErrorCategory::Configuration,
            Self::FileNotFound { .. }
            | Self::BandNotFound { .. }
            | Self::GeoJsonError { .. }
            | Self::DateParseError { .. }
            | Self::ValidationError { .. } => ErrorCategory::Input,
            Self::ZipError(_)
            | Self::CsvError(_)
            | Self::SerializationError(_)
            | Self::TiffError(_)
            | Self::ProcessingError { .. } => ErrorCategory::Processing,
            Self::IoError(_) => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            // transient, worth a retry
            Self::ApiError(_) => ErrorSeverity::Medium,
            Self::ApiStatusError { status, .. } if *status >= 500 || *status == 429 => {
                ErrorSeverity::Medium
            }
            Self::IoError(_) => ErrorSeverity::Critical,
            _ => ErrorSeverity::High,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ApiError(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::ApiStatusError { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Network => {
                "Check network connectivity and the service endpoint, then retry"
            }
            ErrorCategory::Authentication => {
                "Verify COPERNICUS_USERNAME and COPERNICUS_PASSWORD are set and valid"
            }
            ErrorCategory::Configuration => {
                "Review the run configuration file and command-line arguments"
            }
            ErrorCategory::Input => {
                "Check that input files exist and contain the expected data"
            }
            ErrorCategory::Processing => {
                "The input product may be corrupt; re-download it and retry"
            }
            ErrorCategory::System => "Check file permissions and available disk space",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self.category() {
            ErrorCategory::Network => format!("Could not reach the data service: {}", self),
            ErrorCategory::Authentication => format!("Login to Copernicus failed: {}", self),
            ErrorCategory::Configuration => format!("Invalid configuration: {}", self),
            ErrorCategory::Input => format!("Invalid input: {}", self),
            ErrorCategory::Processing => format!("Processing failed: {}", self),
            ErrorCategory::System => format!("System error: {}", self),
        }
    }

    pub fn processing(message: impl Into<String>) -> Self {
        Self::ProcessingError {
            message: message.into(),
        }
    }

    pub fn geojson(message: impl Into<String>) -> Self {
        Self::GeoJsonError {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AnalyticsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_errors_are_retryable() {
        let err = AnalyticsError::ApiStatusError {
            status: 503,
            url: "https://example.com".to_string(),
        };
        assert!(err.is_retryable());
        assert_eq!(err.severity(), ErrorSeverity::Medium);
        assert_eq!(err.category(), ErrorCategory::Network);

        let err = AnalyticsError::ApiStatusError {
            status: 404,
            url: "https://example.com".to_string(),
        };
        assert!(!err.is_retryable());
        assert_eq!(err.severity(), ErrorSeverity::High);
    }

    #[test]
    fn test_band_not_found_message() {
        let err = AnalyticsError::BandNotFound {
            polarization: "HH".to_string(),
            file: "scene.SAFE.zip".to_string(),
        };
        assert_eq!(err.to_string(), "No HH polarization found in scene.SAFE.zip");
        assert_eq!(err.category(), ErrorCategory::Input);
        assert!(err.user_friendly_message().starts_with("Invalid input"));
    }

    #[test]
    fn test_io_errors_are_critical() {
        let err = AnalyticsError::from(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "denied",
        ));
        assert_eq!(err.severity(), ErrorSeverity::Critical);
        assert_eq!(err.category(), ErrorCategory::System);
    }
}
