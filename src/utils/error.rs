use crate::core::parser::MultiValidationError;
use thiserror::Error;

/// 錯誤處理選項 (bit flags)
pub const CAN_RESUME: u8 = 1;
pub const CAN_RETRY: u8 = 2;
pub const CAN_RESET: u8 = 4;

pub const BLUEPRINT_ERROR: &str = "There is a possible problem in the Blueprint provided.";
pub const UNEXPECTED_ERROR: &str = "Unable to automatically recover from error.";

#[derive(Error, Debug)]
pub enum ChessboardError {
    #[error("{}", .message.as_deref().unwrap_or("Chessboard Error."))]
    General {
        message: Option<String>,
        friendly_message: Option<String>,
        options: u8,
        http_status: Option<u16>,
    },

    #[error("{0}")]
    DatabaseConnection(String),

    #[error("{0}")]
    NoToken(String),

    #[error("{0}")]
    NoMapping(String),

    #[error("{0}")]
    InvalidParameter(String),

    #[error("{0}")]
    NoData(String),

    #[error("{0}")]
    InvalidRepoUrl(String),

    #[error("{0}")]
    DoesNotExist(String),

    #[error("{0}")]
    BadState(String),

    #[error("{0}")]
    Index(String),

    #[error("Call `{cmd}` failed with return code {returncode}: {}", .output.as_deref().filter(|o| !o.is_empty()).unwrap_or("(No output)"))]
    CalledProcess {
        returncode: i32,
        cmd: String,
        output: Option<String>,
    },

    #[error("{0}")]
    ServerBuildFailed(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    DataIntegrity(String),

    #[error("{0}")]
    NothingToDo(String),

    #[error("{0}")]
    Syntax(String),

    #[error("{0}")]
    Template(String),

    #[error("{0}")]
    Topology(String),

    #[error(transparent)]
    MultiValidation(#[from] MultiValidationError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Request failed: {0}")]
    ApiError(#[from] reqwest::Error),

    #[error("Zip operation failed: {0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Blueprint,
    Input,
    Provider,
    Configuration,
    System,
    Network,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ChessboardError {
    pub fn general(message: impl Into<String>) -> Self {
        ChessboardError::General {
            message: Some(message.into()),
            friendly_message: None,
            options: 0,
            http_status: None,
        }
    }

    /// 帶有使用者訊息的一般錯誤
    pub fn with_friendly(message: impl Into<String>, friendly: impl Into<String>) -> Self {
        ChessboardError::General {
            message: Some(message.into()),
            friendly_message: Some(friendly.into()),
            options: 0,
            http_status: None,
        }
    }

    pub fn template(detail: impl std::fmt::Display) -> Self {
        ChessboardError::Template(format!("Template rendering failed: {}", detail))
    }

    /// 回傳給客戶端 (CLI、UI) 的訊息
    pub fn friendly_message(&self) -> String {
        match self {
            ChessboardError::General {
                friendly_message, ..
            } => friendly_message
                .clone()
                .unwrap_or_else(|| UNEXPECTED_ERROR.to_string()),
            ChessboardError::NoData(message) if message.is_empty() => "No data found".to_string(),
            ChessboardError::DatabaseConnection(message)
            | ChessboardError::NoToken(message)
            | ChessboardError::NoMapping(message)
            | ChessboardError::InvalidParameter(message)
            | ChessboardError::NoData(message)
            | ChessboardError::InvalidRepoUrl(message)
            | ChessboardError::DoesNotExist(message)
            | ChessboardError::BadState(message)
            | ChessboardError::Validation(message)
                if !message.is_empty() =>
            {
                message.clone()
            }
            ChessboardError::Template(_) => "Your template had an error in it".to_string(),
            ChessboardError::Topology(_) | ChessboardError::MultiValidation(_) => {
                BLUEPRINT_ERROR.to_string()
            }
            _ => UNEXPECTED_ERROR.to_string(),
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            ChessboardError::General { http_status, .. } => http_status.unwrap_or(400),
            ChessboardError::DatabaseConnection(_) => 500,
            ChessboardError::DoesNotExist(_) => 404,
            ChessboardError::BadState(_) => 409,
            ChessboardError::Template(_) => 406,
            ChessboardError::IoError(_) | ChessboardError::ZipError(_) => 500,
            ChessboardError::ApiError(_) => 502,
            _ => 400,
        }
    }

    pub fn options(&self) -> u8 {
        match self {
            ChessboardError::General { options, .. } => *options,
            ChessboardError::ApiError(_) => CAN_RETRY,
            _ => 0,
        }
    }

    pub fn resumable(&self) -> bool {
        self.options() & CAN_RESUME != 0
    }

    pub fn retriable(&self) -> bool {
        self.options() & CAN_RETRY != 0
    }

    pub fn resetable(&self) -> bool {
        self.options() & CAN_RESET != 0
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ChessboardError::MultiValidation(_)
            | ChessboardError::Topology(_)
            | ChessboardError::Template(_)
            | ChessboardError::Syntax(_)
            | ChessboardError::YamlError(_) => ErrorCategory::Blueprint,
            ChessboardError::Validation(_)
            | ChessboardError::InvalidParameter(_)
            | ChessboardError::InvalidRepoUrl(_)
            | ChessboardError::NoData(_) => ErrorCategory::Input,
            ChessboardError::DoesNotExist(_)
            | ChessboardError::NoMapping(_)
            | ChessboardError::ServerBuildFailed(_)
            | ChessboardError::CalledProcess { .. } => ErrorCategory::Provider,
            ChessboardError::ConfigError { .. }
            | ChessboardError::TomlError(_)
            | ChessboardError::MissingConfigError { .. }
            | ChessboardError::InvalidConfigValueError { .. } => ErrorCategory::Configuration,
            ChessboardError::ApiError(_) | ChessboardError::NoToken(_) => ErrorCategory::Network,
            _ => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            ChessboardError::NothingToDo(_) => ErrorSeverity::Low,
            ChessboardError::ApiError(_) | ChessboardError::NoToken(_) => ErrorSeverity::Medium,
            ChessboardError::IoError(_)
            | ChessboardError::DatabaseConnection(_)
            | ChessboardError::DataIntegrity(_) => ErrorSeverity::Critical,
            _ => ErrorSeverity::High,
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Blueprint => "Check the Checkmatefile against `chessboard docs`",
            ErrorCategory::Input => "Review the inputs supplied for the blueprint options",
            ErrorCategory::Provider => {
                "Check the environment providers and the components they offer"
            }
            ErrorCategory::Configuration => "Check chessboard.toml and the command-line flags",
            ErrorCategory::Network => "Check network connectivity and retry",
            ErrorCategory::System => "Check file permissions and available disk space",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            ChessboardError::MultiValidation(errors) => {
                format!("{}\n{}", BLUEPRINT_ERROR, errors)
            }
            ChessboardError::General { .. } => self.friendly_message(),
            _ => self.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ChessboardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_message() {
        let err = ChessboardError::General {
            message: None,
            friendly_message: None,
            options: 0,
            http_status: None,
        };
        assert_eq!(err.to_string(), "Chessboard Error.");
        assert_eq!(err.friendly_message(), UNEXPECTED_ERROR);
        assert_eq!(err.http_status(), 400);
    }

    #[test]
    fn test_friendly_message_not_used_for_display() {
        let err = ChessboardError::with_friendly("Technical Message", "Friendly Message");
        assert_eq!(err.to_string(), "Technical Message");
        assert_eq!(err.friendly_message(), "Friendly Message");
    }

    #[test]
    fn test_option_flags() {
        let err = ChessboardError::General {
            message: Some("boom".to_string()),
            friendly_message: None,
            options: CAN_RETRY | CAN_RESET,
            http_status: Some(503),
        };
        assert!(!err.resumable());
        assert!(err.retriable());
        assert!(err.resetable());
        assert_eq!(err.http_status(), 503);
    }

    #[test]
    fn test_called_process_message() {
        let err = ChessboardError::CalledProcess {
            returncode: 2,
            cmd: "docker-compose up -d".to_string(),
            output: None,
        };
        assert_eq!(
            err.to_string(),
            "Call `docker-compose up -d` failed with return code 2: (No output)"
        );
        assert_eq!(err.category(), ErrorCategory::Provider);
    }

    #[test]
    fn test_status_by_kind() {
        assert_eq!(ChessboardError::DoesNotExist("x".into()).http_status(), 404);
        assert_eq!(ChessboardError::BadState("x".into()).http_status(), 409);
        assert_eq!(ChessboardError::template("bad").http_status(), 406);
        assert_eq!(
            ChessboardError::template("bad").friendly_message(),
            "Your template had an error in it"
        );
        assert_eq!(ChessboardError::NoData(String::new()).friendly_message(), "No data found");
        assert_eq!(ChessboardError::Validation("nope".into()).friendly_message(), "nope");
    }
}
