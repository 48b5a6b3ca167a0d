use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("API request failed: {0}")]
    ApiError(#[from] reqwest::Error),

    #[error("API responded with status {status}: {body}")]
    FetchError { status: u16, body: String },

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("PDF parsing error: {0}")]
    PdfError(#[from] lopdf::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Table extraction error: {message}")]
    ExtractionError { message: String },

    #[error("Header matching failed: {message}")]
    MatchingError { message: String },

    #[error("Sheet write failed: {message}")]
    WriteError { message: String },

    #[error("Workbook error: {message}")]
    WorkbookError { message: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid value '{value}' for {field}: {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Configuration validation failed at {field}: {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Data processing error: {message}")]
    ProcessingError { message: String },

    #[error("Validation error: {message}")]
    ValidationError { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Extraction,
    Matching,
    Fetch,
    Write,
    Workbook,
    Configuration,
    Io,
    Processing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl EtlError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            EtlError::PdfError(_) | EtlError::CsvError(_) | EtlError::ExtractionError { .. } => {
                ErrorCategory::Extraction
            }
            EtlError::MatchingError { .. } => ErrorCategory::Matching,
            EtlError::ApiError(_) | EtlError::FetchError { .. } => ErrorCategory::Fetch,
            EtlError::WriteError { .. } => ErrorCategory::Write,
            EtlError::WorkbookError { .. } => ErrorCategory::Workbook,
            EtlError::ConfigError { .. }
            | EtlError::MissingConfigError { .. }
            | EtlError::InvalidConfigValueError { .. }
            | EtlError::ConfigValidationError { .. } => ErrorCategory::Configuration,
            EtlError::IoError(_) => ErrorCategory::Io,
            EtlError::SerializationError(_)
            | EtlError::ProcessingError { .. }
            | EtlError::ValidationError { .. } => ErrorCategory::Processing,
        }
    }

    /// 嚴重程度決定 CLI 的結束碼
    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            // 比對失敗會降級成空映射，不中斷執行
            ErrorCategory::Matching => ErrorSeverity::Low,
            ErrorCategory::Extraction | ErrorCategory::Fetch => ErrorSeverity::Medium,
            ErrorCategory::Processing | ErrorCategory::Workbook => ErrorSeverity::High,
            // 清除後寫入失敗會留下空白的資料區
            ErrorCategory::Write | ErrorCategory::Configuration | ErrorCategory::Io => {
                ErrorSeverity::Critical
            }
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            EtlError::FetchError { status: 401 | 403, .. } => {
                "Check that the API token is valid and has read permission on the app"
            }
            EtlError::FetchError { .. } | EtlError::ApiError(_) => {
                "Check network connectivity and the API endpoint, then rerun"
            }
            EtlError::WriteError { .. } => {
                "The target sheet may have been cleared; rerun the sync to repopulate it"
            }
            EtlError::MatchingError { .. } => {
                "Check the semantic-match API key, or remove it to fall back to exact matching"
            }
            EtlError::PdfError(_) | EtlError::ExtractionError { .. } => {
                "Make sure the input is the expected facility-list PDF with a two-row header"
            }
            EtlError::CsvError(_) => "Check the exported table CSV files are well formed",
            EtlError::WorkbookError { .. } => {
                "Make sure the template workbook exists and contains the expected sheets"
            }
            EtlError::ConfigError { .. }
            | EtlError::MissingConfigError { .. }
            | EtlError::InvalidConfigValueError { .. }
            | EtlError::ConfigValidationError { .. } => {
                "Review the configuration file and required environment variables"
            }
            EtlError::IoError(_) => "Check file paths and permissions",
            EtlError::SerializationError(_)
            | EtlError::ProcessingError { .. }
            | EtlError::ValidationError { .. } => "Inspect the input data with --verbose",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self.category() {
            ErrorCategory::Extraction => format!("Could not read tables from the input: {}", self),
            ErrorCategory::Matching => format!("Header matching was unavailable: {}", self),
            ErrorCategory::Fetch => format!("Fetching records failed: {}", self),
            ErrorCategory::Write => format!("Writing to the spreadsheet failed: {}", self),
            ErrorCategory::Workbook => format!("Updating the workbook failed: {}", self),
            ErrorCategory::Configuration => format!("Configuration problem: {}", self),
            ErrorCategory::Io => format!("File access failed: {}", self),
            ErrorCategory::Processing => format!("Processing failed: {}", self),
        }
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;
