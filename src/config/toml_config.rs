use crate::core::reconciler::{ReconcileOptions, DEFAULT_CANDIDATE_LIMIT};
use crate::domain::model::DatasetQuery;
use crate::utils::error::{EtlError, Result};
use crate::utils::validation::{
    is_unresolved_placeholder, validate_file_extension, validate_non_empty_string,
    validate_path, validate_positive_number, validate_required_field, validate_url, Validate,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    pub sheets: Option<SheetsConfig>,
    #[serde(default)]
    pub matcher: MatcherConfig,
    pub kintone: Option<KintoneConfig>,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    pub workbook: Option<WorkbookConfig>,
    pub monitoring: Option<MonitoringConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SheetsConfig {
    /// 試算表網址 (`/spreadsheets/d/{id}/...`)
    pub url: String,
    /// 有值時優先於服務帳戶金鑰
    pub access_token: Option<String>,
    /// 服務帳戶金鑰 JSON 的路徑
    pub credentials_path: Option<String>,
    pub api_base: Option<String>,
}

/// 試算表請求要使用的憑證
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetsCredentials<'a> {
    AccessToken(&'a str),
    ServiceAccountKey(&'a str),
}

fn resolved(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty() && !is_unresolved_placeholder(v))
}

impl SheetsConfig {
    pub fn credentials(&self) -> Result<SheetsCredentials<'_>> {
        if let Some(token) = resolved(&self.access_token) {
            return Ok(SheetsCredentials::AccessToken(token));
        }
        if let Some(path) = resolved(&self.credentials_path) {
            validate_path("sheets.credentials_path", path)?;
            return Ok(SheetsCredentials::ServiceAccountKey(path));
        }

        // 兩者皆不可用：優先回報未展開的環境變數
        for (field, value) in [
            ("sheets.access_token", &self.access_token),
            ("sheets.credentials_path", &self.credentials_path),
        ] {
            if let Some(value) = value.as_deref().filter(|v| is_unresolved_placeholder(v)) {
                return Err(EtlError::InvalidConfigValueError {
                    field: field.to_string(),
                    value: value.to_string(),
                    reason: "environment variable is not set".to_string(),
                });
            }
        }
        Err(EtlError::MissingConfigError {
            field: "sheets.access_token or sheets.credentials_path".to_string(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatcherConfig {
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    pub api_base: Option<String>,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
            api_base: None,
        }
    }
}

fn default_model() -> String {
    crate::adapters::gemini::DEFAULT_MODEL.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KintoneConfig {
    pub base_url: String,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    pub primary: DatasetConfig,
    pub secondary: DatasetConfig,
}

fn default_page_size() -> usize {
    crate::adapters::kintone::DEFAULT_PAGE_SIZE
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub app_id: u64,
    pub api_token: String,
    #[serde(default)]
    pub query: String,
}

impl DatasetConfig {
    pub fn to_query(&self) -> DatasetQuery {
        DatasetQuery {
            app_id: self.app_id,
            api_token: self.api_token.clone(),
            base_query: self.query.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    #[serde(default = "default_primary_name_field")]
    pub primary_name_field: String,
    #[serde(default = "default_secondary_name_field")]
    pub secondary_name_field: String,
    /// 名稱完全比對失敗時改用語意比對
    #[serde(default)]
    pub fuzzy_fallback: bool,
    #[serde(default = "default_candidate_limit")]
    pub candidate_limit: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            primary_name_field: default_primary_name_field(),
            secondary_name_field: default_secondary_name_field(),
            fuzzy_fallback: false,
            candidate_limit: default_candidate_limit(),
        }
    }
}

fn default_primary_name_field() -> String {
    "name".to_string()
}

fn default_secondary_name_field() -> String {
    "保育園".to_string()
}

fn default_candidate_limit() -> usize {
    DEFAULT_CANDIDATE_LIMIT
}

impl ReconcileConfig {
    pub fn options(&self) -> ReconcileOptions {
        ReconcileOptions {
            primary_name_field: self.primary_name_field.clone(),
            secondary_name_field: self.secondary_name_field.clone(),
            candidate_limit: self.candidate_limit,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkbookConfig {
    pub template_path: String,
    pub output_dir: String,
    /// 未指定時使用執行當天
    pub reference_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

impl TomlConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(EtlError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| EtlError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${GEMINI_API_KEY})；未設定的變數保留原字串
    fn substitute_env_vars(content: &str) -> Result<String> {
        use regex::Regex;
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| EtlError::ConfigError {
            message: format!("invalid substitution pattern: {}", e),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    /// 有可用金鑰時才啟用語意比對
    pub fn matcher_api_key(&self) -> Option<&str> {
        self.matcher
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty() && !is_unresolved_placeholder(key))
    }

    pub fn require_sheets(&self) -> Result<&SheetsConfig> {
        validate_required_field("sheets", &self.sheets)
    }

    pub fn require_kintone(&self) -> Result<&KintoneConfig> {
        validate_required_field("kintone", &self.kintone)
    }

    pub fn require_workbook(&self) -> Result<&WorkbookConfig> {
        validate_required_field("workbook", &self.workbook)
    }

    pub fn monitoring_enabled(&self) -> bool {
        self.monitoring.as_ref().map(|m| m.enabled).unwrap_or(false)
    }

    fn validate_secret(field: &str, value: &str) -> Result<()> {
        validate_non_empty_string(field, value)?;
        if is_unresolved_placeholder(value) {
            return Err(EtlError::InvalidConfigValueError {
                field: field.to_string(),
                value: value.to_string(),
                reason: "environment variable is not set".to_string(),
            });
        }
        Ok(())
    }

    /// 驗證配置的合理性
    pub fn validate_config(&self) -> Result<()> {
        if let Some(sheets) = &self.sheets {
            validate_url("sheets.url", &sheets.url)?;
            sheets.credentials()?;
            if let Some(api_base) = &sheets.api_base {
                validate_url("sheets.api_base", api_base)?;
            }
        }

        validate_non_empty_string("matcher.model", &self.matcher.model)?;
        if let Some(api_base) = &self.matcher.api_base {
            validate_url("matcher.api_base", api_base)?;
        }

        if let Some(kintone) = &self.kintone {
            validate_url("kintone.base_url", &kintone.base_url)?;
            validate_positive_number("kintone.page_size", kintone.page_size, 1)?;
            if kintone.page_size > 500 {
                return Err(EtlError::InvalidConfigValueError {
                    field: "kintone.page_size".to_string(),
                    value: kintone.page_size.to_string(),
                    reason: "the record API returns at most 500 records per request".to_string(),
                });
            }
            for (name, dataset) in [("primary", &kintone.primary), ("secondary", &kintone.secondary)] {
                validate_positive_number(
                    &format!("kintone.{}.app_id", name),
                    dataset.app_id as usize,
                    1,
                )?;
                Self::validate_secret(&format!("kintone.{}.api_token", name), &dataset.api_token)?;
            }
        }

        validate_non_empty_string("reconcile.primary_name_field", &self.reconcile.primary_name_field)?;
        validate_non_empty_string(
            "reconcile.secondary_name_field",
            &self.reconcile.secondary_name_field,
        )?;
        validate_positive_number("reconcile.candidate_limit", self.reconcile.candidate_limit, 1)?;

        if let Some(workbook) = &self.workbook {
            validate_path("workbook.template_path", &workbook.template_path)?;
            validate_file_extension("workbook.template_path", &workbook.template_path, &["xlsx"])?;
            validate_path("workbook.output_dir", &workbook.output_dir)?;
        }

        Ok(())
    }
}

impl Validate for TomlConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const FULL_CONFIG: &str = r#"
[sheets]
url = "https://docs.google.com/spreadsheets/d/abc123/edit#gid=0"
access_token = "ya29.token"

[matcher]
api_key = "gm-key"

[kintone]
base_url = "https://example.cybozu.com"

[kintone.primary]
app_id = 218
api_token = "primary-token"
query = 'status in ("開園", "開園予定")'

[kintone.secondary]
app_id = 32
api_token = "secondary-token"

[workbook]
template_path = "templates/運営実績.xlsx"
output_dir = "./output"
reference_date = "2026-10-01"

[logging]
format = "json"
"#;

    #[test]
    fn test_parse_full_config_with_defaults() {
        let config = TomlConfig::from_toml_str(FULL_CONFIG).unwrap();

        let kintone = config.require_kintone().unwrap();
        assert_eq!(kintone.page_size, 500);
        assert_eq!(kintone.primary.to_query().base_query, "status in (\"開園\", \"開園予定\")");
        assert_eq!(kintone.secondary.query, "");
        assert_eq!(config.matcher.model, "gemini-2.5-flash");
        assert_eq!(config.reconcile.secondary_name_field, "保育園");
        assert!(!config.reconcile.fuzzy_fallback);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(
            config.require_workbook().unwrap().reference_date,
            NaiveDate::from_ymd_opt(2026, 10, 1)
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("REPORT_SYNC_TEST_TOKEN", "from-env");

        let config = TomlConfig::from_toml_str(
            r#"
[sheets]
url = "https://docs.google.com/spreadsheets/d/abc/edit"
access_token = "${REPORT_SYNC_TEST_TOKEN}"
"#,
        )
        .unwrap();
        assert_eq!(
            config.require_sheets().unwrap().credentials().unwrap(),
            SheetsCredentials::AccessToken("from-env")
        );

        std::env::remove_var("REPORT_SYNC_TEST_TOKEN");
    }

    #[test]
    fn test_unset_variables_are_reported() {
        let config = TomlConfig::from_toml_str(
            r#"
[sheets]
url = "https://docs.google.com/spreadsheets/d/abc/edit"
access_token = "${REPORT_SYNC_SURELY_UNSET}"

[matcher]
api_key = "${REPORT_SYNC_SURELY_UNSET_KEY}"
"#,
        )
        .unwrap();

        assert_eq!(config.matcher_api_key(), None);
        assert!(matches!(
            config.validate(),
            Err(EtlError::InvalidConfigValueError { .. })
        ));
    }

    #[test]
    fn test_sheets_credentials_precedence() {
        let mut sheets = SheetsConfig {
            url: "https://docs.google.com/spreadsheets/d/abc/edit".to_string(),
            access_token: Some("${REPORT_SYNC_SURELY_UNSET_TOKEN}".to_string()),
            credentials_path: Some("keys/service-account.json".to_string()),
            api_base: None,
        };
        // 未展開的 token 不擋住金鑰檔
        assert_eq!(
            sheets.credentials().unwrap(),
            SheetsCredentials::ServiceAccountKey("keys/service-account.json")
        );

        sheets.access_token = Some("ya29.override".to_string());
        assert_eq!(
            sheets.credentials().unwrap(),
            SheetsCredentials::AccessToken("ya29.override")
        );

        sheets.access_token = None;
        sheets.credentials_path = None;
        assert!(matches!(
            sheets.credentials(),
            Err(EtlError::MissingConfigError { .. })
        ));
    }

    #[test]
    fn test_matcher_key_selection() {
        let mut config = TomlConfig::default();
        assert_eq!(config.matcher_api_key(), None);

        config.matcher.api_key = Some("  ".to_string());
        assert_eq!(config.matcher_api_key(), None);

        config.matcher.api_key = Some("key".to_string());
        assert_eq!(config.matcher_api_key(), Some("key"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = TomlConfig::from_toml_str(FULL_CONFIG).unwrap();
        if let Some(kintone) = config.kintone.as_mut() {
            kintone.page_size = 1000;
        }
        assert!(config.validate().is_err());

        let mut config = TomlConfig::from_toml_str(FULL_CONFIG).unwrap();
        if let Some(workbook) = config.workbook.as_mut() {
            workbook.template_path = "template.csv".to_string();
        }
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_section_is_reported_by_name() {
        let config = TomlConfig::default();
        match config.require_kintone() {
            Err(EtlError::MissingConfigError { field }) => assert_eq!(field, "kintone"),
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(FULL_CONFIG.as_bytes()).unwrap();

        let config = TomlConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.require_kintone().unwrap().primary.app_id, 218);
    }

    #[test]
    fn test_example_config_parses() {
        let config =
            TomlConfig::from_toml_str(include_str!("../../report-sync.example.toml")).unwrap();

        assert_eq!(config.require_kintone().unwrap().secondary.app_id, 32);
        assert_eq!(config.logging.format, LogFormat::Compact);
        assert!(!config.monitoring_enabled());
        // 範例中的金鑰是佔位字串
        if std::env::var("GEMINI_API_KEY").is_err() {
            assert!(config.matcher_api_key().is_none());
        }
    }
}
