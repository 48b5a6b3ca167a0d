use crate::adapters::google_auth::SheetsAuth;
use crate::domain::ports::SheetStore;
use crate::utils::error::{EtlError, Result};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::OnceCell;
use url::Url;

pub const DEFAULT_API_BASE: &str = "https://sheets.googleapis.com";

#[derive(Debug, Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Debug, Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
struct SheetProperties {
    title: String,
    #[serde(default)]
    index: usize,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

/// `https://docs.google.com/spreadsheets/d/{id}/edit#gid=0` → `{id}`
pub fn spreadsheet_id_from_url(sheet_url: &str) -> Result<String> {
    let invalid = |reason: &str| EtlError::InvalidConfigValueError {
        field: "sheets.url".to_string(),
        value: sheet_url.to_string(),
        reason: reason.to_string(),
    };

    let parsed = Url::parse(sheet_url).map_err(|e| invalid(&e.to_string()))?;
    let segments: Vec<&str> = parsed
        .path_segments()
        .map(|s| s.collect())
        .unwrap_or_default();

    segments
        .windows(3)
        .find(|w| w[0] == "spreadsheets" && w[1] == "d" && !w[2].is_empty())
        .map(|w| w[2].to_string())
        .ok_or_else(|| invalid("expected a /spreadsheets/d/{id} URL"))
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// 試算表第一個工作表的 values API 存取
pub struct GoogleSheetsStore {
    client: Client,
    api_base: String,
    spreadsheet_id: String,
    auth: SheetsAuth,
    sheet_title: OnceCell<String>,
}

impl GoogleSheetsStore {
    /// `auth` 可為 access token 字串或 [`ServiceAccountAuth`](crate::adapters::google_auth::ServiceAccountAuth)
    pub fn from_url(sheet_url: &str, auth: impl Into<SheetsAuth>) -> Result<Self> {
        Self::with_api_base(sheet_url, auth, DEFAULT_API_BASE)
    }

    pub fn with_api_base(
        sheet_url: &str,
        auth: impl Into<SheetsAuth>,
        api_base: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            client: Client::new(),
            api_base: api_base.into(),
            spreadsheet_id: spreadsheet_id_from_url(sheet_url)?,
            auth: auth.into(),
            sheet_title: OnceCell::new(),
        })
    }

    pub fn spreadsheet_id(&self) -> &str {
        &self.spreadsheet_id
    }

    fn endpoint(&self, tail: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.api_base).map_err(|e| EtlError::ConfigError {
            message: format!("invalid spreadsheet API base '{}': {}", self.api_base, e),
        })?;
        url.path_segments_mut()
            .map_err(|_| EtlError::ConfigError {
                message: format!("spreadsheet API base '{}' cannot hold a path", self.api_base),
            })?
            .pop_if_empty()
            .extend(["v4", "spreadsheets", self.spreadsheet_id.as_str()])
            .extend(tail);
        Ok(url)
    }

    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(EtlError::FetchError {
            status: status.as_u16(),
            body,
        })
    }

    /// 第一個工作表 (index 0) 的名稱，只查詢一次
    pub async fn sheet_title(&self) -> Result<&str> {
        let title = self
            .sheet_title
            .get_or_try_init(|| async {
                let mut url = self.endpoint(&[])?;
                url.query_pairs_mut().append_pair("fields", "sheets.properties");

                let response = self
                    .client
                    .get(url)
                    .bearer_auth(self.auth.bearer_token().await?)
                    .send()
                    .await?;
                let meta: SpreadsheetMeta = Self::check(response).await?.json().await?;

                meta.sheets
                    .into_iter()
                    .map(|s| s.properties)
                    .min_by_key(|p| p.index)
                    .map(|p| p.title)
                    .ok_or_else(|| EtlError::WriteError {
                        message: "spreadsheet has no worksheets".to_string(),
                    })
            })
            .await?;
        Ok(title.as_str())
    }

    async fn qualified(&self, range: &str) -> Result<String> {
        let title = self.sheet_title().await?;
        Ok(format!("'{}'!{}", title.replace('\'', "''"), range))
    }
}

#[async_trait]
impl SheetStore for GoogleSheetsStore {
    async fn read_values(&self) -> Result<Vec<Vec<String>>> {
        let title = self.sheet_title().await?;
        let range = format!("'{}'", title.replace('\'', "''"));
        let url = self.endpoint(&["values", range.as_str()])?;
        tracing::debug!("GET values of sheet '{}'", title);

        let response = self
            .client
            .get(url)
            .bearer_auth(self.auth.bearer_token().await?)
            .send()
            .await?;
        let body: ValueRange = Self::check(response).await?.json().await?;

        Ok(body
            .values
            .iter()
            .map(|row| row.iter().map(cell_text).collect())
            .collect())
    }

    async fn clear_range(&self, range: &str) -> Result<()> {
        let qualified = self.qualified(range).await?;
        let url = self.endpoint(&["values:batchClear"])?;
        tracing::debug!("POST batchClear {}", qualified);

        let response = self
            .client
            .post(url)
            .bearer_auth(self.auth.bearer_token().await?)
            .json(&json!({ "ranges": [qualified] }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn write_rows(&self, start_cell: &str, rows: &[Vec<String>]) -> Result<()> {
        let qualified = self.qualified(start_cell).await?;
        let mut url = self.endpoint(&["values", qualified.as_str()])?;
        url.query_pairs_mut().append_pair("valueInputOption", "RAW");
        tracing::debug!("PUT {} rows at {}", rows.len(), qualified);

        let response = self
            .client
            .put(url)
            .bearer_auth(self.auth.bearer_token().await?)
            .json(&json!({
                "range": qualified,
                "majorDimension": "ROWS",
                "values": rows,
            }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    const SHEET_URL: &str = "https://docs.google.com/spreadsheets/d/abc123/edit#gid=0";

    fn mock_metadata(server: &MockServer) -> httpmock::Mock<'_> {
        server.mock(|when, then| {
            when.method(GET)
                .path("/v4/spreadsheets/abc123")
                .query_param("fields", "sheets.properties")
                .header("Authorization", "Bearer tok");
            then.status(200).json_body(json!({
                "sheets": [
                    {"properties": {"title": "Archive", "index": 1}},
                    {"properties": {"title": "Sheet1", "index": 0}}
                ]
            }));
        })
    }

    #[test]
    fn test_spreadsheet_id_from_url() {
        assert_eq!(spreadsheet_id_from_url(SHEET_URL).unwrap(), "abc123");
        assert!(spreadsheet_id_from_url("https://docs.google.com/document/d/x").is_err());
        assert!(spreadsheet_id_from_url("not a url").is_err());
    }

    #[tokio::test]
    async fn test_read_values_uses_first_sheet() {
        let server = MockServer::start();
        let meta = mock_metadata(&server);
        let values = server.mock(|when, then| {
            when.method(GET).path("/v4/spreadsheets/abc123/values/'Sheet1'");
            then.status(200).json_body(json!({
                "range": "Sheet1!A1:C2",
                "values": [["保育施設名", "定員"], ["さくら園", 12]]
            }));
        });

        let store = GoogleSheetsStore::with_api_base(SHEET_URL, "tok", server.base_url()).unwrap();
        let grid = store.read_values().await.unwrap();
        // 工作表名稱只查詢一次
        store.read_values().await.unwrap();

        meta.assert_hits(1);
        values.assert_hits(2);
        assert_eq!(grid[0], vec!["保育施設名", "定員"]);
        assert_eq!(grid[1], vec!["さくら園", "12"]);
    }

    #[tokio::test]
    async fn test_clear_then_write_requests() {
        let server = MockServer::start();
        mock_metadata(&server);
        let clear = server.mock(|when, then| {
            when.method(POST)
                .path("/v4/spreadsheets/abc123/values:batchClear")
                .json_body(json!({"ranges": ["'Sheet1'!A2:ZZ10000"]}));
            then.status(200).json_body(json!({"spreadsheetId": "abc123"}));
        });
        let write = server.mock(|when, then| {
            when.method(PUT)
                .path("/v4/spreadsheets/abc123/values/'Sheet1'!A2")
                .query_param("valueInputOption", "RAW")
                .body_contains("\"values\":[[\"さくら園\",\"10\"]]");
            then.status(200).json_body(json!({"updatedRows": 1}));
        });

        let store = GoogleSheetsStore::with_api_base(SHEET_URL, "tok", server.base_url()).unwrap();
        store.clear_range("A2:ZZ10000").await.unwrap();
        store
            .write_rows("A2", &[vec!["さくら園".to_string(), "10".to_string()]])
            .await
            .unwrap();

        clear.assert();
        write.assert();
    }

    #[tokio::test]
    async fn test_service_account_token_is_sent() {
        use crate::adapters::google_auth::tests::key_json;
        use crate::adapters::google_auth::{ServiceAccountAuth, ServiceAccountKey};

        let server = MockServer::start();
        let token = server.mock(|when, then| {
            when.method(POST).path("/token").body_contains("assertion=");
            then.status(200)
                .json_body(json!({"access_token": "tok", "expires_in": 3600}));
        });
        let meta = mock_metadata(&server);
        let values = server.mock(|when, then| {
            when.method(GET)
                .path("/v4/spreadsheets/abc123/values/'Sheet1'")
                .header("Authorization", "Bearer tok");
            then.status(200).json_body(json!({"values": [["保育施設名"]]}));
        });

        let key = ServiceAccountKey::from_json(&key_json(&server.url("/token"))).unwrap();
        let auth = ServiceAccountAuth::new(key).unwrap();
        let store = GoogleSheetsStore::with_api_base(SHEET_URL, auth, server.base_url()).unwrap();

        let grid = store.read_values().await.unwrap();

        assert_eq!(grid, vec![vec!["保育施設名".to_string()]]);
        token.assert_hits(1);
        meta.assert();
        values.assert();
    }

    #[tokio::test]
    async fn test_api_error_carries_status() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/v4/spreadsheets/abc123");
            then.status(403).body("PERMISSION_DENIED");
        });

        let store = GoogleSheetsStore::with_api_base(SHEET_URL, "tok", server.base_url()).unwrap();
        let err = store.read_values().await.unwrap_err();
        assert!(matches!(err, EtlError::FetchError { status: 403, .. }));
    }
}
