use httpmock::prelude::*;
use report_sync::adapters::{CsvTableSource, GeminiClient, GoogleSheetsStore, ServiceAccountAuth};
use report_sync::core::header_matcher::{AssistedHeaderMatcher, ExactHeaderMatcher};
use report_sync::{EtlEngine, PdfSheetPipeline};
use serde_json::json;
use tempfile::TempDir;

const SHEET_URL: &str = "https://docs.google.com/spreadsheets/d/sheet-xyz/edit#gid=0";

fn write_tables(dir: &TempDir) {
    std::fs::write(
        dir.path().join("page-1-table-1.csv"),
        "施設名称,保育施設定員,\n,乳児,幼児\nさくら園,10,20\n施設名称,保育施設定員,\n",
    )
    .unwrap();
    // 第 2 頁沒有表頭，資料直接接續
    std::fs::write(
        dir.path().join("page-2-table-1.csv"),
        "施設名称,保育施設定員_乳児,保育施設定員_幼児\nひまわり園,3,6\n,,\n",
    )
    .unwrap();
}

fn mock_sheet(server: &MockServer, headers: serde_json::Value) {
    server.mock(|when, then| {
        when.method(GET).path("/v4/spreadsheets/sheet-xyz");
        then.status(200)
            .json_body(json!({"sheets": [{"properties": {"title": "一覧", "index": 0}}]}));
    });
    server.mock(|when, then| {
        when.method(GET).path_contains("/values/");
        then.status(200).json_body(json!({"values": [headers, ["古い", "1", "2"]]}));
    });
}

#[tokio::test]
async fn test_exact_headers_replace_sheet_data() -> anyhow::Result<()> {
    let tables = TempDir::new()?;
    write_tables(&tables);

    let server = MockServer::start();
    mock_sheet(&server, json!(["施設名称", "保育施設定員_乳児", "保育施設定員_幼児"]));
    let clear = server.mock(|when, then| {
        when.method(POST)
            .path("/v4/spreadsheets/sheet-xyz/values:batchClear")
            .body_contains("A2:ZZ10000");
        then.status(200).json_body(json!({}));
    });
    let write = server.mock(|when, then| {
        when.method(PUT)
            .path_contains("/v4/spreadsheets/sheet-xyz/values/")
            .query_param("valueInputOption", "RAW")
            .body_contains(r#""values":[["さくら園","10","20"],["ひまわり園","3","6"]]"#);
        then.status(200).json_body(json!({"updatedRows": 2}));
    });

    let store = GoogleSheetsStore::with_api_base(SHEET_URL, "token", server.base_url())?;
    let pipeline = PdfSheetPipeline::new(CsvTableSource::new(tables.path()), store, ExactHeaderMatcher);
    let report = EtlEngine::new_with_monitoring(pipeline, false).run().await?;

    clear.assert();
    write.assert();
    assert_eq!(report.records_written, 2);
    assert!(report.warnings.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_assisted_headers_map_renamed_columns() -> anyhow::Result<()> {
    let tables = TempDir::new()?;
    write_tables(&tables);

    let server = MockServer::start();
    mock_sheet(&server, json!(["保育施設名", "乳児（定員）", "幼児（定員）"]));
    let mapping = json!({
        "施設名称": "保育施設名",
        "保育施設定員_乳児": "乳児（定員）",
        "保育施設定員_幼児": null
    });
    let gemini = server.mock(|when, then| {
        when.method(POST).path("/v1beta/models/gemini-2.5-flash:generateContent");
        then.status(200).json_body(json!({
            "candidates": [{"content": {"parts": [{"text": mapping.to_string()}]}}]
        }));
    });
    server.mock(|when, then| {
        when.method(POST).path("/v4/spreadsheets/sheet-xyz/values:batchClear");
        then.status(200).json_body(json!({}));
    });
    let write = server.mock(|when, then| {
        when.method(PUT)
            .path_contains("/values/")
            .body_contains(r#"["さくら園","10",""]"#);
        then.status(200).json_body(json!({}));
    });

    let matcher = AssistedHeaderMatcher::new(GeminiClient::with_endpoint(
        "key",
        "gemini-2.5-flash",
        server.base_url(),
    ));
    let store = GoogleSheetsStore::with_api_base(SHEET_URL, "token", server.base_url())?;
    let pipeline = PdfSheetPipeline::new(CsvTableSource::new(tables.path()), store, matcher);
    let report = EtlEngine::new(pipeline).run().await?;

    gemini.assert();
    write.assert();
    assert_eq!(report.records_written, 2);
    Ok(())
}

#[tokio::test]
async fn test_write_failure_after_clear_is_fatal() -> anyhow::Result<()> {
    let tables = TempDir::new()?;
    write_tables(&tables);

    let server = MockServer::start();
    mock_sheet(&server, json!(["施設名称"]));
    server.mock(|when, then| {
        when.method(POST).path("/v4/spreadsheets/sheet-xyz/values:batchClear");
        then.status(200).json_body(json!({}));
    });
    server.mock(|when, then| {
        when.method(PUT);
        then.status(500).body("backend error");
    });

    let store = GoogleSheetsStore::with_api_base(SHEET_URL, "token", server.base_url())?;
    let pipeline = PdfSheetPipeline::new(CsvTableSource::new(tables.path()), store, ExactHeaderMatcher);
    let err = EtlEngine::new(pipeline).run().await.unwrap_err();

    assert!(err.to_string().contains("already cleared"));
    Ok(())
}

#[tokio::test]
async fn test_service_account_key_file_authorizes_writes() -> anyhow::Result<()> {
    let tables = TempDir::new()?;
    write_tables(&tables);

    let server = MockServer::start();
    let token = server.mock(|when, then| {
        when.method(POST)
            .path("/oauth2/token")
            .body_contains("grant-type%3Ajwt-bearer");
        then.status(200)
            .json_body(json!({"access_token": "ya29.sa", "expires_in": 3600}));
    });
    mock_sheet(&server, json!(["施設名称", "保育施設定員_乳児", "保育施設定員_幼児"]));
    let clear = server.mock(|when, then| {
        when.method(POST)
            .path("/v4/spreadsheets/sheet-xyz/values:batchClear")
            .header("Authorization", "Bearer ya29.sa");
        then.status(200).json_body(json!({}));
    });
    let write = server.mock(|when, then| {
        when.method(PUT)
            .path_contains("/v4/spreadsheets/sheet-xyz/values/")
            .header("Authorization", "Bearer ya29.sa");
        then.status(200).json_body(json!({"updatedRows": 2}));
    });

    let key_path = tables.path().join("service-account.json");
    std::fs::write(
        &key_path,
        json!({
            "type": "service_account",
            "client_email": "sync@example.iam.gserviceaccount.com",
            "private_key": include_str!("fixtures/service_account_test_key.pem"),
            "token_uri": server.url("/oauth2/token")
        })
        .to_string(),
    )?;

    let auth = ServiceAccountAuth::from_file(&key_path)?;
    let store = GoogleSheetsStore::with_api_base(SHEET_URL, auth, server.base_url())?;
    let pipeline = PdfSheetPipeline::new(CsvTableSource::new(tables.path()), store, ExactHeaderMatcher);
    let report = EtlEngine::new_with_monitoring(pipeline, false).run().await?;

    // 同一次執行只換一次權杖
    token.assert_hits(1);
    clear.assert();
    write.assert();
    assert_eq!(report.records_written, 2);
    Ok(())
}
