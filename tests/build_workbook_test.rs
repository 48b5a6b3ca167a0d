use chrono::NaiveDate;
use httpmock::prelude::*;
use report_sync::adapters::{KintoneClient, LocalStorage, UmyaBook};
use report_sync::core::reconciler::{ExactOnly, ReconcileOptions, RecordReconciler};
use report_sync::core::template::{TemplateLayout, TemplateProjector};
use report_sync::domain::model::DatasetQuery;
use report_sync::domain::ports::TemplateBook;
use report_sync::{EtlEngine, WorkbookPipeline, WorkbookTarget};
use serde_json::{json, Value};
use tempfile::TempDir;

fn nursery(id: u64, name: &str, area: &str, city: &str) -> Value {
    json!({
        "$id": {"type": "__ID__", "value": id.to_string()},
        "name": {"type": "SINGLE_LINE_TEXT", "value": name},
        "client_name": {"type": "SINGLE_LINE_TEXT", "value": "株式会社テスト"},
        "capacity": {"type": "NUMBER", "value": "19"},
        "open_date": {"type": "DATE", "value": "2024-04-01"},
        "addr_area": {"type": "DROP_DOWN", "value": area},
        "addr_city": {"type": "SINGLE_LINE_TEXT", "value": city},
        "status": {"type": "DROP_DOWN", "value": "開園"}
    })
}

fn bed(id: u64, name: &str, beds: u32) -> Value {
    json!({
        "$id": {"type": "__ID__", "value": id.to_string()},
        "保育園": {"type": "SINGLE_LINE_TEXT", "value": name},
        "病床数合計_0": {"type": "NUMBER", "value": beds.to_string()}
    })
}

fn write_template(dir: &TempDir) {
    let mut book = umya_spreadsheet::new_file();
    {
        let ws = book.new_sheet("保育園情報").unwrap();
        ws.get_cell_mut((2, 2)).set_value("2025年01月 現在");
        ws.get_cell_mut((4, 4)).set_value("施設名");
        ws.get_cell_mut((4, 5)).set_value("既存園");
        ws.get_cell_mut((23, 5)).set_formula("D5&\"様\"");
    }
    book.new_sheet("病床数").unwrap();

    let bytes = UmyaBook::from_spreadsheet(book).to_bytes().unwrap();
    std::fs::write(dir.path().join("template.xlsx"), bytes).unwrap();
}

fn query(app_id: u64, base_query: &str) -> DatasetQuery {
    DatasetQuery {
        app_id,
        api_token: format!("token-{}", app_id),
        base_query: base_query.to_string(),
    }
}

#[tokio::test]
async fn test_build_workbook_end_to_end() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    write_template(&dir);

    let server = MockServer::start();
    let primary = server.mock(|when, then| {
        when.method(GET)
            .path("/k/v1/records.json")
            .query_param("app", "218")
            .header("X-Cybozu-API-Token", "token-218");
        then.status(200).json_body(json!({"records": [
            nursery(1, "沖縄園", "沖縄県", "那覇市"),
            nursery(2, "既存園", "北海道", "札幌市")
        ]}));
    });
    let secondary = server.mock(|when, then| {
        when.method(GET)
            .path("/k/v1/records.json")
            .query_param("app", "32")
            .header("X-Cybozu-API-Token", "token-32");
        then.status(200).json_body(json!({"records": [bed(9, "既存園", 3)]}));
    });

    let pipeline = WorkbookPipeline::new(
        KintoneClient::new(server.base_url()),
        query(218, "status in (\"開園\", \"開園予定\")"),
        query(32, ""),
        RecordReconciler::new(ReconcileOptions::default(), ExactOnly),
        TemplateProjector::new(TemplateLayout::default()),
        LocalStorage::new(dir.path()),
        WorkbookTarget {
            template_path: "template.xlsx".to_string(),
            output_dir: "out".to_string(),
            reference_date: NaiveDate::from_ymd_opt(2026, 10, 18).unwrap(),
        },
    );

    let report = EtlEngine::new(pipeline).run().await?;

    primary.assert();
    secondary.assert();
    assert_eq!(report.output.as_deref(), Some("out/運営実績_20261018.xlsx"));
    assert!(report.summary.contains("1 matched"));

    let bytes = std::fs::read(dir.path().join("out/運営実績_20261018.xlsx"))?;
    let book = UmyaBook::from_bytes(&bytes)?;

    // 既有的列就地更新，新的園所接在最後一列之後
    assert_eq!(book.value("保育園情報", 4, 5)?.as_deref(), Some("既存園"));
    assert_eq!(book.value("保育園情報", 4, 6)?.as_deref(), Some("沖縄園"));
    assert_eq!(book.formula("保育園情報", 23, 6)?.as_deref(), Some("D6&\"様\""));
    assert_eq!(book.value("保育園情報", 2, 2)?.as_deref(), Some("2026年10月 現在"));
    assert_eq!(book.value("病床数", 6, 5)?.as_deref(), Some("3"));

    let sheet = "Kintoneデータ抽出";
    assert_eq!(book.sheet_names()[0], sheet);
    assert_eq!(book.value(sheet, 3, 2)?.as_deref(), Some("既存園"));
    assert_eq!(book.value(sheet, 3, 3)?.as_deref(), Some("沖縄園"));
    assert_eq!(book.value(sheet, 14, 1)?.as_deref(), Some("2026/10/18"));
    Ok(())
}

#[tokio::test]
async fn test_record_api_failure_stops_before_writing() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    write_template(&dir);

    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/k/v1/records.json");
        then.status(401).body("{\"code\":\"CB_WA01\"}");
    });

    let pipeline = WorkbookPipeline::new(
        KintoneClient::new(server.base_url()),
        query(218, ""),
        query(32, ""),
        RecordReconciler::exact(ReconcileOptions::default()),
        TemplateProjector::new(TemplateLayout::default()),
        LocalStorage::new(dir.path()),
        WorkbookTarget {
            template_path: "template.xlsx".to_string(),
            output_dir: "out".to_string(),
            reference_date: NaiveDate::from_ymd_opt(2026, 10, 18).unwrap(),
        },
    );

    let result = EtlEngine::new(pipeline).run().await;

    assert!(matches!(
        result,
        Err(report_sync::EtlError::FetchError { status: 401, .. })
    ));
    assert!(!dir.path().join("out").exists());
    Ok(())
}
