use chrono::NaiveDate;
use clap::Parser;
use report_sync::adapters::{
    CsvTableSource, GeminiClient, GoogleSheetsStore, KintoneClient, LocalStorage, LopdfTableSource,
    ServiceAccountAuth, SheetsAuth,
};
use report_sync::config::toml_config::{LogFormat, SheetsCredentials};
use report_sync::core::extractor::TableExtractor;
use report_sync::core::header_matcher::{AssistedHeaderMatcher, ExactHeaderMatcher};
use report_sync::core::reconciler::{ExactOnly, RecordReconciler, SemanticNameMatch};
use report_sync::core::template::{TemplateLayout, TemplateProjector};
use report_sync::domain::ports::{HeaderMatcher, NameMatchStrategy, Storage, TableSource};
use report_sync::utils::error::ErrorSeverity;
use report_sync::utils::{logger, validation::Validate};
use report_sync::{
    Cli, Command, EtlEngine, EtlError, PdfSheetPipeline, Result, RunReport, TomlConfig,
    WorkbookPipeline, WorkbookTarget,
};
use std::path::PathBuf;

/// 檢視模式顯示的資料筆數
const INSPECT_SAMPLE_ROWS: usize = 3;

fn gemini_client(config: &TomlConfig, api_key: &str) -> GeminiClient {
    GeminiClient::with_endpoint(
        api_key,
        config.matcher.model.clone(),
        config
            .matcher
            .api_base
            .clone()
            .unwrap_or_else(|| report_sync::adapters::gemini::DEFAULT_API_BASE.to_string()),
    )
}

fn header_matcher(config: &TomlConfig) -> Box<dyn HeaderMatcher> {
    match config.matcher_api_key() {
        Some(key) => {
            tracing::info!("🤖 Using assisted header matching ({})", config.matcher.model);
            Box::new(AssistedHeaderMatcher::new(gemini_client(config, key)))
        }
        None => {
            tracing::info!("🔤 No matcher API key configured, using exact header matching");
            Box::new(ExactHeaderMatcher)
        }
    }
}

fn name_fallback(config: &TomlConfig) -> Box<dyn NameMatchStrategy> {
    if !config.reconcile.fuzzy_fallback {
        return Box::new(ExactOnly);
    }
    match config.matcher_api_key() {
        Some(key) => Box::new(SemanticNameMatch::new(gemini_client(config, key))),
        None => {
            tracing::warn!("⚠️ reconcile.fuzzy_fallback is set but no matcher API key is available");
            Box::new(ExactOnly)
        }
    }
}

fn inspect_tables<T: TableSource>(source: &T) -> Result<RunReport> {
    let table = TableExtractor::extract_from(source)?;

    println!("Headers ({}):", table.headers.len());
    for (i, header) in table.headers.iter().enumerate() {
        println!("  {:>3}: {}", i, header);
    }
    println!("Records: {}", table.records.len());
    for record in table.records.iter().take(INSPECT_SAMPLE_ROWS) {
        let cells: Vec<String> = record
            .fields
            .iter()
            .map(|(header, value)| format!("{}={}", header, value))
            .collect();
        println!("  {}", cells.join(" | "));
    }

    Ok(RunReport {
        pipeline: "inspect".to_string(),
        summary: format!("{} headers, {} records", table.headers.len(), table.records.len()),
        ..Default::default()
    })
}

async fn run_pdf_pipeline<T: TableSource>(
    source: T,
    cli: &Cli,
    config: &TomlConfig,
    inspect: bool,
    monitor: bool,
) -> Result<RunReport> {
    if inspect {
        return inspect_tables(&source);
    }

    let sheets = config.require_sheets()?;
    let auth = match sheets.credentials()? {
        SheetsCredentials::AccessToken(token) => SheetsAuth::from(token),
        SheetsCredentials::ServiceAccountKey(path) => {
            let auth = ServiceAccountAuth::from_file(path)?;
            tracing::info!("🔑 Using service account {}", auth.client_email());
            SheetsAuth::from(auth)
        }
    };
    let store = match &sheets.api_base {
        Some(api_base) => GoogleSheetsStore::with_api_base(&sheets.url, auth, api_base.clone())?,
        None => GoogleSheetsStore::from_url(&sheets.url, auth)?,
    };

    let pipeline =
        PdfSheetPipeline::new(source, store, header_matcher(config)).with_dry_run(cli.dry_run);
    EtlEngine::new_with_monitoring(pipeline, monitor).run().await
}

async fn run_pdf_to_sheet(
    cli: &Cli,
    config: &TomlConfig,
    pdf: Option<&PathBuf>,
    tables_dir: Option<&PathBuf>,
    inspect: bool,
    monitor: bool,
) -> Result<RunReport> {
    match (pdf, tables_dir) {
        (Some(pdf), _) => {
            let bytes = LocalStorage::new(".")
                .read_file(&pdf.to_string_lossy())
                .await?;
            tracing::info!("📄 Reading {} ({} bytes)", pdf.display(), bytes.len());
            run_pdf_pipeline(LopdfTableSource::from_bytes(bytes), cli, config, inspect, monitor).await
        }
        (None, Some(dir)) => {
            tracing::info!("📂 Reading exported tables from {}", dir.display());
            run_pdf_pipeline(CsvTableSource::new(dir), cli, config, inspect, monitor).await
        }
        (None, None) => Err(EtlError::MissingConfigError {
            field: "--pdf or --tables-dir".to_string(),
        }),
    }
}

async fn run_build_workbook(
    cli: &Cli,
    config: &TomlConfig,
    reference_date: Option<NaiveDate>,
    template: Option<&String>,
    output_dir: Option<&String>,
    monitor: bool,
) -> Result<RunReport> {
    let kintone = config.require_kintone()?;
    let workbook = config.require_workbook()?;

    let reference_date = reference_date
        .or(workbook.reference_date)
        .unwrap_or_else(|| chrono::Local::now().date_naive());
    let target = WorkbookTarget {
        template_path: template.cloned().unwrap_or_else(|| workbook.template_path.clone()),
        output_dir: output_dir.cloned().unwrap_or_else(|| workbook.output_dir.clone()),
        reference_date,
    };
    tracing::info!("📅 Reference date {}", reference_date);

    let pipeline = WorkbookPipeline::new(
        KintoneClient::with_page_size(kintone.base_url.clone(), kintone.page_size),
        kintone.primary.to_query(),
        kintone.secondary.to_query(),
        RecordReconciler::new(config.reconcile.options(), name_fallback(config)),
        TemplateProjector::new(TemplateLayout::default()),
        LocalStorage::new("."),
        target,
    )
    .with_dry_run(cli.dry_run);

    EtlEngine::new_with_monitoring(pipeline, monitor).run().await
}

fn exit_code(severity: ErrorSeverity) -> i32 {
    match severity {
        ErrorSeverity::Low => 0,      // 警告，但成功
        ErrorSeverity::Medium => 2,   // 外部服務錯誤
        ErrorSeverity::High => 1,     // 處理錯誤
        ErrorSeverity::Critical => 3, // 系統或寫入錯誤
    }
}

fn report_error(e: &EtlError) -> i32 {
    tracing::error!(
        "❌ Run failed: {} (Category: {:?}, Severity: {:?})",
        e,
        e.category(),
        e.severity()
    );
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 建議: {}", e.recovery_suggestion());
    exit_code(e.severity())
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = TomlConfig::from_file(&cli.config);
    let log_format = config
        .as_ref()
        .map(|c| c.logging.format)
        .unwrap_or_default();
    match log_format {
        LogFormat::Compact => logger::init_cli_logger(cli.verbose),
        LogFormat::Json => logger::init_json_logger(cli.verbose),
    }

    tracing::info!("Starting report-sync");
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("❌ Cannot load {}", cli.config.display());
            std::process::exit(report_error(&e).max(1));
        }
    };

    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        std::process::exit(report_error(&e).max(1));
    }

    let monitor = cli.monitor || config.monitoring_enabled();
    if monitor {
        tracing::info!("🔍 System monitoring enabled");
    }
    if cli.dry_run {
        tracing::info!("🧪 Dry run: nothing will be written");
    }

    let result = match &cli.command {
        Command::PdfToSheet {
            pdf,
            tables_dir,
            inspect,
        } => {
            run_pdf_to_sheet(&cli, &config, pdf.as_ref(), tables_dir.as_ref(), *inspect, monitor)
                .await
        }
        Command::BuildWorkbook {
            reference_date,
            template,
            output_dir,
        } => {
            run_build_workbook(
                &cli,
                &config,
                *reference_date,
                template.as_ref(),
                output_dir.as_ref(),
                monitor,
            )
            .await
        }
    };

    match result {
        Ok(report) => {
            println!("✅ {}: {}", report.pipeline, report.summary);
            if let Some(output) = &report.output {
                println!("📁 Output saved to: {}", output);
            }
            for warning in &report.warnings {
                println!("⚠️ {}", warning);
            }
        }
        Err(e) => {
            let code = report_error(&e);
            if code > 0 {
                std::process::exit(code);
            }
        }
    }

    Ok(())
}
