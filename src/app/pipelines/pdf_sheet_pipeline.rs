use crate::core::extractor::TableExtractor;
use crate::core::sheet_writer::{project_rows, SheetWriter, WriteOutcome};
use crate::domain::model::{ExtractedTable, HeaderMapping, RunReport};
use crate::domain::ports::{HeaderMatcher, Pipeline, SheetStore, TableSource};
use crate::utils::error::Result;
use async_trait::async_trait;

/// 比對完成、等待寫入的資料
#[derive(Debug, Clone)]
pub struct SheetPlan {
    pub table: ExtractedTable,
    pub mapping: HeaderMapping,
    pub warnings: Vec<String>,
}

/// PDF 表格 → 表頭比對 → 試算表整批取代
pub struct PdfSheetPipeline<T: TableSource, S: SheetStore, M: HeaderMatcher> {
    source: T,
    writer: SheetWriter<S>,
    matcher: M,
    dry_run: bool,
}

impl<T: TableSource, S: SheetStore, M: HeaderMatcher> PdfSheetPipeline<T, S, M> {
    pub fn new(source: T, store: S, matcher: M) -> Self {
        Self {
            source,
            writer: SheetWriter::new(store),
            matcher,
            dry_run: false,
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn writer(&self) -> &SheetWriter<S> {
        &self.writer
    }
}

#[async_trait]
impl<T: TableSource, S: SheetStore, M: HeaderMatcher> Pipeline for PdfSheetPipeline<T, S, M> {
    type Extracted = ExtractedTable;
    type Transformed = SheetPlan;

    fn name(&self) -> &str {
        "pdf-to-sheet"
    }

    async fn extract(&self) -> Result<ExtractedTable> {
        let table = TableExtractor::extract_from(&self.source)?;
        if table.headers.is_empty() {
            tracing::warn!("⚠️ No header table found on the first page");
        } else {
            tracing::info!(
                "📄 Extracted {} records with {} headers",
                table.records.len(),
                table.headers.len()
            );
        }
        Ok(table)
    }

    async fn transform(&self, table: ExtractedTable) -> Result<SheetPlan> {
        let mut warnings = Vec::new();
        if table.headers.is_empty() {
            warnings.push("no table with a header was found on the first page".to_string());
        }

        let target_headers = self.writer.read_headers().await?;

        let mapping = match self.matcher.match_headers(&table.headers, &target_headers).await {
            Ok(mapping) => mapping,
            Err(e) => {
                let message = format!(
                    "{} header matching failed, continuing with no mapped columns: {}",
                    self.matcher.strategy_name(),
                    e
                );
                tracing::warn!("⚠️ {}", message);
                warnings.push(message);
                HeaderMapping::empty()
            }
        };

        tracing::info!(
            "🔍 Matched {}/{} headers ({})",
            mapping.matched_count(),
            table.headers.len(),
            self.matcher.strategy_name()
        );
        for (source, target) in mapping.iter() {
            tracing::debug!("  {} -> {}", source, target.unwrap_or("(none)"));
        }

        Ok(SheetPlan {
            table,
            mapping,
            warnings,
        })
    }

    async fn load(&self, plan: SheetPlan) -> Result<RunReport> {
        let mut report = RunReport {
            pipeline: self.name().to_string(),
            warnings: plan.warnings,
            ..Default::default()
        };

        if self.dry_run {
            let headers = self.writer.read_headers().await?;
            let (rows, matched_cells) = project_rows(&plan.table.records, &plan.mapping, &headers);
            report.summary = format!(
                "dry run: would replace the data region with {} rows ({} cells mapped)",
                rows.len(),
                matched_cells
            );
            return Ok(report);
        }

        match self
            .writer
            .replace_data(&plan.table.records, &plan.mapping)
            .await?
        {
            WriteOutcome::NoRows => {
                report.summary = "no rows to write, sheet left untouched".to_string();
                report
                    .warnings
                    .push("0 rows had mapped values; nothing was cleared or written".to_string());
            }
            WriteOutcome::Replaced {
                rows,
                matched_cells,
            } => {
                report.records_written = rows;
                report.summary = format!(
                    "replaced the data region with {} rows ({} cells mapped)",
                    rows, matched_cells
                );
            }
        }
        Ok(report)
    }
}
