use crate::adapters::xlsx_book::UmyaBook;
use crate::core::reconciler::{Reconciliation, RecordReconciler};
use crate::core::template::TemplateProjector;
use crate::domain::model::{DatasetQuery, RemoteRecord, RunReport};
use crate::domain::ports::{NameMatchStrategy, Pipeline, RecordSource, Storage, TemplateBook};
use crate::utils::error::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

pub fn output_file_name(reference_date: NaiveDate) -> String {
    format!("運営実績_{}.xlsx", reference_date.format("%Y%m%d"))
}

#[derive(Debug, Clone)]
pub struct WorkbookTarget {
    pub template_path: String,
    pub output_dir: String,
    pub reference_date: NaiveDate,
}

/// 兩個資料集 → 名稱合併 → 範本工作簿
pub struct WorkbookPipeline<R: RecordSource, N: NameMatchStrategy, St: Storage> {
    source: R,
    primary: DatasetQuery,
    secondary: DatasetQuery,
    reconciler: RecordReconciler<N>,
    projector: TemplateProjector,
    storage: St,
    target: WorkbookTarget,
    dry_run: bool,
}

impl<R: RecordSource, N: NameMatchStrategy, St: Storage> WorkbookPipeline<R, N, St> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: R,
        primary: DatasetQuery,
        secondary: DatasetQuery,
        reconciler: RecordReconciler<N>,
        projector: TemplateProjector,
        storage: St,
        target: WorkbookTarget,
    ) -> Self {
        Self {
            source,
            primary,
            secondary,
            reconciler,
            projector,
            storage,
            target,
            dry_run: false,
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    fn output_path(&self) -> String {
        let name = output_file_name(self.target.reference_date);
        if self.target.output_dir.is_empty() {
            name
        } else {
            format!("{}/{}", self.target.output_dir.trim_end_matches('/'), name)
        }
    }
}

#[async_trait]
impl<R: RecordSource, N: NameMatchStrategy, St: Storage> Pipeline for WorkbookPipeline<R, N, St> {
    type Extracted = (Vec<RemoteRecord>, Vec<RemoteRecord>);
    type Transformed = Reconciliation;

    fn name(&self) -> &str {
        "build-workbook"
    }

    async fn extract(&self) -> Result<Self::Extracted> {
        // 依序抓取，不並行
        let primary = self.source.fetch_all(&self.primary).await?;
        let secondary = self.source.fetch_all(&self.secondary).await?;
        tracing::info!(
            "📥 Fetched {} primary and {} secondary records",
            primary.len(),
            secondary.len()
        );
        Ok((primary, secondary))
    }

    async fn transform(&self, (primary, secondary): Self::Extracted) -> Result<Reconciliation> {
        Ok(self.reconciler.reconcile(primary, secondary).await)
    }

    async fn load(&self, reconciliation: Reconciliation) -> Result<RunReport> {
        let template = self.storage.read_file(&self.target.template_path).await?;

        // 工作簿只在這個區塊內存在，不跨越 await
        let (summary, bytes) = {
            let mut book = UmyaBook::from_bytes(&template)?;
            let summary = self.projector.project(
                &mut book,
                &reconciliation.entries,
                self.target.reference_date,
            )?;
            let bytes = if self.dry_run {
                Vec::new()
            } else {
                book.to_bytes()?
            };
            (summary, bytes)
        };

        let mut warnings = reconciliation.summary.warnings;
        for sheet in &summary.skipped_sheets {
            warnings.push(format!("template has no sheet '{}'", sheet));
        }

        let description = format!(
            "{} facilities ({} matched, {} unmatched); {} rows updated, {} inserted",
            reconciliation.entries.len(),
            reconciliation.summary.matched,
            reconciliation.summary.unmatched,
            summary.updated_rows,
            summary.inserted_rows
        );

        let output = self.output_path();
        if self.dry_run {
            return Ok(RunReport {
                pipeline: self.name().to_string(),
                summary: format!("dry run: would write {}; {}", output, description),
                output: None,
                records_written: 0,
                warnings,
            });
        }

        self.storage.write_file(&output, &bytes).await?;
        tracing::info!("💾 Saved workbook to {}", output);

        Ok(RunReport {
            pipeline: self.name().to_string(),
            summary: description,
            output: Some(output),
            records_written: summary.presentation_rows,
            warnings,
        })
    }
}
