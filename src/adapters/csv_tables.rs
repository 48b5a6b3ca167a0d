use crate::domain::model::{PageTables, RawTableRow};
use crate::domain::ports::TableSource;
use crate::utils::error::{EtlError, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

fn table_file_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^page-(\d+)-table-(\d+)\.csv$").expect("static table file pattern")
    })
}

/// 預先匯出的表格：每個表格一個 `page-{N}-table-{M}.csv`
pub struct CsvTableSource {
    dir: PathBuf,
}

impl CsvTableSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn read_table(path: &Path) -> Result<Vec<RawTableRow>> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(path)?;

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            rows.push(record.iter().map(str::to_string).collect());
        }
        Ok(rows)
    }
}

impl TableSource for CsvTableSource {
    fn read_pages(&self) -> Result<Vec<PageTables>> {
        let mut files: BTreeMap<(usize, usize), PathBuf> = BTreeMap::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(caps) = table_file_pattern().captures(name) else {
                tracing::debug!("Skipping {}", name);
                continue;
            };
            let (Ok(page), Ok(table)) = (caps[1].parse::<usize>(), caps[2].parse::<usize>()) else {
                continue;
            };
            files.insert((page, table), path);
        }

        if files.is_empty() {
            return Err(EtlError::ExtractionError {
                message: format!("no page-N-table-M.csv files in {}", self.dir.display()),
            });
        }

        let mut pages: Vec<PageTables> = Vec::new();
        for ((page_number, _), path) in files {
            let table = Self::read_table(&path)?;
            match pages.last_mut() {
                Some(page) if page.page_number == page_number => page.tables.push(table),
                _ => pages.push(PageTables {
                    page_number,
                    tables: vec![table],
                }),
            }
        }
        tracing::debug!("Loaded {} pages of CSV tables", pages.len());
        Ok(pages)
    }
}
