use crate::domain::model::{HeaderMapping, Record};
use crate::domain::ports::SheetStore;
use crate::utils::error::{EtlError, Result};
use std::collections::HashMap;

/// 清除範圍：第 2 列到第 10000 列、A 到 ZZ 欄
pub const CLEAR_RANGE: &str = "A2:ZZ10000";
pub const DATA_START_CELL: &str = "A2";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// 沒有任何可寫入的列，目標未被修改
    NoRows,
    Replaced { rows: usize, matched_cells: usize },
}

/// 依表頭映射把記錄排成目標工作表的列；全空的列會被捨棄
pub fn project_rows(
    records: &[Record],
    mapping: &HeaderMapping,
    sheet_headers: &[String],
) -> (Vec<Vec<String>>, usize) {
    let column_of: HashMap<&str, usize> = sheet_headers
        .iter()
        .enumerate()
        .map(|(i, h)| (h.as_str(), i))
        .collect();

    let mut matched_cells = 0;
    let mut rows = Vec::new();
    for record in records {
        let mut row = vec![String::new(); sheet_headers.len()];
        for (source, value) in &record.fields {
            let Some(col) = mapping.target_for(source).and_then(|t| column_of.get(t)) else {
                continue;
            };
            row[*col] = value.clone();
            matched_cells += 1;
        }
        if row.iter().any(|cell| !cell.is_empty()) {
            rows.push(row);
        }
    }
    (rows, matched_cells)
}

/// 清除資料區後整批重寫；清除與寫入之間失敗時資料區會是空的
pub struct SheetWriter<S: SheetStore> {
    store: S,
}

impl<S: SheetStore> SheetWriter<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// 第一列 (表頭) 的內容
    pub async fn read_headers(&self) -> Result<Vec<String>> {
        let values = self.store.read_values().await?;
        values
            .into_iter()
            .next()
            .ok_or_else(|| EtlError::WriteError {
                message: "sheet is empty, cannot find headers".to_string(),
            })
    }

    pub async fn replace_data(
        &self,
        records: &[Record],
        mapping: &HeaderMapping,
    ) -> Result<WriteOutcome> {
        let headers = self.read_headers().await?;
        tracing::debug!("Sheet has {} header columns", headers.len());

        let (rows, matched_cells) = project_rows(records, mapping, &headers);
        tracing::debug!("Built {} rows, {} matched cells", rows.len(), matched_cells);

        if rows.is_empty() {
            tracing::warn!("⚠️ No rows to write (0 rows matched); sheet left untouched");
            return Ok(WriteOutcome::NoRows);
        }

        tracing::info!("🧹 Clearing {}", CLEAR_RANGE);
        self.store
            .clear_range(CLEAR_RANGE)
            .await
            .map_err(|e| EtlError::WriteError {
                message: format!("clear of {} failed: {}", CLEAR_RANGE, e),
            })?;

        tracing::info!("✍️ Writing {} rows from {}", rows.len(), DATA_START_CELL);
        self.store
            .write_rows(DATA_START_CELL, &rows)
            .await
            .map_err(|e| EtlError::WriteError {
                message: format!(
                    "write failed after {} was already cleared (no rollback): {}",
                    CLEAR_RANGE, e
                ),
            })?;

        Ok(WriteOutcome::Replaced {
            rows: rows.len(),
            matched_cells,
        })
    }
}
