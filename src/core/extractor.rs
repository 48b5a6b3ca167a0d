use crate::domain::model::{ExtractedTable, HeaderLabel, PageTables, RawTableRow, Record};
use crate::domain::ports::TableSource;
use crate::utils::error::Result;

/// 重複表頭判斷只看前幾欄
const LEADING_CELLS: usize = 3;

/// 合併儲存格在 PDF 表格中只有最左邊有值，向右補齊
pub fn forward_fill(row: &[String]) -> Vec<String> {
    let mut last = String::new();
    row.iter()
        .map(|cell| {
            if !cell.is_empty() {
                last = cell.clone();
            }
            last.clone()
        })
        .collect()
}

/// 合併上下兩列表頭的一欄
pub fn combine_header(top: &str, bottom: &str, index: usize) -> HeaderLabel {
    match (top.is_empty(), bottom.is_empty()) {
        (false, false) if top != bottom => format!("{}_{}", top, bottom),
        (false, _) => top.to_string(),
        (true, false) => bottom.to_string(),
        (true, true) => format!("Column_{}", index),
    }
}

/// 上層先向右補齊，再與下層逐欄合併；寬度取兩列較短者
pub fn combine_header_rows(top: &[String], bottom: &[String]) -> Vec<HeaderLabel> {
    forward_fill(top)
        .iter()
        .zip(bottom)
        .enumerate()
        .map(|(i, (t, b))| combine_header(t, b, i))
        .collect()
}

fn clean_cell(cell: &str) -> String {
    cell.replace(['\r', '\n'], "").trim().to_string()
}

fn clean_row(row: &[String]) -> RawTableRow {
    row.iter().map(|c| clean_cell(c)).collect()
}

fn leading(row: &[String]) -> Vec<String> {
    row.iter().take(LEADING_CELLS).cloned().collect()
}

/// 已擷取的表頭，以及用來辨識後續頁面重複表頭的特徵
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderContext {
    pub headers: Vec<HeaderLabel>,
    signatures: Vec<Vec<String>>,
}

impl HeaderContext {
    fn from_two_rows(top: &[String], bottom: &[String]) -> Self {
        let headers = combine_header_rows(top, bottom);
        // 合併後的標籤、合併前的上層標籤、原始上層列
        let mut signatures = Self::label_signatures(&headers);
        signatures.push(leading(top));
        Self::build(headers, signatures)
    }

    fn from_single_row(row: &[String]) -> Self {
        let headers = row.to_vec();
        let signatures = Self::label_signatures(&headers);
        Self::build(headers, signatures)
    }

    fn label_signatures(headers: &[HeaderLabel]) -> Vec<Vec<String>> {
        let tops: Vec<String> = headers
            .iter()
            .take(LEADING_CELLS)
            .map(|h| h.split('_').next().unwrap_or_default().to_string())
            .collect();
        vec![leading(headers), tops]
    }

    fn build(headers: Vec<HeaderLabel>, signatures: Vec<Vec<String>>) -> Self {
        // 前幾欄全空的特徵會誤刪資料列
        let mut signatures: Vec<Vec<String>> = signatures
            .into_iter()
            .filter(|sig| sig.iter().any(|c| !c.is_empty()))
            .collect();
        signatures.dedup();
        Self {
            headers,
            signatures,
        }
    }

    /// 空白列或重複印出的表頭列
    pub fn should_skip(&self, row: &[String]) -> bool {
        if row.iter().all(|c| c.is_empty()) {
            return true;
        }
        let lead = leading(row);
        self.signatures.iter().any(|sig| *sig == lead)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderState {
    AwaitingHeader,
    Capturing(HeaderContext),
}

/// 兩列表頭的表格抽取器
///
/// 只在第一頁等待表頭；擷取到之後，每個表格的每一列都以該表頭轉為 [`Record`]。
#[derive(Debug)]
pub struct TableExtractor {
    state: HeaderState,
    records: Vec<Record>,
    skipped_rows: usize,
    skipped_tables: usize,
}

impl Default for TableExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl TableExtractor {
    pub fn new() -> Self {
        Self {
            state: HeaderState::AwaitingHeader,
            records: Vec::new(),
            skipped_rows: 0,
            skipped_tables: 0,
        }
    }

    pub fn state(&self) -> &HeaderState {
        &self.state
    }

    pub fn extract_from<S: TableSource>(source: &S) -> Result<ExtractedTable> {
        let pages = source.read_pages()?;
        Ok(Self::extract(&pages))
    }

    pub fn extract(pages: &[PageTables]) -> ExtractedTable {
        let mut extractor = Self::new();
        for (page_index, page) in pages.iter().enumerate() {
            for table in &page.tables {
                extractor.feed_table(page_index == 0, table);
            }
        }
        extractor.finish()
    }

    /// 處理一個表格；`on_first_page` 決定是否可以擷取表頭
    pub fn feed_table(&mut self, on_first_page: bool, table: &[RawTableRow]) {
        if table.is_empty() {
            return;
        }
        let rows: Vec<RawTableRow> = table.iter().map(|r| clean_row(r)).collect();

        let awaiting = matches!(self.state, HeaderState::AwaitingHeader);
        let data_start = if !awaiting {
            0
        } else if on_first_page {
            let (context, consumed) = if rows.len() >= 2 {
                (HeaderContext::from_two_rows(&rows[0], &rows[1]), 2)
            } else {
                (HeaderContext::from_single_row(&rows[0]), 1)
            };
            tracing::debug!("Captured {} headers: {:?}", context.headers.len(), context.headers);
            self.state = HeaderState::Capturing(context);
            consumed
        } else {
            self.skipped_tables += 1;
            return;
        };

        let HeaderState::Capturing(context) = &self.state else {
            return;
        };

        for row in rows.iter().skip(data_start) {
            if context.should_skip(row) {
                self.skipped_rows += 1;
                continue;
            }
            self.records.push(Record::from_row(&context.headers, row));
        }
    }

    pub fn finish(self) -> ExtractedTable {
        match self.state {
            HeaderState::Capturing(context) => {
                tracing::debug!(
                    "Extracted {} records ({} header/blank rows skipped)",
                    self.records.len(),
                    self.skipped_rows
                );
                ExtractedTable {
                    headers: context.headers,
                    records: self.records,
                }
            }
            HeaderState::AwaitingHeader => {
                tracing::warn!(
                    "⚠️ No header table found on the first page; {} tables skipped",
                    self.skipped_tables
                );
                ExtractedTable::default()
            }
        }
    }
}
