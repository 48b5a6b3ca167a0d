use crate::core::formula::translate_formula;
use crate::domain::model::{CellValue, MergedEntry, RemoteRecord};
use crate::domain::ports::TemplateBook;
use crate::utils::error::{EtlError, Result};
use chrono::NaiveDate;
use std::cmp::Ordering;
use std::collections::HashMap;

/// 鍵欄位掃描的上限列
const MAX_SCAN_ROW: u32 = 2000;
/// 鍵欄位連續空白幾列視為表格結尾
const END_OF_TABLE_GAP: u32 = 3;
/// 日期標籤只在左上角搜尋
const AS_OF_SEARCH_ROWS: u32 = 5;
const AS_OF_SEARCH_COLS: u32 = 50;
const DATE_NUMBER_FORMAT: &str = "yyyy年m月d日";
/// 未知的都道府縣排在最後
const UNKNOWN_PREFECTURE_RANK: usize = 999;

/// 北から南 (JIS X 0401)
pub const PREFECTURES: [&str; 47] = [
    "北海道", "青森県", "岩手県", "宮城県", "秋田県", "山形県", "福島県",
    "茨城県", "栃木県", "群馬県", "埼玉県", "千葉県", "東京都", "神奈川県",
    "新潟県", "富山県", "石川県", "福井県", "山梨県", "長野県", "岐阜県",
    "静岡県", "愛知県", "三重県", "滋賀県", "京都府", "大阪府", "兵庫県",
    "奈良県", "和歌山県", "鳥取県", "島根県", "岡山県", "広島県", "山口県",
    "徳島県", "香川県", "愛媛県", "高知県", "福岡県", "佐賀県", "長崎県",
    "熊本県", "大分県", "宮崎県", "鹿児島県", "沖縄県",
];

pub fn prefecture_rank(name: &str) -> usize {
    PREFECTURES
        .iter()
        .position(|p| *p == name)
        .unwrap_or(UNKNOWN_PREFECTURE_RANK)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordSide {
    Primary,
    Secondary,
}

/// 以鍵欄位更新或新增列的工作表
#[derive(Debug, Clone)]
pub struct KeyedSheetLayout {
    pub sheet: String,
    pub side: RecordSide,
    pub key_field: String,
    pub key_column: u32,
    pub start_row: u32,
    /// 欄位代碼 → 欄 (從 1 開始)
    pub columns: Vec<(String, u32)>,
    /// 公式或受保護的欄，不寫入
    pub protected_columns: Vec<u32>,
}

#[derive(Debug, Clone)]
pub enum ColumnSource {
    Field(String),
    /// 都道府縣 + 市區町村
    Address { area: String, city: String },
    /// 相符副資料上的整數欄位，沒有時為 0
    SecondaryInteger(String),
}

#[derive(Debug, Clone)]
pub struct PresentationColumn {
    pub header: String,
    pub source: ColumnSource,
}

/// 每次重新產生的一覽表
#[derive(Debug, Clone)]
pub struct PresentationLayout {
    pub sheet_index: usize,
    pub title: String,
    pub columns: Vec<PresentationColumn>,
    pub area_field: String,
    pub city_field: String,
    pub client_field: String,
    /// 寫入基準日 (`YYYY/MM/DD`) 的儲存格
    pub date_cell: (u32, u32),
}

#[derive(Debug, Clone)]
pub struct TemplateLayout {
    pub keyed_sheets: Vec<KeyedSheetLayout>,
    pub presentation: PresentationLayout,
    pub as_of_marker: String,
}

fn field(header: &str, code: &str) -> PresentationColumn {
    PresentationColumn {
        header: header.to_string(),
        source: ColumnSource::Field(code.to_string()),
    }
}

impl Default for TemplateLayout {
    fn default() -> Self {
        let nursery = KeyedSheetLayout {
            sheet: "保育園情報".to_string(),
            side: RecordSide::Primary,
            key_field: "name".to_string(),
            key_column: 4,
            start_row: 5,
            columns: vec![
                ("name".to_string(), 4),
                ("client_name".to_string(), 3),
                ("capacity".to_string(), 5),
                ("open_date".to_string(), 6),
                ("addr_area".to_string(), 20),
                ("addr_city".to_string(), 21),
            ],
            protected_columns: vec![23, 24],
        };
        let beds = KeyedSheetLayout {
            sheet: "病床数".to_string(),
            side: RecordSide::Secondary,
            key_field: "保育園".to_string(),
            key_column: 4,
            start_row: 5,
            columns: vec![("保育園".to_string(), 4), ("病床数合計_0".to_string(), 6)],
            protected_columns: vec![],
        };

        let presentation = PresentationLayout {
            sheet_index: 0,
            title: "Kintoneデータ抽出".to_string(),
            columns: vec![
                PresentationColumn {
                    header: "住所".to_string(),
                    source: ColumnSource::Address {
                        area: "addr_area".to_string(),
                        city: "addr_city".to_string(),
                    },
                },
                field("ステータス", "status"),
                field("施設名", "name"),
                field("クライアント名", "client_name"),
                field("開園日", "open_date"),
                field("基本開園日", "基本開園日"),
                field("定員", "capacity"),
                field("病児保育", "sick_child_care"),
                field("学童", "sc_flg"),
                field("夜間保育", "night_care"),
                field("施設形態", "ekbn2"),
                field("施設区分", "ekbn4"),
                PresentationColumn {
                    header: "病床数".to_string(),
                    source: ColumnSource::SecondaryInteger("病床数合計_0".to_string()),
                },
            ],
            area_field: "addr_area".to_string(),
            city_field: "addr_city".to_string(),
            client_field: "client_name".to_string(),
            date_cell: (14, 1),
        };

        Self {
            keyed_sheets: vec![nursery, beds],
            presentation,
            as_of_marker: "現在".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectionSummary {
    pub updated_rows: usize,
    pub inserted_rows: usize,
    pub presentation_rows: usize,
    pub as_of_labels: usize,
    pub skipped_sheets: Vec<String>,
}

/// 欄位代碼決定型別：含「日」為日期，含「数」或「定員」為整數
pub fn typed_value(field_code: &str, raw: &str) -> CellValue {
    if raw.is_empty() {
        return CellValue::Empty;
    }
    if field_code.contains('日') {
        if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            return CellValue::Date(date);
        }
    } else if field_code.contains('数') || field_code.contains("定員") {
        if let Ok(n) = raw.trim().parse::<i64>() {
            return CellValue::Integer(n);
        }
    }
    CellValue::Text(raw.to_string())
}

pub fn as_of_label(date: NaiveDate) -> String {
    date.format("%Y年%m月 現在").to_string()
}

fn presentation_order(layout: &PresentationLayout, a: &MergedEntry, b: &MergedEntry) -> Ordering {
    let key = |e: &MergedEntry| {
        (
            prefecture_rank(&e.master.text(&layout.area_field)),
            e.master.text(&layout.city_field),
            e.master.text(&layout.client_field),
        )
    };
    key(a).cmp(&key(b))
}

pub struct TemplateProjector {
    layout: TemplateLayout,
}

impl TemplateProjector {
    pub fn new(layout: TemplateLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &TemplateLayout {
        &self.layout
    }

    pub fn project<B: TemplateBook>(
        &self,
        book: &mut B,
        entries: &[MergedEntry],
        reference_date: NaiveDate,
    ) -> Result<ProjectionSummary> {
        let mut summary = ProjectionSummary::default();
        let names = book.sheet_names();
        let presentation_name = names
            .get(self.layout.presentation.sheet_index)
            .cloned()
            .ok_or_else(|| EtlError::WorkbookError {
                message: format!(
                    "template has no sheet at index {}",
                    self.layout.presentation.sheet_index
                ),
            })?;

        for keyed in &self.layout.keyed_sheets {
            if keyed.sheet == presentation_name {
                return Err(EtlError::WorkbookError {
                    message: format!("sheet '{}' cannot be both keyed and regenerated", keyed.sheet),
                });
            }
            if !book.has_sheet(&keyed.sheet) {
                tracing::warn!("⚠️ Template has no sheet '{}'; skipping", keyed.sheet);
                summary.skipped_sheets.push(keyed.sheet.clone());
                continue;
            }

            let records: Vec<&RemoteRecord> = match keyed.side {
                RecordSide::Primary => entries.iter().map(|e| &e.master).collect(),
                RecordSide::Secondary => entries.iter().filter_map(|e| e.secondary.as_ref()).collect(),
            };
            self.upsert_keyed_sheet(book, keyed, &records, &mut summary)?;

            if self.rewrite_as_of_label(book, &keyed.sheet, reference_date)? {
                summary.as_of_labels += 1;
            }
        }

        summary.presentation_rows =
            self.regenerate_presentation(book, &presentation_name, entries, reference_date)?;

        tracing::info!(
            "📘 Workbook projected: {} rows updated, {} inserted, {} listed",
            summary.updated_rows,
            summary.inserted_rows,
            summary.presentation_rows
        );
        Ok(summary)
    }

    /// 鍵值 (去除空白) → 列號，以及最後一筆資料所在列
    fn scan_existing_rows<B: TemplateBook>(
        &self,
        book: &B,
        keyed: &KeyedSheetLayout,
    ) -> Result<(HashMap<String, u32>, u32)> {
        let mut rows = HashMap::new();
        let mut last_data_row = keyed.start_row.saturating_sub(1);

        let key_at = |row: u32| -> Result<Option<String>> {
            Ok(book
                .value(&keyed.sheet, keyed.key_column, row)?
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()))
        };

        for row in keyed.start_row..MAX_SCAN_ROW {
            if let Some(key) = key_at(row)? {
                rows.insert(key, row);
                last_data_row = row;
                continue;
            }
            let mut gap_is_empty = true;
            for next in row + 1..=row + END_OF_TABLE_GAP {
                if key_at(next)?.is_some() {
                    gap_is_empty = false;
                    break;
                }
            }
            if gap_is_empty {
                break;
            }
        }
        Ok((rows, last_data_row))
    }

    fn upsert_keyed_sheet<B: TemplateBook>(
        &self,
        book: &mut B,
        keyed: &KeyedSheetLayout,
        records: &[&RemoteRecord],
        summary: &mut ProjectionSummary,
    ) -> Result<()> {
        let (mut existing, mut last_data_row) = self.scan_existing_rows(book, keyed)?;
        tracing::debug!(
            "Sheet '{}' has {} keyed rows, last data row {}",
            keyed.sheet,
            existing.len(),
            last_data_row
        );

        for record in records {
            let key = record.text(&keyed.key_field).trim().to_string();
            if key.is_empty() {
                continue;
            }

            let target_row = match existing.get(&key) {
                Some(row) => {
                    summary.updated_rows += 1;
                    *row
                }
                None => {
                    let insert_at = (last_data_row + 1).max(keyed.start_row);
                    self.insert_row_like_above(book, keyed, insert_at)?;
                    last_data_row = insert_at;
                    existing.insert(key, insert_at);
                    summary.inserted_rows += 1;
                    insert_at
                }
            };

            for (code, col) in &keyed.columns {
                if keyed.protected_columns.contains(col) {
                    continue;
                }
                let value = typed_value(code, &record.text(code));
                book.set_value(&keyed.sheet, *col, target_row, &value)?;
                if matches!(value, CellValue::Date(_)) {
                    book.set_number_format(&keyed.sheet, *col, target_row, DATE_NUMBER_FORMAT)?;
                }
            }
        }
        Ok(())
    }

    /// 插入新列，並從上一列複製樣式與平移後的公式
    fn insert_row_like_above<B: TemplateBook>(
        &self,
        book: &mut B,
        keyed: &KeyedSheetLayout,
        insert_at: u32,
    ) -> Result<()> {
        book.insert_row(&keyed.sheet, insert_at)?;

        let source_row = insert_at - 1;
        // 表格是空的時候上一列是表頭，不複製
        if source_row < keyed.start_row {
            return Ok(());
        }

        let max_column = book.max_column(&keyed.sheet)?;
        for col in 1..=max_column {
            book.copy_style(&keyed.sheet, col, source_row, insert_at)?;
            if let Some(formula) = book.formula(&keyed.sheet, col, source_row)? {
                let translated = translate_formula(&formula, 1, 0).unwrap_or_else(|e| {
                    tracing::debug!("Copying formula literally: {}", e);
                    formula.clone()
                });
                book.set_formula(&keyed.sheet, col, insert_at, &translated)?;
            }
        }
        Ok(())
    }

    fn rewrite_as_of_label<B: TemplateBook>(
        &self,
        book: &mut B,
        sheet: &str,
        reference_date: NaiveDate,
    ) -> Result<bool> {
        for row in 1..=AS_OF_SEARCH_ROWS {
            for col in 1..=AS_OF_SEARCH_COLS {
                let Some(text) = book.value(sheet, col, row)? else {
                    continue;
                };
                if text.contains(&self.layout.as_of_marker) {
                    let label = as_of_label(reference_date);
                    book.set_value(sheet, col, row, &CellValue::Text(label))?;
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn regenerate_presentation<B: TemplateBook>(
        &self,
        book: &mut B,
        sheet: &str,
        entries: &[MergedEntry],
        reference_date: NaiveDate,
    ) -> Result<usize> {
        let layout = &self.layout.presentation;
        book.clear_sheet(sheet)?;
        book.rename_sheet(layout.sheet_index, &layout.title)?;
        let sheet = layout.title.as_str();

        for (i, column) in layout.columns.iter().enumerate() {
            let col = i as u32 + 1;
            book.set_value(sheet, col, 1, &CellValue::Text(column.header.clone()))?;
            book.set_bold(sheet, col, 1)?;
        }

        let mut ordered: Vec<&MergedEntry> = entries.iter().collect();
        ordered.sort_by(|a, b| presentation_order(layout, a, b));

        for (i, entry) in ordered.iter().enumerate() {
            let row = i as u32 + 2;
            for (j, column) in layout.columns.iter().enumerate() {
                let value = match &column.source {
                    ColumnSource::Field(code) => CellValue::Text(entry.master.text(code)),
                    ColumnSource::Address { area, city } => CellValue::Text(format!(
                        "{}{}",
                        entry.master.text(area),
                        entry.master.text(city)
                    )),
                    ColumnSource::SecondaryInteger(code) => CellValue::Integer(
                        entry
                            .secondary
                            .as_ref()
                            .and_then(|s| s.integer(code))
                            .unwrap_or(0),
                    ),
                };
                book.set_value(sheet, j as u32 + 1, row, &value)?;
            }
        }

        let (date_col, date_row) = layout.date_cell;
        book.set_value(
            sheet,
            date_col,
            date_row,
            &CellValue::Text(reference_date.format("%Y/%m/%d").to_string()),
        )?;

        Ok(ordered.len())
    }
}
