//! 從 PDF 內容串流還原表格。
//!
//! `extract_text` 不保留版面，每個文字物件都變成獨立一行，所以這裡自己走一次
//! 內容串流：記下每段文字在頁面上的座標與直向格線，再依基線分列、依格線
//! (沒有格線時依文字起點) 分欄。

use crate::domain::model::{PageTables, RawTableRow};
use crate::domain::ports::TableSource;
use crate::utils::error::{EtlError, Result};
use lopdf::content::{Content, Operation};
use lopdf::Encoding;
use lopdf::{Document, Object, ObjectId};
use std::collections::BTreeMap;

/// 同一列允許的基線高度差 (pt)
const ROW_TOLERANCE: f32 = 2.0;
/// 沒有格線時，起點相差在此範圍內的文字視為同一欄
const COLUMN_TOLERANCE: f32 = 4.0;
/// 比這短的直線不當作欄界
const MIN_RULING_LENGTH: f32 = 4.0;
const EPSILON: f32 = 0.01;

/// `[a b c d e f]`，與 PDF 的矩陣寫法相同
type Matrix = [f32; 6];

const IDENTITY: Matrix = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];

fn translation(tx: f32, ty: f32) -> Matrix {
    [1.0, 0.0, 0.0, 1.0, tx, ty]
}

/// `m1 × m2`
fn multiply(m1: &Matrix, m2: &Matrix) -> Matrix {
    [
        m1[0] * m2[0] + m1[1] * m2[2],
        m1[0] * m2[1] + m1[1] * m2[3],
        m1[2] * m2[0] + m1[3] * m2[2],
        m1[2] * m2[1] + m1[3] * m2[3],
        m1[4] * m2[0] + m1[5] * m2[2] + m2[4],
        m1[4] * m2[1] + m1[5] * m2[3] + m2[5],
    ]
}

fn apply(m: &Matrix, x: f32, y: f32) -> (f32, f32) {
    (m[0] * x + m[2] * y + m[4], m[1] * x + m[3] * y + m[5])
}

fn number(operation: &Operation, index: usize) -> f32 {
    operation
        .operands
        .get(index)
        .and_then(|o| o.as_float().ok())
        .unwrap_or(0.0)
}

fn matrix_operand(operation: &Operation) -> Matrix {
    [
        number(operation, 0),
        number(operation, 1),
        number(operation, 2),
        number(operation, 3),
        number(operation, 4),
        number(operation, 5),
    ]
}

/// 字型沒有可用編碼時的退路：UTF-16BE (有 BOM) 或逐位元組
fn fallback_decode(bytes: &[u8]) -> String {
    match bytes {
        [0xFE, 0xFF, rest @ ..] => {
            let units: Vec<u16> = rest
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        }
        _ => bytes.iter().map(|&b| b as char).collect(),
    }
}

/// 一段文字的起點 (使用者座標，y 向上)
#[derive(Debug, Clone, PartialEq)]
pub struct TextFragment {
    pub x: f32,
    pub y: f32,
    pub text: String,
}

impl TextFragment {
    pub fn new(x: f32, y: f32, text: impl Into<String>) -> Self {
        Self {
            x,
            y,
            text: text.into(),
        }
    }
}

/// 一頁的文字片段與直向格線的 x 座標
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageLayout {
    pub fragments: Vec<TextFragment>,
    pub rulings: Vec<f32>,
}

struct LayoutReader<'a> {
    encodings: BTreeMap<Vec<u8>, Encoding<'a>>,
    font: Option<Vec<u8>>,
    ctm: Matrix,
    saved: Vec<Matrix>,
    line_matrix: Matrix,
    leading: f32,
    // 上一次顯示文字之後沒有移動，接續的文字併入同一片段
    continues_fragment: bool,
    path_start: Option<(f32, f32)>,
    path_current: Option<(f32, f32)>,
    pending_rulings: Vec<f32>,
    layout: PageLayout,
}

impl<'a> LayoutReader<'a> {
    fn new(encodings: BTreeMap<Vec<u8>, Encoding<'a>>) -> Self {
        Self {
            encodings,
            font: None,
            ctm: IDENTITY,
            saved: Vec::new(),
            line_matrix: IDENTITY,
            leading: 0.0,
            continues_fragment: false,
            path_start: None,
            path_current: None,
            pending_rulings: Vec::new(),
            layout: PageLayout::default(),
        }
    }

    fn move_line(&mut self, matrix: Matrix) {
        self.line_matrix = matrix;
        self.continues_fragment = false;
    }

    fn decode(&self, bytes: &[u8]) -> String {
        if let Some(encoding) = self.font.as_ref().and_then(|f| self.encodings.get(f)) {
            match Document::decode_text(encoding, bytes) {
                Ok(text) => return text,
                Err(e) => tracing::debug!("Falling back to raw text decoding: {}", e),
            }
        }
        fallback_decode(bytes)
    }

    fn show(&mut self, text: String) {
        if self.continues_fragment {
            if let Some(last) = self.layout.fragments.last_mut() {
                last.text.push_str(&text);
                return;
            }
        }
        let (x, y) = apply(&multiply(&self.line_matrix, &self.ctm), 0.0, 0.0);
        self.layout.fragments.push(TextFragment::new(x, y, text));
        self.continues_fragment = true;
    }

    fn show_operand(&mut self, operand: Option<&Object>) {
        let text = match operand {
            Some(Object::String(bytes, _)) => self.decode(bytes),
            Some(Object::Array(items)) => items
                .iter()
                .filter_map(|item| match item {
                    Object::String(bytes, _) => Some(self.decode(bytes)),
                    _ => None,
                })
                .collect(),
            _ => return,
        };
        self.show(text);
    }

    fn add_segment(&mut self, from: (f32, f32), to: (f32, f32)) {
        let (x0, y0) = apply(&self.ctm, from.0, from.1);
        let (x1, y1) = apply(&self.ctm, to.0, to.1);
        if (x1 - x0).abs() < 0.5 && (y1 - y0).abs() >= MIN_RULING_LENGTH {
            self.pending_rulings.push((x0 + x1) / 2.0);
        }
    }

    fn end_path(&mut self, painted: bool) {
        if painted {
            self.layout.rulings.append(&mut self.pending_rulings);
        } else {
            self.pending_rulings.clear();
        }
        self.path_start = None;
        self.path_current = None;
    }

    fn process(&mut self, operation: &Operation) {
        match operation.operator.as_str() {
            "q" => self.saved.push(self.ctm),
            "Q" => {
                if let Some(ctm) = self.saved.pop() {
                    self.ctm = ctm;
                }
            }
            "cm" => self.ctm = multiply(&matrix_operand(operation), &self.ctm),
            "BT" => self.move_line(IDENTITY),
            "ET" => self.continues_fragment = false,
            "Tf" => {
                self.font = operation
                    .operands
                    .first()
                    .and_then(|o| o.as_name().ok())
                    .map(|name| name.to_vec());
            }
            "TL" => self.leading = number(operation, 0),
            "Td" => {
                let moved = multiply(
                    &translation(number(operation, 0), number(operation, 1)),
                    &self.line_matrix,
                );
                self.move_line(moved);
            }
            "TD" => {
                self.leading = -number(operation, 1);
                let moved = multiply(
                    &translation(number(operation, 0), number(operation, 1)),
                    &self.line_matrix,
                );
                self.move_line(moved);
            }
            "Tm" => self.move_line(matrix_operand(operation)),
            "T*" => {
                let moved = multiply(&translation(0.0, -self.leading), &self.line_matrix);
                self.move_line(moved);
            }
            "Tj" | "TJ" => self.show_operand(operation.operands.first()),
            "'" => {
                let moved = multiply(&translation(0.0, -self.leading), &self.line_matrix);
                self.move_line(moved);
                self.show_operand(operation.operands.first());
            }
            "\"" => {
                let moved = multiply(&translation(0.0, -self.leading), &self.line_matrix);
                self.move_line(moved);
                self.show_operand(operation.operands.get(2));
            }
            "m" => {
                let point = (number(operation, 0), number(operation, 1));
                self.path_start = Some(point);
                self.path_current = Some(point);
            }
            "l" => {
                let point = (number(operation, 0), number(operation, 1));
                if let Some(current) = self.path_current {
                    self.add_segment(current, point);
                }
                self.path_current = Some(point);
            }
            "h" => {
                if let (Some(start), Some(current)) = (self.path_start, self.path_current) {
                    self.add_segment(current, start);
                    self.path_current = Some(start);
                }
            }
            "re" => {
                let (x, y) = (number(operation, 0), number(operation, 1));
                let (w, h) = (number(operation, 2), number(operation, 3));
                self.add_segment((x, y), (x, y + h));
                self.add_segment((x + w, y), (x + w, y + h));
            }
            "S" | "s" | "f" | "F" | "f*" | "B" | "B*" | "b" | "b*" => self.end_path(true),
            "n" => self.end_path(false),
            _ => {}
        }
    }
}

/// 走過一頁的內容串流，收集文字片段與直向格線
pub fn page_layout(document: &Document, page_id: ObjectId) -> Result<PageLayout> {
    let encodings: BTreeMap<Vec<u8>, Encoding> = match document.get_page_fonts(page_id) {
        Ok(fonts) => fonts
            .into_iter()
            .filter_map(|(name, font)| match font.get_font_encoding(document) {
                Ok(encoding) => Some((name, encoding)),
                Err(e) => {
                    tracing::debug!("Font {} has no usable encoding: {}", String::from_utf8_lossy(&name), e);
                    None
                }
            })
            .collect(),
        Err(e) => {
            tracing::debug!("Page fonts unavailable: {}", e);
            BTreeMap::new()
        }
    };

    let content = Content::decode(&document.get_page_content(page_id)?)?;
    let mut reader = LayoutReader::new(encodings);
    for operation in &content.operations {
        reader.process(operation);
    }

    let mut layout = reader.layout;
    layout.fragments.retain_mut(|fragment| {
        fragment.text = fragment.text.trim().to_string();
        !fragment.text.is_empty()
    });
    Ok(layout)
}

/// 由上而下分列；同一列依 x 排序
fn group_rows(fragments: &[TextFragment]) -> Vec<Vec<&TextFragment>> {
    let mut sorted: Vec<&TextFragment> = fragments.iter().collect();
    sorted.sort_by(|a, b| b.y.total_cmp(&a.y).then(a.x.total_cmp(&b.x)));

    let mut rows: Vec<(f32, Vec<&TextFragment>)> = Vec::new();
    for fragment in sorted {
        let same_row = rows
            .last()
            .is_some_and(|(baseline, _)| (baseline - fragment.y).abs() <= ROW_TOLERANCE);
        match rows.last_mut() {
            Some((_, row)) if same_row => row.push(fragment),
            _ => rows.push((fragment.y, vec![fragment])),
        }
    }
    rows.into_iter()
        .map(|(_, mut row)| {
            row.sort_by(|a, b| a.x.total_cmp(&b.x));
            row
        })
        .collect()
}

/// 欄的左界 (不含第一欄)：表格範圍內的格線，沒有時用文字起點分群
fn column_boundaries(rows: &[Vec<&TextFragment>], rulings: &[f32]) -> Vec<f32> {
    let mut xs: Vec<f32> = rows.iter().flatten().map(|f| f.x).collect();
    xs.sort_by(f32::total_cmp);
    let (Some(&min_x), Some(&max_x)) = (xs.first(), xs.last()) else {
        return Vec::new();
    };

    let mut inner: Vec<f32> = rulings
        .iter()
        .copied()
        .filter(|&r| r > min_x + EPSILON && r <= max_x + EPSILON)
        .collect();
    inner.sort_by(f32::total_cmp);
    inner.dedup_by(|b, a| (*b - *a).abs() < COLUMN_TOLERANCE);
    if !inner.is_empty() {
        return inner;
    }

    let mut starts: Vec<f32> = Vec::new();
    let mut cluster_start = min_x;
    for &x in &xs[1..] {
        if x - cluster_start > COLUMN_TOLERANCE {
            starts.push(x);
            cluster_start = x;
        }
    }
    starts
}

fn build_table(rows: &[Vec<&TextFragment>], rulings: &[f32]) -> Vec<RawTableRow> {
    let boundaries = column_boundaries(rows, rulings);
    rows.iter()
        .map(|row| {
            let mut cells = vec![String::new(); boundaries.len() + 1];
            for fragment in row {
                let column = boundaries
                    .iter()
                    .filter(|&&b| b <= fragment.x + EPSILON)
                    .count();
                let cell = &mut cells[column];
                if !cell.is_empty() {
                    cell.push(' ');
                }
                cell.push_str(&fragment.text);
            }
            cells
        })
        .collect()
}

/// 連續兩段以上文字的列組成一個表格；只有一段文字的列 (標題、註記) 結束表格
pub fn tables_from_layout(layout: &PageLayout) -> Vec<Vec<RawTableRow>> {
    let mut tables = Vec::new();
    let mut current: Vec<Vec<&TextFragment>> = Vec::new();

    for row in group_rows(&layout.fragments) {
        if row.len() < 2 {
            if !current.is_empty() {
                tables.push(build_table(&current, &layout.rulings));
                current.clear();
            }
            continue;
        }
        current.push(row);
    }
    if !current.is_empty() {
        tables.push(build_table(&current, &layout.rulings));
    }
    tables
}

/// 用 lopdf 讀取每頁的文字座標，再切出表格
pub struct LopdfTableSource {
    bytes: Vec<u8>,
}

impl LopdfTableSource {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

impl TableSource for LopdfTableSource {
    fn read_pages(&self) -> Result<Vec<PageTables>> {
        let document = Document::load_mem(&self.bytes)?;
        let pages = document.get_pages();
        if pages.is_empty() {
            return Err(EtlError::ExtractionError {
                message: "document has no pages".to_string(),
            });
        }

        let mut result = Vec::with_capacity(pages.len());
        for (page_number, page_id) in pages {
            let tables = match page_layout(&document, page_id) {
                Ok(layout) => {
                    tracing::debug!(
                        "Page {}: {} text fragments, {} rulings",
                        page_number,
                        layout.fragments.len(),
                        layout.rulings.len()
                    );
                    tables_from_layout(&layout)
                }
                Err(e) => {
                    tracing::warn!("⚠️ Page {} content could not be read: {}", page_number, e);
                    Vec::new()
                }
            };
            tracing::debug!("Page {}: {} tables", page_number, tables.len());
            result.push(PageTables {
                page_number: page_number as usize,
                tables,
            });
        }
        Ok(result)
    }
}
