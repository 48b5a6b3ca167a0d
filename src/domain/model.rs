use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// 一列表格儲存格，`None` 已轉成空字串並去除前後空白
pub type RawTableRow = Vec<String>;

/// 表頭標籤；兩列表頭合併後為 `"{上層}_{下層}"`
pub type HeaderLabel = String;

/// 單一頁面上偵測到的所有表格
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageTables {
    pub page_number: usize,
    pub tables: Vec<Vec<RawTableRow>>,
}

/// 以表頭為鍵的一筆資料，欄位順序與表頭一致
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub fields: Vec<(HeaderLabel, String)>,
}

impl Record {
    /// 依表頭位置對齊：多出的儲存格捨棄，缺少的補空字串
    pub fn from_row(headers: &[HeaderLabel], row: &[String]) -> Self {
        let fields = headers
            .iter()
            .enumerate()
            .map(|(i, header)| (header.clone(), row.get(i).cloned().unwrap_or_default()))
            .collect();
        Self { fields }
    }

    pub fn get(&self, header: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(h, _)| h == header)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// 抽取結果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedTable {
    pub headers: Vec<HeaderLabel>,
    pub records: Vec<Record>,
}

/// PDF 表頭到目標表頭的對應；建立後不可變
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct HeaderMapping {
    entries: BTreeMap<HeaderLabel, Option<String>>,
}

impl HeaderMapping {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (HeaderLabel, Option<String>)>,
    {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    pub fn target_for(&self, source: &str) -> Option<&str> {
        self.entries.get(source).and_then(|t| t.as_deref())
    }

    pub fn contains_source(&self, source: &str) -> bool {
        self.entries.contains_key(source)
    }

    pub fn matched_count(&self) -> usize {
        self.entries.values().filter(|t| t.is_some()).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_deref()))
    }
}

/// 記錄 API 回傳的一筆資料；每個欄位包成 `{ "type": ..., "value": ... }`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteRecord {
    pub fields: serde_json::Map<String, Value>,
}

impl RemoteRecord {
    pub fn raw_value(&self, code: &str) -> Option<&Value> {
        self.fields.get(code).and_then(|field| field.get("value"))
    }

    /// 欄位的顯示文字；多選欄位以 `", "` 串接
    pub fn text(&self, code: &str) -> String {
        match self.raw_value(code) {
            Some(value) => value_to_text(value),
            None => String::new(),
        }
    }

    /// `$id` 欄位，API 以字串回傳
    pub fn identity(&self) -> Option<u64> {
        match self.raw_value("$id")? {
            Value::String(s) => s.trim().parse().ok(),
            Value::Number(n) => n.as_u64(),
            _ => None,
        }
    }

    pub fn integer(&self, code: &str) -> Option<i64> {
        match self.raw_value(code)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                // 使用者 / 組織選擇欄位是 {code, name} 物件
                Value::Object(obj) => obj
                    .get("name")
                    .or_else(|| obj.get("code"))
                    .map(value_to_text)
                    .unwrap_or_default(),
                other => value_to_text(other),
            })
            .collect::<Vec<_>>()
            .join(", "),
        Value::Object(_) => value.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    Matched,
    Unmatched,
}

/// 主資料與名稱相符的副資料
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedEntry {
    pub master: RemoteRecord,
    pub secondary: Option<RemoteRecord>,
    pub status: MatchStatus,
}

/// 記錄 API 的資料集 (應用程式) 查詢條件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetQuery {
    pub app_id: u64,
    pub api_token: String,
    pub base_query: String,
}

/// 寫入工作表或工作簿的儲存格值
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Empty,
    Text(String),
    Integer(i64),
    Date(chrono::NaiveDate),
}

/// 一次執行的結果摘要
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub pipeline: String,
    pub summary: String,
    pub output: Option<String>,
    pub records_written: usize,
    pub warnings: Vec<String>,
}
