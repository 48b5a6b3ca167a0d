use crate::domain::model::{
    CellValue, DatasetQuery, HeaderLabel, HeaderMapping, PageTables, RemoteRecord, RunReport,
};
use crate::utils::error::Result;
use async_trait::async_trait;

pub trait Storage: Send + Sync {
    fn read_file(&self, path: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// 分頁文件的表格來源 (PDF、預先匯出的 CSV …)
pub trait TableSource: Send + Sync {
    fn read_pages(&self) -> Result<Vec<PageTables>>;
}

/// 回傳 JSON 的語意比對服務
#[async_trait]
pub trait JsonCompletion: Send + Sync {
    async fn complete_json(&self, prompt: &str) -> Result<serde_json::Value>;
}

#[async_trait]
pub trait HeaderMatcher: Send + Sync {
    fn strategy_name(&self) -> &'static str;

    async fn match_headers(
        &self,
        pdf_headers: &[HeaderLabel],
        target_headers: &[String],
    ) -> Result<HeaderMapping>;
}

#[async_trait]
impl<T: HeaderMatcher + ?Sized> HeaderMatcher for Box<T> {
    fn strategy_name(&self) -> &'static str {
        (**self).strategy_name()
    }

    async fn match_headers(
        &self,
        pdf_headers: &[HeaderLabel],
        target_headers: &[String],
    ) -> Result<HeaderMapping> {
        (**self).match_headers(pdf_headers, target_headers).await
    }
}

/// 名稱完全比對失敗時的後備策略
#[async_trait]
pub trait NameMatchStrategy: Send + Sync {
    fn strategy_name(&self) -> &'static str;

    async fn best_match(&self, name: &str, candidates: &[String]) -> Result<Option<String>>;
}

#[async_trait]
impl<T: NameMatchStrategy + ?Sized> NameMatchStrategy for Box<T> {
    fn strategy_name(&self) -> &'static str {
        (**self).strategy_name()
    }

    async fn best_match(&self, name: &str, candidates: &[String]) -> Result<Option<String>> {
        (**self).best_match(name, candidates).await
    }
}

#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn fetch_all(&self, query: &DatasetQuery) -> Result<Vec<RemoteRecord>>;
}

/// 試算表的第一個工作表
#[async_trait]
pub trait SheetStore: Send + Sync {
    /// 整個工作表的值，第一列為表頭
    async fn read_values(&self) -> Result<Vec<Vec<String>>>;

    /// `range` 不含工作表名稱，例如 `A2:ZZ10000`
    async fn clear_range(&self, range: &str) -> Result<()>;

    /// 從 `start_cell` 開始逐列寫入
    async fn write_rows(&self, start_cell: &str, rows: &[Vec<String>]) -> Result<()>;
}

/// 工作簿範本；列與欄皆從 1 開始
pub trait TemplateBook {
    fn sheet_names(&self) -> Vec<String>;

    fn has_sheet(&self, sheet: &str) -> bool {
        self.sheet_names().iter().any(|name| name == sheet)
    }

    fn rename_sheet(&mut self, index: usize, new_name: &str) -> Result<()>;

    fn max_column(&self, sheet: &str) -> Result<u32>;

    /// 儲存格的顯示值；公式儲存格回傳 `None`
    fn value(&self, sheet: &str, col: u32, row: u32) -> Result<Option<String>>;

    /// 不含開頭 `=` 的公式
    fn formula(&self, sheet: &str, col: u32, row: u32) -> Result<Option<String>>;

    fn insert_row(&mut self, sheet: &str, row: u32) -> Result<()>;

    /// 複製字型、框線、填滿、數值格式、保護與對齊
    fn copy_style(&mut self, sheet: &str, col: u32, from_row: u32, to_row: u32) -> Result<()>;

    fn set_formula(&mut self, sheet: &str, col: u32, row: u32, formula: &str) -> Result<()>;

    fn set_value(&mut self, sheet: &str, col: u32, row: u32, value: &CellValue) -> Result<()>;

    fn set_number_format(&mut self, sheet: &str, col: u32, row: u32, format: &str) -> Result<()>;

    fn set_bold(&mut self, sheet: &str, col: u32, row: u32) -> Result<()>;

    /// 刪除工作表的所有儲存格
    fn clear_sheet(&mut self, sheet: &str) -> Result<()>;

    fn to_bytes(&self) -> Result<Vec<u8>>;
}

#[async_trait]
pub trait Pipeline: Send + Sync {
    type Extracted: Send;
    type Transformed: Send;

    fn name(&self) -> &str;
    async fn extract(&self) -> Result<Self::Extracted>;
    async fn transform(&self, data: Self::Extracted) -> Result<Self::Transformed>;
    async fn load(&self, result: Self::Transformed) -> Result<RunReport>;
}
