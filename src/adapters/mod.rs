pub mod csv_tables;
pub mod gemini;
pub mod google_auth;
pub mod google_sheets;
pub mod kintone;
pub mod local_storage;
pub mod pdf_tables;
pub mod xlsx_book;

pub use csv_tables::CsvTableSource;
pub use gemini::GeminiClient;
pub use google_auth::{ServiceAccountAuth, SheetsAuth};
pub use google_sheets::GoogleSheetsStore;
pub use kintone::KintoneClient;
pub use local_storage::LocalStorage;
pub use pdf_tables::LopdfTableSource;
pub use xlsx_book::UmyaBook;
