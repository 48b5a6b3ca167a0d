pub mod pdf_sheet_pipeline;
pub mod workbook_pipeline;

pub use pdf_sheet_pipeline::{PdfSheetPipeline, SheetPlan};
pub use workbook_pipeline::{output_file_name, WorkbookPipeline, WorkbookTarget};
