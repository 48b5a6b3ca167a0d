use crate::domain::model::CellValue;
use crate::domain::ports::TemplateBook;
use crate::utils::error::{EtlError, Result};
use chrono::NaiveDate;
use std::io::Cursor;
use umya_spreadsheet::{Spreadsheet, Worksheet};

/// Excel 日期序號的起點
fn excel_epoch() -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(1899, 12, 30)
}

fn workbook_error(message: impl Into<String>) -> EtlError {
    EtlError::WorkbookError {
        message: message.into(),
    }
}

/// 以 umya-spreadsheet 讀寫的 `.xlsx` 範本
pub struct UmyaBook {
    book: Spreadsheet,
}

impl UmyaBook {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let book = umya_spreadsheet::reader::xlsx::read_reader(Cursor::new(bytes), true)
            .map_err(|e| workbook_error(format!("cannot read template: {:?}", e)))?;
        Ok(Self { book })
    }

    pub fn from_spreadsheet(book: Spreadsheet) -> Self {
        Self { book }
    }

    fn sheet(&self, name: &str) -> Result<&Worksheet> {
        self.book
            .get_sheet_by_name(name)
            .ok_or_else(|| workbook_error(format!("no sheet named '{}'", name)))
    }

    fn sheet_mut(&mut self, name: &str) -> Result<&mut Worksheet> {
        self.book
            .get_sheet_by_name_mut(name)
            .ok_or_else(|| workbook_error(format!("no sheet named '{}'", name)))
    }
}

impl TemplateBook for UmyaBook {
    fn sheet_names(&self) -> Vec<String> {
        self.book
            .get_sheet_collection()
            .iter()
            .map(|ws| ws.get_name().to_string())
            .collect()
    }

    fn rename_sheet(&mut self, index: usize, new_name: &str) -> Result<()> {
        let sheet = self
            .book
            .get_sheet_mut(&index)
            .ok_or_else(|| workbook_error(format!("no sheet at index {}", index)))?;
        sheet.set_name(new_name);
        Ok(())
    }

    fn max_column(&self, sheet: &str) -> Result<u32> {
        Ok(self.sheet(sheet)?.get_highest_column())
    }

    fn value(&self, sheet: &str, col: u32, row: u32) -> Result<Option<String>> {
        let Some(cell) = self.sheet(sheet)?.get_cell((col, row)) else {
            return Ok(None);
        };
        if cell.is_formula() {
            return Ok(None);
        }
        let value = cell.get_value();
        Ok((!value.is_empty()).then(|| value.to_string()))
    }

    fn formula(&self, sheet: &str, col: u32, row: u32) -> Result<Option<String>> {
        let Some(cell) = self.sheet(sheet)?.get_cell((col, row)) else {
            return Ok(None);
        };
        if !cell.is_formula() {
            return Ok(None);
        }
        let formula = cell.get_formula();
        Ok(Some(formula.strip_prefix('=').unwrap_or(formula).to_string()))
    }

    fn insert_row(&mut self, sheet: &str, row: u32) -> Result<()> {
        self.sheet_mut(sheet)?.insert_new_row(&row, &1);
        Ok(())
    }

    fn copy_style(&mut self, sheet: &str, col: u32, from_row: u32, to_row: u32) -> Result<()> {
        let ws = self.sheet_mut(sheet)?;
        let style = ws.get_style((col, from_row)).clone();
        ws.set_style((col, to_row), style);
        Ok(())
    }

    fn set_formula(&mut self, sheet: &str, col: u32, row: u32, formula: &str) -> Result<()> {
        self.sheet_mut(sheet)?
            .get_cell_mut((col, row))
            .set_formula(formula);
        Ok(())
    }

    fn set_value(&mut self, sheet: &str, col: u32, row: u32, value: &CellValue) -> Result<()> {
        let cell = self.sheet_mut(sheet)?.get_cell_mut((col, row));
        match value {
            CellValue::Empty => {
                cell.set_value_string("");
            }
            CellValue::Text(text) => {
                cell.set_value_string(text.as_str());
            }
            CellValue::Integer(n) => {
                cell.set_value_number(*n as f64);
            }
            CellValue::Date(date) => {
                let epoch = excel_epoch().ok_or_else(|| workbook_error("invalid date epoch"))?;
                let serial = (*date - epoch).num_days();
                cell.set_value_number(serial as f64);
            }
        }
        Ok(())
    }

    fn set_number_format(&mut self, sheet: &str, col: u32, row: u32, format: &str) -> Result<()> {
        self.sheet_mut(sheet)?
            .get_style_mut((col, row))
            .get_number_format_mut()
            .set_format_code(format);
        Ok(())
    }

    fn set_bold(&mut self, sheet: &str, col: u32, row: u32) -> Result<()> {
        self.sheet_mut(sheet)?
            .get_style_mut((col, row))
            .get_font_mut()
            .set_bold(true);
        Ok(())
    }

    fn clear_sheet(&mut self, sheet: &str) -> Result<()> {
        let ws = self.sheet_mut(sheet)?;
        let highest_row = ws.get_highest_row();
        if highest_row > 0 {
            ws.remove_row(&1, &highest_row);
        }
        Ok(())
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::new());
        umya_spreadsheet::writer::xlsx::write_writer(&self.book, &mut cursor)
            .map_err(|e| workbook_error(format!("cannot write workbook: {:?}", e)))?;
        Ok(cursor.into_inner())
    }
}
