//! A1 參照工具與公式平移。
//!
//! 插入新列時，範本上一列的公式要搬到新列：相對參照依列差平移，
//! `$` 固定的部分不動，引號內的字串與工作表名稱不處理。

use crate::utils::error::{EtlError, Result};
use regex::Regex;
use std::sync::OnceLock;

/// Excel 的最大欄 (XFD)
const MAX_COLUMN: u32 = 16_384;
const MAX_ROW: u32 = 1_048_576;

fn reference_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(\$?)([A-Za-z]{1,3})(\$?)([0-9]+)").expect("static reference pattern")
    })
}

/// `"D"` → 4
pub fn column_index(letters: &str) -> Option<u32> {
    if letters.is_empty() || letters.len() > 3 {
        return None;
    }
    let mut index: u32 = 0;
    for ch in letters.chars() {
        if !ch.is_ascii_alphabetic() {
            return None;
        }
        index = index * 26 + (ch.to_ascii_uppercase() as u32 - 'A' as u32 + 1);
    }
    (index <= MAX_COLUMN).then_some(index)
}

/// 4 → `"D"`
pub fn column_letters(mut index: u32) -> String {
    let mut letters = Vec::new();
    while index > 0 {
        let rem = (index - 1) % 26;
        letters.push((b'A' + rem as u8) as char);
        index = (index - 1) / 26;
    }
    letters.iter().rev().collect()
}

fn is_reference_boundary(ch: Option<char>) -> bool {
    match ch {
        None => true,
        Some(c) => !(c.is_ascii_alphanumeric() || c == '_' || c == '.'),
    }
}

fn shift(value: u32, delta: i64, max: u32, reference: &str) -> Result<u32> {
    let shifted = value as i64 + delta;
    if shifted < 1 || shifted > max as i64 {
        return Err(EtlError::WorkbookError {
            message: format!("reference {} moves outside the sheet", reference),
        });
    }
    Ok(shifted as u32)
}

fn translate_segment(segment: &str, row_delta: i64, col_delta: i64) -> Result<String> {
    let mut out = String::with_capacity(segment.len());
    let mut last = 0;

    for caps in reference_pattern().captures_iter(segment) {
        let whole = caps.get(0).expect("capture 0 always present");
        let before = segment[..whole.start()].chars().next_back();
        let after = segment[whole.end()..].chars().next();
        if !is_reference_boundary(before) || !is_reference_boundary(after) || after == Some('(') {
            continue;
        }

        let col_abs = &caps[1];
        let row_abs = &caps[3];
        let Some(col) = column_index(&caps[2]) else {
            continue;
        };
        let Ok(row) = caps[4].parse::<u32>() else {
            continue;
        };

        let new_col = if col_abs.is_empty() {
            shift(col, col_delta, MAX_COLUMN, whole.as_str())?
        } else {
            col
        };
        let new_row = if row_abs.is_empty() {
            shift(row, row_delta, MAX_ROW, whole.as_str())?
        } else {
            row
        };

        out.push_str(&segment[last..whole.start()]);
        out.push_str(&format!(
            "{}{}{}{}",
            col_abs,
            column_letters(new_col),
            row_abs,
            new_row
        ));
        last = whole.end();
    }

    out.push_str(&segment[last..]);
    Ok(out)
}

/// 平移公式中的相對參照；`formula` 不含開頭的 `=`
pub fn translate_formula(formula: &str, row_delta: i64, col_delta: i64) -> Result<String> {
    let mut out = String::with_capacity(formula.len());
    let mut segment = String::new();
    let mut quote: Option<char> = None;

    for ch in formula.chars() {
        match quote {
            Some(q) => {
                out.push(ch);
                if ch == q {
                    quote = None;
                }
            }
            None if ch == '"' || ch == '\'' => {
                out.push_str(&translate_segment(&segment, row_delta, col_delta)?);
                segment.clear();
                out.push(ch);
                quote = Some(ch);
            }
            None => segment.push(ch),
        }
    }

    if quote.is_some() {
        return Err(EtlError::WorkbookError {
            message: format!("unterminated quote in formula: {}", formula),
        });
    }
    out.push_str(&translate_segment(&segment, row_delta, col_delta)?);
    Ok(out)
}
