pub mod etl;
pub mod extractor;
pub mod formula;
pub mod header_matcher;
pub mod reconciler;
pub mod sheet_writer;
pub mod template;

pub use crate::domain::model::{ExtractedTable, HeaderMapping, MergedEntry, Record, RunReport};
pub use crate::domain::ports::{Pipeline, Storage};
pub use crate::utils::error::Result;
