pub mod adapters;
pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::{Cli, Command};
pub use config::TomlConfig;

pub use adapters::LocalStorage;
pub use app::pipelines::{PdfSheetPipeline, WorkbookPipeline, WorkbookTarget};
pub use core::etl::EtlEngine;
pub use domain::model::RunReport;
pub use utils::error::{EtlError, Result};
