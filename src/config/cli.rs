use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "report-sync")]
#[command(about = "Sync facility reports between PDF tables, record APIs, spreadsheets and workbooks")]
pub struct Cli {
    #[arg(long, short, default_value = "report-sync.toml", help = "TOML configuration file")]
    pub config: PathBuf,

    #[arg(long, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, help = "Log CPU and memory usage per phase")]
    pub monitor: bool,

    #[arg(long, help = "Run every read and match step but write nothing")]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// 把 PDF 表格寫入試算表的第一個工作表
    PdfToSheet {
        #[arg(long, conflicts_with = "tables_dir", required_unless_present = "tables_dir")]
        pdf: Option<PathBuf>,

        /// 已匯出的 page-N-table-M.csv 目錄
        #[arg(long)]
        tables_dir: Option<PathBuf>,

        /// 只列出抽出的表頭與前幾筆資料
        #[arg(long)]
        inspect: bool,
    },

    /// 從記錄 API 產生運営実績工作簿
    BuildWorkbook {
        #[arg(long, help = "As-of date (YYYY-MM-DD), defaults to today")]
        reference_date: Option<NaiveDate>,

        #[arg(long, help = "Override workbook.template_path")]
        template: Option<String>,

        #[arg(long, help = "Override workbook.output_dir")]
        output_dir: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pdf_to_sheet_requires_exactly_one_source() {
        let cli = Cli::try_parse_from(["report-sync", "pdf-to-sheet", "--pdf", "list.pdf"]).unwrap();
        assert!(matches!(cli.command, Command::PdfToSheet { pdf: Some(_), .. }));
        assert_eq!(cli.config, PathBuf::from("report-sync.toml"));

        assert!(Cli::try_parse_from(["report-sync", "pdf-to-sheet"]).is_err());
        assert!(Cli::try_parse_from([
            "report-sync",
            "pdf-to-sheet",
            "--pdf",
            "a.pdf",
            "--tables-dir",
            "tables"
        ])
        .is_err());
    }

    #[test]
    fn test_build_workbook_parses_reference_date() {
        let cli = Cli::try_parse_from([
            "report-sync",
            "--config",
            "prod.toml",
            "--dry-run",
            "build-workbook",
            "--reference-date",
            "2026-10-01",
        ])
        .unwrap();

        assert!(cli.dry_run);
        match cli.command {
            Command::BuildWorkbook { reference_date, .. } => {
                assert_eq!(reference_date, NaiveDate::from_ymd_opt(2026, 10, 1));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
