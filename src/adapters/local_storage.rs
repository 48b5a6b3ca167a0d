use crate::domain::ports::Storage;
use crate::utils::error::Result;
use std::path::{Path, PathBuf};

/// 以目錄為根的本機檔案存取；絕對路徑不受根目錄影響
#[derive(Debug, Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn resolve(&self, path: &str) -> PathBuf {
        self.base_path.join(Path::new(path))
    }
}

impl Storage for LocalStorage {
    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let full_path = self.resolve(path);
        tracing::debug!("Reading {}", full_path.display());
        Ok(tokio::fs::read(full_path).await?)
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let full_path = self.resolve(path);

        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::write(&full_path, data).await?;
        tracing::debug!("Wrote {} bytes to {}", data.len(), full_path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path());

        storage.write_file("out/運営実績.xlsx", b"data").await.unwrap();
        let data = storage.read_file("out/運営実績.xlsx").await.unwrap();

        assert_eq!(data, b"data");
    }

    #[tokio::test]
    async fn test_absolute_paths_ignore_base() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("template.xlsx");
        std::fs::write(&file, b"xlsx").unwrap();

        let storage = LocalStorage::new("/nonexistent-base");
        let data = storage.read_file(file.to_str().unwrap()).await.unwrap();
        assert_eq!(data, b"xlsx");
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let storage = LocalStorage::new(".");
        let result = storage.read_file("does/not/exist.bin").await;
        assert!(matches!(result, Err(crate::utils::error::EtlError::IoError(_))));
    }
}
