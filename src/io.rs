use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

use crate::error::CliError;

pub async fn read_file_to_string_async(path: &Path) -> Result<String> {
    if !path.exists() {
        bail!(CliError::Validation(format!("file not found: {}", path.display())));
    }
    let data = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading file: {}", path.display()))?;
    Ok(data)
}

/// Missing files read as empty; used by insert, which may create the file.
pub async fn read_file_or_empty_async(path: &Path) -> Result<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(s) => Ok(s),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e).with_context(|| format!("reading file: {}", path.display())),
    }
}

pub async fn write_file_async(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating directory: {}", parent.display()))?;
        }
    }
    tokio::fs::write(path, content)
        .await
        .with_context(|| format!("writing file: {}", path.display()))?;
    Ok(())
}

pub async fn file_size_async(path: &Path) -> Result<u64> {
    let meta = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("reading metadata: {}", path.display()))?;
    Ok(meta.len())
}

/// `@path` reads the file; anything else is taken as inline code.
pub async fn read_code_argument(arg: &str) -> Result<(String, Option<PathBuf>)> {
    match arg.strip_prefix('@') {
        Some(p) if !p.trim().is_empty() => {
            let path = PathBuf::from(p.trim());
            let code = read_file_to_string_async(&path).await?;
            Ok((code, Some(path)))
        }
        _ => Ok((arg.to_string(), None)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn code_argument_from_file_or_inline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.py");
        write_file_async(&path, "print(1)\n").await.unwrap();

        let (code, from) = read_code_argument(&format!("@{}", path.display())).await.unwrap();
        assert_eq!(code, "print(1)\n");
        assert_eq!(from.as_deref(), Some(path.as_path()));

        let (code, from) = read_code_argument("x = 1").await.unwrap();
        assert_eq!(code, "x = 1");
        assert!(from.is_none());

        let err = read_code_argument("@/no/such/file.rs").await.unwrap_err();
        assert!(err.to_string().contains("file not found"));
    }

    #[tokio::test]
    async fn missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read_file_or_empty_async(&dir.path().join("nope")).await.unwrap(), "");
    }
}
