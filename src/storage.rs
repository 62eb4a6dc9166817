use chrono::{DateTime, Local};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::io;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs;
use tokio::io::AsyncReadExt;

/// Identifies exactly which input a run consumed.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct SourceFingerprint {
    pub name: String,
    pub size: u64,
    pub sha256: String,
    pub modified: Option<u64>,
    pub modified_readable: Option<String>,
}

impl SourceFingerprint {
    pub fn of(name: impl Into<String>, content: &[u8], modified: Option<SystemTime>) -> Self {
        let sha256 = format!("{:x}", Sha256::digest(content));
        Self {
            name: name.into(),
            size: content.len() as u64,
            sha256,
            modified: modified
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs()),
            modified_readable: modified.map(|t| {
                DateTime::<Local>::from(t)
                    .format("%Y-%m-%d %H:%M:%S %A %z")
                    .to_string()
            }),
        }
    }
}

/// A source file's text together with the fingerprint of those same bytes.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub fingerprint: SourceFingerprint,
    pub text: String,
}

pub async fn read_source(path: &Path) -> io::Result<SourceFile> {
    let mut file = fs::File::open(path).await?;
    let modified = file.metadata().await?.modified().ok();
    let mut content = Vec::new();
    file.read_to_end(&mut content).await?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let fingerprint = SourceFingerprint::of(name, &content, modified);
    let text =
        String::from_utf8(content).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(SourceFile { fingerprint, text })
}
