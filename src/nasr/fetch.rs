//! Cycle archive download and extraction.
//!
//! The release is a zip of zips. The outer archive is streamed to a temp
//! file first so the whole download never sits in memory, then the nested
//! archives are walked for the tabular files we index.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Tabular files the index build requires. A cycle directory missing any of
/// them is treated as not loadable.
pub const REQUIRED_FILES: &[&str] = &[
    "NAV_BASE.csv",
    "FIX_BASE.csv",
    "APT_BASE.csv",
    "AWY_SEG.csv",
    "DP_RTE.csv",
    "STAR_RTE.csv",
    "ILS_BASE.csv",
];

/// Download timeout for the full archive.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);

/// Make sure the cycle's tabular files exist on disk, downloading and
/// extracting the dated archive when they do not. Returns the cycle
/// directory.
pub async fn ensure_cycle_on_disk(
    data_dir: &Path,
    archive_url_base: &str,
    cycle: NaiveDate,
) -> Result<PathBuf> {
    let cycle_dir = data_dir.join(cycle.format("%Y-%m-%d").to_string());
    if cycle_complete(&cycle_dir) {
        debug!(dir = %cycle_dir.display(), "cycle already cached");
        return Ok(cycle_dir);
    }
    tokio::fs::create_dir_all(&cycle_dir).await?;

    let url = format!(
        "{}/{}_CSV.zip",
        archive_url_base.trim_end_matches('/'),
        cycle.format("%d_%b_%Y")
    );
    info!(%url, "downloading airspace cycle");

    let client = reqwest::Client::builder()
        .timeout(DOWNLOAD_TIMEOUT)
        .build()?;
    let mut response = client
        .get(&url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .context("cycle archive request failed")?;

    // Stream to a temp file next to the cycle dir
    let tmp_path = cycle_dir.join(".download.zip");
    {
        let mut tmp = tokio::fs::File::create(&tmp_path).await?;
        while let Some(chunk) = response.chunk().await? {
            tmp.write_all(&chunk).await?;
        }
        tmp.flush().await?;
    }

    let extract_dir = cycle_dir.clone();
    let tmp_for_task = tmp_path.clone();
    tokio::task::spawn_blocking(move || extract_archive(&tmp_for_task, &extract_dir)).await??;
    let _ = tokio::fs::remove_file(&tmp_path).await;

    if !cycle_complete(&cycle_dir) {
        anyhow::bail!("cycle archive was missing required tabular files");
    }
    Ok(cycle_dir)
}

pub fn cycle_complete(cycle_dir: &Path) -> bool {
    REQUIRED_FILES.iter().all(|f| cycle_dir.join(f).exists())
}

/// Walk the outer archive; nested zips are opened in memory (they are small
/// once split per data type), plain CSV entries are written out directly.
fn extract_archive(archive_path: &Path, dest: &Path) -> Result<()> {
    let file = std::fs::File::open(archive_path)?;
    let mut outer = zip::ZipArchive::new(file)?;
    for i in 0..outer.len() {
        let mut entry = outer.by_index(i)?;
        let name = entry.name().to_string();
        if name.ends_with(".zip") {
            let mut nested_bytes = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut nested_bytes)?;
            extract_nested(&nested_bytes, dest)?;
        } else if let Some(wanted) = wanted_name(&name) {
            let mut bytes = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut bytes)?;
            std::fs::write(dest.join(wanted), bytes)?;
        }
    }
    Ok(())
}

fn extract_nested(bytes: &[u8], dest: &Path) -> Result<()> {
    let mut nested = zip::ZipArchive::new(std::io::Cursor::new(bytes))?;
    for i in 0..nested.len() {
        let mut entry = nested.by_index(i)?;
        let name = entry.name().to_string();
        if let Some(wanted) = wanted_name(&name) {
            let mut out = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut out)?;
            std::fs::write(dest.join(wanted), out)?;
        }
    }
    Ok(())
}

/// Match archive entries against the required file set by basename, so
/// nested folder layouts do not matter.
fn wanted_name(entry_name: &str) -> Option<&'static str> {
    let base = entry_name.rsplit(['/', '\\']).next()?;
    REQUIRED_FILES.iter().find(|f| **f == base).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_wanted_name_matches_basename() {
        assert_eq!(wanted_name("CSV_Data/NAV_BASE.csv"), Some("NAV_BASE.csv"));
        assert_eq!(wanted_name("NAV_BASE.csv"), Some("NAV_BASE.csv"));
        assert_eq!(wanted_name("CSV_Data/NAV_DME.csv"), None);
    }

    #[test]
    fn test_extract_zip_within_zip() {
        let dir = tempfile::tempdir().unwrap();

        // inner zip holding one required csv
        let mut inner = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        inner
            .start_file("APT_BASE.csv", zip::write::SimpleFileOptions::default())
            .unwrap();
        inner.write_all(b"ARPT_ID\nBOS\n").unwrap();
        let inner_bytes = inner.finish().unwrap().into_inner();

        // outer zip holding the inner zip plus noise
        let outer_path = dir.path().join("outer.zip");
        let mut outer =
            zip::ZipWriter::new(std::fs::File::create(&outer_path).unwrap());
        outer
            .start_file("APT_CSV.zip", zip::write::SimpleFileOptions::default())
            .unwrap();
        outer.write_all(&inner_bytes).unwrap();
        outer
            .start_file("README.txt", zip::write::SimpleFileOptions::default())
            .unwrap();
        outer.write_all(b"ignore me").unwrap();
        outer.finish().unwrap();

        extract_archive(&outer_path, dir.path()).unwrap();
        let extracted = std::fs::read_to_string(dir.path().join("APT_BASE.csv")).unwrap();
        assert!(extracted.starts_with("ARPT_ID"));
    }
}
