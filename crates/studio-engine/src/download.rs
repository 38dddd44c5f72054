use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use studio_contracts::records::ImageRecord;

use crate::error::StudioError;

/// Saves scheduled by [`schedule_downloads`]. One worker thread writes them
/// in order; `wait` returns the written paths.
pub struct DownloadBatch {
    targets: Vec<PathBuf>,
    worker: JoinHandle<Result<Vec<PathBuf>, StudioError>>,
}

impl DownloadBatch {
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn targets(&self) -> Vec<PathBuf> {
        self.targets.clone()
    }

    /// Stops at the first failed save.
    pub fn wait(self) -> Result<Vec<PathBuf>, StudioError> {
        let first = self.targets.first().cloned().unwrap_or_default();
        self.worker.join().unwrap_or_else(|_| {
            Err(StudioError::Download {
                path: first,
                message: "save thread panicked".to_string(),
            })
        })
    }
}

/// Schedules one save per record, in the given order, with `stagger`
/// between consecutive saves.
pub fn schedule_downloads(
    records: &[ImageRecord],
    out_dir: &Path,
    stagger: Duration,
) -> Result<DownloadBatch, StudioError> {
    fs::create_dir_all(out_dir).map_err(|err| StudioError::Download {
        path: out_dir.to_path_buf(),
        message: err.to_string(),
    })?;

    let mut used = HashSet::new();
    let jobs: Vec<(ImageRecord, PathBuf)> = records
        .iter()
        .map(|record| {
            let target = out_dir.join(unique_file_name(&record.name, &mut used));
            (record.clone(), target)
        })
        .collect();
    let targets = jobs.iter().map(|(_, path)| path.clone()).collect();
    let worker = thread::spawn(move || {
        let mut saved = Vec::with_capacity(jobs.len());
        for (idx, (record, path)) in jobs.iter().enumerate() {
            if idx > 0 && !stagger.is_zero() {
                thread::sleep(stagger);
            }
            saved.push(save_record(record, path)?);
        }
        Ok(saved)
    });
    Ok(DownloadBatch { targets, worker })
}

fn save_record(record: &ImageRecord, path: &Path) -> Result<PathBuf, StudioError> {
    let download_error = |message: String| StudioError::Download {
        path: path.to_path_buf(),
        message,
    };
    let bytes = record
        .decode_bytes()
        .map_err(|err| download_error(format!("invalid base64 payload: {err}")))?;
    fs::write(path, bytes).map_err(|err| download_error(err.to_string()))?;
    Ok(path.to_path_buf())
}

fn unique_file_name(name: &str, used: &mut HashSet<String>) -> String {
    let sanitized = sanitize_file_name(name);
    if used.insert(sanitized.clone()) {
        return sanitized;
    }
    let (stem, ext) = match sanitized.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), format!(".{ext}")),
        _ => (sanitized.clone(), String::new()),
    };
    let mut counter = 2;
    loop {
        let candidate = format!("{stem}-{counter}{ext}");
        if used.insert(candidate.clone()) {
            return candidate;
        }
        counter += 1;
    }
}

fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_control() || matches!(ch, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|')
            {
                '_'
            } else {
                ch
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "image.png".to_string()
    } else {
        cleaned
    }
}
