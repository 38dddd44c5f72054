use std::fs;
use std::path::Path;
use std::thread;

use studio_contracts::records::{data_url, mime_for_extension, ImageRecord};

use crate::error::StudioError;

/// Reads every file on its own thread and returns the records in input
/// order once all reads finish. Any failed read rejects the whole set.
pub fn ingest_files<P: AsRef<Path> + Sync>(paths: &[P]) -> Result<Vec<ImageRecord>, StudioError> {
    thread::scope(|scope| {
        let handles: Vec<_> = paths
            .iter()
            .map(|path| scope.spawn(move || ingest_file(path.as_ref())))
            .collect();
        handles
            .into_iter()
            .zip(paths)
            .map(|(handle, path)| {
                handle.join().unwrap_or_else(|_| {
                    Err(StudioError::Ingestion {
                        path: path.as_ref().to_path_buf(),
                        source: std::io::Error::other("reader thread panicked"),
                    })
                })
            })
            .collect()
    })
}

pub fn ingest_file(path: &Path) -> Result<ImageRecord, StudioError> {
    let ingestion_error = |source| StudioError::Ingestion {
        path: path.to_path_buf(),
        source,
    };
    let bytes = fs::read(path).map_err(ingestion_error)?;
    let canonical = fs::canonicalize(path).map_err(ingestion_error)?;
    let mime = path
        .extension()
        .and_then(|value| value.to_str())
        .map(mime_for_extension)
        .unwrap_or("image/png");
    let name = path
        .file_name()
        .map(|value| value.to_string_lossy().to_string())
        .unwrap_or_default();
    Ok(ImageRecord::new(
        file_url(&canonical),
        data_url(mime, &bytes),
        name,
    ))
}

fn file_url(path: &Path) -> String {
    let text = path.to_string_lossy().replace('\\', "/");
    if text.starts_with('/') {
        format!("file://{text}")
    } else {
        format!("file:///{text}")
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::ingest_files;
    use crate::error::StudioError;

    #[test]
    fn ingest_preserves_input_order_and_encodes_payloads() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut paths = Vec::new();
        for (idx, name) in ["b.png", "a.jpg", "c.webp"].iter().enumerate() {
            let path = temp.path().join(name);
            fs::write(&path, format!("image-{idx}"))?;
            paths.push(path);
        }

        let records = ingest_files(&paths)?;
        let names: Vec<&str> = records.iter().map(|record| record.name.as_str()).collect();
        assert_eq!(names, vec!["b.png", "a.jpg", "c.webp"]);
        assert!(records[1].payload.starts_with("data:image/jpeg;base64,"));
        assert_eq!(records[0].decode_bytes()?, b"image-0".to_vec());
        assert!(records[2].display_url.starts_with("file://"));
        assert!(records[2].display_url.ends_with("c.webp"));
        assert_ne!(records[0].id, records[1].id);
        Ok(())
    }

    #[test]
    fn one_missing_file_rejects_the_batch() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let present = temp.path().join("present.png");
        fs::write(&present, b"ok")?;
        let missing = temp.path().join("missing.png");

        let err = ingest_files(&[present, missing.clone()]).err();
        match err {
            Some(StudioError::Ingestion { path, .. }) => assert_eq!(path, missing),
            other => panic!("expected ingestion failure, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn empty_input_yields_no_records() -> anyhow::Result<()> {
        let paths: Vec<std::path::PathBuf> = Vec::new();
        assert!(ingest_files(&paths)?.is_empty());
        Ok(())
    }
}
