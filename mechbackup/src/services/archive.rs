//! Tar/gzip archive codec for project directories.
//!
//! Creation walks the source tree and streams it through a gzipped tar
//! builder; extraction refuses entries that would land outside the target
//! directory. Both directions are synchronous and are run on the blocking
//! pool by the orchestrator.

use crate::error::AppError;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::path::{Component, Path};
use walkdir::WalkDir;

#[derive(Debug, Clone)]
pub struct ArchiveOptions {
    /// Maximum uncompressed source size in bytes.
    pub max_source_size: u64,

    /// Lowercase extensions (without the dot) to include. `None` includes
    /// every file.
    pub extension_filter: Option<Vec<String>>,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            max_source_size: crate::config::DEFAULT_MAX_BACKUP_SIZE,
            extension_filter: None,
        }
    }
}

fn extension_matches(path: &Path, filter: &Option<Vec<String>>) -> bool {
    match filter {
        None => true,
        Some(allowed) => path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .is_some_and(|ext| allowed.contains(&ext)),
    }
}

/// Create a gzipped tar archive of `source_dir` at `dest`. Entry paths are
/// relative to `source_dir`. Returns the size of the written archive.
pub fn create_archive(
    source_dir: &Path,
    dest: &Path,
    options: &ArchiveOptions,
) -> Result<u64, AppError> {
    if !source_dir.is_dir() {
        return Err(AppError::NotFound(format!(
            "Source directory not found: {}",
            source_dir.display()
        )));
    }

    // Size check before any bytes are written.
    let mut total: u64 = 0;
    for entry in WalkDir::new(source_dir) {
        let entry =
            entry.map_err(|e| AppError::Filesystem(format!("Failed to walk source tree: {e}")))?;
        if entry.file_type().is_file() && extension_matches(entry.path(), &options.extension_filter)
        {
            let meta = entry
                .metadata()
                .map_err(|e| AppError::Filesystem(format!("Failed to read metadata: {e}")))?;
            total += meta.len();
        }
    }
    if total > options.max_source_size {
        return Err(AppError::Validation(format!(
            "Source exceeds the maximum backup size ({total} > {} bytes)",
            options.max_source_size
        )));
    }

    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| AppError::Filesystem(format!("Failed to create archive directory: {e}")))?;
    }

    let archive_file = File::create(dest)
        .map_err(|e| AppError::Filesystem(format!("Failed to create archive file: {e}")))?;
    let encoder = GzEncoder::new(archive_file, Compression::default());
    let mut builder = tar::Builder::new(encoder);

    for entry in WalkDir::new(source_dir) {
        let entry =
            entry.map_err(|e| AppError::Filesystem(format!("Failed to walk source tree: {e}")))?;
        let path = entry.path();
        let name = path.strip_prefix(source_dir).unwrap_or(path);
        if name.as_os_str().is_empty() {
            continue; // the root itself
        }

        let result = if entry.file_type().is_dir() {
            // Directory entries are only carried when nothing is filtered;
            // a filtered archive recreates parents implicitly on unpack.
            if options.extension_filter.is_none() {
                builder.append_dir(name, path)
            } else {
                Ok(())
            }
        } else if entry.file_type().is_file() {
            if extension_matches(path, &options.extension_filter) {
                builder.append_path_with_name(path, name)
            } else {
                Ok(())
            }
        } else {
            Ok(()) // symlinks and specials are not archived
        };
        result.map_err(|e| {
            AppError::Filesystem(format!("Failed to append {} to archive: {e}", path.display()))
        })?;
    }

    let encoder = builder
        .into_inner()
        .map_err(|e| AppError::Filesystem(format!("Failed to finalize archive: {e}")))?;
    encoder
        .finish()
        .map_err(|e| AppError::Filesystem(format!("Failed to finish gzip stream: {e}")))?;

    let size = std::fs::metadata(dest)
        .map_err(|e| AppError::Filesystem(format!("Failed to stat archive: {e}")))?
        .len();
    Ok(size)
}

/// Extract a gzipped tar archive into `target_dir`, creating it if absent.
/// Entries with absolute paths or `..` components are rejected outright;
/// pre-existing unrelated files in the target are left alone.
pub fn extract_archive(archive_path: &Path, target_dir: &Path) -> Result<(), AppError> {
    if !archive_path.is_file() {
        return Err(AppError::NotFound(format!(
            "Archive not found: {}",
            archive_path.display()
        )));
    }

    std::fs::create_dir_all(target_dir)
        .map_err(|e| AppError::Filesystem(format!("Failed to create target directory: {e}")))?;

    let archive_file = File::open(archive_path)
        .map_err(|e| AppError::Filesystem(format!("Failed to open archive: {e}")))?;
    let mut archive = tar::Archive::new(GzDecoder::new(archive_file));

    let entries = archive
        .entries()
        .map_err(|e| AppError::Filesystem(format!("Failed to read archive: {e}")))?;
    for entry in entries {
        let mut entry =
            entry.map_err(|e| AppError::Filesystem(format!("Corrupt archive entry: {e}")))?;
        let path = entry
            .path()
            .map_err(|e| AppError::Filesystem(format!("Invalid entry path: {e}")))?
            .into_owned();

        let escapes = path.components().any(|c| {
            matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_))
        });
        if escapes {
            return Err(AppError::Filesystem(format!(
                "Archive entry escapes target directory: {}",
                path.display()
            )));
        }

        entry.unpack_in(target_dir).map_err(|e| {
            AppError::Filesystem(format!("Failed to unpack {}: {e}", path.display()))
        })?;
    }

    Ok(())
}

/// Hex SHA-256 of a file, streamed.
pub fn file_sha256(path: &Path) -> Result<String, AppError> {
    let mut file =
        File::open(path).map_err(|e| AppError::from_io(e, &path.display().to_string()))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)
        .map_err(|e| AppError::Filesystem(format!("Failed to hash {}: {e}", path.display())))?;
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn round_trip_preserves_paths_and_contents() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let source = tmp.path().join("proj");
        fs::create_dir_all(source.join("drawings"))?;
        fs::write(source.join("notes.txt"), "hello")?;
        fs::write(source.join("drawings/plan.dxf"), b"dxf-bytes")?;
        fs::create_dir(source.join("empty"))?;

        let archive = tmp.path().join("out.tar.gz");
        let size = create_archive(&source, &archive, &ArchiveOptions::default())?;
        assert!(size > 0);

        let target = tmp.path().join("restored");
        extract_archive(&archive, &target)?;

        assert_eq!(fs::read_to_string(target.join("notes.txt"))?, "hello");
        assert_eq!(fs::read(target.join("drawings/plan.dxf"))?, b"dxf-bytes");
        assert!(target.join("empty").is_dir());
        Ok(())
    }

    #[test]
    fn missing_source_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let err = create_archive(
            &tmp.path().join("nope"),
            &tmp.path().join("out.tar.gz"),
            &ArchiveOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn oversize_source_is_rejected_before_writing() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let source = tmp.path().join("proj");
        fs::create_dir(&source)?;
        fs::write(source.join("big.bin"), vec![0u8; 64])?;

        let archive = tmp.path().join("out.tar.gz");
        let options = ArchiveOptions {
            max_source_size: 16,
            ..Default::default()
        };
        let err = create_archive(&source, &archive, &options).unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert!(!archive.exists());
        Ok(())
    }

    #[test]
    fn extension_filter_limits_entries() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let source = tmp.path().join("proj");
        fs::create_dir(&source)?;
        fs::write(source.join("plan.DXF"), "keep")?;
        fs::write(source.join("report.pdf"), "keep")?;
        fs::write(source.join("cache.bin"), "drop")?;

        let archive = tmp.path().join("out.tar.gz");
        let options = ArchiveOptions {
            extension_filter: Some(vec!["dxf".into(), "pdf".into()]),
            ..Default::default()
        };
        create_archive(&source, &archive, &options)?;

        let target = tmp.path().join("restored");
        extract_archive(&archive, &target)?;
        assert!(target.join("plan.DXF").exists());
        assert!(target.join("report.pdf").exists());
        assert!(!target.join("cache.bin").exists());
        Ok(())
    }

    #[test]
    fn corrupt_archive_fails() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let bogus = tmp.path().join("bogus.tar.gz");
        fs::write(&bogus, b"this is not a gzip stream")?;

        let err = extract_archive(&bogus, &tmp.path().join("out")).unwrap_err();
        assert_eq!(err.kind(), "filesystem");
        Ok(())
    }

    #[test]
    fn traversal_entries_are_rejected() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let evil = tmp.path().join("evil.tar.gz");

        // tar::Builder refuses to write `..` paths, so build a benign entry
        // of the same name length and patch the header bytes afterwards.
        let mut buf = Vec::new();
        {
            let mut builder = tar::Builder::new(&mut buf);
            let data = b"owned";
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, "xx/escape.txt", &data[..])?;
            builder.finish()?;
        }
        buf[..13].copy_from_slice(b"../escape.txt");
        let mut header = tar::Header::new_gnu();
        header.as_mut_bytes().copy_from_slice(&buf[..512]);
        header.set_cksum();
        buf[..512].copy_from_slice(header.as_bytes());

        let file = File::create(&evil)?;
        let mut encoder = GzEncoder::new(file, Compression::default());
        std::io::Write::write_all(&mut encoder, &buf)?;
        encoder.finish()?;

        let target = tmp.path().join("target");
        let err = extract_archive(&evil, &target).unwrap_err();
        assert_eq!(err.kind(), "filesystem");
        assert!(!tmp.path().join("escape.txt").exists());
        Ok(())
    }

    #[test]
    fn extraction_keeps_unrelated_files() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let source = tmp.path().join("proj");
        fs::create_dir(&source)?;
        fs::write(source.join("a.txt"), "a")?;

        let archive = tmp.path().join("out.tar.gz");
        create_archive(&source, &archive, &ArchiveOptions::default())?;

        let target = tmp.path().join("restored");
        fs::create_dir(&target)?;
        fs::write(target.join("existing.txt"), "untouched")?;

        extract_archive(&archive, &target)?;
        assert_eq!(fs::read_to_string(target.join("existing.txt"))?, "untouched");
        assert_eq!(fs::read_to_string(target.join("a.txt"))?, "a");
        Ok(())
    }

    #[test]
    fn sha256_is_stable() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let file = tmp.path().join("f.bin");
        fs::write(&file, "hello")?;
        // Known digest of "hello"
        assert_eq!(
            file_sha256(&file)?,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        Ok(())
    }
}
