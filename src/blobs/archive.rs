// zodbbackup/src/blobs/archive.rs
use anyhow::{Context, Result};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::File;
use std::path::Path;
use tar::Builder;
use tracing::debug;
use walkdir::WalkDir;

/// Creates a GZipped TAR archive of a blob storage directory.
///
/// Paths inside the archive are relative to `source_dir`. The archive is
/// written to `archive_dest_path`, whose parent must exist.
///
/// # Returns
/// Number of files archived.
pub fn create_tar_gz_archive(source_dir: &Path, archive_dest_path: &Path) -> Result<usize> {
    if !source_dir.is_dir() {
        return Err(anyhow::anyhow!(
            "Source for archival is not a directory: {}",
            source_dir.display()
        ));
    }

    debug!(
        "Creating tar.gz archive from {} to {}",
        source_dir.display(),
        archive_dest_path.display()
    );

    let archive_file = File::create(archive_dest_path)
        .with_context(|| format!("Failed to create archive file: {}", archive_dest_path.display()))?;
    let enc = GzEncoder::new(archive_file, Compression::default());
    let mut tar_builder = Builder::new(enc);

    let mut files = 0;
    for entry in WalkDir::new(source_dir).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk directory: {}", source_dir.display()))?;
        let path = entry.path();
        let name = path.strip_prefix(source_dir).with_context(|| {
            format!(
                "Failed to strip prefix {} from {}",
                source_dir.display(),
                path.display()
            )
        })?;

        if name.as_os_str().is_empty() {
            continue;
        }

        if entry.file_type().is_dir() {
            tar_builder
                .append_dir(name, path)
                .with_context(|| format!("Failed to append directory {} to archive", path.display()))?;
        } else {
            tar_builder.append_path_with_name(path, name).with_context(|| {
                format!("Failed to append file {} as {} to archive", path.display(), name.display())
            })?;
            files += 1;
        }
    }

    let encoder = tar_builder.into_inner().with_context(|| {
        format!(
            "Failed to finish tar stream for archive: {}",
            archive_dest_path.display()
        )
    })?;
    encoder.finish().with_context(|| {
        format!(
            "Failed to finish Gzip encoding for archive: {}",
            archive_dest_path.display()
        )
    })?;

    Ok(files)
}

/// Extracts a GZipped TAR archive into an existing directory.
pub fn extract_tar_gz_archive(archive_path: &Path, extract_to_dir: &Path) -> Result<()> {
    if !archive_path.is_file() {
        return Err(anyhow::anyhow!(
            "Archive for extraction is not a file: {}",
            archive_path.display()
        ));
    }

    debug!(
        "Extracting tar.gz archive from {} to {}",
        archive_path.display(),
        extract_to_dir.display()
    );

    let archive_file = File::open(archive_path)
        .with_context(|| format!("Failed to open archive file: {}", archive_path.display()))?;
    let gz_decoder = flate2::read::GzDecoder::new(archive_file);
    let mut archive = tar::Archive::new(gz_decoder);

    archive.unpack(extract_to_dir).with_context(|| {
        format!(
            "Failed to unpack archive {} to {}",
            archive_path.display(),
            extract_to_dir.display()
        )
    })
}
