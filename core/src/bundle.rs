use crate::{Error, Result};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::File;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::task;
use tracing::{debug, info};

/// A transient archive produced by [`ArchiveCodec::bundle`].
///
/// The archive file corresponds 1:1 to the file set present in
/// `source_dir` at bundle time. It is owned by the operation that created
/// it and removed after a successful transfer or on error cleanup.
#[derive(Debug, Clone)]
pub struct BundleArtifact {
    pub source_dir: PathBuf,
    pub archive_path: PathBuf,
    pub compressed: bool,
}

impl BundleArtifact {
    /// Removes the archive file. Missing files are ignored so cleanup can
    /// run on every exit path.
    pub async fn cleanup(&self) -> Result<()> {
        match fs::remove_file(&self.archive_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Builds and extracts gzip-compressed tar archives of directory trees.
///
/// The output is a standard `tar.gz` byte layout so backups remain
/// readable by external archive tools.
pub struct ArchiveCodec {
    work_dir: PathBuf,
    compress: bool,
}

impl ArchiveCodec {
    /// Creates a codec writing archives into `work_dir`.
    pub fn new<P: AsRef<Path>>(work_dir: P) -> Self {
        Self {
            work_dir: work_dir.as_ref().to_path_buf(),
            compress: true,
        }
    }

    pub fn uncompressed(mut self) -> Self {
        self.compress = false;
        self
    }

    /// Archives the full recursive contents of `source_dir` into a single
    /// file named `<bundle_name>.tar.gz` under the codec's work directory.
    ///
    /// Fails with `SourceNotFound` if the directory does not exist and
    /// with `EmptySource` if it contains no entries. An empty input is
    /// rejected rather than silently producing an empty archive.
    pub async fn bundle(&self, source_dir: &Path, bundle_name: &str) -> Result<BundleArtifact> {
        match fs::metadata(source_dir).await {
            Ok(meta) if meta.is_dir() => {}
            _ => {
                return Err(Error::SourceNotFound {
                    path: source_dir.display().to_string(),
                });
            }
        }
        let mut entries = fs::read_dir(source_dir).await?;
        if entries.next_entry().await?.is_none() {
            return Err(Error::EmptySource {
                path: source_dir.display().to_string(),
            });
        }

        fs::create_dir_all(&self.work_dir).await?;
        let extension = if self.compress { "tar.gz" } else { "tar" };
        let archive_path = self.work_dir.join(format!("{}.{}", bundle_name, extension));

        let source = source_dir.to_path_buf();
        let target = archive_path.clone();
        let compress = self.compress;
        task::spawn_blocking(move || write_archive(&source, &target, compress))
            .await
            .map_err(|e| Error::Other(format!("bundle task failed: {}", e)))??;

        info!(
            source = %source_dir.display(),
            archive = %archive_path.display(),
            "Bundled directory"
        );
        Ok(BundleArtifact {
            source_dir: source_dir.to_path_buf(),
            archive_path,
            compressed: self.compress,
        })
    }

    /// Extracts `archive_path` into `dest_dir`, creating the destination
    /// if absent. Existing files at the destination are overwritten
    /// without confirmation; callers wanting a non-destructive restore
    /// must pre-arrange an empty destination.
    pub async fn unbundle(&self, archive_path: &Path, dest_dir: &Path) -> Result<()> {
        if !fs::try_exists(archive_path).await? {
            return Err(Error::SourceNotFound {
                path: archive_path.display().to_string(),
            });
        }
        fs::create_dir_all(dest_dir).await?;

        let archive = archive_path.to_path_buf();
        let dest = dest_dir.to_path_buf();
        task::spawn_blocking(move || read_archive(&archive, &dest))
            .await
            .map_err(|e| Error::Other(format!("unbundle task failed: {}", e)))??;

        debug!(
            archive = %archive_path.display(),
            dest = %dest_dir.display(),
            "Unbundled archive"
        );
        Ok(())
    }
}

fn write_archive(source_dir: &Path, archive_path: &Path, compress: bool) -> Result<()> {
    let file = File::create(archive_path)?;
    if compress {
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder.append_dir_all(".", source_dir)?;
        builder.into_inner()?.finish()?;
    } else {
        let mut builder = tar::Builder::new(file);
        builder.append_dir_all(".", source_dir)?;
        builder.into_inner()?;
    }
    Ok(())
}

fn read_archive(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    let corrupt = |e: std::io::Error| Error::CorruptArchive {
        path: archive_path.display().to_string(),
        reason: e.to_string(),
    };
    let file = File::open(archive_path)?;
    let gzipped = archive_path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e == "gz" || e == "tgz")
        .unwrap_or(false);
    if gzipped {
        let mut archive = tar::Archive::new(GzDecoder::new(file));
        archive.unpack(dest_dir).map_err(corrupt)?;
    } else {
        let mut archive = tar::Archive::new(file);
        archive.unpack(dest_dir).map_err(corrupt)?;
    }
    Ok(())
}
