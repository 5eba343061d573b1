//! Dump files on local disk: export, gzip, cleanup

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::adapter::{DumpScope, DumpTool};
use crate::domain::ConnectionConfig;
use crate::error::{CoreError, Result};

pub const DUMP_FILE_NAME: &str = "data.dump";
pub const LOCAL_BACKUP_FILE_NAME: &str = "local_data.dump";

/// Magic bytes for gzip compression
const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];

/// Raw and compressed dump paths owned by one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpArtifact {
    pub dump_path: PathBuf,
    pub compressed_path: PathBuf,
}

impl DumpArtifact {
    /// `{tmp_dir}/data.dump` and `{tmp_dir}/data.dump.gz`
    pub fn in_dir(tmp_dir: &Path) -> Self {
        let dump_path = tmp_dir.join(DUMP_FILE_NAME);
        let compressed_path = gz_path(&dump_path);
        Self {
            dump_path,
            compressed_path,
        }
    }

    /// Create the working directory, clear leftovers of earlier runs and
    /// start an empty dump file.
    pub async fn create(tmp_dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(tmp_dir).await?;
        let artifact = Self::in_dir(tmp_dir);
        artifact.cleanup().await;
        tokio::fs::File::create(&artifact.dump_path).await?;
        Ok(artifact)
    }

    /// Delete both files; missing files are fine
    pub async fn cleanup(&self) {
        remove_files(&[&self.dump_path, &self.compressed_path]).await;
    }
}

/// `<path>.gz`
pub fn gz_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".gz");
    PathBuf::from(name)
}

/// Delete files, logging instead of failing
pub async fn remove_files(paths: &[&Path]) {
    for path in paths {
        match tokio::fs::remove_file(path).await {
            Ok(()) => info!("Deleted {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to delete {}: {}", path.display(), e),
        }
    }
}

/// Append a full dump of `db_name` to `dump_path`
pub async fn export_to_file(
    tool: &dyn DumpTool,
    server: &ConnectionConfig,
    db_name: &str,
    dump_path: &Path,
) -> Result<()> {
    info!("Dumping {} to {}", db_name, dump_path.display());
    let config = server.with_database(db_name);

    tool.dump_to_file(&config, &DumpScope::Full, dump_path, true)
        .await?
        .check(CoreError::Export)?;

    let size = tokio::fs::metadata(dump_path).await?.len();
    if size == 0 {
        return Err(CoreError::Export(format!(
            "Dump of {} produced an empty file",
            db_name
        )));
    }

    info!(bytes = size, "Dump created");
    Ok(())
}

/// Gzip `dump_path` into `<dump_path>.gz` and remove the original
pub async fn compress(dump_path: &Path) -> Result<PathBuf> {
    info!("Gzipping {}", dump_path.display());
    let source = dump_path.to_path_buf();
    let target = gz_path(dump_path);

    let compressed = tokio::task::spawn_blocking({
        let target = target.clone();
        move || -> std::io::Result<()> {
            let mut input = BufReader::new(File::open(&source)?);
            let output = BufWriter::new(File::create(&target)?);
            let mut encoder = GzEncoder::new(output, Compression::default());
            std::io::copy(&mut input, &mut encoder)?;
            encoder.finish()?.into_inner().map_err(|e| e.into_error())?;
            Ok(())
        }
    })
    .await
    .map_err(|e| CoreError::Internal(format!("Compression task failed: {}", e)))?;

    if let Err(e) = compressed {
        remove_files(&[&target]).await;
        return Err(CoreError::Compress(format!(
            "Failed to gzip {}: {}",
            dump_path.display(),
            e
        )));
    }

    remove_files(&[dump_path]).await;
    Ok(target)
}

/// Gunzip `gz_path` into `output_path`, leaving the archive in place
pub async fn decompress(gz_path: &Path, output_path: &Path) -> Result<()> {
    info!("Decompressing {} to {}", gz_path.display(), output_path.display());
    let source = gz_path.to_path_buf();
    let target = output_path.to_path_buf();

    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut reader = BufReader::new(File::open(&source).map_err(|e| {
            CoreError::Restore(format!("Failed to open dump file: {}", e))
        })?);
        let mut magic = [0u8; 2];
        if reader.read_exact(&mut magic).is_err() || magic != GZIP_MAGIC {
            return Err(CoreError::Restore(format!(
                "{} is not a gzip file",
                source.display()
            )));
        }

        // Reopen file for decompression
        let file = File::open(&source)
            .map_err(|e| CoreError::Restore(format!("Failed to open dump file: {}", e)))?;
        let mut decoder = GzDecoder::new(file);
        let mut output_file = File::create(&target).map_err(|e| {
            CoreError::Restore(format!("Failed to create decompressed file: {}", e))
        })?;

        std::io::copy(&mut decoder, &mut output_file)
            .map_err(|e| CoreError::Restore(format!("Failed to decompress gzip file: {}", e)))?;
        Ok(())
    })
    .await
    .map_err(|e| CoreError::Internal(format!("Decompression task failed: {}", e)))?
}
