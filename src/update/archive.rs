use flate2::read::GzDecoder;
use std::fmt::Write as _;
use std::io::{self, Read, Write};
use tracing::{debug, info, warn};

use super::error::{Result, UpdateError};
use super::github::RawArtifact;
use crate::config::UpdateConfig;

const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];
const ZIP_MAGIC: [u8; 2] = [0x50, 0x4B];
const DUMP_LEN: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    GzipTar,
    Zip,
    Unknown,
}

impl ArchiveFormat {
    /// Classify by the first two bytes; `None` when there are fewer than two
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        let magic: [u8; 2] = bytes.get(..2)?.try_into().ok()?;
        Some(match magic {
            GZIP_MAGIC => ArchiveFormat::GzipTar,
            ZIP_MAGIC => ArchiveFormat::Zip,
            _ => ArchiveFormat::Unknown,
        })
    }
}

/// The executable payload found inside an archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedBinary {
    pub entry_name: String,
    pub bytes: Vec<u8>,
}

/// Extract the configured binary from `artifact`
pub fn extract(artifact: RawArtifact, config: &UpdateConfig) -> Result<ExtractedBinary> {
    let name = &artifact.asset.name;
    let format = ArchiveFormat::sniff(&artifact.bytes).ok_or_else(|| {
        UpdateError::MalformedArtifact {
            name: name.clone(),
            len: artifact.bytes.len(),
        }
    })?;

    match format {
        ArchiveFormat::GzipTar => {
            debug!(artifact = %name, "detected gzip file");
            extract_tar_gz(&artifact.bytes, name, &config.binary_name)
        }
        ArchiveFormat::Zip => {
            debug!(artifact = %name, "detected zip file");
            extract_zip(&artifact.bytes, name, &config.zip_entry_name(), &config.project)
        }
        ArchiveFormat::Unknown => {
            let dump = hex_dump(&artifact.bytes[..artifact.bytes.len().min(DUMP_LEN)]);
            warn!(artifact = %name, "unsupported archive format:\n{}", dump);
            Err(UpdateError::UnsupportedFormat {
                name: name.clone(),
                dump,
            })
        }
    }
}

/// Stream through the tar entries; the first regular file named `entry`
/// wins.
fn extract_tar_gz(bytes: &[u8], name: &str, entry: &str) -> Result<ExtractedBinary> {
    let archive_err = |e: io::Error| UpdateError::Archive {
        name: name.to_string(),
        reason: e.to_string(),
    };

    let mut archive = tar::Archive::new(GzDecoder::new(bytes));
    for item in archive.entries().map_err(archive_err)? {
        let mut item = item.map_err(archive_err)?;
        let is_match = item.path_bytes().as_ref() == entry.as_bytes()
            && item.header().entry_type() == tar::EntryType::Regular;

        if !is_match {
            debug!("ignored '{}'", String::from_utf8_lossy(&item.path_bytes()));
            continue;
        }

        // Sizes come from unverified headers; never preallocate from them.
        let mut content = Vec::new();
        item.read_to_end(&mut content).map_err(archive_err)?;
        check_length(name, entry, content.len(), item.size())?;
        debug!("copied {} bytes from {}", content.len(), entry);

        return Ok(ExtractedBinary {
            entry_name: entry.to_string(),
            bytes: content,
        });
    }

    Err(UpdateError::BinaryNotFound {
        name: name.to_string(),
        entry: entry.to_string(),
    })
}

/// Spool to a temp file and scan every entry; a later match overwrites an
/// earlier one.
fn extract_zip(bytes: &[u8], name: &str, entry: &str, project: &str) -> Result<ExtractedBinary> {
    let mut spool = tempfile::Builder::new()
        .prefix(&format!("{}-update-", project))
        .tempfile()
        .map_err(|e| UpdateError::from_io(&std::env::temp_dir(), e))?;
    let spool_path = spool.path().to_path_buf();

    let result = spool
        .write_all(bytes)
        .and_then(|()| spool.flush())
        .map_err(|e| UpdateError::from_io(&spool_path, e))
        .and_then(|()| scan_zip(spool.reopen(), name, entry));

    if let Err(e) = spool.close() {
        warn!(
            "removing temporary file '{}' failed: {}",
            spool_path.display(),
            e
        );
    }

    result
}

fn scan_zip(file: io::Result<std::fs::File>, name: &str, entry: &str) -> Result<ExtractedBinary> {
    let archive_err = |reason: String| UpdateError::Archive {
        name: name.to_string(),
        reason,
    };

    let file = file.map_err(|e| archive_err(e.to_string()))?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| archive_err(e.to_string()))?;

    let mut found = None;
    for index in 0..archive.len() {
        let mut file = archive
            .by_index(index)
            .map_err(|e| archive_err(e.to_string()))?;
        if !file.is_file() || file.name() != entry {
            continue;
        }

        let mut content = Vec::new();
        file.read_to_end(&mut content)
            .map_err(|e| archive_err(e.to_string()))?;
        check_length(name, entry, content.len(), file.size())?;
        debug!("copied {} bytes from {}", content.len(), entry);
        found = Some(content);
    }

    let bytes = found.ok_or_else(|| UpdateError::BinaryNotFound {
        name: name.to_string(),
        entry: entry.to_string(),
    })?;
    info!(entry, size = bytes.len(), "extracted binary from zip");

    Ok(ExtractedBinary {
        entry_name: entry.to_string(),
        bytes,
    })
}

fn check_length(name: &str, entry: &str, read: usize, declared: u64) -> Result<()> {
    if read as u64 == declared {
        return Ok(());
    }
    Err(UpdateError::Archive {
        name: name.to_string(),
        reason: format!("{} declares {} bytes but holds {}", entry, declared, read),
    })
}

/// Offset, hex and printable columns, sixteen bytes per line
fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::new();
    for (line, chunk) in bytes.chunks(16).enumerate() {
        let _ = write!(out, "{:08x} ", line * 16);
        for byte in chunk {
            let _ = write!(out, " {:02x}", byte);
        }
        for _ in chunk.len()..16 {
            out.push_str("   ");
        }
        out.push_str("  |");
        out.extend(chunk.iter().map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '.'
            }
        }));
        out.push_str("|\n");
    }
    out
}
