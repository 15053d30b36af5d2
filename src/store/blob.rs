/*!
Content-addressed store for the original and transformed record XML.

Blobs are keyed by the lowercase hex MD5 of the exact uncompressed UTF-8
bytes and laid out as
`<basePath>/<H0>/<H1>/<H2>/<hash>.xml.gz`, where `H0..H2` are the first
three hex characters uppercased. The content is a bare gzip stream of the
XML bytes with no wrapping framing, so two workers racing on the same hash
produce byte-identical files.
*/

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::PathBuf;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::error::{OaiError, Result};
use crate::model::SnapshotMetadata;
use crate::util::md5_hex;

/// Content-addressed, gzip-compressed metadata blob store.
#[derive(Debug, Clone)]
pub struct MetadataBlobStore {
    config: StoreConfig,
}

impl MetadataBlobStore {
    /// A blob store rooted at the configured base path.
    pub fn new(config: StoreConfig) -> Self {
        MetadataBlobStore { config }
    }

    /// The partitioned path of a blob with the given hash.
    fn blob_path(&self, hash: &str) -> PathBuf {
        let mut chars = hash.chars();
        let mut partition = self.config.base_path.clone();
        for _ in 0..3 {
            let c = chars.next().unwrap_or('0').to_ascii_uppercase();
            partition = partition.join(c.to_string());
        }
        partition.join(format!("{}.xml.gz", hash))
    }

    /// Store the record XML and return its hash.
    ///
    /// Writing is idempotent: if a blob with the same hash already exists
    /// the file is left untouched. Otherwise the compressed bytes go to a
    /// temporary sibling first and are renamed into place.
    pub fn store(&self, snapshot: &SnapshotMetadata, xml: &str) -> Result<String> {
        let hash = md5_hex(xml);
        let path = self.blob_path(&hash);
        if path.exists() {
            debug!(
                snapshot_id = snapshot.snapshot_id,
                hash = %hash,
                "blob already stored"
            );
            return Ok(hash);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = path.with_extension(format!("{}.tmp", Uuid::new_v4()));
        let mut encoder = GzEncoder::new(File::create(&tmp_path)?, Compression::default());
        encoder.write_all(xml.as_bytes())?;
        encoder.finish()?;
        if let Err(err) = fs::rename(&tmp_path, &path) {
            // A concurrent writer may have won the rename with identical
            // bytes. Only fail if the blob is still missing.
            let _ = fs::remove_file(&tmp_path);
            if !path.exists() {
                return Err(err.into());
            }
        }
        debug!(snapshot_id = snapshot.snapshot_id, hash = %hash, "blob stored");
        Ok(hash)
    }

    /// Fetch the record XML stored under the given hash.
    pub fn get(&self, snapshot: &SnapshotMetadata, hash: &str) -> Result<String> {
        let path = self.blob_path(hash);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(OaiError::not_found("metadata blob", hash));
            }
            Err(err) => return Err(err.into()),
        };
        let mut xml = String::new();
        GzDecoder::new(file).read_to_string(&mut xml)?;
        debug!(snapshot_id = snapshot.snapshot_id, hash = %hash, "blob read");
        Ok(xml)
    }

    /// Scan the partitions and report the blob count.
    pub fn clean_and_optimize(&self) -> Result<bool> {
        let mut blobs = 0u64;
        let mut stack = vec![self.config.base_path.clone()];
        while let Some(dir) = stack.pop() {
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            for entry in entries {
                let entry = entry?;
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else if path.extension().map(|ext| ext == "gz").unwrap_or(false) {
                    blobs += 1;
                }
            }
        }
        info!(blobs, "blob store scanned");
        Ok(true)
    }
}
