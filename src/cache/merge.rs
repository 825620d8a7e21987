//! Merging binary caches from several device runs
//!
//! Sources are folded in the order given. A key seen again in a later
//! source replaces the earlier value, except the platform info key: every
//! source that carries it must carry the same bytes, since a merged cache
//! can only target one driver.

use super::container::{decode_file, write_container, CacheRecords};
use crate::config::CacheConfig;
use crate::error::{DevfarmError, DevfarmResult};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Outcome of a merge written to disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeSummary {
    /// Sources that existed and were read
    pub sources_read: usize,
    /// Sources skipped because the file did not exist
    pub sources_missing: usize,
    /// Records in the merged output
    pub records: usize,
    /// Where the merged cache was written
    pub output: PathBuf,
}

/// Folds binary caches together under the platform info rule
#[derive(Debug, Clone)]
pub struct CacheMerger {
    platform_info_key: Vec<u8>,
}

impl CacheMerger {
    pub fn new(platform_info_key: impl Into<Vec<u8>>) -> Self {
        Self {
            platform_info_key: platform_info_key.into(),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.platform_info_key.as_bytes())
    }

    pub fn platform_info_key(&self) -> &[u8] {
        &self.platform_info_key
    }

    /// Merge the containers at `paths`, in order. Missing files are skipped.
    pub fn merge<P: AsRef<Path>>(&self, paths: &[P]) -> DevfarmResult<CacheRecords> {
        self.merge_counting(paths).map(|(records, _, _)| records)
    }

    /// Merge and write the result to `output`.
    ///
    /// Nothing is written when reading or merging any source fails.
    pub fn merge_to_file<P: AsRef<Path>>(
        &self,
        paths: &[P],
        output: &Path,
    ) -> DevfarmResult<MergeSummary> {
        let (merged, sources_read, sources_missing) = self.merge_counting(paths)?;
        write_container(&merged, output)?;

        info!(
            "Merged {} records from {} binary caches into {}",
            merged.len(),
            sources_read,
            output.display()
        );
        Ok(MergeSummary {
            sources_read,
            sources_missing,
            records: merged.len(),
            output: output.to_path_buf(),
        })
    }

    /// Fold one parsed source into the accumulator
    pub fn absorb(&self, acc: &mut CacheRecords, source: CacheRecords) -> DevfarmResult<()> {
        for (key, value) in source.iter() {
            if key == self.platform_info_key.as_slice() {
                if let Some(existing) = acc.get(key) {
                    if existing != value {
                        return Err(DevfarmError::ConflictingPlatformInfo {
                            existing_value: existing.to_vec(),
                            new_value: value.to_vec(),
                        });
                    }
                    continue;
                }
            }
            acc.insert(key.to_vec(), value.to_vec());
        }
        Ok(())
    }

    fn merge_counting<P: AsRef<Path>>(
        &self,
        paths: &[P],
    ) -> DevfarmResult<(CacheRecords, usize, usize)> {
        let mut merged = CacheRecords::new();
        let mut read = 0;
        let mut missing = 0;

        for path in paths {
            let path = path.as_ref();
            let bytes = match fs::read(path) {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!("No binary cache at {}, skipping", path.display());
                    missing += 1;
                    continue;
                }
                Err(e) => {
                    return Err(DevfarmError::io(
                        format!("reading binary cache {}", path.display()),
                        e,
                    ))
                }
            };

            debug!("Merging binary cache {}", path.display());
            let source = decode_file(path, &bytes)?;
            self.absorb(&mut merged, source)?;
            read += 1;
        }

        Ok((merged, read, missing))
    }
}

/// Resolve run output directories to the cache file each one holds:
/// `<dir>/<subdir>/<file_name>`
pub fn binary_sources<P: AsRef<Path>>(dirs: &[P], subdir: &str, file_name: &str) -> Vec<PathBuf> {
    dirs.iter()
        .map(|d| d.as_ref().join(subdir).join(file_name))
        .collect()
}
