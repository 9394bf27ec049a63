//! Export and import of a whole pool to three record files.

use log::{info, warn};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::codec;
use crate::config::{ExportFiles, ProxyPoolConfig};
use crate::endpoint::Endpoint;
use crate::error::PersistError;
use crate::events::{LogObserver, PoolObserver};
use crate::pool::{Bucket, Buckets, ProxyPool};

fn path_for(files: &ExportFiles, bucket: Bucket) -> &Path {
    match bucket {
        Bucket::Good => &files.good,
        Bucket::Bad => &files.bad,
        Bucket::Banned => &files.banned,
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

impl ProxyPool {
    /// Write the good, bad and banned buckets to their files, one record per line.
    ///
    /// Every file is staged as `<path>.tmp` before any destination is replaced. Staging is
    /// all-or-nothing: if it fails, the staged files are removed and the previous export is
    /// left as it was. The renames that follow are atomic per file only; if one fails, files
    /// renamed before it already hold the new content and the remaining staged files are
    /// removed.
    pub fn export(&self, files: &ExportFiles) -> Result<(), PersistError> {
        let snapshot = self.snapshot();

        let mut contents = Vec::with_capacity(Bucket::ALL.len());
        for bucket in Bucket::ALL {
            let mut endpoints: Vec<&Endpoint> = snapshot.get(bucket).values().collect();
            endpoints.sort_by(|a, b| a.key().cmp(b.key()));
            let lines = endpoints
                .into_iter()
                .map(|endpoint| {
                    codec::encode(endpoint).map_err(|source| PersistError::Encode {
                        key: endpoint.key().clone(),
                        source,
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            contents.push((path_for(files, bucket), lines.join("\n")));
        }

        let mut staged = Vec::with_capacity(contents.len());
        for (path, content) in &contents {
            let tmp = staging_path(path);
            if let Err(source) = fs::write(&tmp, content) {
                discard(&staged);
                return Err(PersistError::Io { path: tmp, source });
            }
            staged.push(tmp);
        }

        for (index, ((path, _), tmp)) in contents.iter().zip(&staged).enumerate() {
            if let Err(source) = fs::rename(tmp, path) {
                discard(&staged[index..]);
                return Err(PersistError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        }

        let stats = snapshot_stats(&snapshot);
        info!(
            "Exported {} good, {} bad, {} banned proxies",
            stats[0], stats[1], stats[2]
        );
        Ok(())
    }

    /// Load a pool previously written by [`export`](Self::export).
    ///
    /// Fails on the first unreadable file, malformed record, or identity present twice.
    pub fn import(config: ProxyPoolConfig, files: &ExportFiles) -> Result<Self, PersistError> {
        Self::import_with_observer(config, files, Arc::new(LogObserver))
    }

    pub fn import_with_observer(
        config: ProxyPoolConfig,
        files: &ExportFiles,
        observer: Arc<dyn PoolObserver>,
    ) -> Result<Self, PersistError> {
        let mut buckets = Buckets::default();
        for bucket in Bucket::ALL {
            let path = path_for(files, bucket);
            let content = fs::read_to_string(path).map_err(|source| PersistError::Io {
                path: path.to_path_buf(),
                source,
            })?;

            for (index, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let endpoint = codec::decode(line).map_err(|source| PersistError::Decode {
                    path: path.to_path_buf(),
                    line: index + 1,
                    source,
                })?;
                let key = endpoint.key().clone();
                if buckets.insert(bucket, endpoint).is_err() {
                    return Err(PersistError::Duplicate {
                        path: path.to_path_buf(),
                        line: index + 1,
                        key,
                    });
                }
            }
        }

        let stats = snapshot_stats(&buckets);
        info!(
            "Imported {} good, {} bad, {} banned proxies",
            stats[0], stats[1], stats[2]
        );
        Ok(Self::from_buckets(config, observer, buckets))
    }
}

fn snapshot_stats(buckets: &Buckets) -> [usize; 3] {
    Bucket::ALL.map(|bucket| buckets.get(bucket).len())
}

fn discard(staged: &[PathBuf]) {
    for path in staged {
        if let Err(e) = fs::remove_file(path) {
            warn!("Failed to remove staged export {}: {}", path.display(), e);
        }
    }
}
