use crate::{
    command::{self, CommandError},
    config::{SiteConfig, StorageBackend},
};
use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Distributed filesystem command failed")]
    Command(#[from] CommandError),
    #[error("Filesystem operation on {path} failed")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> StorageError + '_ {
    move |source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Where job outputs, sandboxes and intermediate files are staged
#[derive(Debug, Clone)]
pub enum Storage {
    /// paths below `prefix` go through `hadoop fs`, everything else is local
    Hadoop {
        command: String,
        prefix: String,
        timeout: Option<Duration>,
    },
    Local,
}

impl Storage {
    pub fn load(config: &SiteConfig) -> Self {
        match config.storage {
            StorageBackend::Hadoop => Self::Hadoop {
                command: config.commands.hadoop.clone(),
                prefix: config.hdfs_prefix.clone(),
                timeout: config.timeout(),
            },
            StorageBackend::Local => Self::Local,
        }
    }

    /// the path as seen by `hadoop fs` if it lives on the distributed filesystem
    fn distributed_path(&self, path: &Path) -> Option<String> {
        match self {
            Self::Hadoop { prefix, .. } => path
                .to_str()
                .filter(|path| path.starts_with(prefix.as_str()))
                .map(|path| strip_prefix(path, prefix)),
            Self::Local => None,
        }
    }

    fn hadoop(&self, args: &[&str]) -> Result<(), StorageError> {
        if let Self::Hadoop {
            command, timeout, ..
        } = self
        {
            command::run(command, args, *timeout)?;
        }

        Ok(())
    }

    /// create a directory and all of its parents if missing
    pub fn create_dir(&self, path: &Path) -> Result<(), StorageError> {
        if path.is_dir() {
            return Ok(());
        }

        info!("Creating directory {}", path.display());
        match self.distributed_path(path) {
            Some(remote) => self.hadoop(&["fs", "-mkdir", "-p", &remote]),
            None => fs::create_dir_all(path).map_err(io_error(path)),
        }
    }

    /// copy a local file to `destination`, overwriting it
    pub fn copy_from_local(&self, local: &Path, destination: &Path) -> Result<(), StorageError> {
        info!("Copying {} to {}", local.display(), destination.display());

        match self.distributed_path(destination) {
            Some(remote) => {
                let local = local.to_string_lossy();
                self.hadoop(&["fs", "-copyFromLocal", "-f", &local, &remote])
            }
            None => {
                if let Some(parent) = destination.parent() {
                    fs::create_dir_all(parent).map_err(io_error(parent))?;
                }

                fs::copy(local, destination)
                    .map(|_| ())
                    .map_err(io_error(destination))
            }
        }
    }

    /// remove a file if it exists
    pub fn remove_file(&self, path: &Path) -> Result<(), StorageError> {
        if !path.is_file() {
            debug!("Nothing to remove at {}", path.display());
            return Ok(());
        }

        match self.distributed_path(path) {
            Some(remote) => self.hadoop(&["fs", "-rm", &remote]),
            None => fs::remove_file(path).map_err(io_error(path)),
        }
    }
}

/// Strip the mount prefix, `/hdfs/user/a.root` -> `/user/a.root`
pub fn strip_prefix(path: &str, prefix: &str) -> String {
    path.strip_prefix(prefix).unwrap_or(path).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hadoop() -> Storage {
        Storage::Hadoop {
            command: "hadoop".to_string(),
            prefix: "/hdfs".to_string(),
            timeout: None,
        }
    }

    #[test]
    fn strips_mount_prefix() {
        assert_eq!(strip_prefix("/hdfs/user/a.root", "/hdfs"), "/user/a.root");
        assert_eq!(strip_prefix("/storage/a.root", "/hdfs"), "/storage/a.root");
    }

    #[test]
    fn only_prefixed_paths_are_distributed() {
        assert_eq!(
            hadoop().distributed_path(Path::new("/hdfs/user/out")),
            Some("/user/out".to_string())
        );
        assert_eq!(hadoop().distributed_path(Path::new("/storage/out")), None);
        assert_eq!(Storage::Local.distributed_path(Path::new("/hdfs/user/out")), None);
    }

    #[test]
    fn local_storage_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("sandbox.tgz");
        fs::write(&source, b"payload").unwrap();

        let target_dir = dir.path().join("out/nested");
        Storage::Local.create_dir(&target_dir).unwrap();
        assert!(target_dir.is_dir());

        let target = target_dir.join("sandbox.tgz");
        Storage::Local.copy_from_local(&source, &target).unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"payload");

        Storage::Local.remove_file(&target).unwrap();
        assert!(!target.exists());
        // removing twice is fine
        Storage::Local.remove_file(&target).unwrap();
    }
}
