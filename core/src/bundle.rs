use crate::config::{compile_globs, SandboxConfig};
use flate2::{write::GzEncoder, Compression};
use globset::GlobSet;
use ignore::{DirEntry, WalkBuilder};
use itertools::Itertools;
use std::{
    env,
    fs::File,
    io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, info};

/// environment variable holding the software area to pack
pub const BASE_ENV: &str = "CMSSW_BASE";
pub const SANDBOX_NAME: &str = "sandbox.tgz";

#[derive(Error, Debug)]
pub enum BundleError {
    #[error("$CMSSW_BASE is not set, set up the software environment first")]
    MissingBase,
    #[error("Cannot find sandbox input {0}")]
    MissingInput(PathBuf),
    #[error("Invalid sandbox source glob {glob}")]
    InvalidGlob {
        glob: String,
        #[source]
        source: globset::Error,
    },
    #[error("Failed to write sandbox {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn build_globs(globs: &[String]) -> Result<GlobSet, BundleError> {
    compile_globs(globs).map_err(|mut errors| {
        let (glob, source) = errors.swap_remove(0);
        BundleError::InvalidGlob { glob, source }
    })
}

/// Contents of a sandbox, resolved against a software area
#[derive(Debug, Clone)]
pub struct Sandbox {
    base: PathBuf,
    directories: Vec<String>,
    source_globs: Vec<String>,
    // (file on disk, name inside the archive)
    files: Vec<(PathBuf, PathBuf)>,
}

impl Sandbox {
    pub fn new(base: impl Into<PathBuf>, config: &SandboxConfig) -> Self {
        Self {
            base: base.into(),
            directories: config.directories.clone(),
            source_globs: config.source_globs.clone(),
            files: Vec::new(),
        }
    }

    /// software area taken from `$CMSSW_BASE`
    pub fn from_env(config: &SandboxConfig) -> Result<Self, BundleError> {
        env::var_os(BASE_ENV)
            .filter(|base| !base.is_empty())
            .map(|base| Self::new(PathBuf::from(base), config))
            .ok_or(BundleError::MissingBase)
    }

    /// add a single file stored as `name` inside the archive
    pub fn add_file(
        &mut self,
        source: impl AsRef<Path>,
        name: impl AsRef<Path>,
    ) -> Result<(), BundleError> {
        let source = source.as_ref();

        if !source.is_file() {
            return Err(BundleError::MissingInput(source.to_path_buf()));
        }

        self.files
            .push((source.to_path_buf(), name.as_ref().to_path_buf()));
        Ok(())
    }

    /// directories below `<base>/src` selected by the source globs, outermost only
    pub fn source_directories(&self) -> Result<Vec<PathBuf>, BundleError> {
        let globs = build_globs(&self.source_globs)?;
        let src = self.base.join("src");

        if !src.is_dir() {
            debug!("No source directory at {}", src.display());
            return Ok(Vec::new());
        }

        let matched = WalkBuilder::new(&src)
            .standard_filters(false)
            .build()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().map_or(false, |kind| kind.is_dir()))
            .map(DirEntry::into_path)
            .filter_map(|path| path.strip_prefix(&src).ok().map(Path::to_path_buf))
            .filter(|relative| globs.is_match(relative))
            .sorted()
            .collect_vec();

        // nested matches are already packed with their ancestor
        Ok(matched
            .iter()
            .filter(|path| {
                !matched
                    .iter()
                    .any(|other| other != *path && path.starts_with(other))
            })
            .cloned()
            .collect())
    }

    /// write the gzipped tarball to `destination`
    pub fn write(&self, destination: &Path) -> Result<(), BundleError> {
        let io_error = |source| BundleError::Io {
            path: destination.to_path_buf(),
            source,
        };

        let file = File::create(destination).map_err(io_error)?;
        let mut archive = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        archive.follow_symlinks(true);

        for directory in &self.directories {
            let path = self.base.join(directory);

            if path.is_dir() {
                debug!("Adding {} to sandbox", path.display());
                archive.append_dir_all(directory, &path).map_err(io_error)?;
            } else {
                debug!("Skipping missing sandbox directory {}", path.display());
            }
        }

        for relative in self.source_directories()? {
            let name = Path::new("src").join(&relative);
            debug!("Adding {} to sandbox", name.display());
            archive
                .append_dir_all(&name, self.base.join(&name))
                .map_err(io_error)?;
        }

        for (source, name) in &self.files {
            debug!("Adding {} to sandbox as {}", source.display(), name.display());
            archive
                .append_path_with_name(source, name)
                .map_err(io_error)?;
        }

        archive
            .into_inner()
            .and_then(GzEncoder::finish)
            .map_err(io_error)?;
        info!("Created sandbox {}", destination.display());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::fs;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "x").unwrap();
    }

    fn software_area() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path();

        touch(&base.join("lib/slc6/libA.so"));
        touch(&base.join("python/Pkg/cfi.py"));
        touch(&base.join("src/Pkg/Sub/data/table.txt"));
        touch(&base.join("src/Pkg/Sub/data/interface/nested.h"));
        touch(&base.join("src/Pkg/Sub/interface/Header.h"));
        touch(&base.join("src/Pkg/Sub/plugins/Plugin.cc"));

        dir
    }

    fn entries(tarball: &Path) -> Vec<String> {
        let mut archive = tar::Archive::new(GzDecoder::new(File::open(tarball).unwrap()));

        archive
            .entries()
            .unwrap()
            .map(|entry| entry.unwrap().path().unwrap().display().to_string())
            .collect()
    }

    #[test]
    fn selects_outermost_source_directories() {
        let area = software_area();
        let sandbox = Sandbox::new(area.path(), &SandboxConfig::default());

        assert_eq!(
            sandbox.source_directories().unwrap(),
            vec![
                PathBuf::from("Pkg/Sub/data"),
                PathBuf::from("Pkg/Sub/interface")
            ]
        );
    }

    #[test]
    fn packs_software_area_and_inputs() {
        let area = software_area();
        let config = area.path().join("pset.py");
        touch(&config);

        let mut sandbox = Sandbox::new(area.path(), &SandboxConfig::default());
        sandbox.add_file(&config, "src/config.py").unwrap();

        let out = tempfile::tempdir().unwrap();
        let tarball = out.path().join(SANDBOX_NAME);
        sandbox.write(&tarball).unwrap();

        let entries = entries(&tarball);
        for expected in [
            "lib/slc6/libA.so",
            "python/Pkg/cfi.py",
            "src/Pkg/Sub/data/table.txt",
            "src/Pkg/Sub/data/interface/nested.h",
            "src/Pkg/Sub/interface/Header.h",
            "src/config.py",
        ] {
            assert!(
                entries.iter().any(|entry| entry == expected),
                "{expected} missing from {entries:?}"
            );
        }
        assert!(!entries.iter().any(|entry| entry.contains("plugins")));
        // every file packed once
        assert_eq!(entries.iter().filter(|e| e.ends_with("nested.h")).count(), 1);
    }

    #[test]
    fn missing_input_is_reported() {
        let area = software_area();
        let mut sandbox = Sandbox::new(area.path(), &SandboxConfig::default());

        assert!(matches!(
            sandbox.add_file(area.path().join("missing.txt"), "src/missing.txt"),
            Err(BundleError::MissingInput(_))
        ));
    }

    #[test]
    fn bad_glob_is_reported() {
        let area = software_area();
        let config = SandboxConfig {
            directories: Vec::new(),
            source_globs: vec!["src/[".to_string()],
        };

        assert!(matches!(
            Sandbox::new(area.path(), &config).source_directories(),
            Err(BundleError::InvalidGlob { .. })
        ));
    }
}
