use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::{
    env,
    fs::{self, File},
    io::Error,
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;
use tracing::{debug, error, warn};

/// environment variable pointing at a site configuration file
pub const CONFIG_ENV: &str = "COMFORTER_CONFIG";

/// Compile globs into one set, collecting every pattern that fails
pub fn compile_globs(globs: &[String]) -> Result<GlobSet, Vec<(String, globset::Error)>> {
    let mut errors = Vec::new();
    let mut builder = GlobSetBuilder::new();

    globs.iter().for_each(|glob| match Glob::new(glob) {
        Ok(glob) => {
            builder.add(glob);
        }
        Err(error) => {
            errors.push((glob.clone(), error));
        }
    });

    if !errors.is_empty() {
        return Err(errors);
    }

    builder
        .build()
        .map_err(|error| vec![("<set>".to_string(), error)])
}

// check if a file is executable
pub fn check_executable(path: &Path) -> Result<bool, ConfigErrors> {
    if !path.is_file() {
        Err(ConfigErrors::FileNotFound(path.to_path_buf()))
    } else {
        match File::open(path).map(|file| file.metadata()) {
            Ok(Ok(metadata)) => Ok((metadata.mode() & 0o111) != 0),
            Ok(Err(e)) | Err(e) => Err(ConfigErrors::Io(e)),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error("Cannot specify both --{0} and --{1}")]
    Conflicting(String, String),
    #[error("--{flag} {reason}")]
    InvalidFlag { flag: String, reason: String },
    #[error("You can't have --units-per-job ({units}) > --total-units ({total})")]
    UnitsExceedTotal { units: i64, total: f64 },
    #[error("--{flag} ({path}) must be under {prefix}")]
    NotOnHdfs {
        flag: String,
        path: String,
        prefix: String,
    },
    #[error("You cannot put {path} on {prefix}")]
    ForbiddenLocation { path: PathBuf, prefix: String },
    #[error("Cannot find {0}")]
    FileNotFound(PathBuf),
    #[error("Failed to read file metadata or contents")]
    Io(#[from] Error),
    #[error("Failed to parse site configuration")]
    Parse(#[from] serde_yaml::Error),
    #[error("Site configuration failed preflight checks")]
    Preflight,
}

impl ConfigErrors {
    pub fn invalid(flag: &str, reason: impl Into<String>) -> Self {
        Self::InvalidFlag {
            flag: flag.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// distributed filesystem reached through `hadoop fs`
    Hadoop,
    /// plain local/network filesystem
    Local,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields, default)]
pub struct SiteConfig {
    // root for auto-generated submit files, DAGs and logs, e.g. /storage
    pub storage_root: PathBuf,
    // mount point of the distributed filesystem, outputs must live below it
    pub hdfs_prefix: String,
    // scheduler files must not be written below any of these
    pub forbidden_prefixes: Vec<String>,
    pub storage: StorageBackend,
    pub commands: CommandConfig,
    // worker script run by every dataset job
    pub worker: PathBuf,
    pub resources: ResourceConfig,
    pub dag: DagConfig,
    pub merge: MergeConfig,
    pub sandbox: SandboxConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields, default)]
pub struct CommandConfig {
    pub das_client: String,
    pub hadoop: String,
    pub condor_submit: String,
    pub condor_submit_dag: String,
    pub hadd: String,
    // seconds, no timeout when absent
    pub timeout: Option<u64>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct JobResources {
    pub cpus: u32,
    pub memory: String,
    pub disk: String,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields, default)]
pub struct ResourceConfig {
    pub worker: JobResources,
    pub merge: JobResources,
    pub cleanup: JobResources,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields, default)]
pub struct DagConfig {
    pub retry: u32,
    // seconds between node status file updates
    pub status_interval: u32,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields, default)]
pub struct MergeConfig {
    // argument-count ceiling of the final merge
    pub max_fan_in: usize,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields, default)]
pub struct SandboxConfig {
    // directories below $CMSSW_BASE packed as a whole
    pub directories: Vec<String>,
    // globs (relative to $CMSSW_BASE/src) selecting extra source directories
    pub source_globs: Vec<String>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("/storage"),
            hdfs_prefix: "/hdfs".to_string(),
            forbidden_prefixes: vec!["/hdfs".to_string(), "/users".to_string()],
            storage: StorageBackend::Hadoop,
            commands: CommandConfig::default(),
            worker: default_worker_path(),
            resources: ResourceConfig::default(),
            dag: DagConfig::default(),
            merge: MergeConfig::default(),
            sandbox: SandboxConfig::default(),
        }
    }
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            das_client: "das_client.py".to_string(),
            hadoop: "hadoop".to_string(),
            condor_submit: "condor_submit".to_string(),
            condor_submit_dag: "condor_submit_dag".to_string(),
            hadd: "hadd".to_string(),
            timeout: None,
        }
    }
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            worker: JobResources {
                cpus: 1,
                memory: "2GB".to_string(),
                disk: "3GB".to_string(),
            },
            merge: JobResources {
                cpus: 1,
                memory: "1GB".to_string(),
                disk: "1.95GB".to_string(),
            },
            cleanup: JobResources {
                cpus: 1,
                memory: "100MB".to_string(),
                disk: "10MB".to_string(),
            },
        }
    }
}

impl Default for DagConfig {
    fn default() -> Self {
        Self {
            retry: 5,
            status_interval: 30,
        }
    }
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self { max_fan_in: 255 }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            directories: ["biglib", "lib", "module", "python"]
                .map(String::from)
                .to_vec(),
            source_globs: ["**/data", "**/interface"].map(String::from).to_vec(),
        }
    }
}

/// the worker script is installed next to the binaries
fn default_worker_path() -> PathBuf {
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("cmsRun_worker.sh")))
        .unwrap_or_else(|| PathBuf::from("cmsRun_worker.sh"))
}

impl SiteConfig {
    /// load the site configuration from `path`, `$COMFORTER_CONFIG` or built-in defaults
    pub fn locate(path: Option<&Path>) -> Result<Self, ConfigErrors> {
        match path
            .map(Path::to_path_buf)
            .or_else(|| env::var_os(CONFIG_ENV).map(PathBuf::from))
        {
            Some(path) => Self::load(&path),
            None => {
                debug!("No site configuration given, using defaults");

                Ok(Self::default())
            }
        }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigErrors> {
        if !path.is_file() {
            return Err(ConfigErrors::FileNotFound(path.to_path_buf()));
        }

        let config = serde_yaml::from_str(&fs::read_to_string(path)?)?;
        debug!("Loaded site configuration from {}", path.display());

        Ok(config)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.commands.timeout.map(Duration::from_secs)
    }

    pub fn is_on_hdfs(&self, path: &str) -> bool {
        path.starts_with(&self.hdfs_prefix)
    }

    /// check that a scheduler-side file is not placed on a forbidden filesystem
    pub fn check_location(&self, path: &Path) -> Result<(), ConfigErrors> {
        match self
            .forbidden_prefixes
            .iter()
            .find(|prefix| path.starts_with(prefix.as_str()))
        {
            Some(prefix) => Err(ConfigErrors::ForbiddenLocation {
                path: path.to_path_buf(),
                prefix: prefix.clone(),
            }),
            None => Ok(()),
        }
    }

    /// check the worker script exists and is executable
    pub fn check_worker(&self) -> Result<(), ConfigErrors> {
        match check_executable(&self.worker)? {
            true => Ok(()),
            false => Err(ConfigErrors::invalid(
                "worker",
                format!("{} is not executable", self.worker.display()),
            )),
        }
    }

    pub fn preflight_checks(&self) -> bool {
        // attempt to catch all errors instead of piece-by-piece to make debugging easier for users
        let mut contains_error = false;

        if !self.hdfs_prefix.starts_with('/') {
            error!(
                "hdfs_prefix must be an absolute path, got '{}'",
                self.hdfs_prefix
            );
            contains_error = true;
        }

        if !self.storage_root.is_absolute() {
            error!(
                "storage_root must be an absolute path, got {}",
                self.storage_root.display()
            );
            contains_error = true;
        }

        for (name, command) in [
            ("das_client", &self.commands.das_client),
            ("hadoop", &self.commands.hadoop),
            ("condor_submit", &self.commands.condor_submit),
            ("condor_submit_dag", &self.commands.condor_submit_dag),
            ("hadd", &self.commands.hadd),
        ] {
            if command.trim().is_empty() {
                error!("commands.{name} cannot be empty");
                contains_error = true;
            }
        }

        if self.commands.timeout == Some(0) {
            error!("commands.timeout cannot be 0, leave it out to wait indefinitely");
            contains_error = true;
        }

        for (name, resources) in [
            ("worker", &self.resources.worker),
            ("merge", &self.resources.merge),
            ("cleanup", &self.resources.cleanup),
        ] {
            if resources.cpus == 0 {
                error!("resources.{name}.cpus cannot be 0");
                contains_error = true;
            }
            if resources.memory.trim().is_empty() || resources.disk.trim().is_empty() {
                error!("resources.{name} needs both memory and disk");
                contains_error = true;
            }
        }

        if self.merge.max_fan_in < 2 {
            error!(
                "merge.max_fan_in ({}) must allow at least 2 inputs",
                self.merge.max_fan_in
            );
            contains_error = true;
        }

        if self.dag.status_interval == 0 {
            warn!("dag.status_interval is 0, the node status file will be rewritten constantly");
        }

        if let Err(errors) = compile_globs(&self.sandbox.source_globs) {
            for (glob, err) in errors {
                error!("Failed to compile sandbox.source_globs entry {glob}: {err}");
            }
            contains_error = true;
        }

        contains_error
    }
}
