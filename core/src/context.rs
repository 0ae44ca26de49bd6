use chrono::{DateTime, Local};
use rand::{distributions::Uniform, Rng};
use std::{
    env,
    path::{Path, PathBuf},
};
use tracing::warn;

/// Who is running and when, captured once at startup and used for every
/// auto-generated file name of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub username: String,
    // e.g. 04_Mar_16
    pub datestamp: String,
    // e.g. 142501
    pub timestamp: String,
}

fn current_username() -> String {
    if let Some(name) = env::var("LOGNAME")
        .ok()
        .or_else(|| env::var("USER").ok())
        .filter(|name| !name.is_empty())
    {
        return name;
    }

    match nix::unistd::User::from_uid(nix::unistd::getuid()) {
        Ok(Some(user)) => user.name,
        Ok(None) | Err(_) => {
            warn!("Failed to determine the current user name, using 'unknown'");
            "unknown".to_string()
        }
    }
}

impl RunContext {
    pub fn new(username: impl Into<String>, at: DateTime<Local>) -> Self {
        Self {
            username: username.into(),
            datestamp: at.format("%d_%b_%y").to_string(),
            timestamp: at.format("%H%M%S").to_string(),
        }
    }

    /// capture user and time of the current process
    pub fn capture() -> Self {
        Self::new(current_username(), Local::now())
    }

    /// `<root>/<user>/<tool>/<datestamp>`
    pub fn work_dir(&self, root: &Path, tool: &str) -> PathBuf {
        root.join(&self.username).join(tool).join(&self.datestamp)
    }

    pub fn script_filename(&self, root: &Path, tool: &str) -> PathBuf {
        self.work_dir(root, tool)
            .join(format!("{tool}_{}.condor", self.timestamp))
    }

    pub fn dag_filename(&self, root: &Path, tool: &str) -> PathBuf {
        self.work_dir(root, tool)
            .join(format!("{tool}_{}.dag", self.timestamp))
    }

    pub fn log_dir(&self, root: &Path, tool: &str) -> PathBuf {
        self.work_dir(root, tool).join("logs")
    }
}

/// A random string of ASCII letters, used to keep intermediate names unique
pub fn random_letters<R: Rng>(rng: &mut R, length: usize) -> String {
    const LETTERS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

    rng.sample_iter(Uniform::from(0..LETTERS.len()))
        .take(length)
        .map(|index| LETTERS[index] as char)
        .collect()
}

/// Status file that belongs to a DAG file, `jobs.dag` -> `jobs.status`
pub fn status_filename(dag: &Path) -> PathBuf {
    dag.with_extension("status")
}
