use crate::{
    command::{self, CommandError},
    config::{JobResources, SiteConfig},
};
use std::{
    collections::BTreeSet,
    fmt::Write as _,
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum CondorError {
    #[error("DAG already contains a node named {0}")]
    DuplicateNode(String),
    #[error("DAG node {node} depends on unknown node {parent}")]
    UnknownParent { node: String, parent: String },
    #[error("Failed to write {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Submission failed")]
    Submit(#[from] CommandError),
}

/// write a scheduler file, creating its directory if needed
fn write_description(path: &Path, contents: &str) -> Result<(), CondorError> {
    let io_error = |source| CondorError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_error)?;
    }

    fs::write(path, contents).map_err(io_error)
}

/// A single submit description, run `queue` times
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitDescription {
    pub executable: PathBuf,
    pub arguments: String,
    // stdout/stderr/log files are derived from this stem
    pub log_stem: PathBuf,
    pub resources: JobResources,
    pub transfer_executable: bool,
    pub input_files: Vec<String>,
    pub output_files: Vec<String>,
    pub queue: usize,
}

impl SubmitDescription {
    pub fn render(&self) -> String {
        let log = self.log_stem.display();
        let mut out = String::new();

        // writing to a String is infallible
        let _ = writeln!(out, "universe = vanilla");
        let _ = writeln!(out, "executable = {}", self.executable.display());
        let _ = writeln!(out, "transfer_executable = {}", self.transfer_executable);
        let _ = writeln!(out, "arguments = \"{}\"", self.arguments);
        let _ = writeln!(out, "output = {log}.$(cluster).$(process).out");
        let _ = writeln!(out, "error = {log}.$(cluster).$(process).err");
        let _ = writeln!(out, "log = {log}.$(cluster).log");
        let _ = writeln!(out, "getenv = true");
        let _ = writeln!(out, "should_transfer_files = YES");
        let _ = writeln!(out, "when_to_transfer_output = ON_EXIT_OR_EVICT");
        if !self.input_files.is_empty() {
            let _ = writeln!(out, "transfer_input_files = {}", self.input_files.join(", "));
        }
        if !self.output_files.is_empty() {
            let _ = writeln!(out, "transfer_output_files = {}", self.output_files.join(", "));
        }
        let _ = writeln!(out, "request_cpus = {}", self.resources.cpus);
        let _ = writeln!(out, "request_memory = {}", self.resources.memory);
        let _ = writeln!(out, "request_disk = {}", self.resources.disk);
        let _ = writeln!(out, "queue {}", self.queue);

        out
    }

    pub fn write(&self, path: &Path) -> Result<(), CondorError> {
        write_description(path, &self.render())?;
        info!("Submit description written to {}", path.display());

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DagNode {
    pub name: String,
    pub submit_file: PathBuf,
    pub vars: Vec<(String, String)>,
    pub retry: Option<u32>,
    pub parents: Vec<String>,
}

impl DagNode {
    pub fn new(name: impl Into<String>, submit_file: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            submit_file: submit_file.into(),
            vars: Vec::new(),
            retry: None,
            parents: Vec::new(),
        }
    }

    pub fn var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.push((key.into(), value.into()));
        self
    }

    pub fn retry(mut self, retry: u32) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn parents<I, S>(mut self, parents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parents.extend(parents.into_iter().map(Into::into));
        self
    }
}

/// escape a value for a `VARS` line
fn escape_var(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// A DAGMan description, nodes are kept in insertion order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dag {
    nodes: Vec<DagNode>,
    names: BTreeSet<String>,
    status_file: Option<(PathBuf, u32)>,
}

impl Dag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status_file(mut self, path: impl Into<PathBuf>, interval: u32) -> Self {
        self.status_file = Some((path.into(), interval));
        self
    }

    /// add a node, its parents must already be part of the DAG
    pub fn add_node(&mut self, node: DagNode) -> Result<(), CondorError> {
        if self.names.contains(&node.name) {
            return Err(CondorError::DuplicateNode(node.name));
        }

        if let Some(parent) = node
            .parents
            .iter()
            .find(|parent| !self.names.contains(parent.as_str()))
        {
            return Err(CondorError::UnknownParent {
                node: node.name.clone(),
                parent: parent.clone(),
            });
        }

        self.names.insert(node.name.clone());
        self.nodes.push(node);

        Ok(())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();

        for node in &self.nodes {
            let _ = writeln!(out, "JOB {} {}", node.name, node.submit_file.display());

            if !node.vars.is_empty() {
                let vars = node
                    .vars
                    .iter()
                    .map(|(key, value)| format!("{key}=\"{}\"", escape_var(value)))
                    .collect::<Vec<_>>()
                    .join(" ");
                let _ = writeln!(out, "VARS {} {vars}", node.name);
            }

            if let Some(retry) = node.retry {
                let _ = writeln!(out, "RETRY {} {retry}", node.name);
            }
        }

        for node in self.nodes.iter().filter(|node| !node.parents.is_empty()) {
            let _ = writeln!(out, "PARENT {} CHILD {}", node.parents.join(" "), node.name);
        }

        if let Some((path, interval)) = &self.status_file {
            let _ = writeln!(out, "NODE_STATUS_FILE {} {interval}", path.display());
        }

        out
    }

    pub fn write(&self, path: &Path) -> Result<(), CondorError> {
        write_description(path, &self.render())?;
        info!("DAG with {} nodes written to {}", self.len(), path.display());

        Ok(())
    }
}

/// Hands descriptions to the batch scheduler
#[derive(Debug, Clone)]
pub struct Scheduler {
    submit: String,
    submit_dag: String,
    timeout: Option<Duration>,
}

impl Scheduler {
    pub fn load(config: &SiteConfig) -> Self {
        Self {
            submit: config.commands.condor_submit.clone(),
            submit_dag: config.commands.condor_submit_dag.clone(),
            timeout: config.timeout(),
        }
    }

    pub fn submit(&self, submit_file: &Path) -> Result<(), CondorError> {
        let output = command::run(&self.submit, [submit_file], self.timeout)?;
        debug!("{}", output.stdout.trim());
        info!("Submitted {}", submit_file.display());

        Ok(())
    }

    pub fn submit_dag(&self, dag_file: &Path) -> Result<(), CondorError> {
        let output = command::run(&self.submit_dag, [dag_file], self.timeout)?;
        debug!("{}", output.stdout.trim());
        info!("Submitted DAG {}", dag_file.display());

        Ok(())
    }
}
