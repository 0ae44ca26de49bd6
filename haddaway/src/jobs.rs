use crate::arrange::arrange;
use comforter_core::{
    condor::{CondorError, Dag, DagNode, Scheduler, SubmitDescription},
    config::{ConfigErrors, DagConfig, JobResources, SiteConfig},
    context::{random_letters, status_filename, RunContext},
    storage::{strip_prefix, Storage, StorageError},
};
use rand::Rng;
use std::{
    fmt,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, info};

pub const TOOL: &str = "haddaway";

const FINAL_NODE: &str = "finalHadd";

#[derive(Error, Debug)]
pub enum MergeError {
    #[error(transparent)]
    Config(#[from] ConfigErrors),
    #[error("Final merge cannot cope with {count} intermediate jobs, the limit is {limit}")]
    ResourceLimit { limit: usize, count: usize },
    #[error("Failed to prepare the output directory")]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Condor(#[from] CondorError),
}

/// One hadd invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeJob {
    pub name: String,
    pub output: String,
    pub inputs: Vec<String>,
    /// `<extra args> <output> <inputs...>`
    pub arguments: Vec<String>,
}

impl MergeJob {
    fn new(name: String, extra: &[String], output: String, inputs: Vec<String>) -> Self {
        let arguments = extra
            .iter()
            .cloned()
            .chain(std::iter::once(output.clone()))
            .chain(inputs.iter().cloned())
            .collect();

        Self {
            name,
            output,
            inputs,
            arguments,
        }
    }
}

/// Removal of one intermediate file through `hadoop fs`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupJob {
    pub name: String,
    pub arguments: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePlan {
    pub intermediate: Vec<MergeJob>,
    pub final_merge: MergeJob,
    pub cleanup: Vec<CleanupJob>,
}

/// Arrange the inputs into merge and cleanup jobs
pub fn plan_merge<R: Rng>(
    inputs: Vec<String>,
    size: i64,
    output: &str,
    hadd_args: Option<&str>,
    site: &SiteConfig,
    rng: &mut R,
) -> Result<MergePlan, MergeError> {
    let extra: Vec<String> = hadd_args
        .unwrap_or_default()
        .split_whitespace()
        .map(String::from)
        .collect();

    let mut groups = arrange(inputs, size)?;

    if groups.len() == 1 {
        let inputs = groups.pop().unwrap_or_default();
        return Ok(MergePlan {
            intermediate: Vec::new(),
            final_merge: MergeJob::new(FINAL_NODE.to_string(), &extra, output.to_string(), inputs),
            cleanup: Vec::new(),
        });
    }

    let limit = site.merge.max_fan_in;
    if groups.len() > limit {
        return Err(MergeError::ResourceLimit {
            limit,
            count: groups.len(),
        });
    }

    let final_dir = Path::new(output).parent().unwrap_or_else(|| Path::new(""));
    let intermediate: Vec<MergeJob> = groups
        .into_iter()
        .enumerate()
        .map(|(index, group)| {
            let letters = random_letters(rng, 5);
            let output = final_dir
                .join(format!("haddInter_{index}_{letters}.root"))
                .display()
                .to_string();

            MergeJob::new(format!("interHadd_{index}"), &extra, output, group)
        })
        .collect();

    let cleanup = intermediate
        .iter()
        .enumerate()
        .map(|(index, job)| CleanupJob {
            name: format!("rm_{index}"),
            arguments: vec![
                "fs".to_string(),
                "-rm".to_string(),
                "-skipTrash".to_string(),
                strip_prefix(&job.output, &site.hdfs_prefix),
            ],
        })
        .collect();

    let final_inputs = intermediate.iter().map(|job| job.output.clone()).collect();

    Ok(MergePlan {
        final_merge: MergeJob::new(
            FINAL_NODE.to_string(),
            &extra,
            output.to_string(),
            final_inputs,
        ),
        intermediate,
        cleanup,
    })
}

/// Locations of the scheduler files of one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub dag_file: PathBuf,
    pub status_file: PathBuf,
    pub merge_script: PathBuf,
    pub cleanup_script: PathBuf,
    pub log_dir: PathBuf,
}

impl Layout {
    /// everything under `<storage root>/<user>/haddaway/<datestamp>/`
    pub fn new(site: &SiteConfig, context: &RunContext) -> Self {
        let root = &site.storage_root;
        let dag_file = context.dag_filename(root, TOOL);

        Self {
            status_file: status_filename(&dag_file),
            merge_script: context.script_filename(root, TOOL),
            cleanup_script: context
                .work_dir(root, TOOL)
                .join(format!("rm_{}.condor", context.timestamp)),
            log_dir: context.log_dir(root, TOOL),
            dag_file,
        }
    }
}

/// every node passes its own arguments through the `opts` variable
fn description(executable: &str, log_stem: PathBuf, resources: &JobResources) -> SubmitDescription {
    SubmitDescription {
        executable: PathBuf::from(executable),
        arguments: "$(opts)".to_string(),
        log_stem,
        resources: resources.clone(),
        transfer_executable: false,
        input_files: Vec::new(),
        output_files: Vec::new(),
        queue: 1,
    }
}

impl MergePlan {
    pub fn dag(&self, layout: &Layout, config: &DagConfig) -> Result<Dag, CondorError> {
        let retry = config.retry;
        let mut dag = Dag::new().with_status_file(&layout.status_file, config.status_interval);

        for job in &self.intermediate {
            dag.add_node(
                DagNode::new(&job.name, &layout.merge_script)
                    .var("opts", job.arguments.join(" "))
                    .retry(retry),
            )?;
        }

        dag.add_node(
            DagNode::new(&self.final_merge.name, &layout.merge_script)
                .var("opts", self.final_merge.arguments.join(" "))
                .retry(retry)
                .parents(self.intermediate.iter().map(|job| job.name.as_str())),
        )?;

        for job in &self.cleanup {
            dag.add_node(
                DagNode::new(&job.name, &layout.cleanup_script)
                    .var("opts", job.arguments.join(" "))
                    .retry(retry)
                    .parents([FINAL_NODE]),
            )?;
        }

        Ok(dag)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub output: String,
    pub intermediate: usize,
    pub dag_file: PathBuf,
    pub status_file: PathBuf,
    pub submitted: bool,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Output:             {}", self.output)?;
        writeln!(f, "Intermediate jobs:  {}", self.intermediate)?;
        writeln!(f, "DAG:                {}", self.dag_file.display())?;
        writeln!(f, "Check DAG status:   DAGstatus.py {}", self.status_file.display())?;
        write!(
            f,
            "{}",
            if self.submitted {
                "Submitted"
            } else {
                "Dry run, nothing submitted"
            }
        )
    }
}

/// Write the scheduler files and submit the DAG unless `dry`
pub fn run(
    plan: &MergePlan,
    site: &SiteConfig,
    layout: &Layout,
    dry: bool,
) -> Result<Summary, MergeError> {
    info!("Creating {} intermediate jobs", plan.intermediate.len());

    if let Some(final_dir) = Path::new(&plan.final_merge.output).parent() {
        Storage::load(site).create_dir(final_dir)?;
    }

    description(
        &site.commands.hadd,
        layout.log_dir.join("hadd"),
        &site.resources.merge,
    )
    .write(&layout.merge_script)?;

    if !plan.cleanup.is_empty() {
        description(
            &site.commands.hadoop,
            layout.log_dir.join("rm"),
            &site.resources.cleanup,
        )
        .write(&layout.cleanup_script)?;
    }

    let dag = plan.dag(layout, &site.dag)?;
    debug!("DAG with {} nodes", dag.len());
    dag.write(&layout.dag_file)?;

    if !dry {
        Scheduler::load(site).submit_dag(&layout.dag_file)?;
    }

    Ok(Summary {
        output: plan.final_merge.output.clone(),
        intermediate: plan.intermediate.len(),
        dag_file: layout.dag_file.clone(),
        status_file: layout.status_file.clone(),
        submitted: !dry,
    })
}
