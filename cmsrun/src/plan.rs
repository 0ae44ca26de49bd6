use crate::{
    artifacts::{
        filelist_name, lumilist_name, render_filelist, render_lumilist, user_filelist_name,
        write_artifact, ArtifactError,
    },
    manifest::OutputManifest,
    options::{Options, Source, SplitMode},
    split::{select_from_list, split_by_files, split_by_lumis, JobGroup},
};
use comforter_core::{
    bundle::{BundleError, Sandbox, SANDBOX_NAME},
    condor::{CondorError, Dag, DagNode, Scheduler, SubmitDescription},
    config::{ConfigErrors, SiteConfig},
    context::{status_filename, RunContext},
    dataset::{read_file_list, TotalUnits},
    filter::{attach_parents, filter_by_lumi_mask, filter_by_run_list, CoverageError},
    grouping::GroupingError,
    lumis::{is_url, load_lumi_mask, LumiError, LumiSelection},
    metadata::{fetch_files, MetadataSource, ResolutionError},
    storage::{Storage, StorageError},
};
use std::{
    fmt, io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, info, warn};

/// dumps left behind by the worker in the profiling modes
pub const PROFILER_OUTPUT: &str = "callgrind.out.*";

#[derive(Error, Debug)]
pub enum PlanError {
    #[error(transparent)]
    Config(#[from] ConfigErrors),
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error(transparent)]
    Coverage(#[from] CoverageError),
    #[error("Invalid job division")]
    Grouping(#[from] GroupingError),
    #[error("Failed to load lumi mask")]
    LumiMask(#[from] LumiError),
    #[error("Cannot read file list {path}")]
    FileList {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("No jobs left to submit after filtering")]
    NoJobs,
    #[error("Failed to create sandbox")]
    Bundle(#[from] BundleError),
    #[error("Failed to stage files")]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error(transparent)]
    Condor(#[from] CondorError),
}

/// Job division before anything is written
#[derive(Debug, Clone, PartialEq)]
pub struct JobPlan {
    /// empty when the job configuration names its own inputs
    pub jobs: Vec<JobGroup>,
    pub job_count: usize,
    pub filelist: Option<String>,
    pub lumilist: Option<String>,
}

fn units_per_job(options: &Options) -> Result<usize, ConfigErrors> {
    options
        .units_per_job
        .ok_or_else(|| {
            ConfigErrors::invalid("units-per-job", "must be given as a positive integer")
        })
}

/// Resolve the input source into job groups
pub fn resolve_jobs<M: MetadataSource + ?Sized>(
    options: &Options,
    metadata: &M,
    lumi_mask: Option<&LumiSelection>,
    context: &RunContext,
) -> Result<JobPlan, PlanError> {
    let (jobs, filelist, lumilist) = match &options.source {
        Source::UseConfig | Source::Valgrind | Source::Callgrind => {
            return Ok(JobPlan {
                jobs: Vec::new(),
                job_count: 1,
                filelist: None,
                lumilist: None,
            })
        }
        Source::FileList(path) => {
            let files = read_file_list(path).map_err(|source| PlanError::FileList {
                path: path.clone(),
                source,
            })?;
            let files = select_from_list(files, options.total_units)?;

            (
                split_by_files(&files, units_per_job(options)?)?,
                user_filelist_name(context),
                None,
            )
        }
        Source::Dataset { name, secondary } => {
            // lumisection splitting truncates after flattening, so it needs every file
            let total = match options.split {
                SplitMode::Files => options.total_units,
                SplitMode::Lumis => TotalUnits::All,
            };

            let mut files = fetch_files(metadata, name, total)?;
            debug!(files = files.len(), "Resolved dataset before filtering");

            if let Some(runs) = &options.run_range {
                files = filter_by_run_list(&files, runs);
            }
            if let Some(mask) = lumi_mask {
                files = filter_by_lumi_mask(&files, mask);
            }
            debug!(files = files.len(), "Resolved dataset after filtering");

            if let Some(secondary) = secondary {
                let secondary_files = fetch_files(metadata, secondary, TotalUnits::All)?;
                files = attach_parents(&files, &secondary_files)?;
            }
            for file in &files {
                debug!(file = %file, "Selected file");
            }

            let units = units_per_job(options)?;
            let jobs = match options.split {
                SplitMode::Files => split_by_files(&files, units)?,
                SplitMode::Lumis => split_by_lumis(&files, units, options.total_units)?,
            };

            (jobs, filelist_name(name), Some(lumilist_name(name)))
        }
    };

    if jobs.is_empty() {
        return Err(PlanError::NoJobs);
    }

    Ok(JobPlan {
        job_count: jobs.len(),
        jobs,
        filelist: Some(filelist),
        lumilist,
    })
}

/// Files transferred back from each job, profiler dumps included
pub fn job_outputs(options: &Options, manifest: &OutputManifest, index: &str) -> Vec<String> {
    let mut outputs = manifest.job_outputs(index);
    if options.source.is_profiling() {
        outputs.push(PROFILER_OUTPUT.to_string());
    }

    outputs
}

/// Argument string handed to the worker script
///
/// `index` is the scheduler macro holding the job number.
pub fn worker_arguments(
    options: &Options,
    sandbox: &str,
    lumilist: Option<&str>,
    index: &str,
) -> String {
    let mut arguments = format!(
        "-o {} -i {index} -a $ENV(SCRAM_ARCH) -c $ENV(CMSSW_VERSION) -S {sandbox}",
        options.output_dir
    );

    // lumisection splitting relies on the list as much as filtering does
    if options.is_filtered() || options.split == SplitMode::Lumis {
        match (lumilist, options.lumi_mask.as_deref()) {
            (Some(lumilist), _) => arguments.push_str(&format!(" -l {lumilist}")),
            (None, Some(mask)) if is_url(mask) => arguments.push_str(&format!(" -l {mask}")),
            _ => {}
        }
    }

    match options.source {
        Source::UseConfig => arguments.push_str(" -u"),
        Source::Valgrind => arguments.push_str(" -m"),
        Source::Callgrind => arguments.push_str(" -p"),
        Source::Dataset { .. } | Source::FileList(_) => {}
    }

    arguments
}

/// What was planned, printed once the run is done
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub dataset: Option<String>,
    pub jobs: usize,
    pub units_per_job: Option<usize>,
    pub total_units: TotalUnits,
    pub file_list: Option<PathBuf>,
    pub submit_file: PathBuf,
    pub dag_file: Option<PathBuf>,
    pub status_file: Option<PathBuf>,
    pub outputs: Vec<String>,
    pub submitted: bool,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(dataset) = &self.dataset {
            writeln!(f, "Dataset:       {dataset}")?;
        }
        writeln!(f, "Jobs:          {}", self.jobs)?;
        if let Some(units) = self.units_per_job {
            writeln!(f, "Units per job: {units}")?;
            writeln!(f, "Total units:   {}", self.total_units)?;
        }
        if let Some(file_list) = &self.file_list {
            writeln!(f, "File list:     {}", file_list.display())?;
        }
        writeln!(f, "Submit file:   {}", self.submit_file.display())?;
        if let Some(dag) = &self.dag_file {
            writeln!(f, "DAG:           {}", dag.display())?;
        }
        if let Some(status) = &self.status_file {
            writeln!(f, "Check DAG status: DAGstatus.py {}", status.display())?;
        }
        writeln!(f, "Outputs:       {}", self.outputs.join(", "))?;
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

/// Plan, write and (unless dry) submit the jobs
pub fn run<M: MetadataSource + ?Sized>(
    options: &Options,
    site: &SiteConfig,
    context: &RunContext,
    metadata: &M,
    mut sandbox: Sandbox,
) -> Result<Summary, PlanError> {
    if !options.dry {
        site.check_worker()?;
    }

    let manifest = match &options.output_manifest {
        Some(path) => OutputManifest::load(path)?,
        None => {
            debug!("No output manifest given, only the framework report is collected");
            OutputManifest::default()
        }
    };

    let lumi_mask = options.lumi_mask.as_deref().map(load_lumi_mask).transpose()?;
    debug!(run_range = ?options.run_range, "Run range");
    if let Some(mask) = &lumi_mask {
        debug!("Lumi mask: {mask}");
    }

    let plan = resolve_jobs(options, metadata, lumi_mask.as_ref(), context)?;
    info!("Will be submitting {} jobs", plan.job_count);

    let storage = Storage::load(site);
    let output_dir = Path::new(&options.output_dir);
    storage.create_dir(output_dir)?;
    storage.create_dir(&options.log_dir)?;

    // local artifacts live next to the submit description
    let work_dir = options
        .condor_script
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    storage.create_dir(&work_dir)?;
    let mut local_files = Vec::new();

    let filelist = match &plan.filelist {
        Some(name) => {
            let path = write_artifact(&work_dir, name, &render_filelist(&plan.jobs))?;
            sandbox.add_file(&path, "src/filelist.py")?;
            local_files.push(path.clone());
            Some(path)
        }
        None => None,
    };

    if let Some(name) = &plan.lumilist {
        let path = write_artifact(&work_dir, name, &render_lumilist(&plan.jobs))?;
        sandbox.add_file(&path, Path::new("src").join(name))?;
        local_files.push(path);
    }

    sandbox.add_file(&options.config, "src/config.py")?;
    for input in &options.input_files {
        let name = input
            .file_name()
            .ok_or_else(|| BundleError::MissingInput(input.clone()))?;
        sandbox.add_file(input, Path::new("src").join(name))?;
    }

    let sandbox_local = work_dir.join(SANDBOX_NAME);
    sandbox.write(&sandbox_local)?;
    local_files.push(sandbox_local.clone());

    let sandbox_remote = output_dir.join(SANDBOX_NAME);
    storage.copy_from_local(&sandbox_local, &sandbox_remote)?;

    let index = if options.dag.is_some() {
        "$(index)"
    } else {
        "$(process)"
    };
    let description = SubmitDescription {
        executable: site.worker.clone(),
        arguments: worker_arguments(
            options,
            &sandbox_remote.display().to_string(),
            plan.lumilist.as_deref(),
            index,
        ),
        log_stem: options.log_dir.join("cmsRun"),
        resources: site.resources.worker.clone(),
        transfer_executable: true,
        input_files: Vec::new(),
        output_files: job_outputs(options, &manifest, index),
        queue: if options.dag.is_some() { 1 } else { plan.job_count },
    };
    info!("Logs for each job will be written to {}", options.log_dir.display());
    description.write(&options.condor_script)?;

    let status_file = match &options.dag {
        Some(dag_file) => {
            let status_file = status_filename(dag_file);
            let mut dag = Dag::new().with_status_file(&status_file, site.dag.status_interval);
            let name = options.job_name(context);

            for job in 0..plan.job_count {
                dag.add_node(
                    DagNode::new(format!("{job}_{name}"), &options.condor_script)
                        .var("index", job.to_string())
                        .retry(site.dag.retry),
                )?;
            }

            dag.write(dag_file)?;
            Some(status_file)
        }
        None => None,
    };

    if !options.dry {
        let scheduler = Scheduler::load(site);

        match &options.dag {
            Some(dag_file) => scheduler.submit_dag(dag_file)?,
            None => scheduler.submit(&options.condor_script)?,
        }

        for file in &local_files {
            if let Err(error) = storage.remove_file(file) {
                warn!(error = ?error, path = ?file, "Failed to remove local file");
            }
        }
    }

    Ok(Summary {
        dataset: match &options.source {
            Source::Dataset { name, .. } => Some(name.clone()),
            _ => None,
        },
        jobs: plan.job_count,
        units_per_job: options.units_per_job,
        total_units: options.total_units,
        file_list: filelist,
        submit_file: options.condor_script.clone(),
        dag_file: options.dag.clone(),
        status_file,
        outputs: job_outputs(options, &manifest, index),
        submitted: !options.dry,
    })
}
