use crate::cli::Args;
use comforter_core::{
    config::{ConfigErrors, SiteConfig},
    context::RunContext,
    dataset::TotalUnits,
    lumis::{is_url, Run},
    runs::parse_run_range,
};
use std::{
    env,
    path::{Path, PathBuf},
};
use tracing::{info, warn};

pub const TOOL: &str = "cmsRunCondor";

/// Where the job inputs come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Dataset {
        name: String,
        secondary: Option<String>,
    },
    FileList(PathBuf),
    /// one job over the inputs of the job configuration
    UseConfig,
    Valgrind,
    Callgrind,
}

impl Source {
    /// sources that run one job over the inputs of the job configuration
    pub fn is_config_driven(&self) -> bool {
        matches!(self, Self::UseConfig | Self::Valgrind | Self::Callgrind)
    }

    pub fn is_profiling(&self) -> bool {
        matches!(self, Self::Valgrind | Self::Callgrind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitMode {
    Files,
    Lumis,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    pub config: PathBuf,
    pub source: Source,
    pub split: SplitMode,
    // always positive unless the source is config driven
    pub units_per_job: Option<usize>,
    pub total_units: TotalUnits,
    pub lumi_mask: Option<String>,
    pub run_range: Option<Vec<Run>>,
    pub output_dir: String,
    pub condor_script: PathBuf,
    pub dag: Option<PathBuf>,
    pub log_dir: PathBuf,
    pub input_files: Vec<PathBuf>,
    pub output_manifest: Option<PathBuf>,
    pub dry: bool,
}

fn absolute(path: &Path) -> Result<PathBuf, ConfigErrors> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(env::current_dir()?.join(path))
    }
}

/// Fail if any flag of `left` is combined with any flag of `right`
fn exclusive(left: &[(&str, bool)], right: &[(&str, bool)]) -> Result<(), ConfigErrors> {
    for (a, a_set) in left {
        for (b, b_set) in right {
            if *a_set && *b_set {
                return Err(ConfigErrors::Conflicting(a.to_string(), b.to_string()));
            }
        }
    }

    Ok(())
}

impl Options {
    pub fn from_args(
        args: Args,
        site: &SiteConfig,
        context: &RunContext,
    ) -> Result<Self, ConfigErrors> {
        if !args.config.is_file() {
            return Err(ConfigErrors::FileNotFound(args.config));
        }

        exclusive(
            &[("filelist", args.filelist.is_some())],
            &[
                ("split-by-lumis", args.split_by_lumis),
                ("lumi-mask", args.lumi_mask.is_some()),
                ("run-range", args.run_range.is_some()),
            ],
        )?;
        exclusive(
            &[
                ("use-config", args.use_config),
                ("valgrind", args.valgrind),
                ("callgrind", args.callgrind),
            ],
            &[
                ("split-by-files", args.split_by_files),
                ("split-by-lumis", args.split_by_lumis),
                ("lumi-mask", args.lumi_mask.is_some()),
                ("run-range", args.run_range.is_some()),
                ("units-per-job", args.units_per_job.is_some()),
                ("total-units", args.total_units.is_some()),
                ("secondary-dataset", args.secondary_dataset.is_some()),
            ],
        )?;

        if args.secondary_dataset.is_some() && args.dataset.is_none() {
            return Err(ConfigErrors::invalid("secondary-dataset", "requires --dataset"));
        }

        let source = match (args.dataset, args.filelist) {
            (Some(name), None) => Source::Dataset {
                name,
                secondary: args.secondary_dataset,
            },
            (None, Some(filelist)) => {
                let filelist = absolute(&filelist)?;
                if !filelist.is_file() {
                    return Err(ConfigErrors::FileNotFound(filelist));
                }

                Source::FileList(filelist)
            }
            (Some(_), Some(_)) => {
                return Err(ConfigErrors::Conflicting(
                    "dataset".to_string(),
                    "filelist".to_string(),
                ))
            }
            (None, None) if args.use_config => Source::UseConfig,
            (None, None) if args.valgrind => Source::Valgrind,
            (None, None) if args.callgrind => Source::Callgrind,
            (None, None) => {
                return Err(ConfigErrors::invalid(
                    "dataset",
                    "or one of --filelist, --use-config, --valgrind, --callgrind is required",
                ))
            }
        };

        let split = match (&source, args.split_by_files, args.split_by_lumis) {
            (Source::FileList(_), false, _) => {
                warn!(
                    "You didn't specify --split-by-files, but since you're using --filelist \
                     jobs are split by number of files anyway"
                );
                SplitMode::Files
            }
            (Source::Dataset { .. }, false, false) => {
                return Err(ConfigErrors::invalid(
                    "dataset",
                    "needs either --split-by-files or --split-by-lumis",
                ))
            }
            (_, _, true) => SplitMode::Lumis,
            (_, _, false) => SplitMode::Files,
        };

        if !site.is_on_hdfs(&args.output_dir) {
            return Err(ConfigErrors::NotOnHdfs {
                flag: "output-dir".to_string(),
                path: args.output_dir,
                prefix: site.hdfs_prefix.clone(),
            });
        }

        let total = args.total_units.unwrap_or(-1.0);
        let units_per_job = if source.is_config_driven() {
            None
        } else {
            match args.units_per_job {
                Some(units) if units > 0 => {
                    if total >= 1.0 && units as f64 > total {
                        return Err(ConfigErrors::UnitsExceedTotal { units, total });
                    }

                    Some(units as usize)
                }
                Some(_) | None => {
                    return Err(ConfigErrors::invalid(
                        "units-per-job",
                        "must be given as a positive integer",
                    ))
                }
            }
        };

        if let Source::Dataset {
            secondary: Some(secondary),
            ..
        } = &source
        {
            info!("Running 2-file solution with secondary dataset {secondary}");
        }

        let run_range = parse_run_range(args.run_range.as_deref())
            .map_err(|error| ConfigErrors::invalid("run-range", error.to_string()))?;

        let lumi_mask = match args.lumi_mask {
            Some(mask) if is_url(&mask) => Some(mask),
            Some(mask) => Some(absolute(Path::new(&mask))?.display().to_string()),
            None => None,
        };

        let condor_script = match args.condor_script {
            Some(script) => absolute(&script)?,
            None => {
                let script = context.script_filename(&site.storage_root, TOOL);
                warn!(
                    "You didn't specify a condor script, auto-generated one at {}",
                    script.display()
                );
                script
            }
        };

        let log_dir = match args.log_dir {
            Some(dir) => absolute(&dir)?,
            None => {
                let dir = context.log_dir(&site.storage_root, TOOL);
                warn!(
                    "You didn't specify a log directory, auto-generated one at {}",
                    dir.display()
                );
                dir
            }
        };

        let dag = match args.dag {
            Some(Some(dag)) => Some(absolute(&dag)?),
            Some(None) => {
                let dag = context.dag_filename(&site.storage_root, TOOL);
                warn!(
                    "You didn't specify a DAG filename, auto-generated one at {}",
                    dag.display()
                );
                Some(dag)
            }
            None => None,
        };

        for path in [Some(&condor_script), Some(&log_dir), dag.as_ref()]
            .into_iter()
            .flatten()
        {
            site.check_location(path)?;
        }

        let input_files = args
            .input_files
            .iter()
            .map(|input| {
                let input = absolute(input)?;
                match input.is_file() {
                    true => Ok(input),
                    false => Err(ConfigErrors::FileNotFound(input)),
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        let output_manifest = args
            .output_manifest
            .as_deref()
            .map(absolute)
            .transpose()?;

        Ok(Self {
            config: absolute(&args.config)?,
            source,
            split,
            units_per_job,
            total_units: TotalUnits::from(total),
            lumi_mask,
            run_range,
            output_dir: args.output_dir,
            condor_script,
            dag,
            log_dir,
            input_files,
            output_manifest,
            dry: args.dry,
        })
    }

    /// filtering by run or lumisection was requested
    pub fn is_filtered(&self) -> bool {
        self.lumi_mask.is_some() || self.run_range.is_some()
    }

    /// name stem shared by the DAG nodes
    pub fn job_name(&self, context: &RunContext) -> String {
        match &self.source {
            Source::Dataset { name, .. } => crate::artifacts::dataset_stem(name),
            Source::FileList(path) => path
                .file_stem()
                .map(|stem| stem.to_string_lossy().chars().take(20).collect())
                .unwrap_or_else(|| "filelist".to_string()),
            Source::UseConfig => format!("cmsRun_{}", context.timestamp),
            Source::Valgrind => "valgrind".to_string(),
            Source::Callgrind => "callgrind".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn context() -> RunContext {
        RunContext {
            username: "alice".to_string(),
            datestamp: "04_Mar_16".to_string(),
            timestamp: "142501".to_string(),
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        config: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("pset.py");
        fs::write(&config, "process = None\n").unwrap();

        Fixture { dir, config }
    }

    fn dataset_args(fixture: &Fixture) -> Args {
        Args {
            config: fixture.config.clone(),
            dataset: Some("/A/B-v1/RECO".to_string()),
            split_by_lumis: true,
            units_per_job: Some(2),
            output_dir: "/hdfs/user/alice/out".to_string(),
            ..Args::default()
        }
    }

    #[test]
    fn defaults_are_generated() {
        let fixture = fixture();
        let mut args = dataset_args(&fixture);
        args.dag = Some(None);

        let options = Options::from_args(args, &SiteConfig::default(), &context()).unwrap();

        assert_eq!(options.split, SplitMode::Lumis);
        assert_eq!(options.units_per_job, Some(2));
        assert_eq!(options.total_units, TotalUnits::All);
        assert_eq!(
            options.condor_script,
            PathBuf::from("/storage/alice/cmsRunCondor/04_Mar_16/cmsRunCondor_142501.condor")
        );
        assert_eq!(
            options.dag,
            Some(PathBuf::from("/storage/alice/cmsRunCondor/04_Mar_16/cmsRunCondor_142501.dag"))
        );
        assert_eq!(options.job_name(&context()), "A_B_v1_RECO");
    }

    #[test]
    fn secondary_needs_dataset() {
        let fixture = fixture();
        let list = fixture.dir.path().join("files.txt");
        fs::write(&list, "/store/a.root\n").unwrap();

        let args = Args {
            config: fixture.config.clone(),
            filelist: Some(list),
            secondary_dataset: Some("/A/B/RAW".to_string()),
            output_dir: "/hdfs/user/alice/out".to_string(),
            ..Args::default()
        };

        assert!(matches!(
            Options::from_args(args, &SiteConfig::default(), &context()),
            Err(ConfigErrors::InvalidFlag { flag, .. }) if flag == "secondary-dataset"
        ));
    }

    #[test]
    fn input_files_must_exist() {
        let fixture = fixture();
        let extra = fixture.dir.path().join("extra.txt");
        fs::write(&extra, "x").unwrap();

        let mut args = dataset_args(&fixture);
        args.input_files = vec![extra.clone()];
        let options = Options::from_args(args, &SiteConfig::default(), &context()).unwrap();
        assert_eq!(options.input_files, vec![extra]);

        let missing = fixture.dir.path().join("missing_extra.txt");
        let mut args = dataset_args(&fixture);
        args.input_files = vec![missing.clone()];
        assert!(matches!(
            Options::from_args(args, &SiteConfig::default(), &context()),
            Err(ConfigErrors::FileNotFound(path)) if path == missing
        ));
    }

    #[test]
    fn missing_config_is_reported() {
        let fixture = fixture();
        let mut args = dataset_args(&fixture);
        args.config = fixture.dir.path().join("missing.py");

        assert!(matches!(
            Options::from_args(args, &SiteConfig::default(), &context()),
            Err(ConfigErrors::FileNotFound(_))
        ));
    }

    #[test]
    fn filelist_conflicts_with_lumi_splitting() {
        let fixture = fixture();
        let list = fixture.dir.path().join("files.txt");
        fs::write(&list, "/store/a.root\n").unwrap();

        let mut args = dataset_args(&fixture);
        args.dataset = None;
        args.filelist = Some(list);

        match Options::from_args(args, &SiteConfig::default(), &context()) {
            Err(ConfigErrors::Conflicting(a, b)) => {
                assert_eq!((a.as_str(), b.as_str()), ("filelist", "split-by-lumis"))
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn filelist_forces_file_splitting() {
        let fixture = fixture();
        let list = fixture.dir.path().join("files.txt");
        fs::write(&list, "/store/a.root\n").unwrap();

        let mut args = dataset_args(&fixture);
        args.dataset = None;
        args.split_by_lumis = false;
        args.filelist = Some(list.clone());

        let options = Options::from_args(args, &SiteConfig::default(), &context()).unwrap();
        assert_eq!(options.split, SplitMode::Files);
        assert_eq!(options.source, Source::FileList(list));
        assert_eq!(options.job_name(&context()), "files");
    }

    #[test]
    fn config_modes_reject_splitting_flags() {
        let fixture = fixture();
        let args = Args {
            config: fixture.config.clone(),
            valgrind: true,
            units_per_job: Some(3),
            output_dir: "/hdfs/user/alice/out".to_string(),
            ..Args::default()
        };

        match Options::from_args(args, &SiteConfig::default(), &context()) {
            Err(ConfigErrors::Conflicting(a, b)) => {
                assert_eq!((a.as_str(), b.as_str()), ("valgrind", "units-per-job"))
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn config_mode_needs_no_units() {
        let fixture = fixture();
        let args = Args {
            config: fixture.config.clone(),
            use_config: true,
            output_dir: "/hdfs/user/alice/out".to_string(),
            ..Args::default()
        };

        let options = Options::from_args(args, &SiteConfig::default(), &context()).unwrap();
        assert_eq!(options.source, Source::UseConfig);
        assert_eq!(options.units_per_job, None);
        assert_eq!(options.job_name(&context()), "cmsRun_142501");
    }

    #[test]
    fn units_are_validated() {
        let fixture = fixture();

        let mut args = dataset_args(&fixture);
        args.units_per_job = None;
        assert!(matches!(
            Options::from_args(args, &SiteConfig::default(), &context()),
            Err(ConfigErrors::InvalidFlag { .. })
        ));

        let mut args = dataset_args(&fixture);
        args.units_per_job = Some(0);
        assert!(matches!(
            Options::from_args(args, &SiteConfig::default(), &context()),
            Err(ConfigErrors::InvalidFlag { .. })
        ));

        let mut args = dataset_args(&fixture);
        args.units_per_job = Some(5);
        args.total_units = Some(3.0);
        assert!(matches!(
            Options::from_args(args, &SiteConfig::default(), &context()),
            Err(ConfigErrors::UnitsExceedTotal { units: 5, .. })
        ));

        // fractions never conflict with the units per job
        let mut args = dataset_args(&fixture);
        args.units_per_job = Some(5);
        args.total_units = Some(0.5);
        assert!(Options::from_args(args, &SiteConfig::default(), &context()).is_ok());
    }

    #[test]
    fn dataset_needs_split_mode() {
        let fixture = fixture();
        let mut args = dataset_args(&fixture);
        args.split_by_lumis = false;

        assert!(matches!(
            Options::from_args(args, &SiteConfig::default(), &context()),
            Err(ConfigErrors::InvalidFlag { .. })
        ));
    }

    #[test]
    fn locations_are_checked() {
        let fixture = fixture();

        let mut args = dataset_args(&fixture);
        args.output_dir = "/storage/alice/out".to_string();
        assert!(matches!(
            Options::from_args(args, &SiteConfig::default(), &context()),
            Err(ConfigErrors::NotOnHdfs { .. })
        ));

        let mut args = dataset_args(&fixture);
        args.condor_script = Some(PathBuf::from("/hdfs/user/alice/job.condor"));
        assert!(matches!(
            Options::from_args(args, &SiteConfig::default(), &context()),
            Err(ConfigErrors::ForbiddenLocation { .. })
        ));
    }

    #[test]
    fn bad_run_range_names_the_flag() {
        let fixture = fixture();
        let mut args = dataset_args(&fixture);
        args.run_range = Some("12-3".to_string());

        match Options::from_args(args, &SiteConfig::default(), &context()) {
            Err(ConfigErrors::InvalidFlag { flag, .. }) => assert_eq!(flag, "run-range"),
            other => panic!("unexpected result {other:?}"),
        }
    }
}
