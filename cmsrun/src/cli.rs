use clap::{ArgGroup, Parser};
use std::path::PathBuf;

/// Create HTCondor jobs running a job configuration over a dataset, a list of
/// files or the inputs named in the configuration itself, and submit them.
#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about)]
#[command(group(
    ArgGroup::new("source")
        .required(true)
        .args(["dataset", "filelist", "use_config", "valgrind", "callgrind"])
))]
#[command(group(ArgGroup::new("split").args(["split_by_files", "split_by_lumis"])))]
pub struct Args {
    /// Job configuration to run
    pub config: PathBuf,

    /// Name of the dataset to run over
    #[arg(long, help_heading = "Input")]
    pub dataset: Option<String>,

    /// Plain list of file names to run over, one per line
    #[arg(long, help_heading = "Input")]
    pub filelist: Option<PathBuf>,

    /// Run a single job over the inputs named in the job configuration
    #[arg(long, alias = "useConfig", help_heading = "Input")]
    pub use_config: bool,

    /// Run a single job under valgrind, using the inputs of the job configuration
    #[arg(long, help_heading = "Input")]
    pub valgrind: bool,

    /// Run a single job under callgrind, using the inputs of the job configuration
    #[arg(long, help_heading = "Input")]
    pub callgrind: bool,

    /// Secondary dataset whose files are attached to every primary file
    /// covering the same lumisections
    #[arg(long, alias = "secondaryDataset", help_heading = "Input")]
    pub secondary_dataset: Option<String>,

    /// Additional input file needed by the job, may be repeated
    #[arg(long = "input-file", alias = "inputFile", help_heading = "Input")]
    pub input_files: Vec<PathBuf>,

    /// Number of units (files or lumisections) per job
    #[arg(long, alias = "unitsPerJob", help_heading = "Job division")]
    pub units_per_job: Option<i64>,

    /// Total units to run over: -1 (default) for all, a fraction in (0, 1)
    /// or a number of units
    #[arg(
        long,
        alias = "totalUnits",
        allow_negative_numbers = true,
        help_heading = "Job division"
    )]
    pub total_units: Option<f64>,

    /// A unit is a file
    #[arg(long, alias = "splitByFiles", help_heading = "Job division")]
    pub split_by_files: bool,

    /// A unit is a lumisection
    #[arg(long, alias = "splitByLumis", help_heading = "Job division")]
    pub split_by_lumis: bool,

    /// File or URL with the {run: lumisections} JSON to run over
    #[arg(long, alias = "lumiMask", help_heading = "Dataset filtering")]
    pub lumi_mask: Option<String>,

    /// Runs to run over, comma separated runs and ranges, e.g. 259700,269710-259720
    #[arg(long, alias = "runRange", help_heading = "Dataset filtering")]
    pub run_range: Option<String>,

    /// Where job outputs are stored, must be on HDFS
    #[arg(long, alias = "outputDir", help_heading = "Output")]
    pub output_dir: String,

    /// Submit description to write, auto-generated when missing
    #[arg(long, alias = "condorScript", help_heading = "Output")]
    pub condor_script: Option<PathBuf>,

    /// Run as a DAG, optionally naming the DAG file
    #[arg(long, num_args = 0..=1, value_name = "FILE", help_heading = "Output")]
    pub dag: Option<Option<PathBuf>>,

    /// Directory for job stdout/stderr/log files, auto-generated when missing
    #[arg(long, alias = "logDir", visible_alias = "log", help_heading = "Output")]
    pub log_dir: Option<PathBuf>,

    /// YAML file listing the output files of the job configuration
    #[arg(long, alias = "outputManifest", help_heading = "Output")]
    pub output_manifest: Option<PathBuf>,

    /// Site configuration, defaults to $COMFORTER_CONFIG or built-in values
    #[arg(long, help_heading = "Misc")]
    pub site_config: Option<PathBuf>,

    /// Extra printout
    #[arg(short, long, help_heading = "Misc")]
    pub verbose: bool,

    /// Only write the job files, do not submit
    #[arg(long, help_heading = "Misc")]
    pub dry: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::{error::ErrorKind, CommandFactory};

    #[test]
    fn cli_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn accepts_camel_case_aliases() {
        let args = Args::try_parse_from([
            "cmsrun-condor",
            "pset.py",
            "--dataset",
            "/A/B/RECO",
            "--splitByLumis",
            "--unitsPerJob",
            "10",
            "--totalUnits",
            "-1",
            "--outputDir",
            "/hdfs/user/me",
            "--dag",
        ])
        .unwrap();

        assert!(args.split_by_lumis);
        assert_eq!(args.units_per_job, Some(10));
        assert_eq!(args.total_units, Some(-1.0));
        assert_eq!(args.dag, Some(None));
    }

    #[test]
    fn dag_takes_optional_file() {
        let args = Args::try_parse_from([
            "cmsrun-condor",
            "pset.py",
            "--use-config",
            "--output-dir",
            "/hdfs/user/me",
            "--dag",
            "/storage/me/jobs.dag",
        ])
        .unwrap();

        assert_eq!(args.dag, Some(Some(PathBuf::from("/storage/me/jobs.dag"))));
    }

    #[test]
    fn exactly_one_source() {
        let error = Args::try_parse_from([
            "cmsrun-condor",
            "pset.py",
            "--dataset",
            "/A/B/RECO",
            "--filelist",
            "files.txt",
            "--output-dir",
            "/hdfs/user/me",
        ])
        .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::ArgumentConflict);

        let error =
            Args::try_parse_from(["cmsrun-condor", "pset.py", "--output-dir", "/hdfs/user/me"])
                .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::MissingRequiredArgument);
    }
}
