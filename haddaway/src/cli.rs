use clap::{ArgGroup, Parser};
use comforter_core::config::ConfigErrors;
use std::{
    env, fs,
    path::{Path, PathBuf},
};

/// Merge ROOT files with hadd in parallel on HTCondor.
///
/// Inputs are merged in groups by intermediate jobs, a final job merges the
/// intermediate files and cleanup jobs remove them afterwards.
#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about)]
#[command(group(ArgGroup::new("inputs").required(true).args(["input_list", "input"])))]
pub struct Args {
    /// Output filename, must be on HDFS
    #[arg(long)]
    pub output: String,

    /// Text file with one input file per line
    #[arg(long, alias = "inputList")]
    pub input_list: Option<PathBuf>,

    /// Input file(s)
    #[arg(long, num_args = 1..)]
    pub input: Vec<PathBuf>,

    /// Number of files for an intermediate hadd job
    #[arg(long, default_value_t = 20, allow_negative_numbers = true)]
    pub size: i64,

    /// Arguments to pass to hadd
    #[arg(long, alias = "haddArgs", allow_hyphen_values = true)]
    pub hadd_args: Option<String>,

    /// Site configuration, defaults to $COMFORTER_CONFIG or built-in values
    #[arg(long)]
    pub site_config: Option<PathBuf>,

    /// Extra printout
    #[arg(short, long)]
    pub verbose: bool,

    /// Only write the job files, do not submit
    #[arg(long)]
    pub dry: bool,
}

fn read_input_list(path: &Path) -> Result<Vec<PathBuf>, ConfigErrors> {
    if !path.is_file() {
        return Err(ConfigErrors::FileNotFound(path.to_path_buf()));
    }

    Ok(fs::read_to_string(path)?
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(PathBuf::from)
        .collect())
}

impl Args {
    /// Absolute paths of all inputs, each of which must exist
    pub fn input_files(&self) -> Result<Vec<String>, ConfigErrors> {
        let inputs = match &self.input_list {
            Some(list) => read_input_list(list)?,
            None => self.input.clone(),
        };

        if inputs.len() < 2 {
            return Err(ConfigErrors::invalid(
                "input",
                format!("needs at least 2 files, got {}, merging not needed", inputs.len()),
            ));
        }

        let cwd = env::current_dir()?;
        inputs
            .into_iter()
            .map(|input| {
                let input = cwd.join(input);
                match input.is_file() {
                    true => Ok(input.display().to_string()),
                    false => Err(ConfigErrors::FileNotFound(input)),
                }
            })
            .collect()
    }
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
    fn parses_camel_case_aliases() {
        let args = Args::try_parse_from([
            "haddaway",
            "--output",
            "/hdfs/user/me/merged.root",
            "--inputList",
            "files.txt",
            "--haddArgs",
            "-f -k",
        ])
        .unwrap();

        assert_eq!(args.input_list, Some(PathBuf::from("files.txt")));
        assert_eq!(args.hadd_args.as_deref(), Some("-f -k"));
        assert_eq!(args.size, 20);
    }

    #[test]
    fn needs_one_kind_of_input() {
        let missing = Args::try_parse_from(["haddaway", "--output", "/hdfs/out.root"]).unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::MissingRequiredArgument);

        let both = Args::try_parse_from([
            "haddaway",
            "--output",
            "/hdfs/out.root",
            "--input-list",
            "files.txt",
            "--input",
            "a.root",
        ])
        .unwrap_err();
        assert_eq!(both.kind(), ErrorKind::ArgumentConflict);
    }

    #[test]
    fn collects_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.root");
        let b = dir.path().join("b.root");
        fs::write(&a, "x").unwrap();
        fs::write(&b, "x").unwrap();

        let list = dir.path().join("files.txt");
        fs::write(&list, format!("{}\n\n  {}  \n", a.display(), b.display())).unwrap();

        let args = Args {
            input_list: Some(list),
            ..Args::default()
        };
        assert_eq!(
            args.input_files().unwrap(),
            vec![a.display().to_string(), b.display().to_string()]
        );

        let args = Args {
            input: vec![a.clone()],
            ..Args::default()
        };
        assert!(matches!(
            args.input_files(),
            Err(ConfigErrors::InvalidFlag { .. })
        ));

        let args = Args {
            input: vec![a, dir.path().join("missing.root")],
            ..Args::default()
        };
        assert!(matches!(
            args.input_files(),
            Err(ConfigErrors::FileNotFound(_))
        ));
    }
}
