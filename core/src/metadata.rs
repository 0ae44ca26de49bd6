use crate::{
    command::{self, CommandError},
    config::SiteConfig,
    dataset::{DatasetFile, TotalUnits},
    lumis::{LumiError, LumiRange, LumiSelection, Run},
};
use serde::{de::DeserializeOwned, Deserialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ResolutionError {
    #[error("Error querying dataset {dataset}: {reason}")]
    Failed { dataset: String, reason: String },
    #[error("Metadata client failed")]
    Command(#[from] CommandError),
    #[error("Malformed metadata response for {dataset}")]
    Malformed {
        dataset: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Metadata response for {dataset} has no file summary")]
    MissingSummary { dataset: String },
    #[error("Invalid lumisection coverage for {file}")]
    Coverage {
        file: String,
        #[source]
        source: LumiError,
    },
}

pub trait MetadataSource {
    /// number of files in a dataset
    fn file_count(&self, dataset: &str) -> Result<usize, ResolutionError>;

    /// up to `limit` valid files of a dataset with their run/lumisection coverage
    fn files(&self, dataset: &str, limit: usize) -> Result<Vec<DatasetFile>, ResolutionError>;
}

/// Number of files to request out of a dataset of `available` files
pub fn requested_file_count(total_units: TotalUnits, available: usize) -> usize {
    if let TotalUnits::Count(count) = total_units {
        if count > available {
            warn!("You specified more files than exist. Using all {available} files.");
        }
    }

    total_units.resolve(available)
}

/// Resolve a dataset into its files, truncated according to `total_units`
pub fn fetch_files<M: MetadataSource + ?Sized>(
    source: &M,
    dataset: &str,
    total_units: TotalUnits,
) -> Result<Vec<DatasetFile>, ResolutionError> {
    info!("Querying metadata for dataset info, please be patient...");
    let available = source.file_count(dataset)?;
    let count = requested_file_count(total_units, available);

    info!("Querying metadata for {count} filenames, please be patient...");
    source.files(dataset, count)
}

#[derive(Deserialize, Debug)]
struct Response<T> {
    #[serde(default)]
    status: String,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Deserialize, Debug)]
struct SummaryEntry {
    summary: Vec<Summary>,
}

/// counts may arrive as strings
#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum Count {
    Number(u64),
    Text(String),
}

#[derive(Deserialize, Debug)]
struct Summary {
    nfiles: Count,
}

#[derive(Deserialize, Debug)]
struct FileEntry {
    file: Vec<FileName>,
    #[serde(default)]
    run: Vec<RunNumber>,
    #[serde(default)]
    lumi: Vec<LumiNumbers>,
}

#[derive(Deserialize, Debug)]
struct FileName {
    name: String,
}

#[derive(Deserialize, Debug)]
struct RunNumber {
    run_number: Run,
}

#[derive(Deserialize, Debug)]
struct LumiNumbers {
    number: Vec<LumiRange>,
}

fn parse_response<T: DeserializeOwned>(
    dataset: &str,
    raw: &str,
) -> Result<Vec<T>, ResolutionError> {
    let response: Response<T> =
        serde_json::from_str(raw).map_err(|source| ResolutionError::Malformed {
            dataset: dataset.to_string(),
            source,
        })?;

    if response.status == "fail" {
        return Err(ResolutionError::Failed {
            dataset: dataset.to_string(),
            reason: response.reason.unwrap_or_default(),
        });
    }

    Ok(response.data)
}

fn parse_summary(dataset: &str, raw: &str) -> Result<usize, ResolutionError> {
    let missing = || ResolutionError::MissingSummary {
        dataset: dataset.to_string(),
    };

    let entries: Vec<SummaryEntry> = parse_response(dataset, raw)?;
    let summary = entries
        .first()
        .and_then(|entry| entry.summary.first())
        .ok_or_else(missing)?;

    match &summary.nfiles {
        Count::Number(count) => Ok(*count as usize),
        Count::Text(count) => count.trim().parse().map_err(|_| missing()),
    }
}

fn parse_files(dataset: &str, raw: &str) -> Result<Vec<DatasetFile>, ResolutionError> {
    let entries: Vec<FileEntry> = parse_response(dataset, raw)?;

    entries
        .into_iter()
        .filter_map(|entry| {
            let name = entry.file.into_iter().next()?.name;

            let lumis = LumiSelection::from_ranges(
                entry
                    .run
                    .iter()
                    .map(|run| run.run_number)
                    .zip(entry.lumi.into_iter().map(|lumi| lumi.number)),
            );

            Some(match lumis {
                Ok(lumis) => Ok(DatasetFile::new(name, Some(lumis))),
                Err(source) => Err(ResolutionError::Coverage { file: name, source }),
            })
        })
        .collect()
}

/// The `das_client.py` command line client
#[derive(Debug, Clone)]
pub struct DasClient {
    command: String,
    timeout: Option<Duration>,
}

impl DasClient {
    pub fn load(config: &SiteConfig) -> Self {
        Self {
            command: config.commands.das_client.clone(),
            timeout: config.timeout(),
        }
    }

    fn query(&self, query: &str, limit: Option<usize>) -> Result<String, ResolutionError> {
        let mut args = vec!["--query".to_string(), query.to_string()];
        if let Some(limit) = limit {
            args.push(format!("--limit={limit}"));
        }
        args.push("--format=json".to_string());

        let output = command::run(&self.command, &args, self.timeout)?;
        debug!("{}", output.stdout);

        Ok(output.stdout)
    }
}

impl MetadataSource for DasClient {
    fn file_count(&self, dataset: &str) -> Result<usize, ResolutionError> {
        let raw = self.query(&format!("summary dataset={dataset}"), None)?;

        parse_summary(dataset, &raw)
    }

    fn files(&self, dataset: &str, limit: usize) -> Result<Vec<DatasetFile>, ResolutionError> {
        let raw = self.query(
            &format!("file,run,lumi dataset={dataset} status=VALID"),
            Some(limit),
        )?;

        parse_files(dataset, &raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUMMARY: &str =
        r#"{"status": "ok", "data": [{"summary": [{"nfiles": 12, "nevents": 4}]}]}"#;
    const FAILED: &str = r#"{"status": "fail", "reason": "dataset not found"}"#;
    const FILES: &str = r#"{
        "status": "ok",
        "data": [
            {
                "file": [{"name": "/store/a.root"}],
                "run": [{"run_number": 100}, {"run_number": 101}],
                "lumi": [{"number": [[1, 3]]}, {"number": [[7, 7], [9, 10]]}]
            },
            {
                "file": [{"name": "/store/b.root"}],
                "run": [{"run_number": 102}],
                "lumi": [{"number": [4, 5]}]
            }
        ]
    }"#;

    #[test]
    fn reads_file_count() {
        assert_eq!(parse_summary("/A/B/C", SUMMARY).unwrap(), 12);
        assert_eq!(
            parse_summary(
                "/A/B/C",
                r#"{"status": "ok", "data": [{"summary": [{"nfiles": "7"}]}]}"#
            )
            .unwrap(),
            7
        );
    }

    #[test]
    fn failure_carries_reason() {
        match parse_summary("/A/B/C", FAILED) {
            Err(ResolutionError::Failed { reason, .. }) => assert_eq!(reason, "dataset not found"),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn empty_summary_is_an_error() {
        assert!(matches!(
            parse_summary("/A/B/C", r#"{"status": "ok", "data": []}"#),
            Err(ResolutionError::MissingSummary { .. })
        ));
    }

    #[test]
    fn reads_files_with_coverage() {
        let files = parse_files("/A/B/C", FILES).unwrap();

        assert_eq!(files.len(), 2);
        assert_eq!(files[0].name, "/store/a.root");
        assert_eq!(
            files[0].lumis,
            Some(LumiSelection::from_pairs([
                (100, 1),
                (100, 2),
                (100, 3),
                (101, 7),
                (101, 9),
                (101, 10)
            ]))
        );
        assert_eq!(
            files[1].lumis,
            Some(LumiSelection::from_pairs([(102, 4), (102, 5)]))
        );
    }

    #[test]
    fn requested_counts() {
        assert_eq!(requested_file_count(TotalUnits::All, 10), 10);
        assert_eq!(requested_file_count(TotalUnits::Fraction(0.25), 10), 3);
        assert_eq!(requested_file_count(TotalUnits::Count(4), 10), 4);
        assert_eq!(requested_file_count(TotalUnits::Count(40), 10), 10);
    }

    struct Snapshot(Vec<DatasetFile>);

    impl MetadataSource for Snapshot {
        fn file_count(&self, _dataset: &str) -> Result<usize, ResolutionError> {
            Ok(self.0.len())
        }

        fn files(&self, _dataset: &str, limit: usize) -> Result<Vec<DatasetFile>, ResolutionError> {
            Ok(self.0.iter().take(limit).cloned().collect())
        }
    }

    #[test]
    fn fetch_truncates() {
        let snapshot = Snapshot(
            (0..4)
                .map(|index| DatasetFile::new(format!("/store/{index}.root"), None))
                .collect(),
        );

        assert_eq!(fetch_files(&snapshot, "/A/B/C", TotalUnits::Fraction(0.5)).unwrap().len(), 2);
        assert_eq!(fetch_files(&snapshot, "/A/B/C", TotalUnits::All).unwrap().len(), 4);
    }
}
