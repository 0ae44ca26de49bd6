use comforter_core::{
    config::ConfigErrors,
    dataset::{DatasetFile, TotalUnits},
    grouping::{group, GroupingError},
    lumis::{Lumi, LumiSelection, Run},
};
use itertools::Itertools;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Files assigned to one job, plus the lumisections it should process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobGroup {
    pub files: Vec<DatasetFile>,
    pub lumis: Option<LumiSelection>,
}

impl JobGroup {
    /// secondary files of every file in the job, without duplicates
    pub fn parents(&self) -> Vec<&str> {
        self.files
            .iter()
            .flat_map(|file| file.parents.iter().map(String::as_str))
            .unique()
            .collect()
    }
}

/// Group whole files, each job covers the union of its files' lumisections
pub fn split_by_files(
    files: &[DatasetFile],
    files_per_job: usize,
) -> Result<Vec<JobGroup>, GroupingError> {
    Ok(group(files.iter().cloned(), files_per_job as i64)?
        .into_iter()
        .map(|files| {
            let lumis = files
                .iter()
                .filter_map(|file| file.lumis.as_ref())
                .fold(None, |acc: Option<LumiSelection>, lumis| match acc {
                    Some(mut acc) => {
                        acc.union_with(lumis);
                        Some(acc)
                    }
                    None => Some(lumis.clone()),
                });

            JobGroup { files, lumis }
        })
        .collect())
}

/// Map every (run, lumi) onto the file providing it, in (run, lumi) order
///
/// When two files claim the same lumisection the later file wins.
pub fn flatten_lumis(files: &[DatasetFile]) -> BTreeMap<(Run, Lumi), &DatasetFile> {
    let mut owners: BTreeMap<(Run, Lumi), &DatasetFile> = BTreeMap::new();

    for file in files {
        let Some(lumis) = &file.lumis else {
            debug!(file = %file.name, "No lumisection information, skipped");
            continue;
        };

        for key in lumis.lumis() {
            if let Some(previous) = owners.insert(key, file) {
                if previous.name != file.name {
                    warn!(
                        run = key.0,
                        lumi = key.1,
                        previous = %previous.name,
                        file = %file.name,
                        "Lumisection claimed by two files, using the later one"
                    );
                }
            }
        }
    }

    owners
}

/// Group single lumisections, each job covers exactly its own lumisections
pub fn split_by_lumis(
    files: &[DatasetFile],
    lumis_per_job: usize,
    total_units: TotalUnits,
) -> Result<Vec<JobGroup>, GroupingError> {
    let owners = flatten_lumis(files);
    let keep = total_units.resolve(owners.len());
    debug!("Using {keep} of {} lumisections", owners.len());

    Ok(group(owners.into_iter().take(keep), lumis_per_job as i64)?
        .into_iter()
        .map(|keys| {
            let files = keys
                .iter()
                .map(|(_, file)| *file)
                .unique_by(|file| file.name.clone())
                .cloned()
                .collect();

            JobGroup {
                files,
                lumis: Some(LumiSelection::from_pairs(keys.into_iter().map(|(key, _)| key))),
            }
        })
        .collect())
}

/// Truncate a plain file list
///
/// Fractions are rounded to the nearest file, asking for more files than the
/// list holds is an error.
pub fn select_from_list(
    files: Vec<DatasetFile>,
    total_units: TotalUnits,
) -> Result<Vec<DatasetFile>, ConfigErrors> {
    let keep = match total_units {
        TotalUnits::All => files.len(),
        TotalUnits::Fraction(fraction) => (fraction * files.len() as f64).round() as usize,
        TotalUnits::Count(count) if count > files.len() => {
            return Err(ConfigErrors::invalid(
                "total-units",
                format!(
                    "({count}) cannot exceed the {} files in the file list, use -1 for all of them",
                    files.len()
                ),
            ))
        }
        TotalUnits::Count(count) => count,
    };

    Ok(files.into_iter().take(keep).collect())
}
