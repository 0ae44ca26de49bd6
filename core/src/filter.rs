use crate::{
    dataset::DatasetFile,
    lumis::{Lumi, LumiSelection, Run},
};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoverageError {
    #[error("No secondary file covers run {run} lumisection {lumi} (range {first}-{last})")]
    Uncovered {
        run: Run,
        lumi: Lumi,
        first: Lumi,
        last: Lumi,
    },
}

/// apply `narrow` to every file with known coverage, dropping files left empty
fn narrow_files<F>(files: &[DatasetFile], narrow: F) -> Vec<DatasetFile>
where
    F: Fn(&LumiSelection) -> LumiSelection,
{
    files
        .iter()
        .filter_map(|file| match &file.lumis {
            Some(lumis) => {
                let narrowed = narrow(lumis);

                if narrowed.is_empty() {
                    debug!(file = %file.name, "Dropped file without selected lumisections");
                    None
                } else {
                    Some(file.with_lumis(narrowed))
                }
            }
            None => Some(file.clone()),
        })
        .collect()
}

/// Keep only the given runs in every file
///
/// An empty run list means no filtering.
pub fn filter_by_run_list(files: &[DatasetFile], runs: &[Run]) -> Vec<DatasetFile> {
    if runs.is_empty() {
        return files.to_vec();
    }

    narrow_files(files, |lumis| lumis.select_runs(runs))
}

/// Intersect every file with a lumi mask
///
/// An empty mask means no filtering.
pub fn filter_by_lumi_mask(files: &[DatasetFile], mask: &LumiSelection) -> Vec<DatasetFile> {
    if mask.is_empty() {
        return files.to_vec();
    }

    narrow_files(files, |lumis| lumis.intersection(mask))
}

/// Find all candidates that jointly cover every (run, lumi) in `target`
///
/// Every single pair must be covered by at least one candidate, otherwise the
/// whole lookup fails. The result keeps candidate order and holds no
/// duplicates.
pub fn find_covering_files<'a>(
    candidates: &'a [DatasetFile],
    target: &LumiSelection,
) -> Result<Vec<&'a DatasetFile>, CoverageError> {
    let mut covering = vec![false; candidates.len()];

    for (run, ranges) in target.compact() {
        for (first, last) in ranges {
            for lumi in first..=last {
                let mut found = false;

                for (index, candidate) in candidates.iter().enumerate() {
                    if candidate
                        .lumis
                        .as_ref()
                        .map_or(false, |lumis| lumis.contains(run, lumi))
                    {
                        covering[index] = true;
                        found = true;
                    }
                }

                if !found {
                    return Err(CoverageError::Uncovered {
                        run,
                        lumi,
                        first,
                        last,
                    });
                }
            }
        }
    }

    Ok(candidates
        .iter()
        .zip(covering)
        .filter_map(|(candidate, covers)| covers.then_some(candidate))
        .collect())
}

/// Record, for every primary file, the secondary files covering its lumisections
pub fn attach_parents(
    files: &[DatasetFile],
    secondary: &[DatasetFile],
) -> Result<Vec<DatasetFile>, CoverageError> {
    files
        .iter()
        .map(|file| match &file.lumis {
            Some(lumis) => {
                let parents = find_covering_files(secondary, lumis)?
                    .into_iter()
                    .map(|parent| parent.name.clone())
                    .collect();

                Ok(file.with_parents(parents))
            }
            None => Ok(file.clone()),
        })
        .collect()
}
