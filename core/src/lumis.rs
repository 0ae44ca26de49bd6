use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, info};

pub type Run = u32;
pub type Lumi = u32;

/// the compact on-disk form, `{"run": [[first, last], ...]}`
pub type CompactList = BTreeMap<String, Vec<LumiRange>>;

/// a single lumisection or an inclusive `[first, last]` range
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(untagged)]
pub enum LumiRange {
    Single(Lumi),
    Range(Lumi, Lumi),
}

#[derive(Error, Debug)]
pub enum LumiError {
    #[error("Run number '{0}' is not a valid integer")]
    InvalidRun(String),
    #[error("Lumisection range {first}-{last} in run {run} is inverted")]
    InvertedRange { run: Run, first: Lumi, last: Lumi },
    #[error("Failed to parse lumi mask")]
    Json(#[from] serde_json::Error),
    #[error("Cannot read lumi mask {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Cannot fetch lumi mask from {url}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Selection of lumisections, keyed by run number.
///
/// No run ever maps to an empty set; removing the last lumisection of a run
/// removes the run.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(try_from = "CompactList", into = "CompactList")]
pub struct LumiSelection {
    runs: BTreeMap<Run, BTreeSet<Lumi>>,
}

impl LumiSelection {
    pub fn new() -> Self {
        Self::default()
    }

    /// build a selection from explicit (run, lumi) keys
    pub fn from_pairs<I: IntoIterator<Item = (Run, Lumi)>>(pairs: I) -> Self {
        let mut selection = Self::new();

        for (run, lumi) in pairs {
            selection.insert(run, lumi);
        }

        selection
    }

    /// build a selection from a run -> ranges map as returned by the metadata service
    pub fn from_ranges<I, R>(ranges: I) -> Result<Self, LumiError>
    where
        I: IntoIterator<Item = (Run, R)>,
        R: IntoIterator<Item = LumiRange>,
    {
        let mut selection = Self::new();

        for (run, run_ranges) in ranges {
            for range in run_ranges {
                let (first, last) = match range {
                    LumiRange::Single(lumi) => (lumi, lumi),
                    LumiRange::Range(first, last) => (first, last),
                };

                if first > last {
                    return Err(LumiError::InvertedRange { run, first, last });
                }

                for lumi in first..=last {
                    selection.insert(run, lumi);
                }
            }
        }

        Ok(selection)
    }

    pub fn insert(&mut self, run: Run, lumi: Lumi) {
        self.runs.entry(run).or_default().insert(lumi);
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// number of (run, lumi) pairs
    pub fn len(&self) -> usize {
        self.runs.values().map(BTreeSet::len).sum()
    }

    pub fn contains(&self, run: Run, lumi: Lumi) -> bool {
        self.runs
            .get(&run)
            .map_or(false, |lumis| lumis.contains(&lumi))
    }

    /// all (run, lumi) pairs in ascending order
    pub fn lumis(&self) -> impl Iterator<Item = (Run, Lumi)> + '_ {
        self.runs
            .iter()
            .flat_map(|(run, lumis)| lumis.iter().map(move |lumi| (*run, *lumi)))
    }

    pub fn intersection(&self, other: &Self) -> Self {
        let runs = self
            .runs
            .iter()
            .filter_map(|(run, lumis)| {
                let other_lumis = other.runs.get(run)?;
                let overlap: BTreeSet<Lumi> = lumis.intersection(other_lumis).copied().collect();

                (!overlap.is_empty()).then_some((*run, overlap))
            })
            .collect();

        Self { runs }
    }

    pub fn union_with(&mut self, other: &Self) {
        for (run, lumis) in other.runs.iter() {
            self.runs
                .entry(*run)
                .or_default()
                .extend(lumis.iter().copied());
        }
    }

    /// keep only the given runs
    pub fn select_runs(&self, runs: &[Run]) -> Self {
        let runs = self
            .runs
            .iter()
            .filter(|(run, _)| runs.contains(run))
            .map(|(run, lumis)| (*run, lumis.clone()))
            .collect();

        Self { runs }
    }

    /// collapse every run into inclusive, ascending lumisection ranges
    pub fn compact(&self) -> Vec<(Run, Vec<(Lumi, Lumi)>)> {
        self.runs
            .iter()
            .map(|(run, lumis)| {
                let mut ranges: Vec<(Lumi, Lumi)> = Vec::new();

                for lumi in lumis.iter().copied() {
                    match ranges.last_mut() {
                        Some((_, last)) if *last + 1 == lumi => *last = lumi,
                        _ => ranges.push((lumi, lumi)),
                    }
                }

                (*run, ranges)
            })
            .collect()
    }

    /// `run:first-run:last` strings, the form the framework uses for lumi blocks
    pub fn block_ranges(&self) -> Vec<String> {
        self.compact()
            .into_iter()
            .flat_map(|(run, ranges)| {
                ranges
                    .into_iter()
                    .map(move |(first, last)| format!("{run}:{first}-{run}:{last}"))
            })
            .collect()
    }
}

impl TryFrom<CompactList> for LumiSelection {
    type Error = LumiError;

    fn try_from(compact: CompactList) -> Result<Self, Self::Error> {
        let ranges = compact
            .into_iter()
            .map(|(run, ranges)| {
                run.trim()
                    .parse::<Run>()
                    .map(|run| (run, ranges))
                    .map_err(|_| LumiError::InvalidRun(run))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::from_ranges(ranges)
    }
}

impl From<LumiSelection> for CompactList {
    fn from(selection: LumiSelection) -> Self {
        selection
            .compact()
            .into_iter()
            .map(|(run, ranges)| {
                (
                    run.to_string(),
                    ranges
                        .into_iter()
                        .map(|(first, last)| LumiRange::Range(first, last))
                        .collect(),
                )
            })
            .collect()
    }
}

impl fmt::Display for LumiSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body = self
            .compact()
            .into_iter()
            .map(|(run, ranges)| {
                let ranges = ranges
                    .into_iter()
                    .map(|(first, last)| format!("[{first}, {last}]"))
                    .join(", ");

                format!("{run}: [{ranges}]")
            })
            .join(", ");

        write!(f, "{{{body}}}")
    }
}

/// Test if a lumi mask source is a URL rather than a local file
pub fn is_url(source: &str) -> bool {
    source.starts_with("http") || source.starts_with("www")
}

/// Load a lumi mask from a JSON file or URL
pub fn load_lumi_mask(source: &str) -> Result<LumiSelection, LumiError> {
    let content = if is_url(source) {
        info!("Fetching lumi mask from {source}");

        reqwest::blocking::get(source)
            .and_then(|response| response.error_for_status())
            .and_then(|response| response.text())
            .map_err(|source_error| LumiError::Fetch {
                url: source.to_string(),
                source: source_error,
            })?
    } else {
        let path = Path::new(source);

        fs::read_to_string(path).map_err(|error| LumiError::Io {
            path: path.to_path_buf(),
            source: error,
        })?
    };

    let mask: LumiSelection = serde_json::from_str(&content)?;
    debug!(runs = mask.runs.len(), lumis = mask.len(), "Loaded lumi mask");

    Ok(mask)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selection(json: &str) -> LumiSelection {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn parses_golden_json() {
        let mask = selection(r#"{"100": [[1, 3], [7, 7]], "101": [[2, 2]]}"#);

        assert_eq!(mask.len(), 5);
        assert!(mask.contains(100, 2));
        assert!(mask.contains(100, 7));
        assert!(!mask.contains(100, 5));
        assert!(mask.contains(101, 2));
        assert_eq!(mask.select_runs(&[101]), LumiSelection::from_pairs([(101, 2)]));
    }

    #[test]
    fn rejects_inverted_and_non_numeric() {
        assert!(serde_json::from_str::<LumiSelection>(r#"{"100": [[5, 1]]}"#).is_err());
        assert!(serde_json::from_str::<LumiSelection>(r#"{"abc": [[1, 1]]}"#).is_err());
    }

    #[test]
    fn intersection_drops_empty_runs() {
        let file = selection(r#"{"100": [[1, 5]], "200": [[1, 2]]}"#);
        let mask = selection(r#"{"100": [[4, 9]], "200": [[3, 3]]}"#);

        let overlap = file.intersection(&mask);
        assert_eq!(overlap, LumiSelection::from_pairs([(100, 4), (100, 5)]));
        assert!(overlap.select_runs(&[200]).is_empty());
    }

    #[test]
    fn union_merges_key_wise() {
        let mut a = LumiSelection::from_pairs([(1, 1), (1, 2)]);
        let b = LumiSelection::from_pairs([(1, 3), (2, 1)]);
        a.union_with(&b);

        assert_eq!(
            a,
            LumiSelection::from_pairs([(1, 1), (1, 2), (1, 3), (2, 1)])
        );
    }

    #[test]
    fn select_runs_keeps_listed_runs() {
        let file = LumiSelection::from_pairs([(1, 1), (2, 1), (3, 1)]);

        assert_eq!(
            file.select_runs(&[3, 1, 99]),
            LumiSelection::from_pairs([(1, 1), (3, 1)])
        );
        assert!(file.select_runs(&[]).is_empty());
    }

    #[test]
    fn compacts_into_block_ranges() {
        let lumis = LumiSelection::from_pairs([(5, 1), (5, 2), (5, 3), (5, 7), (6, 10)]);

        assert_eq!(
            lumis.block_ranges(),
            vec!["5:1-5:3", "5:7-5:7", "6:10-6:10"]
        );
        assert_eq!(lumis.to_string(), "{5: [[1, 3], [7, 7]], 6: [[10, 10]]}");
    }

    #[test]
    fn serializes_back_to_compact_json() {
        let lumis = LumiSelection::from_pairs([(5, 1), (5, 2), (6, 4)]);

        assert_eq!(
            serde_json::to_string(&lumis).unwrap(),
            r#"{"5":[[1,2]],"6":[[4,4]]}"#
        );
    }

    #[test]
    fn detects_urls() {
        assert!(is_url("https://cms-service-dqm.web.cern.ch/golden.json"));
        assert!(is_url("www.example.org/mask.json"));
        assert!(!is_url("/storage/user/mask.json"));
    }

    #[test]
    fn loads_mask_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mask.json");
        fs::write(&path, r#"{"273158": [[1, 3]]}"#).unwrap();

        let mask = load_lumi_mask(path.to_str().unwrap()).unwrap();
        assert_eq!(mask.len(), 3);

        assert!(matches!(
            load_lumi_mask(dir.path().join("missing.json").to_str().unwrap()),
            Err(LumiError::Io { .. })
        ));
    }
}
