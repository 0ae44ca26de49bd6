use crate::lumis::LumiSelection;
use std::{fmt, fs, path::Path};

/// A single physical input file of a dataset
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatasetFile {
    pub name: String,
    /// run/lumisection coverage, `None` for plain file lists
    pub lumis: Option<LumiSelection>,
    /// names of secondary dataset files covering the same lumisections
    pub parents: Vec<String>,
}

impl DatasetFile {
    pub fn new(name: impl Into<String>, lumis: Option<LumiSelection>) -> Self {
        Self {
            name: name.into(),
            lumis,
            parents: Vec::new(),
        }
    }

    /// copy of this file with its coverage replaced
    pub fn with_lumis(&self, lumis: LumiSelection) -> Self {
        Self {
            lumis: Some(lumis),
            ..self.clone()
        }
    }

    /// copy of this file with the given parents
    pub fn with_parents(&self, parents: Vec<String>) -> Self {
        Self {
            parents,
            ..self.clone()
        }
    }
}

impl fmt::Display for DatasetFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.lumis {
            Some(lumis) => write!(f, "{} {lumis}", self.name)?,
            None => write!(f, "{}", self.name)?,
        }

        if !self.parents.is_empty() {
            write!(f, " <- [{}]", self.parents.join(", "))?;
        }

        Ok(())
    }
}

/// How much of a dataset to process
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TotalUnits {
    All,
    /// fraction in `(0, 1)`
    Fraction(f64),
    Count(usize),
}

impl From<f64> for TotalUnits {
    /// negative and zero mean everything, `(0, 1)` a fraction, anything else a count
    fn from(value: f64) -> Self {
        if value <= 0.0 {
            Self::All
        } else if value < 1.0 {
            Self::Fraction(value)
        } else {
            Self::Count(value as usize)
        }
    }
}

impl TotalUnits {
    /// number of units out of `available`, fractions round up and counts are clamped
    pub fn resolve(self, available: usize) -> usize {
        match self {
            Self::All => available,
            Self::Fraction(fraction) => {
                let units = (fraction * available as f64).ceil() as usize;
                units.min(available)
            }
            Self::Count(count) => count.min(available),
        }
    }
}

impl fmt::Display for TotalUnits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Fraction(fraction) => write!(f, "{fraction}"),
            Self::Count(count) => write!(f, "{count}"),
        }
    }
}

/// Read a plain list of file names, one per line, skipping blank lines
pub fn read_file_list(path: &Path) -> std::io::Result<Vec<DatasetFile>> {
    Ok(fs::read_to_string(path)?
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| DatasetFile::new(line, None))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_file_list_without_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("files.txt");
        fs::write(&path, "/store/a.root\n\n  /store/b.root  \n").unwrap();

        let files = read_file_list(&path).unwrap();
        assert_eq!(
            files,
            vec![
                DatasetFile::new("/store/a.root", None),
                DatasetFile::new("/store/b.root", None)
            ]
        );
    }

    #[test]
    fn total_units_resolution() {
        assert_eq!(TotalUnits::from(-1.0), TotalUnits::All);
        assert_eq!(TotalUnits::from(0.0), TotalUnits::All);
        assert_eq!(TotalUnits::from(0.5), TotalUnits::Fraction(0.5));
        assert_eq!(TotalUnits::from(3.7), TotalUnits::Count(3));

        assert_eq!(TotalUnits::All.resolve(7), 7);
        assert_eq!(TotalUnits::Fraction(0.3).resolve(7), 3);
        assert_eq!(TotalUnits::Count(3).resolve(7), 3);
        assert_eq!(TotalUnits::Count(30).resolve(7), 7);
    }

    #[test]
    fn snapshots_leave_original_untouched() {
        let lumis = LumiSelection::from_pairs([(1, 1), (1, 2)]);
        let original = DatasetFile::new("a.root", Some(lumis));
        let narrowed = original.with_lumis(LumiSelection::from_pairs([(1, 1)]));

        assert_eq!(original.lumis.as_ref().map(LumiSelection::len), Some(2));
        assert_eq!(narrowed.lumis.as_ref().map(LumiSelection::len), Some(1));
        assert_eq!(narrowed.name, original.name);
    }

    #[test]
    fn display_lists_coverage_and_parents() {
        let plain = DatasetFile::new("/store/a.root", None);
        assert_eq!(plain.to_string(), "/store/a.root");

        let lumis = LumiSelection::from_pairs([(1, 1), (1, 2)]);
        let parents = vec!["/store/p1.root".to_string(), "/store/p2.root".to_string()];
        let file = DatasetFile::new("/store/a.root", Some(lumis)).with_parents(parents);
        assert_eq!(
            file.to_string(),
            "/store/a.root {1: [[1, 2]]} <- [/store/p1.root, /store/p2.root]"
        );
    }
}
