use comforter_core::config::ConfigErrors;
use serde::{Deserialize, Serialize};
use std::{fmt::Display, fs, path::Path};
use tracing::debug;

/// Output files the job configuration produces, e.g.
///
/// ```yaml
/// outputs:
///   - ntuple.root
///   - histograms.root
/// ```
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct OutputManifest {
    #[serde(default)]
    pub outputs: Vec<String>,
}

impl OutputManifest {
    pub fn load(path: &Path) -> Result<Self, ConfigErrors> {
        if !path.is_file() {
            return Err(ConfigErrors::FileNotFound(path.to_path_buf()));
        }

        let manifest: Self = serde_yaml::from_str(&fs::read_to_string(path)?)?;
        debug!(outputs = ?manifest.outputs, "Loaded output manifest");

        Ok(manifest)
    }

    /// Files a single job leaves behind
    ///
    /// `index` is either a job number or a scheduler macro such as `$(process)`.
    /// The framework report is always part of the outputs.
    pub fn job_outputs(&self, index: impl Display) -> Vec<String> {
        self.outputs
            .iter()
            .map(|output| match output.strip_suffix(".root") {
                Some(stem) => format!("{stem}_{index}.root"),
                None => output.clone(),
            })
            .chain(std::iter::once(format!("report{index}.xml")))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indexes_root_outputs() {
        let manifest = OutputManifest {
            outputs: vec!["ntuple.root".to_string(), "summary.txt".to_string()],
        };

        assert_eq!(
            manifest.job_outputs(3),
            vec!["ntuple_3.root", "summary.txt", "report3.xml"]
        );
        assert_eq!(
            manifest.job_outputs("$(process)"),
            vec!["ntuple_$(process).root", "summary.txt", "report$(process).xml"]
        );
    }

    #[test]
    fn report_is_always_listed() {
        assert_eq!(OutputManifest::default().job_outputs(0), vec!["report0.xml"]);
    }

    #[test]
    fn loads_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outputs.yml");
        fs::write(&path, "outputs:\n  - ntuple.root\n").unwrap();

        assert_eq!(
            OutputManifest::load(&path).unwrap().outputs,
            vec!["ntuple.root"]
        );

        fs::write(&path, "outputs: []\nextra: 1\n").unwrap();
        assert!(matches!(
            OutputManifest::load(&path),
            Err(ConfigErrors::Parse(_))
        ));
    }
}
