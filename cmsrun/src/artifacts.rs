use crate::split::JobGroup;
use comforter_core::context::RunContext;
use itertools::Itertools;
use std::{
    fmt::Write as _,
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("Failed to write {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// `/A/B-v1/RECO` -> `A_B_v1_RECO`
pub fn dataset_stem(dataset: &str) -> String {
    dataset
        .chars()
        .skip(1)
        .map(|c| if c == '/' || c == '-' { '_' } else { c })
        .collect()
}

pub fn filelist_name(dataset: &str) -> String {
    format!("fileList_{}.py", dataset_stem(dataset))
}

pub fn lumilist_name(dataset: &str) -> String {
    format!("lumiList_{}.py", dataset_stem(dataset))
}

/// file list name for plain lists, timestamped to stay unique
pub fn user_filelist_name(context: &RunContext) -> String {
    format!("filelist_user_{}.py", context.timestamp)
}

fn quoted<'a, I: IntoIterator<Item = &'a str>>(items: I) -> String {
    items.into_iter().map(|item| format!("'{item}'")).join(", ")
}

/// `fileNames` and `secondaryFileNames` dicts, job index -> file names
pub fn render_filelist(jobs: &[JobGroup]) -> String {
    let mut out = String::from("fileNames = {");
    for (index, job) in jobs.iter().enumerate() {
        let names = quoted(job.files.iter().map(|file| file.name.as_str()));
        let _ = writeln!(out, "{index}: [{names}],");
    }
    out.push_str("}\n");

    out.push_str("secondaryFileNames = {");
    for (index, job) in jobs.iter().enumerate() {
        let _ = writeln!(out, "{index}: [{}],", quoted(job.parents()));
    }
    out.push_str("}\n");

    out
}

/// `lumis` dict, job index -> `run:first-run:last` ranges
pub fn render_lumilist(jobs: &[JobGroup]) -> String {
    let mut out = String::from("import FWCore.ParameterSet.Config as cms\nlumis = {");

    for (index, job) in jobs.iter().enumerate() {
        let ranges = job
            .lumis
            .as_ref()
            .map(|lumis| lumis.block_ranges())
            .unwrap_or_default();
        let _ = writeln!(
            out,
            "{index}: [{}], ",
            quoted(ranges.iter().map(String::as_str))
        );
    }
    out.push_str("}\n");

    out
}

pub fn write_artifact(dir: &Path, name: &str, contents: &str) -> Result<PathBuf, ArtifactError> {
    let path = dir.join(name);

    fs::create_dir_all(dir)
        .and_then(|_| fs::write(&path, contents))
        .map_err(|source| ArtifactError::Io {
            path: path.clone(),
            source,
        })?;
    info!("Wrote {}", path.display());

    Ok(path)
}
