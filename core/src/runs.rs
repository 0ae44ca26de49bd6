use crate::lumis::Run;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RunRangeError {
    #[error("'{0}' is not a valid run number")]
    InvalidRun(String),
    #[error("Run range '{0}' must have exactly one start and one end")]
    MalformedRange(String),
    #[error("Run range {start}-{end} is inverted")]
    InvertedRange { start: Run, end: Run },
}

fn parse_run(value: &str) -> Result<Run, RunRangeError> {
    value
        .trim()
        .parse()
        .map_err(|_| RunRangeError::InvalidRun(value.trim().to_string()))
}

/// Parse a run range string into a list of run numbers
///
/// Individual runs and inclusive ranges may be combined, separated by commas.
/// Input order and duplicates are kept as given.
///
/// - `"234567,234568"` -> `[234567, 234568]`
/// - `"234567-234569"` -> `[234567, 234568, 234569]`
/// - `"234567,234569-234570"` -> `[234567, 234569, 234570]`
/// - `""` -> `[]`
/// - nothing given -> `None`, i.e. no filter at all
pub fn parse_run_range(range: Option<&str>) -> Result<Option<Vec<Run>>, RunRangeError> {
    let range = match range {
        Some(range) => range,
        None => return Ok(None),
    };

    if range.trim().is_empty() {
        return Ok(Some(Vec::new()));
    }

    let mut runs = Vec::new();

    for entry in range.split(',').map(str::trim) {
        match entry.split_once('-') {
            Some((start, end)) => {
                if end.contains('-') {
                    return Err(RunRangeError::MalformedRange(entry.to_string()));
                }

                let (start, end) = (parse_run(start)?, parse_run(end)?);
                if start > end {
                    return Err(RunRangeError::InvertedRange { start, end });
                }

                runs.extend(start..=end);
            }
            None => runs.push(parse_run(entry)?),
        }
    }

    Ok(Some(runs))
}
