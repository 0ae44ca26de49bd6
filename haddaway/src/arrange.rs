use comforter_core::{config::ConfigErrors, grouping::group};
use tracing::debug;

/// Group size actually used for `count` inputs
///
/// Shrinks the size by one when the last group would hold a single file, so
/// no job merges one file by itself.
pub fn adjust_group_size(count: usize, size: i64) -> Result<usize, ConfigErrors> {
    let size = usize::try_from(size)
        .ok()
        .filter(|size| *size >= 2)
        .ok_or_else(|| ConfigErrors::invalid("size", format!("must be at least 2, got {size}")))?;

    if count % size == 1 && size > 2 {
        debug!("Reducing group size to {} to avoid a single-file group", size - 1);
        return Ok(size - 1);
    }

    Ok(size)
}

/// Split inputs into the groups merged by intermediate jobs
pub fn arrange<T>(inputs: Vec<T>, size: i64) -> Result<Vec<Vec<T>>, ConfigErrors> {
    let size = adjust_group_size(inputs.len(), size)?;

    group(inputs, size as i64).map_err(|error| ConfigErrors::invalid("size", error.to_string()))
}
