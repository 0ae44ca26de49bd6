use itertools::Itertools;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GroupingError {
    #[error("Group size must be positive, got {0}")]
    InvalidSize(i64),
}

/// Split `items` into consecutive groups of `size`
///
/// The last group may be short, it is never padded. Group order and the order
/// within each group follow the input.
pub fn group<T, I>(items: I, size: i64) -> Result<Vec<Vec<T>>, GroupingError>
where
    I: IntoIterator<Item = T>,
{
    let size = usize::try_from(size)
        .ok()
        .filter(|size| *size > 0)
        .ok_or(GroupingError::InvalidSize(size))?;

    Ok(items
        .into_iter()
        .chunks(size)
        .into_iter()
        .map(Iterator::collect)
        .collect())
}
