//! Batch planning: split unprocessed rows into fixed-size, ordered batches.

use aibridge_shared::{AiBridgeError, Result, WorkItem};

/// One group of rows dispatched as a single provider call.
#[derive(Debug, Clone, Copy)]
pub struct Batch<'a> {
    /// 1-based batch number within the plan.
    pub number: usize,
    pub items: &'a [WorkItem],
}

impl<'a> Batch<'a> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn ids(&self) -> Vec<i64> {
        self.items.iter().map(|item| item.id).collect()
    }

    /// Rows with their local 1-based position, as used for numbering.
    pub fn positions(&self) -> impl Iterator<Item = (usize, &'a WorkItem)> + 'a {
        self.items.iter().enumerate().map(|(i, item)| (i + 1, item))
    }
}

/// Rows sorted ascending by id, ready to be cut into batches.
#[derive(Debug, Clone)]
pub struct BatchPlan {
    items: Vec<WorkItem>,
    batch_size: usize,
}

/// Plan `items` into batches of at most `batch_size` rows.
///
/// Fails with a config error when `batch_size` is zero. To resume from a
/// later point, plan again with the remaining rows.
pub fn plan(mut items: Vec<WorkItem>, batch_size: usize) -> Result<BatchPlan> {
    if batch_size == 0 {
        return Err(AiBridgeError::config("batch size must be greater than zero"));
    }
    items.sort_by_key(|item| item.id);
    Ok(BatchPlan { items, batch_size })
}

impl BatchPlan {
    /// Number of batches, `ceil(rows / batch_size)`.
    pub fn total(&self) -> usize {
        self.items.len().div_ceil(self.batch_size)
    }

    pub fn rows(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Lazily yield batches in ascending id order.
    pub fn batches(&self) -> Batches<'_> {
        Batches {
            chunks: self.items.chunks(self.batch_size),
            next_number: 1,
        }
    }
}

impl<'a> IntoIterator for &'a BatchPlan {
    type Item = Batch<'a>;
    type IntoIter = Batches<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.batches()
    }
}

/// Iterator over the batches of a [`BatchPlan`].
#[derive(Debug, Clone)]
pub struct Batches<'a> {
    chunks: std::slice::Chunks<'a, WorkItem>,
    next_number: usize,
}

impl<'a> Iterator for Batches<'a> {
    type Item = Batch<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let items = self.chunks.next()?;
        let number = self.next_number;
        self.next_number += 1;
        Some(Batch { number, items })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.chunks.size_hint()
    }
}

impl ExactSizeIterator for Batches<'_> {}
