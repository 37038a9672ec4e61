//! Contiguous-key grouping
//!
//! Folds a stream of `(key, item)` pairs into one [`Group`] per run of equal
//! keys. Input must keep each key's rows together: once a run is closed its
//! key may not appear again, and a repeat is reported as
//! [`LoadError::OrderingViolation`] instead of creating a second group.
//!
//! Only contiguity is checked, not ascending order. The exports are grouped
//! by parent id but not always sorted numerically, and a grouped write is
//! correct either way. Detecting a repeat this way means every closed key is
//! remembered until the stage ends, one `i64` per parent (a few MB for a
//! million products).
//!
//! Rows whose item was filtered out still belong to their key's run, so a
//! run whose every row was filtered emits a group with no items. Every run
//! emits exactly one group, wherever it sits in the stream.

use std::collections::HashSet;

use crate::error::{LoadError, Result};

/// All items of one run of equal keys, in source order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group<T> {
    pub key: i64,
    pub items: Vec<T>,
}

/// Incremental contiguous-key folder
#[derive(Debug)]
pub struct GroupAccumulator<T> {
    current: Option<Group<T>>,
    /// Keys of every finished run; lives as long as the stage
    closed: HashSet<i64>,
}

impl<T> Default for GroupAccumulator<T> {
    fn default() -> Self {
        Self {
            current: None,
            closed: HashSet::new(),
        }
    }
}

impl<T> GroupAccumulator<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one row. `item` is `None` when the row was filtered out.
    ///
    /// Returns the previous group when `key` starts a new run.
    pub fn push(&mut self, key: i64, item: Option<T>) -> Result<Option<Group<T>>> {
        if let Some(group) = self.current.as_mut() {
            if group.key == key {
                group.items.extend(item);
                return Ok(None);
            }
        }

        if self.closed.contains(&key) {
            return Err(LoadError::OrderingViolation { key });
        }

        let finished = self.current.replace(Group {
            key,
            items: item.into_iter().collect(),
        });
        if let Some(ref group) = finished {
            self.closed.insert(group.key);
        }

        Ok(finished)
    }

    /// Key of the run currently being folded
    pub fn current_key(&self) -> Option<i64> {
        self.current.as_ref().map(|g| g.key)
    }

    /// Close the stream, returning the last group if any row was seen
    pub fn finish(self) -> Option<Group<T>> {
        self.current
    }
}
