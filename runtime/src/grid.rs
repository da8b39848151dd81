//! Launch grids: the 1-D index space a dispatch runs over.

use crate::error::{InvalidGridSnafu, Result};

/// Upper bound for the implicitly chosen work-group size.
const IMPLICIT_GROUP_CAP: usize = 64;

/// A 1-D launch grid `[offset, offset + extent)`.
///
/// Each index invokes one logical worker; workers are clustered into
/// work-groups of `group_size`. Grids are transient values passed per
/// dispatch call, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grid {
    offset: usize,
    extent: usize,
    group_size: Option<usize>,
}

impl Grid {
    /// Grid over `[0, extent)` with an implementation-chosen group size.
    pub fn linear(extent: usize) -> Self {
        Self { offset: 0, extent, group_size: None }
    }

    /// Grid over `[offset, offset + extent)`.
    pub fn with_offset(offset: usize, extent: usize) -> Self {
        Self { offset, extent, group_size: None }
    }

    /// Grid over `[0, extent)` with an explicit group size.
    ///
    /// The dispatcher rejects the dispatch if `extent` is not evenly
    /// divisible by `group_size`.
    pub fn grouped(extent: usize, group_size: usize) -> Self {
        Self { offset: 0, extent, group_size: Some(group_size) }
    }

    pub fn group_size(self, group_size: usize) -> Self {
        Self { group_size: Some(group_size), ..self }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn extent(&self) -> usize {
        self.extent
    }

    pub fn explicit_group_size(&self) -> Option<usize> {
        self.group_size
    }

    /// Partition `[0, extent)` into `n` disjoint equal regions, region `r`
    /// covering `[r*(extent/n), (r+1)*(extent/n))`.
    ///
    /// `extent` must be evenly divisible by `n`; that is a caller
    /// obligation, not something the dispatcher validates.
    pub fn regions(extent: usize, n: usize) -> Vec<Grid> {
        debug_assert!(n > 0 && extent % n == 0, "extent {extent} not divisible into {n} regions");
        let step = extent / n;
        (0..n).map(|r| Grid::with_offset(r * step, step)).collect()
    }

    /// Validate and fix the grouping for execution.
    pub(crate) fn resolve(&self) -> Result<ResolvedGrid> {
        snafu::ensure!(self.extent > 0, InvalidGridSnafu { reason: "extent must be non-zero" });

        let group_size = match self.group_size {
            Some(g) => {
                snafu::ensure!(g > 0, InvalidGridSnafu { reason: "group size must be non-zero" });
                snafu::ensure!(
                    self.extent % g == 0,
                    InvalidGridSnafu {
                        reason: format!("extent {} not divisible by group size {g}", self.extent),
                    }
                );
                g
            }
            None => implicit_group_size(self.extent),
        };

        Ok(ResolvedGrid {
            offset: self.offset,
            extent: self.extent,
            group_size,
            group_count: self.extent / group_size,
            explicit_grouping: self.group_size.is_some(),
        })
    }
}

/// Largest divisor of `extent` not exceeding the implicit cap, so implicit
/// grouping always divides the extent evenly.
fn implicit_group_size(extent: usize) -> usize {
    let cap = extent.min(IMPLICIT_GROUP_CAP);
    (1..=cap).rev().find(|g| extent % g == 0).unwrap_or(1)
}

/// A grid whose grouping has been validated and made concrete.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ResolvedGrid {
    pub offset: usize,
    pub extent: usize,
    pub group_size: usize,
    pub group_count: usize,
    pub explicit_grouping: bool,
}
