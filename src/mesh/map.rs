use serde::{Deserialize, Serialize};

/// How the faces of one patch moved through a topology change: for each new
/// face, the index of the old face whose data it inherits, or `None` if the
/// face is new and its boundary condition must decide its value.
///
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PatchMap {
    pub addressing: Vec<Option<usize>>,
    pub old_size: usize,
}

impl PatchMap {
    pub fn identity(size: usize) -> Self {
        Self {
            addressing: (0..size).map(Some).collect(),
            old_size: size,
        }
    }

    pub fn size(&self) -> usize {
        self.addressing.len()
    }

    pub fn is_identity(&self) -> bool {
        self.old_size == self.addressing.len()
            && self.addressing.iter().enumerate().all(|(i, a)| *a == Some(i))
    }

    /// Apply the map to per-face data, filling unmapped entries with `fill`.
    ///
    pub fn apply<T: Copy>(&self, old: &[T], fill: T) -> Vec<T> {
        self.addressing
            .iter()
            .map(|a| a.and_then(|i| old.get(i).copied()).unwrap_or(fill))
            .collect()
    }

    /// Mean of the old values that are still referenced by the map, or
    /// `None` if nothing was mapped.
    pub fn mapped_mean<T>(&self, old: &[T]) -> Option<T>
    where
        T: Copy + core::ops::Add<Output = T> + core::ops::Mul<f64, Output = T>,
    {
        let mapped: Vec<T> = self.addressing.iter().filter_map(|a| a.and_then(|i| old.get(i).copied())).collect();
        let n = mapped.len();
        let first = *mapped.first()?;
        let sum = mapped[1..].iter().fold(first, |acc, x| acc + *x);
        Some(sum * (1.0 / n as f64))
    }
}

/// The map handed to fields after a topology change.
///
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshMap {
    pub cell_map: Vec<Option<usize>>,
    pub patch_maps: Vec<PatchMap>,
}

impl MeshMap {
    pub fn identity(n_cells: usize, patch_sizes: &[usize]) -> Self {
        Self {
            cell_map: (0..n_cells).map(Some).collect(),
            patch_maps: patch_sizes.iter().map(|n| PatchMap::identity(*n)).collect(),
        }
    }
}
