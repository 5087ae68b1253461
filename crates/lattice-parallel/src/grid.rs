//! Cartesian process grid

use lattice_types::{LatticeError, Result};
use serde::Serialize;

/// Row-major 2D grid of `dims[0] * dims[1]` ranks.
///
/// Dimension 0 is the pipeline axis, dimension 1 the tensor axis. Neither axis
/// wraps around.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CartesianGrid {
    dims: [usize; 2],
}

impl CartesianGrid {
    pub fn new(pipeline_size: usize, tensor_size: usize) -> Result<Self> {
        if pipeline_size == 0 || tensor_size == 0 {
            return Err(LatticeError::topology(format!(
                "grid dimensions must be positive, got ({}, {})",
                pipeline_size, tensor_size
            )));
        }
        if pipeline_size.checked_mul(tensor_size).is_none() {
            return Err(LatticeError::topology(format!(
                "grid ({}, {}) has more ranks than fit in usize",
                pipeline_size, tensor_size
            )));
        }
        Ok(Self {
            dims: [pipeline_size, tensor_size],
        })
    }

    pub fn dims(&self) -> [usize; 2] {
        self.dims
    }

    /// Number of ranks in the grid; `new` rules out overflow
    pub fn size(&self) -> usize {
        self.dims[0] * self.dims[1]
    }

    /// `[row, column]` of `rank`
    pub fn coords(&self, rank: usize) -> Result<[usize; 2]> {
        if rank >= self.size() {
            return Err(LatticeError::topology(format!(
                "rank {} outside grid of {} ranks",
                rank,
                self.size()
            )));
        }
        Ok([rank / self.dims[1], rank % self.dims[1]])
    }

    /// Rank at `coords`
    pub fn rank(&self, coords: [usize; 2]) -> Result<usize> {
        if coords[0] >= self.dims[0] || coords[1] >= self.dims[1] {
            return Err(LatticeError::topology(format!(
                "coordinates {:?} outside grid {:?}",
                coords, self.dims
            )));
        }
        Ok(coords[0] * self.dims[1] + coords[1])
    }

    /// Source and destination of a shift by `disp` along `dim`.
    ///
    /// A neighbor falling off the grid is `None`.
    pub fn shift(
        &self,
        rank: usize,
        dim: usize,
        disp: isize,
    ) -> Result<(Option<usize>, Option<usize>)> {
        if dim >= 2 {
            return Err(LatticeError::topology(format!(
                "grid has 2 dimensions, got dimension {}",
                dim
            )));
        }
        let coords = self.coords(rank)?;
        let neighbor = |offset: isize| -> Result<Option<usize>> {
            let position = coords[dim] as isize + offset;
            if position < 0 || position >= self.dims[dim] as isize {
                return Ok(None);
            }
            let mut moved = coords;
            moved[dim] = position as usize;
            self.rank(moved).map(Some)
        };
        Ok((neighbor(-disp)?, neighbor(disp)?))
    }

    /// Split color and ordering key of `rank` for the sub-grid keeping `remain`.
    ///
    /// Ranks with equal coordinates on every dropped dimension share a color;
    /// the key orders them by their coordinates on the kept dimensions.
    pub fn sub_color_key(&self, rank: usize, remain: [bool; 2]) -> Result<(usize, usize)> {
        let coords = self.coords(rank)?;
        let mut color = 0;
        let mut key = 0;
        for dim in 0..2 {
            if remain[dim] {
                key = key * self.dims[dim] + coords[dim];
            } else {
                color = color * self.dims[dim] + coords[dim];
            }
        }
        Ok((color, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coords_are_row_major() {
        let grid = CartesianGrid::new(2, 3).unwrap();
        assert_eq!(grid.coords(0).unwrap(), [0, 0]);
        assert_eq!(grid.coords(4).unwrap(), [1, 1]);
        assert_eq!(grid.rank([1, 2]).unwrap(), 5);
        assert!(grid.coords(6).is_err());
        assert!(grid.rank([2, 0]).is_err());
    }

    #[test]
    fn shift_is_not_periodic() {
        let grid = CartesianGrid::new(3, 2).unwrap();
        // Along the pipeline axis from the middle stage.
        assert_eq!(grid.shift(3, 0, 1).unwrap(), (Some(1), Some(5)));
        // First stage has no predecessor.
        assert_eq!(grid.shift(1, 0, 1).unwrap(), (None, Some(3)));
        // Along the tensor axis.
        assert_eq!(grid.shift(4, 1, 1).unwrap(), (None, Some(5)));
        assert_eq!(grid.shift(5, 1, 1).unwrap(), (Some(4), None));
        assert!(grid.shift(0, 2, 1).is_err());
    }

    #[test]
    fn sub_grids_partition_rows_and_columns() {
        let grid = CartesianGrid::new(2, 2).unwrap();
        // Rows: color = pipeline coordinate, key = tensor coordinate.
        assert_eq!(grid.sub_color_key(2, [false, true]).unwrap(), (1, 0));
        assert_eq!(grid.sub_color_key(3, [false, true]).unwrap(), (1, 1));
        // Columns: color = tensor coordinate, key = pipeline coordinate.
        assert_eq!(grid.sub_color_key(2, [true, false]).unwrap(), (0, 1));
        assert_eq!(grid.sub_color_key(1, [true, false]).unwrap(), (1, 0));
    }

    #[test]
    fn zero_dims_rejected() {
        assert!(CartesianGrid::new(0, 2).is_err());
        assert!(CartesianGrid::new(2, 0).is_err());
    }

    #[test]
    fn overflowing_dims_rejected() {
        let err = CartesianGrid::new(usize::MAX, 2).unwrap_err();
        assert!(err.is_configuration());
    }
}
