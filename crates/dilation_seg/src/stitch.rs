//! Reassembles per-tile output blocks into one `C×H×W` volume.

use ndarray::{concatenate, Array3, ArrayView3, Axis};

use crate::error::{Error, Result};

/// Blocks collected in tile order; a row is closed with [`BlockGrid::finish_row`].
#[derive(Debug, Default)]
pub struct BlockGrid {
    rows: Vec<Array3<f32>>,
    current: Vec<Array3<f32>>,
}

impl BlockGrid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, block: Array3<f32>) {
        self.current.push(block);
    }

    /// Join the blocks of the current row along width.
    pub fn finish_row(&mut self) -> Result<()> {
        if self.current.is_empty() {
            return Err(Error::Shape("cannot finish an empty tile row".to_string()));
        }
        let row = concat(Axis(2), &self.current)?;
        self.current.clear();
        self.rows.push(row);
        Ok(())
    }

    /// Join all finished rows along height.
    pub fn finish(self) -> Result<Array3<f32>> {
        if !self.current.is_empty() {
            return Err(Error::Shape(format!(
                "{} blocks left in an unfinished tile row",
                self.current.len()
            )));
        }
        if self.rows.is_empty() {
            return Err(Error::Shape("no tile rows to stitch".to_string()));
        }
        concat(Axis(1), &self.rows)
    }
}

fn concat(axis: Axis, blocks: &[Array3<f32>]) -> Result<Array3<f32>> {
    let views: Vec<ArrayView3<'_, f32>> = blocks.iter().map(|b| b.view()).collect();
    concatenate(axis, &views).map_err(|e| {
        let shapes: Vec<_> = blocks.iter().map(|b| b.dim()).collect();
        Error::Shape(format!("cannot stitch blocks {shapes:?}: {e}"))
    })
}
