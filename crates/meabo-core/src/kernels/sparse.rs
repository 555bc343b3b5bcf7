//! Phase 6: CSR sparse matrix-vector product.

use crate::error::{try_copy, Error, Result};
use crate::kernels::{Output, PhaseKernel, ShadowSet};
use crate::phase::PhaseId;
use crate::runner::{Partitioned, Region};

/// Compressed sparse row matrix.
#[derive(Clone, Debug, PartialEq)]
pub struct CsrMatrix {
    row_ptr: Vec<usize>,
    cols: Vec<u32>,
    values: Vec<f64>,
    ncols: usize,
}

impl CsrMatrix {
    /// Build from per-row `(column, value)` lists.
    pub fn from_rows(rows: Vec<Vec<(u32, f64)>>, ncols: usize) -> Result<Self> {
        let nnz = rows.iter().map(Vec::len).sum();
        let mut row_ptr = Vec::with_capacity(rows.len() + 1);
        let mut cols = Vec::with_capacity(nnz);
        let mut values = Vec::with_capacity(nnz);
        row_ptr.push(0);
        for (row, entries) in rows.into_iter().enumerate() {
            for (col, value) in entries {
                if col as usize >= ncols {
                    return Err(Error::InvalidConfig(format!(
                        "sparse row {row} references column {col} of a {ncols}-column matrix"
                    )));
                }
                cols.push(col);
                values.push(value);
            }
            row_ptr.push(cols.len());
        }
        Ok(Self {
            row_ptr,
            cols,
            values,
            ncols,
        })
    }

    pub fn nrows(&self) -> usize {
        self.row_ptr.len() - 1
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn nonzeros(&self) -> usize {
        self.values.len()
    }

    /// Dot product of `row` with `vector`.
    pub fn row_dot(&self, row: usize, vector: &[f64]) -> f64 {
        let span = self.row_ptr[row]..self.row_ptr[row + 1];
        self.cols[span.clone()]
            .iter()
            .zip(&self.values[span])
            .map(|(&col, &value)| value * vector[col as usize])
            .sum()
    }

    fn try_clone(&self) -> Result<Self> {
        Ok(Self {
            row_ptr: try_copy("reference row_ptr", &self.row_ptr)?,
            cols: try_copy("reference cols", &self.cols)?,
            values: try_copy("reference values", &self.values)?,
            ncols: self.ncols,
        })
    }
}

/// `vect_out = matrix * vect_in`, rows split across workers.
#[derive(Clone, Debug)]
pub struct SparseMatVec {
    pub matrix: CsrMatrix,
    pub vect_in: Vec<f64>,
    pub vect_out: Vec<f64>,
}

impl SparseMatVec {
    pub fn new(matrix: CsrMatrix, vect_in: Vec<f64>) -> Result<Self> {
        if vect_in.len() != matrix.ncols() {
            return Err(Error::InvalidConfig(format!(
                "sparse input vector has {} elements for {} columns",
                vect_in.len(),
                matrix.ncols()
            )));
        }
        let vect_out = vec![0.0; matrix.nrows()];
        Ok(Self {
            matrix,
            vect_in,
            vect_out,
        })
    }
}

impl PhaseKernel for SparseMatVec {
    fn phase(&self) -> PhaseId {
        PhaseId::SparseMatVec
    }

    fn execute(&mut self, region: &Region<'_>, shadow: Option<&mut ShadowSet>) -> Result<()> {
        let shadow = match shadow {
            Some(shadow) => Some(shadow.single_f64_mut()?),
            None => None,
        };
        let workers = region.workers();
        let (matrix, vect_in) = (&self.matrix, &self.vect_in);
        let out = Partitioned::new(&mut self.vect_out, workers);
        let shadow = shadow.map(|shadow| Partitioned::new(shadow, workers));

        region.run(|ctx| {
            let mut part = out.lock(ctx.index());
            let mut mirror = shadow.as_ref().map(|shadow| shadow.lock(ctx.index()));
            let start = part.start;
            for (offset, value) in part.data.iter_mut().enumerate() {
                *value = matrix.row_dot(start + offset, vect_in);
                if let Some(mirror) = mirror.as_mut() {
                    mirror.data[offset] = *value;
                }
            }
        })
    }

    fn outputs(&self) -> Vec<Output<'_>> {
        vec![Output::f64("vect_out", &self.vect_out)]
    }

    fn reference_copy(&self) -> Result<Option<Self>> {
        Ok(Some(Self {
            matrix: self.matrix.try_clone()?,
            vect_in: try_copy("reference vect_in", &self.vect_in)?,
            vect_out: try_copy("reference vect_out", &self.vect_out)?,
        }))
    }

    fn shadow_layout(&self, _workers: usize) -> Result<Option<ShadowSet>> {
        ShadowSet::new().with_f64("vect_out", self.vect_out.len()).map(Some)
    }

    fn bytes_per_iteration(&self) -> u64 {
        (self.matrix.nonzeros() * (8 + 4 + 8) + self.vect_out.len() * 8) as u64
    }
}
