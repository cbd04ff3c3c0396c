//! The hypothesis batch: one token sequence per row, all rows equally long.
//!
//! Rows are laid out as `n_audio` contiguous groups of `n_group` rows
//! (beam width or best-of count).  Decoders rebuild the batch every step;
//! the row order of the rebuilt batch is the order the key/value cache must
//! be rearranged to.

use ndarray::Array2;

use crate::error::{DecodeError, Result};

// ---------------------------------------------------------------------------
// TokenBatch
// ---------------------------------------------------------------------------

/// A rectangular batch of token sequences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBatch {
    rows: Vec<Vec<u32>>,
}

impl TokenBatch {
    /// Build a batch, rejecting ragged rows.
    pub fn from_rows(rows: Vec<Vec<u32>>) -> Result<Self> {
        if let Some(first) = rows.first() {
            let expected = first.len();
            if let Some((row, r)) = rows.iter().enumerate().find(|(_, r)| r.len() != expected) {
                return Err(DecodeError::RaggedBatch {
                    row,
                    found: r.len(),
                    expected,
                });
            }
        }
        Ok(Self { rows })
    }

    /// `n_rows` copies of `initial`.
    pub fn repeat(initial: &[u32], n_rows: usize) -> Self {
        Self {
            rows: vec![initial.to_vec(); n_rows],
        }
    }

    /// Repeat each row `n` times in place (`[a, b]` → `[a, a, b, b]` for `n = 2`).
    pub fn repeat_interleave(&self, n: usize) -> Self {
        let rows = self
            .rows
            .iter()
            .flat_map(|r| std::iter::repeat(r.clone()).take(n))
            .collect();
        Self { rows }
    }

    /// Number of rows.
    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    /// Length of every row (0 for an empty batch).
    pub fn seq_len(&self) -> usize {
        self.rows.first().map_or(0, Vec::len)
    }

    /// Borrow one row.
    pub fn row(&self, index: usize) -> &[u32] {
        &self.rows[index]
    }

    /// Iterate rows in order.
    pub fn rows(&self) -> impl Iterator<Item = &[u32]> {
        self.rows.iter().map(Vec::as_slice)
    }

    /// Last token of every row.
    pub fn last_tokens(&self) -> Vec<Option<u32>> {
        self.rows.iter().map(|r| r.last().copied()).collect()
    }

    /// Overwrite column `col` of every row with the matching entry of `values`.
    pub fn set_column(&mut self, col: usize, values: &[u32]) {
        for (row, &v) in self.rows.iter_mut().zip(values) {
            row[col] = v;
        }
    }

    /// Append one token to every row.
    pub fn push_column(&mut self, values: &[u32]) {
        for (row, &v) in self.rows.iter_mut().zip(values) {
            row.push(v);
        }
    }

    /// The trailing `n` columns as a dense `(rows, n)` array for the model.
    pub fn tail(&self, n: usize) -> Result<Array2<u32>> {
        let len = self.seq_len();
        let n = n.min(len);
        let flat: Vec<u32> = self
            .rows
            .iter()
            .flat_map(|r| r[len - n..].iter().copied())
            .collect();
        Ok(Array2::from_shape_vec((self.rows.len(), n), flat)?)
    }

    /// Split into `n_audio` groups of `n_group` rows each.
    pub fn into_groups(self, n_group: usize) -> Vec<Vec<Vec<u32>>> {
        let n_group = n_group.max(1);
        let mut groups = Vec::with_capacity(self.rows.len() / n_group);
        let mut rows = self.rows.into_iter().peekable();
        while rows.peek().is_some() {
            groups.push(rows.by_ref().take(n_group).collect());
        }
        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ragged_rows_are_rejected() {
        let err = TokenBatch::from_rows(vec![vec![1, 2], vec![3]]).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::RaggedBatch {
                row: 1,
                found: 1,
                expected: 2
            }
        ));
    }

    #[test]
    fn repeat_interleave_keeps_groups_contiguous() {
        let b = TokenBatch::from_rows(vec![vec![1], vec![2]]).unwrap();
        let r = b.repeat_interleave(3);
        let firsts: Vec<u32> = r.rows().map(|row| row[0]).collect();
        assert_eq!(firsts, vec![1, 1, 1, 2, 2, 2]);
    }

    #[test]
    fn tail_returns_last_columns() {
        let b = TokenBatch::from_rows(vec![vec![1, 2, 3], vec![4, 5, 6]]).unwrap();
        let t = b.tail(1).unwrap();
        assert_eq!(t.shape(), &[2, 1]);
        assert_eq!(t[[0, 0]], 3);
        assert_eq!(t[[1, 0]], 6);
        assert_eq!(b.tail(10).unwrap().shape(), &[2, 3]);
    }

    #[test]
    fn into_groups_splits_evenly() {
        let b = TokenBatch::repeat(&[7], 4);
        let groups = b.into_groups(2);
        assert_eq!(groups.len(), 2);
        assert!(groups.iter().all(|g| g.len() == 2));
    }
}
