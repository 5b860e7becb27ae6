use anyhow::bail;
use ndarray::Array2;

use crate::utils::{FloatOps, Normalize};

impl<T: FloatOps> Normalize<T> for Array2<T> {
    fn normalize_rows(&mut self, sums: &[T], target: T) -> anyhow::Result<()> {
        if sums.len() != self.nrows() {
            bail!(
                "Length of sums ({}) does not match number of rows ({})",
                sums.len(),
                self.nrows()
            );
        }

        for (i, mut row) in self.rows_mut().into_iter().enumerate() {
            if sums[i].is_zero() {
                bail!("Row {} sums to zero and cannot be normalized", i);
            }
            let scale = target / sums[i];
            row.mapv_inplace(|v| v * scale);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{array, Array2};

    #[test]
    fn test_normalize_rows() {
        let mut arr = array![[1.0, 2.0], [3.0, 4.0]];
        let row_sums = vec![3.0, 7.0];
        let target = 1.0;

        arr.normalize_rows(&row_sums, target).unwrap();

        assert_relative_eq!(arr.row(0).sum(), target);
        assert_relative_eq!(arr.row(1).sum(), target);
        assert_relative_eq!(arr[[0, 0]], 1.0 / 3.0);
        assert_relative_eq!(arr[[0, 1]], 2.0 / 3.0);
        assert_relative_eq!(arr[[1, 0]], 3.0 / 7.0);
        assert_relative_eq!(arr[[1, 1]], 4.0 / 7.0);
    }

    #[test]
    fn test_normalize_errors() {
        let mut arr = Array2::<f64>::zeros((2, 2));

        // Wrong size row sums
        assert!(arr.normalize_rows(&[1.0], 1.0).is_err());

        // Zero sums
        assert!(arr.normalize_rows(&[0.0, 1.0], 1.0).is_err());
    }
}
