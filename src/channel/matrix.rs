//! Small dense complex matrices for channel and MMSE arithmetic.
//!
//! Row-major storage. Shapes are checked on every operation; a mismatch is
//! a programming error and panics.

use num_complex::Complex64;
use std::ops::{Add, Mul};

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelMatrix {
    rows: usize,
    cols: usize,
    data: Vec<Complex64>,
}

impl ChannelMatrix {
    pub fn from_vec(rows: usize, cols: usize, data: Vec<Complex64>) -> Self {
        assert_eq!(
            data.len(),
            rows * cols,
            "matrix size mismatch: {} entries for {}x{}",
            data.len(),
            rows,
            cols
        );
        Self { rows, cols, data }
    }

    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self::from_vec(rows, cols, vec![Complex64::new(0.0, 0.0); rows * cols])
    }

    pub fn identity(n: usize) -> Self {
        Self::diagonal(&vec![1.0; n])
    }

    pub fn diagonal(values: &[f64]) -> Self {
        let n = values.len();
        let mut m = Self::zeros(n, n);
        for (i, &v) in values.iter().enumerate() {
            m.set(i, i, Complex64::new(v, 0.0));
        }
        m
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn get(&self, r: usize, c: usize) -> Complex64 {
        assert!(r < self.rows && c < self.cols, "matrix index ({}, {}) out of range", r, c);
        self.data[r * self.cols + c]
    }

    #[inline]
    pub fn set(&mut self, r: usize, c: usize, v: Complex64) {
        assert!(r < self.rows && c < self.cols, "matrix index ({}, {}) out of range", r, c);
        self.data[r * self.cols + c] = v;
    }

    /// Hermitian transpose
    pub fn conj_transpose(&self) -> Self {
        let mut out = Self::zeros(self.cols, self.rows);
        for r in 0..self.rows {
            for c in 0..self.cols {
                out.set(c, r, self.get(r, c).conj());
            }
        }
        out
    }

    pub fn scale(&self, k: f64) -> Self {
        Self {
            rows: self.rows,
            cols: self.cols,
            data: self.data.iter().map(|&v| v * k).collect(),
        }
    }

    /// Inverse of a 1x1 or 2x2 matrix, None when singular
    pub fn inverse(&self) -> Option<Self> {
        assert_eq!(self.rows, self.cols, "inverse of non-square matrix");
        match self.rows {
            1 => {
                let a = self.data[0];
                if a.norm_sqr() == 0.0 {
                    return None;
                }
                Some(Self::from_vec(1, 1, vec![a.inv()]))
            }
            2 => {
                let (a, b, c, d) = (self.data[0], self.data[1], self.data[2], self.data[3]);
                let det = a * d - b * c;
                if det.norm_sqr() == 0.0 {
                    return None;
                }
                let inv_det = det.inv();
                Some(Self::from_vec(
                    2,
                    2,
                    vec![d * inv_det, -b * inv_det, -c * inv_det, a * inv_det],
                ))
            }
            n => panic!("inverse only implemented up to 2x2, got {}x{}", n, n),
        }
    }

    /// Squared magnitude of column `c`
    pub fn column_norm_sqr(&self, c: usize) -> f64 {
        (0..self.rows).map(|r| self.get(r, c).norm_sqr()).sum()
    }

    /// Squared magnitude of row `r`
    pub fn row_norm_sqr(&self, r: usize) -> f64 {
        (0..self.cols).map(|c| self.get(r, c).norm_sqr()).sum()
    }
}

impl Mul for &ChannelMatrix {
    type Output = ChannelMatrix;

    fn mul(self, rhs: Self) -> ChannelMatrix {
        assert_eq!(
            self.cols, rhs.rows,
            "matrix size mismatch: {}x{} * {}x{}",
            self.rows, self.cols, rhs.rows, rhs.cols
        );
        let mut out = ChannelMatrix::zeros(self.rows, rhs.cols);
        for r in 0..self.rows {
            for c in 0..rhs.cols {
                let v = (0..self.cols).map(|k| self.get(r, k) * rhs.get(k, c)).sum();
                out.set(r, c, v);
            }
        }
        out
    }
}

impl Add for &ChannelMatrix {
    type Output = ChannelMatrix;

    fn add(self, rhs: Self) -> ChannelMatrix {
        assert!(
            self.rows == rhs.rows && self.cols == rhs.cols,
            "matrix size mismatch in addition"
        );
        ChannelMatrix {
            rows: self.rows,
            cols: self.cols,
            data: self.data.iter().zip(&rhs.data).map(|(&a, &b)| a + b).collect(),
        }
    }
}
