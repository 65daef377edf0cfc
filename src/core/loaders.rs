//! Data loader for delimited metrology point files.
//!
//! Each line of the input holds one point: a machine point index followed by
//! X, Y and Z (millimetres). Values may be separated by whitespace, commas, or
//! a mix of both. Lines without enough leading numbers (headers, truncated
//! rows) are skipped with a warning.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use log::warn;
use thiserror::Error;

/// Column holding X in a metrology point tuple.
pub const X_COLUMN: usize = 1;
/// Column holding Y in a metrology point tuple.
pub const Y_COLUMN: usize = 2;
/// Column holding Z in a metrology point tuple.
pub const Z_COLUMN: usize = 3;

/// Errors that can occur during file loading.
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("cannot open '{path}': {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no valid points found in {0}")]
    NoValidPoints(PathBuf),

    #[error("tuple arity must be at least 1")]
    ZeroArity,
}

/// Result type for loader operations.
pub type Result<T> = std::result::Result<T, LoaderError>;

/// Ordered set of fixed-arity numeric tuples.
///
/// Values are stored row-major in one buffer; every tuple has exactly
/// `arity` values.
#[derive(Debug, Clone, PartialEq)]
pub struct PointSet {
    arity: usize,
    values: Vec<f64>,
}

impl PointSet {
    /// Creates an empty point set for tuples of `arity` values.
    pub fn new(arity: usize) -> Self {
        Self {
            arity,
            values: Vec::new(),
        }
    }

    /// Creates an empty point set with room for `capacity` tuples.
    pub fn with_capacity(arity: usize, capacity: usize) -> Self {
        Self {
            arity,
            values: Vec::with_capacity(arity * capacity),
        }
    }

    /// Builds a 4-column set (index, X, Y, Z) from coordinate triples.
    pub fn from_xyz(points: &[[f64; 3]]) -> Self {
        let mut set = Self::with_capacity(4, points.len());
        for (i, p) in points.iter().enumerate() {
            set.push(&[i as f64, p[0], p[1], p[2]]);
        }
        set
    }

    /// Appends a tuple. The first `arity` values are kept; the tuple must
    /// have at least that many.
    #[inline]
    pub fn push(&mut self, tuple: &[f64]) {
        debug_assert!(tuple.len() >= self.arity, "tuple shorter than arity");
        self.values.extend_from_slice(&tuple[..self.arity]);
    }

    /// Number of values in each tuple.
    #[inline]
    pub fn arity(&self) -> usize {
        self.arity
    }

    /// Returns the number of tuples.
    #[inline]
    pub fn len(&self) -> usize {
        if self.arity == 0 {
            0
        } else {
            self.values.len() / self.arity
        }
    }

    /// Returns true if the set holds no tuples.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns the `i`-th tuple.
    #[inline]
    pub fn point(&self, i: usize) -> &[f64] {
        &self.values[i * self.arity..(i + 1) * self.arity]
    }

    /// Iterates over all tuples in order.
    pub fn iter(&self) -> impl Iterator<Item = &[f64]> + '_ {
        self.values.chunks_exact(self.arity.max(1))
    }

    /// Returns one column as a vector.
    pub fn column(&self, col: usize) -> Vec<f64> {
        self.iter().map(|p| p[col]).collect()
    }

    /// True if the tuples carry X, Y and Z at the metrology column positions.
    #[inline]
    pub fn has_xyz(&self) -> bool {
        self.arity > Z_COLUMN
    }

    /// X, Y, Z of the `i`-th tuple. Requires [`has_xyz`](Self::has_xyz).
    #[inline]
    pub fn xyz(&self, i: usize) -> [f64; 3] {
        let p = self.point(i);
        [p[X_COLUMN], p[Y_COLUMN], p[Z_COLUMN]]
    }

    /// (X, Y) pairs of all tuples; empty if the tuples have no Y column.
    pub fn xy(&self) -> Vec<(f64, f64)> {
        if self.arity <= Y_COLUMN {
            return Vec::new();
        }
        self.iter().map(|p| (p[X_COLUMN], p[Y_COLUMN])).collect()
    }

    /// Per-column (min, max) over all tuples, or `None` for an empty set.
    pub fn column_bounds(&self) -> Option<Vec<(f64, f64)>> {
        if self.is_empty() {
            return None;
        }
        let mut bounds = vec![(f64::MAX, f64::MIN); self.arity];
        for p in self.iter() {
            for (b, &v) in bounds.iter_mut().zip(p) {
                b.0 = b.0.min(v);
                b.1 = b.1.max(v);
            }
        }
        Some(bounds)
    }
}

/// Parse the leading run of numeric tokens of one line.
///
/// Commas count as separators; parsing stops at the first token that is not
/// a finite number, so trailing comments or labels are ignored and `inf`,
/// `NaN` or out-of-range values end the tuple.
pub fn parse_line(line: &str) -> Vec<f64> {
    line.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|tok| !tok.is_empty())
        .map_while(|tok| tok.parse::<f64>().ok().filter(|v| v.is_finite()))
        .collect()
}

/// Read tuples of `arity` numbers from any buffered source.
///
/// Lines with fewer than `arity` leading numbers are skipped with a warning;
/// surplus numbers are ignored. Bytes that are not valid UTF-8 are replaced
/// before parsing, so a mis-encoded header is just another skipped line.
///
/// # Errors
///
/// Returns an error if `arity` is zero or the source cannot be read.
pub fn parse_points<R: BufRead>(reader: R, arity: usize) -> Result<PointSet> {
    if arity == 0 {
        return Err(LoaderError::ZeroArity);
    }

    let mut points = PointSet::with_capacity(arity, 1024);

    for (idx, raw) in reader.split(b'\n').enumerate() {
        let raw = raw?;
        let line = String::from_utf8_lossy(&raw);
        let line_num = idx + 1;

        let numbers = parse_line(&line);
        if numbers.len() < arity {
            warn!(
                "line {} has only {} numbers, expected {}. Skipping.",
                line_num,
                numbers.len(),
                arity
            );
            continue;
        }

        points.push(&numbers);
    }

    Ok(points)
}

/// Load a point set from a text or CSV file.
///
/// # Arguments
///
/// * `path` - Path to the points file
/// * `arity` - Numbers expected on each line
///
/// # Errors
///
/// Returns an error if the file cannot be opened or read, or if no line
/// yields a valid tuple.
pub fn read_points<P: AsRef<Path>>(path: P, arity: usize) -> Result<PointSet> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| LoaderError::Open {
        path: path.to_path_buf(),
        source: e,
    })?;

    let points = parse_points(BufReader::new(file), arity)?;

    if points.is_empty() {
        return Err(LoaderError::NoValidPoints(path.to_path_buf()));
    }

    Ok(points)
}
