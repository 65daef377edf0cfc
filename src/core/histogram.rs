//! Fixed-width 1D histograms of coordinates and deviations.

use log::warn;

/// Upper bound on the bin count chosen by [`Histogram::auto_range`].
pub const MAX_AUTO_BINS: usize = 1 << 22;

/// Fixed-width histogram over `[low, high)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    pub name: String,
    pub low: f64,
    pub high: f64,
    pub counts: Vec<u64>,
    pub underflow: u64,
    pub overflow: u64,
}

impl Histogram {
    /// Creates an empty histogram with `bins` equal bins over `[low, high)`.
    pub fn new(name: impl Into<String>, bins: usize, low: f64, high: f64) -> Self {
        Self {
            name: name.into(),
            low,
            high,
            counts: vec![0; bins.max(1)],
            underflow: 0,
            overflow: 0,
        }
    }

    /// Histogram sized for `values` with roughly `bin_width` wide bins.
    ///
    /// The range is the finite data range widened by half its width on each
    /// side; a zero-width range is opened to ±0.5 first. Non-finite values do
    /// not widen the range and land in underflow/overflow. The bin count is
    /// capped at [`MAX_AUTO_BINS`]; a bin width that is not a positive number
    /// gives a single bin.
    pub fn auto_range(name: impl Into<String>, values: &[f64], bin_width: f64) -> Self {
        let name = name.into();
        let (mut min, mut max) = values
            .iter()
            .filter(|v| v.is_finite())
            .fold((f64::MAX, f64::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        if min > max {
            min = 0.0;
            max = 0.0;
        }
        if min == max {
            min -= 0.5;
            max += 0.5;
        }
        let margin = 0.5 * (max - min);
        let mut low = min - margin;
        let mut high = max + margin;
        if !(high - low).is_finite() {
            // Extreme magnitudes: fall back to the bare data range.
            low = min;
            high = max;
        }

        let wanted = (high - low) / bin_width;
        let bins = if wanted.is_finite() && wanted >= 1.0 {
            if wanted > MAX_AUTO_BINS as f64 {
                warn!(
                    "histogram '{}' would need {:.0} bins of width {}; capped at {}",
                    name, wanted, bin_width, MAX_AUTO_BINS
                );
            }
            wanted.round().min(MAX_AUTO_BINS as f64) as usize
        } else {
            1
        };

        let mut hist = Self::new(name, bins, low, high);
        hist.fill_all(values);
        hist
    }

    #[inline]
    pub fn bins(&self) -> usize {
        self.counts.len()
    }

    #[inline]
    pub fn bin_width(&self) -> f64 {
        (self.high - self.low) / self.bins() as f64
    }

    /// Lower and upper edge of bin `i`.
    #[inline]
    pub fn bin_edges(&self, i: usize) -> (f64, f64) {
        let w = self.bin_width();
        (self.low + i as f64 * w, self.low + (i + 1) as f64 * w)
    }

    /// Adds one entry. NaN counts as overflow.
    pub fn fill(&mut self, v: f64) {
        if v.is_nan() {
            self.overflow += 1;
        } else if v < self.low {
            self.underflow += 1;
        } else if v >= self.high {
            self.overflow += 1;
        } else {
            let i = ((v - self.low) / self.bin_width()) as usize;
            let last = self.counts.len() - 1;
            self.counts[i.min(last)] += 1;
        }
    }

    pub fn fill_all(&mut self, values: &[f64]) {
        for &v in values {
            self.fill(v);
        }
    }

    /// Entries inside the range.
    pub fn entries(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Bins with at least one entry, as `(low edge, high edge, count)`.
    pub fn occupied(&self) -> impl Iterator<Item = (f64, f64, u64)> + '_ {
        self.counts
            .iter()
            .enumerate()
            .filter(|&(_, &c)| c > 0)
            .map(move |(i, &c)| {
                let (lo, hi) = self.bin_edges(i);
                (lo, hi, c)
            })
    }
}
