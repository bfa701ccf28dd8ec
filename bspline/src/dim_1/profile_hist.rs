use crate::errors::Error;

/// Profile histogram: mean of `y` in uniform bins of `x`
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileHist1d {
    x_min: f64,
    x_max: f64,
    bin_width: f64,
    entries: Vec<usize>,
    sum_x: Vec<f64>,
    sum_y: Vec<f64>,
    sum_y2: Vec<f64>,
}

impl ProfileHist1d {
    pub fn new(x_min: f64, x_max: f64, n_bins: usize) -> Result<Self, Error> {
        if !(x_max > x_min) {
            return Err(Error::InvalidRange { x_min, x_max });
        }
        if n_bins < 1 {
            return Err(Error::InvalidIntervals { n_intervals: n_bins });
        }

        return Ok(ProfileHist1d {
            x_min,
            x_max,
            bin_width: (x_max - x_min) / n_bins as f64,
            entries: vec![0; n_bins],
            sum_x: vec![0.0; n_bins],
            sum_y: vec![0.0; n_bins],
            sum_y2: vec![0.0; n_bins],
        });
    }

    /// Add one sample, samples outside `[x_min, x_max]` are dropped
    pub fn fill(&mut self, x: f64, y: f64) {
        if !(x >= self.x_min && x <= self.x_max) || !y.is_finite() {
            return;
        }

        let n_bins: usize = self.entries.len();
        let i_bin: usize = (((x - self.x_min) / self.bin_width) as usize).min(n_bins - 1);

        self.entries[i_bin] += 1;
        self.sum_x[i_bin] += x;
        self.sum_y[i_bin] += y;
        self.sum_y2[i_bin] += y * y;
    }

    pub fn clear(&mut self) {
        self.entries.iter_mut().for_each(|entries: &mut usize| *entries = 0);
        self.sum_x.iter_mut().for_each(|sum: &mut f64| *sum = 0.0);
        self.sum_y.iter_mut().for_each(|sum: &mut f64| *sum = 0.0);
        self.sum_y2.iter_mut().for_each(|sum: &mut f64| *sum = 0.0);
    }

    pub fn get_bins_total(&self) -> usize {
        return self.entries.len();
    }

    pub fn get_entries_total(&self) -> usize {
        return self.entries.iter().sum();
    }

    pub fn get_flat_bin_entries(&self, i_bin: usize) -> usize {
        return self.entries[i_bin];
    }

    /// Mean of `y` in the bin, 0.0 for an empty bin
    pub fn get_flat_bin_mean(&self, i_bin: usize) -> f64 {
        if self.entries[i_bin] == 0 {
            return 0.0;
        }
        return self.sum_y[i_bin] / self.entries[i_bin] as f64;
    }

    /// Mean of `x` in the bin, the bin centre for an empty bin
    pub fn get_flat_bin_x_mean(&self, i_bin: usize) -> f64 {
        if self.entries[i_bin] == 0 {
            return self.x_min + (i_bin as f64 + 0.5) * self.bin_width;
        }
        return self.sum_x[i_bin] / self.entries[i_bin] as f64;
    }

    /// Standard deviation of `y` in the bin
    pub fn get_flat_bin_sigma(&self, i_bin: usize) -> f64 {
        let n: usize = self.entries[i_bin];
        if n == 0 {
            return 0.0;
        }
        let mean: f64 = self.sum_y[i_bin] / n as f64;
        let variance: f64 = self.sum_y2[i_bin] / n as f64 - mean * mean;
        return variance.max(0.0).sqrt();
    }
}

#[test]
fn test_profile_hist() {
    use approx::assert_abs_diff_eq;

    let mut hist: ProfileHist1d = ProfileHist1d::new(0.0, 4.0, 4).expect("valid histogram");
    hist.fill(0.5, 1.0);
    hist.fill(0.7, 3.0);
    hist.fill(3.2, 10.0);
    hist.fill(4.0, 20.0); // upper edge goes into the last bin
    hist.fill(-0.1, 99.0); // dropped
    hist.fill(4.1, 99.0); // dropped

    assert_eq!(hist.get_bins_total(), 4);
    assert_eq!(hist.get_entries_total(), 4);
    assert_eq!(hist.get_flat_bin_entries(0), 2);
    assert_eq!(hist.get_flat_bin_entries(1), 0);
    assert_eq!(hist.get_flat_bin_entries(3), 2);

    let precision: f64 = 1e-12;
    assert_abs_diff_eq!(hist.get_flat_bin_mean(0), 2.0, epsilon = precision);
    assert_abs_diff_eq!(hist.get_flat_bin_x_mean(0), 0.6, epsilon = precision);
    assert_abs_diff_eq!(hist.get_flat_bin_sigma(0), 1.0, epsilon = precision);
    assert_abs_diff_eq!(hist.get_flat_bin_mean(3), 15.0, epsilon = precision);
    assert_abs_diff_eq!(hist.get_flat_bin_x_mean(1), 1.5, epsilon = precision);

    hist.clear();
    assert_eq!(hist.get_entries_total(), 0);
}
