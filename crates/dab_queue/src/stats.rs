use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub(crate) struct RollingMean {
    window: usize,
    samples: VecDeque<u64>,
    sum: u128,
}

impl RollingMean {
    pub(crate) fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            samples: VecDeque::with_capacity(window),
            sum: 0,
        }
    }

    pub(crate) fn push(&mut self, sample: u64) {
        if self.samples.len() == self.window {
            if let Some(evicted) = self.samples.pop_front() {
                self.sum -= u128::from(evicted);
            }
        }
        self.samples.push_back(sample);
        self.sum += u128::from(sample);
    }

    pub(crate) fn mean(&self) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }
        // mean of u64 samples always fits back into u64
        Some((self.sum / self.samples.len() as u128) as u64)
    }
}

/// Rolling averages over the most recently completed dab jobs.
#[derive(Debug, Clone)]
pub(crate) struct DabRenderingStatistics {
    execution_micros: RollingMean,
    dab_pixels: RollingMean,
}

impl DabRenderingStatistics {
    pub(crate) fn new(window: usize) -> Self {
        Self {
            execution_micros: RollingMean::new(window),
            dab_pixels: RollingMean::new(window),
        }
    }

    pub(crate) fn record(&mut self, execution_micros: Option<u64>, dab_pixels: u64) {
        if let Some(execution_micros) = execution_micros {
            self.execution_micros.push(execution_micros);
        }
        self.dab_pixels.push(dab_pixels);
    }

    pub(crate) fn average_execution_micros(&self) -> Option<u64> {
        self.execution_micros.mean()
    }

    pub(crate) fn average_dab_pixels(&self) -> Option<u64> {
        self.dab_pixels.mean()
    }
}

#[cfg(test)]
mod tests {
    use super::RollingMean;

    #[test]
    fn rolling_mean_only_covers_window() {
        let mut mean = RollingMean::new(2);
        assert_eq!(mean.mean(), None);

        mean.push(10);
        mean.push(20);
        assert_eq!(mean.mean(), Some(15));

        mean.push(40);
        assert_eq!(mean.mean(), Some(30));
    }

    #[test]
    fn rolling_mean_survives_extreme_samples() {
        let mut mean = RollingMean::new(3);
        mean.push(u64::MAX);
        mean.push(u64::MAX);
        assert_eq!(mean.mean(), Some(u64::MAX));

        mean.push(u64::MAX);
        mean.push(0);
        assert_eq!(mean.mean(), Some(u64::MAX / 3 * 2));
    }
}
