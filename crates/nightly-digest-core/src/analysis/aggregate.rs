use crate::model::{GroupKey, Metric, SessionRecord};
use ahash::AHashMap;

/// Count, extremes, mean and population standard deviation of one metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricStats {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub sum: f64,
    pub std_dev: f64,
}

impl MetricStats {
    /// `None` for an empty slice. Non-finite values are ignored.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        let mut acc = RunningStats::default();
        values.iter().copied().for_each(|v| acc.push(v));
        acc.finish()
    }

    pub fn range(&self) -> f64 {
        self.max - self.min
    }
}

/// Welford accumulator.
#[derive(Debug, Clone, Copy, Default)]
struct RunningStats {
    count: usize,
    min: f64,
    max: f64,
    sum: f64,
    mean: f64,
    m2: f64,
}

impl RunningStats {
    fn push(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.sum += value;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    fn finish(&self) -> Option<MetricStats> {
        if self.count == 0 {
            return None;
        }
        // Recompute the mean from the sum so a single value reports exactly.
        let mean = (self.sum / self.count as f64).clamp(self.min, self.max);
        Some(MetricStats {
            count: self.count,
            min: self.min,
            max: self.max,
            mean,
            sum: self.sum,
            std_dev: (self.m2 / self.count as f64).max(0.0).sqrt(),
        })
    }
}

/// Statistics for one (target, filter) bucket.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupStatistics {
    /// Completed captures.
    pub count: usize,
    pub aborted: usize,
    metrics: Vec<(Metric, MetricStats)>,
}

impl GroupStatistics {
    pub fn metric(&self, metric: Metric) -> Option<&MetricStats> {
        self.metrics
            .iter()
            .find(|(m, _)| *m == metric)
            .map(|(_, stats)| stats)
    }

    /// Metrics present on at least one completed capture, in `Metric::ALL` order.
    pub fn metrics(&self) -> impl Iterator<Item = (Metric, &MetricStats)> {
        self.metrics.iter().map(|(m, s)| (*m, s))
    }

    /// Summed exposure time of completed captures, seconds.
    pub fn integration_secs(&self) -> f64 {
        self.metric(Metric::Exposure).map_or(0.0, |s| s.sum)
    }
}

#[derive(Default)]
struct GroupAccumulator {
    count: usize,
    aborted: usize,
    metrics: [RunningStats; Metric::ALL.len()],
}

impl GroupAccumulator {
    fn push(&mut self, record: &SessionRecord) {
        if !record.is_completed() {
            self.aborted += 1;
            return;
        }
        self.count += 1;
        for (slot, metric) in self.metrics.iter_mut().zip(Metric::ALL) {
            if let Some(value) = record.metrics.get(metric) {
                slot.push(value);
            }
        }
    }

    fn finish(self) -> GroupStatistics {
        let metrics = Metric::ALL
            .iter()
            .zip(self.metrics.iter())
            .filter_map(|(metric, acc)| acc.finish().map(|stats| (*metric, stats)))
            .collect();
        GroupStatistics {
            count: self.count,
            aborted: self.aborted,
            metrics,
        }
    }
}

/// Partition records by (target, filter) in first-seen order.
///
/// Aborted captures only bump their group's `aborted` counter. A metric
/// absent from every completed capture of a group is omitted for that
/// group.
pub fn aggregate(records: &[SessionRecord]) -> Vec<(GroupKey, GroupStatistics)> {
    let mut index: AHashMap<GroupKey, usize> = AHashMap::new();
    let mut groups: Vec<(GroupKey, GroupAccumulator)> = Vec::new();

    for record in records {
        let key = record.key();
        let slot = match index.get(&key) {
            Some(&i) => i,
            None => {
                index.insert(key.clone(), groups.len());
                groups.push((key, GroupAccumulator::default()));
                groups.len() - 1
            }
        };
        groups[slot].1.push(record);
    }

    groups
        .into_iter()
        .map(|(key, acc)| (key, acc.finish()))
        .collect()
}
