use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Number of samples kept per series unless configured otherwise.
pub const DEFAULT_MAX_DATA_POINTS: usize = 100;

/// Which of the two watched logs a value belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeriesKind {
    Gpu,
    Memory,
}

impl SeriesKind {
    pub const ALL: [SeriesKind; 2] = [SeriesKind::Gpu, SeriesKind::Memory];
}

impl fmt::Display for SeriesKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeriesKind::Gpu => f.write_str("gpu"),
            SeriesKind::Memory => f.write_str("memory"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GpuSample {
    pub timestamp: String,
    /// Percent, as logged.
    pub utilization: f64,
    /// Percent of total memory in use.
    pub memory: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySample {
    pub timestamp: String,
    /// Resident set size in MB.
    pub usage: f64,
    /// Virtual size in MB.
    pub virtual_usage: f64,
}

/// One validated row from either log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Sample {
    Gpu(GpuSample),
    Memory(MemorySample),
}

/// Fixed-capacity FIFO of the most recent samples.
#[derive(Clone, Debug)]
pub struct SampleWindow<T> {
    capacity: usize,
    points: VecDeque<T>,
}

impl<T> SampleWindow<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            points: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, point: T) {
        self.points.push_back(point);
        while self.points.len() > self.capacity {
            self.points.pop_front();
        }
    }

    pub fn extend<I: IntoIterator<Item = T>>(&mut self, points: I) {
        for point in points {
            self.push(point);
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest(&self) -> Option<&T> {
        self.points.back()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.points.iter()
    }
}

/// The two per-series windows shown by the dashboard.
#[derive(Clone, Debug)]
pub struct Windows {
    pub gpu: SampleWindow<GpuSample>,
    pub memory: SampleWindow<MemorySample>,
}

impl Windows {
    pub fn new(capacity: usize) -> Self {
        Self {
            gpu: SampleWindow::new(capacity),
            memory: SampleWindow::new(capacity),
        }
    }

    pub fn push(&mut self, sample: Sample) {
        match sample {
            Sample::Gpu(s) => self.gpu.push(s),
            Sample::Memory(s) => self.memory.push(s),
        }
    }

    pub fn extend_from(&mut self, samples: &[Sample]) {
        for sample in samples {
            self.push(sample.clone());
        }
    }

    pub fn len(&self, kind: SeriesKind) -> usize {
        match kind {
            SeriesKind::Gpu => self.gpu.len(),
            SeriesKind::Memory => self.memory.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_keeps_most_recent_in_arrival_order() {
        let mut window = SampleWindow::new(DEFAULT_MAX_DATA_POINTS);
        for i in 0..250 {
            window.push(i);
        }
        assert_eq!(window.len(), 100);
        let kept: Vec<i32> = window.iter().copied().collect();
        assert_eq!(kept, (150..250).collect::<Vec<_>>());
        assert_eq!(window.latest(), Some(&249));
    }

    #[test]
    fn window_below_capacity_keeps_everything() {
        let mut window = SampleWindow::new(3);
        window.extend([1, 2]);
        assert_eq!(window.iter().copied().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn memory_sample_serializes_camel_case() {
        let sample = Sample::Memory(MemorySample {
            timestamp: "12:00:00".into(),
            usage: 1.5,
            virtual_usage: 2.0,
        });
        let json = serde_json::to_value(&sample).unwrap();
        assert_eq!(json["virtualUsage"], 2.0);
        assert_eq!(json["usage"], 1.5);
    }

    #[test]
    fn windows_route_samples_by_kind() {
        let mut windows = Windows::new(2);
        windows.push(Sample::Gpu(GpuSample {
            timestamp: "t".into(),
            utilization: 1.0,
            memory: 2.0,
        }));
        assert_eq!(windows.len(SeriesKind::Gpu), 1);
        assert_eq!(windows.len(SeriesKind::Memory), 0);
    }
}
