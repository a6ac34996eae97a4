/// Arrival-ordered collection of decoded history samples
use crate::models::HistorySample;

/// Accumulates samples for one session exactly as they were received
///
/// No deduplication or sorting is done: the device may resend a record or
/// skip ahead after its ring buffer wraps, and the export mirrors that.
#[derive(Debug, Clone, Default)]
pub struct HistoryAggregator {
    samples: Vec<HistorySample>,
}

impl HistoryAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, sample: HistorySample) {
        self.samples.push(sample);
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Hand over the collected series, leaving the aggregator empty
    pub fn export(&mut self) -> Vec<HistorySample> {
        std::mem::take(&mut self.samples)
    }
}
