pub mod aggregator;
pub mod clock;
pub mod staleness;

pub use aggregator::HistoryAggregator;
pub use clock::ClockReference;
pub use staleness::StalenessMonitor;
