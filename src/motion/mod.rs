pub mod accumulator;
pub mod classifier;
pub mod filter;

pub use accumulator::{AccumulatorTotals, SessionAccumulator, SessionStats};
pub use classifier::{PostureClassifier, PostureState};
pub use filter::SampleFilter;
