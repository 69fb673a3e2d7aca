pub mod sample;

pub use sample::{CanonicalSample, ChangeEntry, ChangeOp, Operation, SampleMetadata};
