//! Edit tracking for appliance configuration forms: records what a record looked
//! like when it was opened, what the user changed, and emits a CREATE or EDIT
//! training sample once a save goes through.

pub mod commit;
pub mod controller;
pub mod diff;
pub mod inference;
pub mod mapper;
pub mod models;
pub mod observer;
pub mod recorder;
pub mod replay;
pub mod settings;
pub mod snapshot;
pub mod store;
pub mod streaming;
pub mod tracker;
pub mod utils;

pub use commit::{CommitOutcome, SuppressReason};
pub use controller::{RecordController, TrackerEvent, TrackerStatus};
pub use models::{CanonicalSample, ChangeEntry, ChangeOp, Operation};
pub use observer::{ContainerInfo, FieldObserver};
pub use settings::{SettingsStore, TrackerSettings};
pub use snapshot::{FieldValue, Snapshot};
pub use utils::logging::init_logging;
