pub mod autosave;
pub mod controller;
pub mod derive;
pub mod key;
pub mod model;
pub mod registry;
pub mod rows;
pub mod store;

pub use autosave::{AutosaveController, AutosaveState};
pub use controller::{DataChangeCallback, DraftController, Submission};
pub use derive::{DeriveContext, DeriveRules, DerivedFieldEngine};
pub use key::{ContextField, DraftContext, DraftKey, DraftKeyBuilder, KeyMode, KeyTokens};
pub use model::{Draft, FormData, Row};
pub use registry::{ControllerHandle, ControllerRegistry, PackageCache};
pub use rows::{AnyFieldFilled, Edit, RowCompletion, RowListModel, SegregationCompletion};
pub use store::{DraftStore, KvBackend, MemoryBackend};
