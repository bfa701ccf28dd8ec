mod errors;
pub use errors::{LrModelError, LrfError};
pub mod compress;
pub use compress::{Compress1d, DualSlopeCompress, compress_from_json};
mod transform;
pub use transform::Transform;
pub mod lrf;
pub use lrf::{AxialLrf, Lrf, LrfData, lrf_from_json};
pub mod lr_model;
pub use lr_model::{GainEstimator, LrGroup, LrModel, LrSensor, UngroupPolicy};
pub mod reconstructor;
pub use reconstructor::{RecMethod, RecResult, RecStatus, Reconstructor, ReconstructorConfig, reconstruct_events};

#[cfg(feature = "python")]
mod python;
