// Load modules
mod batch;
mod config;
mod minimizer;
mod reconstructor;

// Expose functions to public
pub use batch::reconstruct_events;
pub use config::{InitialGuess, RecMethod, ReconstructorConfig};
pub use minimizer::{MinParameter, Minimizer, MinimizerResult, STATUS_CALL_LIMIT, STATUS_CONVERGED, STATUS_FAILED, STATUS_NOT_CONVERGED, Simplex};
pub use reconstructor::{RecResult, RecStatus, Reconstructor};
