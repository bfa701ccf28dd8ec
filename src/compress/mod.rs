// Load modules
mod compress_generics;
mod dual_slope;

// Expose functions to public
pub use compress_generics::{Compress1d, compress_from_json};
pub use dual_slope::DualSlopeCompress;
