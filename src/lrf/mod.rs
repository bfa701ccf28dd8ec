// Load modules
mod axial;
mod lrf_generics;

// Expose functions to public
pub use axial::AxialLrf;
pub use lrf_generics::{Lrf, LrfData, lrf_from_json};
