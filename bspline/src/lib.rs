// Private modules
mod errors;

// Public modules
pub mod dim_1 {
    pub mod bounded_lsq;
    pub mod bspline;
    pub mod fit;
    pub mod profile_hist;
}

// Public flattened exports
pub use dim_1::bspline::Bspline1d;
pub use dim_1::fit::{BsFit1d, FitConstraints};
pub use dim_1::profile_hist::ProfileHist1d;
pub use errors::Error;
