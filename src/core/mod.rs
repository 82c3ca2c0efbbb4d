pub mod constants;
pub mod error;
pub mod filters;
pub mod intervals;
pub mod series;
