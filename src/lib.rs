//! travel-matrix core
//!
//! Door-to-door travel costs between two point sets over a routing backend:
//! per-pair shortest paths, bulk cost matrices, and the walking and parking
//! legs at both ends of every trip.

pub mod analysis;
pub mod cache;
pub mod config;
pub mod cost;
pub mod enrichment;
pub mod error;
pub mod geodesy;
pub mod io;
pub mod matrix;
pub mod model;
pub mod output;
pub mod resolver;
pub mod retry;
pub mod scheduler;
pub mod summary;
pub mod traits;
pub mod wfs;

#[doc(hidden)]
pub mod test_support;
