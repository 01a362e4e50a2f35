pub mod api;
pub mod classifier;
pub mod config;
pub mod memory;
pub mod ml;
pub mod model;
pub mod omdb;
pub mod reviews;
pub mod store;
pub mod summary;
pub mod tmdb;
#[cfg(feature = "transformer")]
pub mod transformer;
pub mod upstream;
