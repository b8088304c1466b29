//! Resumable catalog-to-Spotify migration - shared modules for the sync binary.

pub mod driver;
pub mod error;
pub mod models;
pub mod normalize;
pub mod playlist;
pub mod spotify;
pub mod store;
