pub mod ask;
pub mod config;
pub mod feedback;
pub mod health;
pub mod index;
pub mod stats;
