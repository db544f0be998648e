//! Built-in analysis types

pub mod grid;
pub mod urban_wind;

pub use grid::{Grid, GridExtractor};
pub use urban_wind::{UrbanWind, UrbanWindParameters};
