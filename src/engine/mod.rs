pub mod buffer;
pub mod placeholder;
pub mod chart;

pub use chart::*;
