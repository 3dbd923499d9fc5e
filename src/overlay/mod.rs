pub mod decorations;
pub mod decorator;

pub use decorations::*;
pub use decorator::*;
