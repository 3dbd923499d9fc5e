pub mod trading;
pub mod order;
pub mod candle;
pub mod time;

pub use trading::*;
pub use order::*;
pub use candle::*;
