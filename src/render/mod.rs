pub mod surface;
pub mod loader;
pub mod init;
pub mod headless;

pub use surface::*;
pub use init::*;
pub use headless::*;
