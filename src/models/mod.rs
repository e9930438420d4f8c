pub mod diagnostics;
pub mod error;
pub mod health;
pub mod presence;
pub mod version;

pub use diagnostics::*;
pub use error::*;
pub use health::*;
pub use presence::*;
pub use version::*;
