pub mod diagnostics;
pub mod health;
pub mod presence;
pub mod versions;

pub use diagnostics::*;
pub use health::*;
pub use presence::*;
pub use versions::*;
