pub mod jsonserver;
pub mod metadata;

pub use jsonserver::*;
pub use metadata::*;
