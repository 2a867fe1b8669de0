pub mod execute;
pub mod messages;

pub use execute::*;
pub use messages::*;
