pub mod confidence;
pub mod events;
pub mod respiratory;

pub use confidence::*;
pub use events::*;
pub use respiratory::*;
