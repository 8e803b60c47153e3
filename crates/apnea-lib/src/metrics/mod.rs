pub mod indices;

pub use indices::*;
