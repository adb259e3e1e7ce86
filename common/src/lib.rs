pub mod error;
pub mod group;
pub mod hash;
pub mod random;
pub mod utils;
