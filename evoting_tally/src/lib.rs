pub mod ballot;
pub mod cipher;
pub mod config;
pub mod events;
pub mod keyfile;
pub mod proof;
pub mod tally;
pub mod wire;
