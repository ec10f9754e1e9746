//! Building blocks for the `sessiondb` command line.
//!
//! Each block is a `clap::Parser` struct that the binary flattens into its own config. Every
//! flag can also be given through an environment variable prefixed with `SESSIONDB_`.

pub mod batch;
pub mod duration;
pub mod memory;
pub mod memory_size;
pub mod postgres;
pub mod source;
pub mod tokio;
