#![deny(warnings)]
#![deny(dead_code)]
#![deny(unused_variables)]
#![deny(unused_imports)]

pub mod chunker;
pub mod config;
pub mod error;
pub mod hashing;
pub mod source;
pub mod state;
pub mod traits;
pub mod types;
