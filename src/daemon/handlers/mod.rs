pub mod common;
pub mod symbols;
