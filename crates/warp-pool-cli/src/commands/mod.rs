pub mod bench;
pub mod echo;
