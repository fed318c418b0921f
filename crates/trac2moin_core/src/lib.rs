pub mod config;
pub mod export;
pub mod filesystem;
pub mod identmap;
pub mod migrate;
pub mod runtime;
pub mod source;
pub mod translate;
pub mod verify;
