pub mod cli;
pub mod config;
pub mod error;
pub mod loop_item;
pub mod matrix;
pub mod script;
pub mod table;
pub mod var;
