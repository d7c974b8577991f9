//! Message handling - turning raw input into commands

pub mod parser;

pub use parser::MessageParser;
