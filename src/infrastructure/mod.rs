pub mod parsers;
pub mod upload;
pub mod webhook;
