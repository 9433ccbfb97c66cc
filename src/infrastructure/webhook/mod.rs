pub mod client;

pub use client::RestCrmGateway;
