pub mod client;
pub mod posts;

pub use client::RestClient;
