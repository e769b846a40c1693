pub mod client;
pub mod engine;

pub use client::BinanceRestProvider;
pub use engine::BackfillEngine;
