pub mod ring;

pub use ring::InMemoryCandleCache;
