pub mod gain_engine;

pub use gain_engine::{GainEngine, NotPrepared};
