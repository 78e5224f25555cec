#![doc = include_str!("../README.md")]

pub mod bounds;
pub mod chunk;
pub mod error;
pub mod grassmann;
pub mod merger;
pub mod ortho;
pub mod pool;

pub use bounds::{BoundedDoubleHeap, DoubleHeapVector};
pub use error::GrassmannPcaError;
pub use grassmann::{TrimmedGrassmannConfig, TrimmedGrassmannPca, TrimmedPcaOutput};
pub use merger::{ResultsMerger, TrimmedAccumulator};
