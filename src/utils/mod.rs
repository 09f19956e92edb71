//! Shared numeric helpers: random numbers, activations and the GEMM kernel.

pub mod activations;
pub mod matmul;
pub mod rng;

pub use activations::Activation;
pub use rng::SimpleRng;
