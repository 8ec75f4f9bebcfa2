// Low-rank image compression by truncated SVD

#![doc = include_str!("../README.md")]

pub mod controller;
pub mod diagnostics;
pub mod error;
pub mod image;
pub mod linalg_backends;
pub mod matrix;
pub mod reconstruct;
pub mod session;
pub mod svd;


pub use controller::{compression_ratio, CompressionConfig, CompressionController, CompressionOutcome, CompressionState};
pub use diagnostics::DecompositionDiagnostics;
pub use error::{CompressionError, Result};
pub use image::{PixelBuffer, PixelLayout};
pub use matrix::MatrixBuffer;
pub use reconstruct::Reconstructor;
pub use session::{CancellationToken, CompressionSession, Delivery, RequestTicket};
pub use svd::{rank_for_energy, JacobiSettings, SvdConfig, SvdEngine, SvdMethod, TruncatedSvd};
