// src/controller.rs
//
// Drives decomposition and reconstruction for every channel plane of one
// request.

use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;

use crate::diagnostics::DecompositionDiagnostics;
use crate::error::{CompressionError, Result};
use crate::image::PixelBuffer;
use crate::matrix::MatrixBuffer;
use crate::reconstruct::Reconstructor;
use crate::session::CancellationToken;
use crate::svd::{SvdConfig, SvdEngine, TruncatedSvd};

/// Configuration for [`CompressionController`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompressionConfig {
    pub svd: SvdConfig,
    /// Decompose and reconstruct channels concurrently on the rayon pool.
    pub parallel_channels: bool,
    /// Attach a [`DecompositionDiagnostics`] to every successful channel.
    pub collect_diagnostics: bool,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        CompressionConfig {
            svd: SvdConfig::default(),
            parallel_channels: true,
            collect_diagnostics: false,
        }
    }
}

type ChannelResult = (Result<MatrixBuffer>, Option<DecompositionDiagnostics>);

/// Progress of the most recent request run by a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompressionState {
    Idle,
    Decomposing,
    Reconstructing,
    Done,
}

impl CompressionState {
    fn as_u8(self) -> u8 {
        match self {
            CompressionState::Idle => 0,
            CompressionState::Decomposing => 1,
            CompressionState::Reconstructing => 2,
            CompressionState::Done => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => CompressionState::Decomposing,
            2 => CompressionState::Reconstructing,
            3 => CompressionState::Done,
            _ => CompressionState::Idle,
        }
    }
}

/// Result of one compression request.
///
/// A failed channel does not abort the others; its slot in `channels` holds
/// the error instead.
#[derive(Debug, Clone)]
pub struct CompressionOutcome {
    /// Rank as requested by the caller.
    pub requested_rank: usize,
    /// Rank after clamping to `min(rows, columns)`.
    pub effective_rank: usize,
    pub channels: Vec<Result<MatrixBuffer>>,
    pub compression_ratio: f64,
    /// Filled only when `collect_diagnostics` is set and the channel succeeded.
    pub diagnostics: Vec<Option<DecompositionDiagnostics>>,
}

impl CompressionOutcome {
    pub fn is_complete(&self) -> bool {
        self.channels.iter().all(|c| c.is_ok())
    }

    /// Indices of the channels that failed.
    pub fn failed_channels(&self) -> Vec<usize> {
        self.channels
            .iter()
            .enumerate()
            .filter_map(|(idx, c)| c.is_err().then_some(idx))
            .collect()
    }

    /// The reconstructed planes, or the first channel error.
    pub fn into_planes(self) -> Result<Vec<MatrixBuffer>> {
        self.channels.into_iter().collect()
    }
}

/// Original element count over stored element count.
///
/// `rows * columns * channels / (channels * (rows*k + k + k*columns))`.
/// Rank 0 stores nothing, which gives `f64::INFINITY`.
pub fn compression_ratio(rows: usize, columns: usize, k: usize, channels: usize) -> f64 {
    let original = (rows * columns * channels) as f64;
    let stored = (channels * (rows * k + k + k * columns)) as f64;
    if stored == 0.0 {
        return f64::INFINITY;
    }
    original / stored
}

pub struct CompressionController {
    config: CompressionConfig,
    engine: SvdEngine,
    reconstructor: Reconstructor,
    state: AtomicU8,
}

impl Default for CompressionController {
    fn default() -> Self {
        Self::new(CompressionConfig::default())
    }
}

impl CompressionController {
    pub fn new(config: CompressionConfig) -> Self {
        Self {
            config,
            engine: SvdEngine::new(config.svd),
            reconstructor: Reconstructor::new(),
            state: AtomicU8::new(CompressionState::Idle.as_u8()),
        }
    }

    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    /// State of the most recent request. When several requests share one
    /// controller this is whichever transition happened last.
    pub fn state(&self) -> CompressionState {
        CompressionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: CompressionState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    /// Compresses every plane to rank `k` and reconstructs it.
    ///
    /// # Errors
    /// Whole-request validation only: `InvalidDimension` for a negative `k`,
    /// no planes, or planes of differing shape. Everything else is reported
    /// per channel in the outcome.
    pub fn compress(&self, planes: &[MatrixBuffer], k: i64) -> Result<CompressionOutcome> {
        let outcome = self.compress_cancellable(planes, k, &CancellationToken::new())?;
        outcome.ok_or(CompressionError::Cancelled)
    }

    /// Like [`compress`](Self::compress), but checks `cancel` before each
    /// channel and between the two phases. `Ok(None)` means the request was
    /// cancelled and produced nothing.
    pub fn compress_cancellable(
        &self,
        planes: &[MatrixBuffer],
        k: i64,
        cancel: &CancellationToken,
    ) -> Result<Option<CompressionOutcome>> {
        let (rows, columns) = validate_request(planes, k)?;
        let requested_rank = k as usize;
        let effective_rank = requested_rank.min(rows.min(columns));
        let start_time = Instant::now();
        debug!(
            "Compressing {} plane(s) of {}x{} to rank {} (effective {})",
            planes.len(),
            rows,
            columns,
            requested_rank,
            effective_rank
        );

        self.set_state(CompressionState::Decomposing);
        let decompose_one = |(channel, plane): (usize, &MatrixBuffer)| -> Option<Result<TruncatedSvd>> {
            if cancel.is_cancelled() {
                return None;
            }
            let result = self.engine.decompose(plane, k);
            if let Err(e) = &result {
                warn!("Channel {} failed to decompose: {}", channel, e);
            }
            Some(result)
        };
        let decomposed: Vec<Option<Result<TruncatedSvd>>> = if self.config.parallel_channels {
            planes.par_iter().enumerate().map(decompose_one).collect()
        } else {
            planes.iter().enumerate().map(decompose_one).collect()
        };
        let decomposed: Option<Vec<Result<TruncatedSvd>>> = decomposed.into_iter().collect();
        let decomposed = match decomposed {
            Some(d) if !cancel.is_cancelled() => d,
            _ => {
                debug!("Request cancelled during decomposition");
                self.set_state(CompressionState::Idle);
                return Ok(None);
            }
        };

        self.set_state(CompressionState::Reconstructing);
        let collect_diagnostics = self.config.collect_diagnostics;
        let reconstruct_one = |(channel, svd): (usize, Result<TruncatedSvd>)| -> Option<ChannelResult> {
            if cancel.is_cancelled() {
                return None;
            }
            let svd = match svd {
                Ok(svd) => svd,
                Err(e) => return Some((Err(e), None)),
            };
            let diagnostics = collect_diagnostics.then(|| DecompositionDiagnostics::collect(&planes[channel], &svd));
            let plane = self.reconstructor.reconstruct(&svd);
            if let Err(e) = &plane {
                warn!("Channel {} failed to reconstruct: {}", channel, e);
            }
            Some((plane, diagnostics))
        };
        let reconstructed: Vec<Option<ChannelResult>> =
            if self.config.parallel_channels {
                decomposed.into_par_iter().enumerate().map(reconstruct_one).collect()
            } else {
                decomposed.into_iter().enumerate().map(reconstruct_one).collect()
            };
        let reconstructed: Option<Vec<_>> = reconstructed.into_iter().collect();
        let (channels, diagnostics): (Vec<_>, Vec<_>) = match reconstructed {
            Some(r) if !cancel.is_cancelled() => r.into_iter().unzip(),
            _ => {
                debug!("Request cancelled during reconstruction");
                self.set_state(CompressionState::Idle);
                return Ok(None);
            }
        };

        let outcome = CompressionOutcome {
            requested_rank,
            effective_rank,
            compression_ratio: compression_ratio(rows, columns, effective_rank, planes.len()),
            channels,
            diagnostics,
        };
        self.set_state(CompressionState::Done);
        info!(
            "Compressed {} plane(s) of {}x{} at rank {} (ratio {:.2}:1, {} failed) in {:?}",
            planes.len(),
            rows,
            columns,
            effective_rank,
            outcome.compression_ratio,
            outcome.failed_channels().len(),
            start_time.elapsed()
        );
        Ok(Some(outcome))
    }

    /// Splits `image` into planes, compresses them and re-assembles the
    /// result (rounded and clamped to [0, 255], alpha carried through).
    ///
    /// # Errors
    /// Request validation errors, or the first channel error if any channel
    /// failed.
    pub fn compress_image(&self, image: &PixelBuffer, k: i64) -> Result<(PixelBuffer, CompressionOutcome)> {
        let outcome = self.compress(&image.to_planes(), k)?;
        let planes = outcome.channels.iter().cloned().collect::<Result<Vec<_>>>()?;
        let alpha = image.alpha();
        let rebuilt = PixelBuffer::from_planes(&planes, image.layout(), alpha.as_deref())?;
        Ok((rebuilt, outcome))
    }
}

fn validate_request(planes: &[MatrixBuffer], k: i64) -> Result<(usize, usize)> {
    if k < 0 {
        return Err(CompressionError::InvalidDimension(format!(
            "Truncation rank must be non-negative, got {}",
            k
        )));
    }
    let first = planes
        .first()
        .ok_or_else(|| CompressionError::InvalidDimension("No channel planes supplied".to_string()))?;
    let shape = first.shape();
    if shape.0 == 0 || shape.1 == 0 {
        return Err(CompressionError::InvalidDimension(format!(
            "Channel planes must be non-empty, got {}x{}",
            shape.0, shape.1
        )));
    }
    if let Some((idx, plane)) = planes.iter().enumerate().find(|(_, p)| p.shape() != shape) {
        return Err(CompressionError::InvalidDimension(format!(
            "Channel {} is {:?} but channel 0 is {:?}",
            idx,
            plane.shape(),
            shape
        )));
    }
    Ok(shape)
}
