//! Structured spans for estimation and chain mapping
//!
//! Each span picks up the thread's correlation id and tile context so that
//! events from parallel batch workers can be attributed to their tile.

use crate::error::TransformResult;
use crate::estimate::Residuals;
use crate::geometry::Bounds;
use std::time::Instant;
use tracing::{span, Level, Span};

/// Span around a single least-squares fit
pub struct EstimationSpan {
    span: Span,
    start_time: Instant,
    model: &'static str,
}

impl EstimationSpan {
    pub fn new(model: &'static str, pairs: usize) -> Self {
        let tile_id = super::get_tile_context().map(|c| c.tile_id);
        let span = match super::get_correlation_id() {
            Some(corr_id) => span!(
                Level::DEBUG,
                "estimation",
                model = model,
                pairs = pairs,
                tile_id = tile_id.as_deref(),
                correlation_id = %corr_id
            ),
            None => span!(
                Level::DEBUG,
                "estimation",
                model = model,
                pairs = pairs,
                tile_id = tile_id.as_deref()
            ),
        };

        Self {
            span,
            start_time: Instant::now(),
            model,
        }
    }

    /// Record the fit quality
    pub fn record_residuals(&self, residuals: &Residuals) {
        tracing::debug!(
            parent: &self.span,
            model = self.model,
            rms = residuals.rms,
            max = residuals.max,
            count = residuals.count,
            elapsed_us = self.start_time.elapsed().as_micros() as u64,
            "Fit completed"
        );
    }

    /// Pass `result` through, logging a failed fit.
    pub fn finish<T>(&self, result: TransformResult<T>) -> TransformResult<T> {
        if let Err(ref e) = result {
            tracing::debug!(parent: &self.span, model = self.model, error = %e, "Fit failed");
        }
        result
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

/// Span around mapping one tile through its resolved chain
pub struct ChainSpan {
    span: Span,
    start_time: Instant,
}

impl ChainSpan {
    pub fn new(operation: &'static str, steps: usize) -> Self {
        let context = super::get_tile_context();
        let tile_id = context.as_ref().map(|c| c.tile_id.as_str());
        let z = context.as_ref().and_then(|c| c.z);
        let span = match super::get_correlation_id() {
            Some(corr_id) => span!(
                Level::INFO,
                "chain",
                operation = operation,
                steps = steps,
                tile_id = tile_id,
                z = z,
                correlation_id = %corr_id
            ),
            None => span!(
                Level::INFO,
                "chain",
                operation = operation,
                steps = steps,
                tile_id = tile_id,
                z = z
            ),
        };

        Self {
            span,
            start_time: Instant::now(),
        }
    }

    pub fn record_mapped(&self, points: usize) {
        tracing::debug!(
            parent: &self.span,
            points = points,
            elapsed_us = self.start_time.elapsed().as_micros() as u64,
            "Points mapped"
        );
    }

    pub fn record_bounds(&self, bounds: &Bounds) {
        tracing::debug!(
            parent: &self.span,
            min_x = bounds.min_x,
            min_y = bounds.min_y,
            max_x = bounds.max_x,
            max_y = bounds.max_y,
            "World bounds computed"
        );
    }

    pub fn record_failure(&self, error: &dyn std::error::Error) {
        tracing::warn!(parent: &self.span, error = %error, "Chain operation failed");
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{clear_tile_context, new_correlation_id, set_tile_context, TileContext};
    use tracing_test::traced_test;

    #[traced_test]
    #[test]
    fn test_estimation_span_records_fit() {
        new_correlation_id();
        let span = EstimationSpan::new("affine", 4);
        let _enter = span.enter();
        span.record_residuals(&Residuals {
            rms: 0.5,
            max: 1.0,
            count: 4,
        });
        assert!(logs_contain("Fit completed"));
    }

    #[traced_test]
    #[test]
    fn test_chain_span_carries_tile_context() {
        set_tile_context(TileContext {
            tile_id: "tile-7".to_string(),
            z: Some(1.0),
        });
        let span = ChainSpan::new("bounds", 3);
        let _enter = span.enter();
        span.record_bounds(&Bounds::new(0.0, 0.0, 10.0, 10.0));
        clear_tile_context();
        assert!(logs_contain("World bounds computed"));
        assert!(logs_contain("tile-7"));
    }
}
