//! Collapsing transform chains into a single transform.

use crate::error::{TransformError, TransformResult};
use crate::estimate::{Estimator, Fit, PointMatches};
use crate::geometry::Point;
use crate::transform::polynomial::coefficient_count;
use crate::transform::{map_points, Direction, LeafModel, Polynomial2D, ResolvedChain};

impl Estimator {
    /// Fit one polynomial of `degree` to `chain` sampled at `domain`.
    ///
    /// The residual RMS over the samples is reported; no quality threshold is applied.
    pub fn approximate_as_polynomial(
        &self,
        chain: &ResolvedChain<'_>,
        domain: &[Point],
        degree: usize,
    ) -> TransformResult<Fit<Polynomial2D>> {
        let required = coefficient_count(degree);
        if domain.len() < required {
            return Err(TransformError::InsufficientData {
                required,
                provided: domain.len(),
            });
        }
        let matches = sample(chain, domain)?;
        self.polynomial(&matches, degree)
    }

    /// Single-transform equivalent of `chain`.
    ///
    /// Chains made only of affine-family leaves collapse to an affine fit,
    /// anything else to a polynomial of `degree`.
    pub fn collapse(
        &self,
        chain: &ResolvedChain<'_>,
        domain: &[Point],
        degree: usize,
    ) -> TransformResult<Fit<LeafModel>> {
        if chain.is_affine_family() {
            let matches = sample(chain, domain)?;
            Ok(self.affine(&matches)?.map(LeafModel::Affine))
        } else {
            Ok(self
                .approximate_as_polynomial(chain, domain, degree)?
                .map(LeafModel::Polynomial))
        }
    }
}

fn sample(chain: &ResolvedChain<'_>, domain: &[Point]) -> TransformResult<PointMatches> {
    let mapped = map_points(chain, domain, Direction::Forward)?;
    PointMatches::new(domain.to_vec(), mapped)
}

/// [`Estimator::approximate_as_polynomial`] with the default rank tolerance.
pub fn approximate_as_polynomial(
    chain: &ResolvedChain<'_>,
    domain: &[Point],
    degree: usize,
) -> TransformResult<Fit<Polynomial2D>> {
    Estimator::default().approximate_as_polynomial(chain, domain, degree)
}

/// [`Estimator::collapse`] with the default rank tolerance.
pub fn collapse(chain: &ResolvedChain<'_>, domain: &[Point], degree: usize) -> TransformResult<Fit<LeafModel>> {
    Estimator::default().collapse(chain, domain, degree)
}
