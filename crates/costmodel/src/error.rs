//! Typed errors for caller input problems

use thiserror::Error;

/// Errors reported before any computation begins.
#[derive(Debug, Error)]
pub enum CostModelError {
    /// Shared-resource label selectors must pair exactly one value with
    /// each name.
    #[error("supply exactly one label value per label name ({names} names, {values} values)")]
    LabelSelectorMismatch { names: usize, values: usize },

    /// The provider's discount must be a percent string like `"10%"`.
    #[error("invalid discount {0:?}: expected a percent string like \"10%\"")]
    InvalidDiscount(String),
}
