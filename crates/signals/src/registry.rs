//! Indicator registry.
//!
//! Holds one indicator per category and computes every weighted category for a
//! snapshot. Per-category failures are returned alongside successes so the
//! aggregator can renormalize around them.

use std::collections::BTreeMap;

use confluence_core::{Category, ComponentScore, MarketSnapshot, ScoringConfig, ValidationError};

use crate::indicator::{Indicator, IndicatorKind};
use crate::regime::MarketContext;

/// Outcome of one category for one snapshot.
pub type CategoryOutcome = Result<ComponentScore, ValidationError>;

#[derive(Clone)]
pub struct IndicatorRegistry {
    indicators: BTreeMap<Category, IndicatorKind>,
}

impl Default for IndicatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl IndicatorRegistry {
    /// Registry with every category registered.
    #[must_use]
    pub fn new() -> Self {
        Self::with_categories(Category::ALL)
    }

    /// Registry with only the given categories registered.
    #[must_use]
    pub fn with_categories(categories: impl IntoIterator<Item = Category>) -> Self {
        let indicators = categories
            .into_iter()
            .map(|c| (c, IndicatorKind::for_category(c)))
            .collect();
        Self { indicators }
    }

    /// Registers an indicator, replacing any indicator for the same category.
    pub fn register(&mut self, indicator: IndicatorKind) {
        self.indicators.insert(indicator.category(), indicator);
    }

    #[must_use]
    pub fn get(&self, category: Category) -> Option<&IndicatorKind> {
        self.indicators.get(&category)
    }

    #[must_use]
    pub fn contains(&self, category: Category) -> bool {
        self.indicators.contains_key(&category)
    }

    #[must_use]
    pub fn categories(&self) -> Vec<Category> {
        self.indicators.keys().copied().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.indicators.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indicators.is_empty()
    }

    pub fn remove(&mut self, category: Category) -> Option<IndicatorKind> {
        self.indicators.remove(&category)
    }

    /// Computes every registered category with a positive configured weight.
    ///
    /// A structurally invalid snapshot fails every category with the same
    /// error. Failures are logged and returned, never dropped.
    #[must_use]
    pub fn compute_all(
        &self,
        snapshot: &MarketSnapshot,
        config: &ScoringConfig,
    ) -> BTreeMap<Category, CategoryOutcome> {
        let weighted = self
            .indicators
            .iter()
            .filter(|(category, _)| config.category_weight(**category) > 0.0);

        if let Err(e) = snapshot.validate() {
            tracing::warn!(symbol = %snapshot.symbol, error = %e, "Snapshot rejected");
            return weighted.map(|(c, _)| (*c, Err(e.clone()))).collect();
        }

        let ctx = MarketContext::analyze(snapshot, config);
        let mut results = BTreeMap::new();
        for (category, indicator) in weighted {
            let outcome = indicator.compute_with(snapshot, config, &ctx);
            if let Err(e) = &outcome {
                tracing::warn!(
                    symbol = %snapshot.symbol,
                    category = %category,
                    error = %e,
                    "Indicator computation failed"
                );
            }
            results.insert(*category, outcome);
        }
        results
    }

    /// Computes a single category.
    ///
    /// # Errors
    /// Returns an error if the category is not registered, the snapshot is
    /// structurally invalid, or the indicator rejects its input.
    pub fn compute_one(
        &self,
        category: Category,
        snapshot: &MarketSnapshot,
        config: &ScoringConfig,
    ) -> CategoryOutcome {
        let indicator = self.get(category).ok_or_else(|| {
            ValidationError::malformed(format!("no indicator registered for {category}"))
        })?;
        snapshot.validate()?;
        indicator.compute(snapshot, config)
    }
}

impl std::fmt::Debug for IndicatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndicatorRegistry")
            .field("categories", &self.categories())
            .finish()
    }
}
