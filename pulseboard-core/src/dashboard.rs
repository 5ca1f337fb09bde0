//! Dashboard query service
//!
//! [`Dashboard`] is the entry point of the UI layer: every chart asks it for
//! a table by plain parameters. It owns the query caches and the lifetime
//! metrics computed at bootstrap.
//!
//! ## Failure policy
//!
//! - Date-range, selector and granularity errors propagate.
//! - [`Error::QueryTimeout`] propagates.
//! - Any other store failure is logged and answered with an empty result,
//!   which is never cached.

use crate::analytics::{
    add_total_as_country, country_series, country_share, cycle_country_options, cycle_usage,
    dau_mau_ratio, error_series, feature_activity, filter_user_cycles, free_users,
    general_series, invalid_format_types, top_countries, users_by_country_and_cycles,
    CountryCyclesRecord, CycleUsageRecord, ErrorSeries, FeatureActivityRecord, FreeUsersRecord,
    GeneralSeriesRecord, InvalidFormatCount, RatioRecord, SeriesMetric, SeriesPoint, ShareRecord,
    TotalMetrics,
};
use crate::cache::{CacheKey, CacheStats, QueryCache};
use crate::config::{CollectionsConfig, Config, MetricsConfig};
use crate::db::DocumentStore;
use crate::error::{Error, Result};
use crate::types::{
    CountrySelection, DateRange, FreeUserSegment, Granularity, MetricSelector, ShareMode,
    UsageTable,
};
use crate::usage::{add_total_rows, load_usage};
use chrono::NaiveDate;
use serde::Serialize;
use std::sync::Arc;

/// Countries offered by a dropdown and the ones preselected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountryOptions {
    /// Every country of the table, "Total" included
    pub countries: Vec<String>,
    /// Top countries by the dropdown's metric
    pub defaults: Vec<String>,
}

/// Free-tier cycle histogram with its country options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleUsage {
    /// Sorted countries, "Total" last
    pub options: Vec<String>,
    pub records: Vec<CycleUsageRecord>,
}

/// Counters of every cache owned by a dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DashboardCacheStats {
    pub charts: CacheStats,
    pub ratios: CacheStats,
    pub series: CacheStats,
}

/// Cached query surface over a document store.
pub struct Dashboard<S> {
    store: S,
    collections: CollectionsConfig,
    settings: MetricsConfig,
    totals: TotalMetrics,
    charts: QueryCache<Arc<UsageTable>>,
    ratios: QueryCache<Arc<Vec<RatioRecord>>>,
    series: QueryCache<Arc<Vec<SeriesPoint>>>,
}

impl<S: DocumentStore> Dashboard<S> {
    /// Build a dashboard around already computed lifetime metrics.
    pub fn new(
        store: S,
        collections: CollectionsConfig,
        settings: MetricsConfig,
        totals: TotalMetrics,
    ) -> Self {
        Self {
            store,
            collections,
            settings,
            totals,
            charts: QueryCache::new("charts"),
            ratios: QueryCache::new("ratios"),
            series: QueryCache::new("series"),
        }
    }

    /// Compute lifetime metrics up to `today`, then build the dashboard.
    pub fn bootstrap(store: S, config: &Config, today: NaiveDate) -> Result<Self> {
        let totals = TotalMetrics::compute(
            &store,
            &config.collections,
            config.metrics.lifetime_start,
            today,
        )?;
        Ok(Self::new(
            store,
            config.collections.clone(),
            config.metrics.clone(),
            totals,
        ))
    }

    pub fn total_metrics(&self) -> &TotalMetrics {
        &self.totals
    }

    pub fn cache_stats(&self) -> DashboardCacheStats {
        DashboardCacheStats {
            charts: self.charts.stats(),
            ratios: self.ratios.stats(),
            series: self.series.stats(),
        }
    }

    // ============================================
    // Usage charts
    // ============================================

    /// Joined usage table for a view and range, without Total rows.
    pub fn chart_data(&self, granularity: Granularity, range: &DateRange) -> Result<Arc<UsageTable>> {
        let result = self.cached_chart(granularity, range);
        recover("chart data", result, || Arc::new(UsageTable::empty(granularity)))
    }

    /// Usage table with one synthesized Total row per date.
    pub fn chart_data_with_totals(
        &self,
        granularity: Granularity,
        range: &DateRange,
    ) -> Result<UsageTable> {
        Ok(add_total_rows(&*self.chart_data(granularity, range)?))
    }

    /// All-country totals and percentages per date.
    pub fn general_series(
        &self,
        granularity: Granularity,
        range: &DateRange,
    ) -> Result<Vec<GeneralSeriesRecord>> {
        Ok(general_series(&*self.chart_data(granularity, range)?))
    }

    /// Countries of the view and the top ones by `metric`.
    pub fn country_options(
        &self,
        granularity: Granularity,
        range: &DateRange,
        metric: SeriesMetric,
    ) -> Result<CountryOptions> {
        let table = self.chart_data_with_totals(granularity, range)?;
        Ok(CountryOptions {
            countries: table.countries(),
            defaults: top_countries(&table, metric, self.settings.top_countries),
        })
    }

    /// Per-country series of `metric` for the selected countries.
    pub fn country_series(
        &self,
        granularity: Granularity,
        metric: SeriesMetric,
        range: &DateRange,
        countries: &CountrySelection,
    ) -> Result<Arc<Vec<SeriesPoint>>> {
        let key = CacheKey::country_series(granularity, &metric.key_fragment(), range, countries);
        let result = self.series.get_or_compute(&key, || {
            let table = add_total_rows(&*self.cached_chart(granularity, range)?);
            Ok(Arc::new(country_series(&table, metric, countries)))
        });
        recover("country series", result, || Arc::new(Vec::new()))
    }

    /// Share of the highlighted countries, the rest grouped as "Others".
    pub fn country_share(
        &self,
        granularity: Granularity,
        range: &DateRange,
        highlighted: &CountrySelection,
        metric: MetricSelector,
        mode: ShareMode,
    ) -> Result<Vec<ShareRecord>> {
        let table = self.chart_data(granularity, range)?;
        Ok(country_share(&table, highlighted, metric, mode))
    }

    /// Monthly DAU/MAU ratio per country, Total included.
    pub fn dau_mau_ratio(
        &self,
        range: &DateRange,
        countries: &CountrySelection,
    ) -> Result<Arc<Vec<RatioRecord>>> {
        let key = CacheKey::ratio(range, countries);
        let result = self.ratios.get_or_compute(&key, || {
            let daily = add_total_rows(&*self.cached_chart(Granularity::Daily, range)?);
            let monthly = add_total_rows(&*self.cached_chart(Granularity::Monthly, range)?);
            dau_mau_ratio(&daily, &monthly, countries).map(Arc::new)
        });
        recover("dau/mau ratio", result, || Arc::new(Vec::new()))
    }

    // ============================================
    // Free tier
    // ============================================

    pub fn free_users(&self, segment: FreeUserSegment) -> Result<Vec<FreeUsersRecord>> {
        let result = free_users(&self.store, &self.collections.free_cycles, segment);
        recover("free users", result, Vec::new)
    }

    /// Cycle histogram with a Total pseudo-country, filtered by countries and
    /// an inclusive year range.
    pub fn cycle_usage(&self, countries: &CountrySelection, years: (i32, i32)) -> Result<CycleUsage> {
        let result = cycle_usage(&self.store, &self.collections.free_cycles);
        let records = add_total_as_country(&recover("cycle usage", result, Vec::new)?);
        Ok(CycleUsage {
            options: cycle_country_options(&records),
            records: filter_user_cycles(&records, countries, years),
        })
    }

    pub fn users_by_country_and_cycles(&self) -> Result<Vec<CountryCyclesRecord>> {
        let result = users_by_country_and_cycles(&self.store, &self.collections.free_cycles);
        recover("users by country and cycles", result, Vec::new)
    }

    // ============================================
    // Errors and features
    // ============================================

    pub fn error_series(&self, granularity: Granularity) -> Result<ErrorSeries> {
        let result = error_series(&self.store, &self.collections.errors_by_date, granularity);
        recover("error series", result, || ErrorSeries {
            granularity,
            kinds: Vec::new(),
            rows: Vec::new(),
        })
    }

    pub fn invalid_format_types(&self, range: &DateRange) -> Result<Vec<InvalidFormatCount>> {
        let result =
            invalid_format_types(&self.store, &self.collections.invalid_format_types, range);
        recover("invalid format types", result, Vec::new)
    }

    pub fn feature_activity(&self, range: &DateRange) -> Result<Vec<FeatureActivityRecord>> {
        let offset = self.settings.utc_offset()?;
        let result = feature_activity(&self.store, &self.collections, range, offset);
        recover("feature activity", result, Vec::new)
    }

    /// Cached usage table; store failures propagate so they are not cached.
    fn cached_chart(&self, granularity: Granularity, range: &DateRange) -> Result<Arc<UsageTable>> {
        let key = CacheKey::chart_data(granularity, range);
        self.charts.get_or_compute(&key, || {
            load_usage(&self.store, &self.collections, granularity, range).map(Arc::new)
        })
    }
}

/// Turn a recoverable store failure into an empty result.
fn recover<T>(query: &'static str, result: Result<T>, empty: impl FnOnce() -> T) -> Result<T> {
    match result {
        Err(e) if e.is_recoverable_store_failure() => {
            tracing::error!(query, error = %e, "Store failure, rendering empty result");
            Ok(empty())
        }
        Err(e @ Error::QueryTimeout { .. }) => {
            tracing::warn!(query, error = %e, "Query timed out");
            Err(e)
        }
        other => other,
    }
}
