//! Compiles declared counter and ratio metrics into analytics query templates
//!
//! Compilation has two phases. Every counter metric is normalized and cached
//! by name first; ratio metrics are then resolved against that cache. A ratio
//! naming a counter that is not declared resolves that side to an empty
//! string, producing a formula such as `"() / (A)"`. This is not reported as
//! an error.

use serde::Serialize;
use serde_yaml::{Mapping, Value};
use tracing::debug;

use crate::crd::{CounterMetric, IstioTelemetry, MetricsSpec, RatioMetric};
use crate::error::Result;

/// Built-in query the analytics engine uses to count samples
pub const SAMPLE_SIZE_QUERY_TEMPLATE: &str = "iter8_request_count";

/// Value reported by the analytics engine when a ratio cannot be computed
pub const ABSENT_VALUE: &str = "None";

/// Label placeholder rewritten in every counter query
const LABEL_REWRITE: (&str, &str) = ("version_labels", "entity_labels");

/// Rewrites applied only to telemetry v1 queries
const LEGACY_TELEMETRY_REWRITES: [(&str, &str); 2] = [
    (
        "istio_request_duration_milliseconds_sum",
        "istio_request_duration_seconds_sum",
    ),
    ("envoy-stats", "istio-mesh"),
];

/// Ratio name renamed for the analytics engine
const RATIO_NAME_ALIAS: (&str, &str) = ("iter8_mean_latency", "iter8_latency");

/// One entry of the query-template document
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryTemplate {
    pub name: String,
    pub query: String,
}

/// One entry of the metric-descriptor document
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MetricDescriptor {
    pub name: String,
    pub is_counter: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub absent_value: Option<String>,
    pub sample_size_query_template: String,
}

/// Normalized counter queries, in declaration order
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CounterTemplates {
    templates: Vec<QueryTemplate>,
}

impl CounterTemplates {
    /// Query of the named counter; the latest declaration wins on duplicates
    pub fn get(&self, name: &str) -> Option<&str> {
        self.templates
            .iter()
            .rev()
            .find(|t| t.name == name)
            .map(|t| t.query.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueryTemplate> {
        self.templates.iter()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

/// The two documents consumed by the analytics engine
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CompiledMetricsConfig {
    pub query_templates: Vec<QueryTemplate>,
    pub metrics: Vec<MetricDescriptor>,
}

impl CompiledMetricsConfig {
    pub fn query_template(&self, name: &str) -> Option<&str> {
        self.query_templates
            .iter()
            .rev()
            .find(|t| t.name == name)
            .map(|t| t.query.as_str())
    }

    pub fn descriptor(&self, name: &str) -> Option<&MetricDescriptor> {
        self.metrics.iter().rev().find(|m| m.name == name)
    }

    /// Add a metric; a repeated name replaces the earlier entry in place
    fn insert(&mut self, template: QueryTemplate, descriptor: MetricDescriptor) {
        let existing = self
            .query_templates
            .iter()
            .position(|t| t.name == template.name);
        match existing {
            Some(index) => {
                debug!("Metric {} declared more than once, keeping the latest", template.name);
                self.query_templates[index] = template;
                if let Some(slot) = self.metrics.iter_mut().find(|m| m.name == descriptor.name) {
                    *slot = descriptor;
                }
            }
            None => {
                self.query_templates.push(template);
                self.metrics.push(descriptor);
            }
        }
    }

    /// `query_templates` document: a mapping of metric name to query
    pub fn query_templates_yaml(&self) -> Result<String> {
        let mut mapping = Mapping::new();
        for template in &self.query_templates {
            mapping.insert(
                Value::String(template.name.clone()),
                Value::String(template.query.clone()),
            );
        }
        Ok(serde_yaml::to_string(&mapping)?)
    }

    /// `metrics` document: the list of metric descriptors
    pub fn metrics_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.metrics)?)
    }
}

/// Rename telemetry v1 metrics to their current names; other modes are untouched
pub fn rewrite_legacy_telemetry(template: &str, telemetry: IstioTelemetry) -> String {
    let mut query = template.to_string();
    if telemetry.is_legacy() {
        for (legacy, current) in LEGACY_TELEMETRY_REWRITES {
            query = query.replace(legacy, current);
        }
    }
    query
}

/// Apply the label rewrite, then the legacy telemetry renames
pub fn normalize_query_template(template: &str, telemetry: IstioTelemetry) -> String {
    let query = template.replace(LABEL_REWRITE.0, LABEL_REWRITE.1);
    rewrite_legacy_telemetry(&query, telemetry)
}

/// Phase one: normalize and cache every counter query
pub fn compile_counters(counters: &[CounterMetric], telemetry: IstioTelemetry) -> CounterTemplates {
    let templates = counters
        .iter()
        .map(|metric| QueryTemplate {
            name: metric.name.clone(),
            query: normalize_query_template(&metric.query_template, telemetry),
        })
        .collect();
    CounterTemplates { templates }
}

/// Phase two: build one ratio query from the counter cache
pub fn resolve_ratio(ratio: &RatioMetric, counters: &CounterTemplates) -> QueryTemplate {
    let numerator = counters.get(&ratio.numerator).unwrap_or_default();
    let denominator = counters.get(&ratio.denominator).unwrap_or_default();
    if numerator.is_empty() || denominator.is_empty() {
        debug!(
            "Ratio metric {} references an undefined counter ({} / {})",
            ratio.name, ratio.numerator, ratio.denominator
        );
    }

    let name = if ratio.name == RATIO_NAME_ALIAS.0 {
        RATIO_NAME_ALIAS.1.to_string()
    } else {
        ratio.name.clone()
    };

    QueryTemplate {
        name,
        query: format!("({}) / ({})", numerator, denominator),
    }
}

/// Compile the declared metrics of an Iter8 instance
pub fn compile(metrics: &MetricsSpec) -> CompiledMetricsConfig {
    let counters = compile_counters(&metrics.counter_metrics, metrics.istio_telemetry());
    let mut compiled = CompiledMetricsConfig::default();

    for counter in counters.iter() {
        let descriptor = MetricDescriptor {
            name: counter.name.clone(),
            is_counter: true,
            absent_value: None,
            sample_size_query_template: SAMPLE_SIZE_QUERY_TEMPLATE.to_string(),
        };
        compiled.insert(counter.clone(), descriptor);
    }

    for ratio in &metrics.ratio_metrics {
        let template = resolve_ratio(ratio, &counters);
        let descriptor = MetricDescriptor {
            name: template.name.clone(),
            is_counter: false,
            absent_value: Some(ABSENT_VALUE.to_string()),
            sample_size_query_template: SAMPLE_SIZE_QUERY_TEMPLATE.to_string(),
        };
        compiled.insert(template, descriptor);
    }

    debug!(
        "Compiled {} counter and {} ratio metrics",
        counters.len(),
        metrics.ratio_metrics.len()
    );
    compiled
}

/// Declared counter metrics with defaults applied
///
/// Only the legacy telemetry renames are applied here; the label placeholder
/// is left for the analytics engine to substitute.
pub fn resolved_counter_metrics(metrics: &MetricsSpec) -> Vec<CounterMetric> {
    let telemetry = metrics.istio_telemetry();
    metrics
        .counter_metrics
        .iter()
        .map(|metric| CounterMetric {
            name: metric.name.clone(),
            query_template: rewrite_legacy_telemetry(&metric.query_template, telemetry),
            preferred_direction: Some(metric.preferred_direction()),
            units: Some(metric.units().to_string()),
        })
        .collect()
}

/// Declared ratio metrics with defaults applied
pub fn resolved_ratio_metrics(metrics: &MetricsSpec) -> Vec<RatioMetric> {
    metrics
        .ratio_metrics
        .iter()
        .map(|metric| RatioMetric {
            preferred_direction: Some(metric.preferred_direction()),
            zero_to_one: Some(metric.zero_to_one()),
            ..metric.clone()
        })
        .collect()
}
