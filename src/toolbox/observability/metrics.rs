/*
 * Copyright (C) 2024 The Nanocloud Authors
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 * http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use std::error::Error;
use std::future::Future;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use prometheus::core::Collector;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

static REGISTRY: OnceLock<Registry> = OnceLock::new();
static LIFECYCLE_OPERATIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static LIFECYCLE_OPERATION_DURATION: OnceLock<HistogramVec> = OnceLock::new();
static PROXY_REQUESTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static AUTH_REJECTIONS_TOTAL: OnceLock<IntCounter> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(|| {
        Registry::new_custom(Some("magic_toolbox".to_string()), None)
            .expect("failed to initialise magic_toolbox metrics registry")
    })
}

fn register_collector<C>(collector: C) -> C
where
    C: Clone + Collector + Send + Sync + 'static,
{
    registry()
        .register(Box::new(collector.clone()))
        .expect("failed to register magic_toolbox metric collector");
    collector
}

fn lifecycle_operations_total() -> &'static IntCounterVec {
    LIFECYCLE_OPERATIONS_TOTAL.get_or_init(|| {
        let opts = Opts::new(
            "lifecycle_operations_total",
            "Toolbox lifecycle operations grouped by operation and result",
        );
        let counter = IntCounterVec::new(opts, &["operation", "result"])
            .expect("failed to build lifecycle operation counter");
        register_collector(counter)
    })
}

fn lifecycle_operation_duration() -> &'static HistogramVec {
    LIFECYCLE_OPERATION_DURATION.get_or_init(|| {
        let opts = HistogramOpts::new(
            "lifecycle_operation_duration_seconds",
            "Toolbox lifecycle operation latency distribution",
        )
        .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]);
        let histogram = HistogramVec::new(opts, &["operation", "result"])
            .expect("failed to build lifecycle operation histogram");
        register_collector(histogram)
    })
}

fn proxy_requests_total() -> &'static IntCounterVec {
    PROXY_REQUESTS_TOTAL.get_or_init(|| {
        let opts = Opts::new(
            "proxy_requests_total",
            "Requests forwarded to toolbox instances grouped by operation and result",
        );
        let counter = IntCounterVec::new(opts, &["operation", "result"])
            .expect("failed to build proxy request counter");
        register_collector(counter)
    })
}

fn auth_rejections_total() -> &'static IntCounter {
    AUTH_REJECTIONS_TOTAL.get_or_init(|| {
        let counter = IntCounter::new(
            "auth_rejections_total",
            "Requests rejected by the API key gate",
        )
        .expect("failed to build auth rejection counter");
        register_collector(counter)
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleOperation {
    Create,
    List,
    Delete,
}

impl LifecycleOperation {
    pub fn as_label(self) -> &'static str {
        match self {
            LifecycleOperation::Create => "create",
            LifecycleOperation::List => "list",
            LifecycleOperation::Delete => "delete",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationOutcome {
    Success,
    Conflict,
    Rejected,
    Error,
}

impl OperationOutcome {
    fn as_label(self) -> &'static str {
        match self {
            OperationOutcome::Success => "success",
            OperationOutcome::Conflict => "conflict",
            OperationOutcome::Rejected => "rejected",
            OperationOutcome::Error => "error",
        }
    }
}

fn record_lifecycle_operation(
    operation: LifecycleOperation,
    outcome: OperationOutcome,
    duration: Duration,
) {
    let labels = [operation.as_label(), outcome.as_label()];
    lifecycle_operations_total().with_label_values(&labels).inc();
    lifecycle_operation_duration()
        .with_label_values(&labels)
        .observe(duration.as_secs_f64());
}

/// Awaits `future` and records its latency and outcome. `classify` maps a
/// failure onto the outcome label so conflicts are distinguishable from
/// collaborator errors.
pub async fn observe_lifecycle_operation<F, T, E>(
    operation: LifecycleOperation,
    classify: fn(&E) -> OperationOutcome,
    future: F,
) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
{
    let start = Instant::now();
    let result = future.await;
    let outcome = match &result {
        Ok(_) => OperationOutcome::Success,
        Err(err) => classify(err),
    };
    record_lifecycle_operation(operation, outcome, start.elapsed());
    result
}

pub fn record_proxy_request(operation: &str, success: bool) {
    let result = if success { "success" } else { "error" };
    proxy_requests_total()
        .with_label_values(&[operation, result])
        .inc();
}

pub fn record_auth_rejection() {
    auth_rejections_total().inc();
}

pub fn gather() -> Result<Vec<u8>, Box<dyn Error + Send + Sync>> {
    let metric_families = registry().gather();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|err| Box::new(err) as Box<dyn Error + Send + Sync>)?;
    Ok(buffer)
}
