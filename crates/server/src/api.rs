//! HTTP API for the aggregated cost model, cache control, health and
//! Prometheus exposition

use anyhow::{bail, Result};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use costmodel::{
    aggregate_cost_model, estimate_idle_coefficient, fingerprint,
    models::SharedResourceInfo,
    sources::{CostDataSource, PricingProvider},
    ResultCache,
};
use prometheus::{Encoder, Registry, TextEncoder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Shared application state
pub struct AppState {
    pub source: Arc<dyn CostDataSource>,
    pub pricing: Arc<dyn PricingProvider>,
    pub cache: ResultCache,
    pub registry: Registry,
}

/// JSON envelope wrapping every API response
#[derive(Debug, Serialize)]
struct DataEnvelope {
    code: u16,
    status: String,
    data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

fn success(data: Value, message: Option<String>) -> Response {
    (
        StatusCode::OK,
        Json(DataEnvelope {
            code: 200,
            status: "success".to_string(),
            data,
            message,
        }),
    )
        .into_response()
}

fn failure(status: StatusCode, message: impl Into<String>) -> Response {
    let message = message.into();
    warn!(error = %message, "error returned to client");
    (
        status,
        Json(DataEnvelope {
            code: status.as_u16(),
            status: "error".to_string(),
            data: Value::Null,
            message: Some(message),
        }),
    )
        .into_response()
}

/// Parse a window/offset parameter like `"30m"`, `"12h"` or `"2d"`.
fn parse_duration_param(param: &str) -> Result<Duration> {
    let param = param.trim();
    if param.len() < 2 {
        bail!("invalid duration {param:?}");
    }
    let (count, unit) = param.split_at(param.len() - 1);
    let count: u64 = count.parse()?;
    let seconds = match unit {
        "s" => count,
        "m" => count * 60,
        "h" => count * 3600,
        "d" => count * 86400,
        _ => bail!("invalid duration unit in {param:?}"),
    };
    Ok(Duration::from_secs(seconds))
}

fn split_csv(value: &str) -> Vec<String> {
    if value.is_empty() {
        return Vec::new();
    }
    value.split(',').map(str::to_string).collect()
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AggregateParams {
    pub window: String,
    pub offset: String,
    pub namespace: String,
    pub cluster: String,
    pub aggregation: String,
    pub aggregation_subfield: String,
    pub allocate_idle: String,
    pub shared_namespaces: String,
    pub shared_label_names: String,
    pub shared_label_values: String,
    /// `"true"` keeps the time-series dimension of the data, which is
    /// otherwise summed over the whole interval
    pub time_series: String,
    /// `"true"` recomputes even when a cached result exists
    pub disable_cache: String,
    /// `"true"` flushes the whole cache before computing
    pub clear_cache: String,
}

async fn aggregated_cost_model(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AggregateParams>,
) -> Response {
    // aggregation field is required, and label grouping needs the label key
    if params.aggregation.is_empty() {
        return failure(
            StatusCode::BAD_REQUEST,
            "missing aggregation field parameter",
        );
    }
    if params.aggregation == "label" && params.aggregation_subfield.is_empty() {
        return failure(
            StatusCode::BAD_REQUEST,
            "missing aggregation subfield parameter for aggregation by label",
        );
    }

    let window = match parse_duration_param(&params.window) {
        Ok(window) => window,
        Err(e) => return failure(StatusCode::BAD_REQUEST, e.to_string()),
    };
    let offset = if params.offset.is_empty() {
        None
    } else {
        match parse_duration_param(&params.offset) {
            Ok(offset) => Some(offset),
            Err(e) => return failure(StatusCode::BAD_REQUEST, e.to_string()),
        }
    };

    let shared_namespaces = split_csv(&params.shared_namespaces);
    let shared_label_names = split_csv(&params.shared_label_names);
    let shared_label_values = split_csv(&params.shared_label_values);
    let shared = if !shared_namespaces.is_empty() || !shared_label_names.is_empty() {
        match SharedResourceInfo::new(
            &shared_namespaces,
            &shared_label_names,
            &shared_label_values,
        ) {
            Ok(shared) => Some(shared),
            Err(e) => return failure(StatusCode::BAD_REQUEST, e.to_string()),
        }
    } else {
        None
    };

    let time_series = params.time_series == "true";

    // clear before the cache check so clearCache=true always returns a
    // freshly computed value
    if params.clear_cache == "true" {
        state.cache.flush();
    }

    let key = fingerprint(
        &params.window,
        &params.offset,
        &params.namespace,
        &params.cluster,
        &params.aggregation,
        &params.aggregation_subfield,
        time_series,
    );
    if params.disable_cache != "true" {
        if let Some(hit) = state.cache.get(&key) {
            let data = serde_json::from_str(&hit).unwrap_or(Value::Null);
            return success(data, Some(format!("cache hit: {key}")));
        }
    }

    let records = match state
        .source
        .cost_records(window, offset, &params.namespace, &params.cluster)
        .await
    {
        Ok(records) => records,
        Err(e) => return failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };

    let custom = match state.pricing.custom_pricing() {
        Ok(custom) => custom,
        Err(e) => return failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };
    let discount = match custom.discount_fraction() {
        Ok(discount) => discount,
        Err(e) => return failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };
    let custom = state.pricing.custom_pricing_enabled().then_some(&custom);

    // two-pass idle allocation: estimate with coefficient 1.0, then price
    // with the estimate
    let mut idle_coefficient = 1.0;
    if params.allocate_idle == "true" {
        match estimate_idle_coefficient(
            state.source.as_ref(),
            &records,
            custom,
            window,
            offset,
            discount,
        )
        .await
        {
            Ok(coefficient) if coefficient > 0.0 => idle_coefficient = coefficient,
            Ok(_) => info!("idle coefficient unavailable, using 1.0"),
            Err(e) => return failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        }
    }

    let result = aggregate_cost_model(
        &records,
        &params.aggregation,
        &params.aggregation_subfield,
        time_series,
        discount,
        idle_coefficient,
        shared.as_ref(),
        custom,
    );

    let data = match serde_json::to_value(&result) {
        Ok(data) => data,
        Err(e) => return failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };
    state.cache.set(&key, data.to_string());

    success(data, Some(format!("cache miss: {key}")))
}

async fn flush_cache(State(state): State<Arc<AppState>>) -> Response {
    state.cache.flush();
    success(Value::Null, Some("cache flushed".to_string()))
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

/// Prometheus exposition of the owned registry
async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    let encoder = TextEncoder::new();
    let families = state.registry.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buffer) {
        return failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/aggregatedCostModel", get(aggregated_cost_model))
        .route("/flushCache", post(flush_cache))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
