/*
 * Waggle - Chat-centric agent orchestration gateway
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 *
 * This program is free software: you can redistribute it
 * and/or modify it under the terms of the GNU Affero
 * General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or (at your
 * option) any later version.
 *
 * This program is distributed in the hope that it will be
 * useful, but WITHOUT ANY WARRANTY; without even the
 * implied warranty of MERCHANTABILITY or FITNESS FOR A
 * PARTICULAR PURPOSE. See the GNU Affero General Public
 * License for more details.
 *
 * You should have received a copy of the GNU Affero General
 * Public License along with this program. If not, see
 * <https://www.gnu.org/licenses/>.
 */

//! Tracing setup for the Waggle gateway.
//!
//! One call from `main` wires the whole pipeline: a JSON fmt layer for log
//! shipping, an `RUST_LOG`-overridable filter that quiets the gateway's
//! chattiest dependencies, and (opt-in) an OTLP span exporter stamped with
//! the service name, version and deployment environment so traces from
//! several Waggle deployments stay distinguishable in one collector.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::runtime::Tokio;
use opentelemetry_sdk::trace::Sampler;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use waggle_config::{TelemetryConfig, WaggleConfig};

/// Default filter when `RUST_LOG` is unset. The HTTP and SQL layers under
/// the gateway are noisy at info level and drown the event log.
const DEFAULT_FILTER: &str = "info,hyper=warn,h2=warn,sqlx=warn,reqwest=warn";

#[derive(thiserror::Error, Debug)]
pub enum TelemetryError {
    #[error("otlp exporter setup failed: {0}")]
    Exporter(String),
    #[error("tracing subscriber already installed: {0}")]
    Subscriber(String),
}

/// Keeps the OTel pipeline alive; dropping it flushes and shuts the
/// exporter down. Hold it for the lifetime of `main`.
pub struct TelemetryGuard {
    provider: Option<opentelemetry_sdk::trace::TracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("telemetry shutdown error: {e}");
            }
        }
    }
}

fn sampler_for(rate: f64) -> Sampler {
    if rate >= 1.0 {
        Sampler::AlwaysOn
    } else if rate <= 0.0 {
        Sampler::AlwaysOff
    } else {
        Sampler::TraceIdRatioBased(rate)
    }
}

fn service_resource(service_name: &str, waggle: &WaggleConfig) -> opentelemetry_sdk::Resource {
    opentelemetry_sdk::Resource::new([
        KeyValue::new("service.name", service_name.to_string()),
        KeyValue::new("service.version", waggle.version.clone()),
        KeyValue::new("deployment.environment", waggle.env.clone()),
    ])
}

/// Install the global tracing subscriber.
///
/// Always sets up JSON fmt output with the default filter (overridable via
/// `RUST_LOG`). When `telemetry.enabled` is true an OTLP span export layer
/// is added on top.
///
/// # Errors
///
/// `TelemetryError::Exporter` when the OTLP exporter cannot be built, and
/// `TelemetryError::Subscriber` when a global subscriber is already
/// installed (double init).
pub fn init_telemetry(
    service_name: &str,
    waggle: &WaggleConfig,
    telemetry: &TelemetryConfig,
) -> Result<TelemetryGuard, TelemetryError> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_FILTER));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_target(true);

    let (otel_layer, provider) = if telemetry.enabled {
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(&telemetry.otlp_endpoint)
            .build()
            .map_err(|e| TelemetryError::Exporter(e.to_string()))?;

        let provider = opentelemetry_sdk::trace::TracerProvider::builder()
            .with_batch_exporter(exporter, Tokio)
            .with_sampler(sampler_for(telemetry.sample_rate))
            .with_resource(service_resource(service_name, waggle))
            .build();

        let tracer = provider.tracer(service_name.to_string());
        (
            Some(tracing_opentelemetry::layer().with_tracer(tracer)),
            Some(provider),
        )
    } else {
        (None, None)
    };

    // `Option<Layer>` is itself a layer, so both modes share one pipeline.
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(otel_layer)
        .try_init()
        .map_err(|e| TelemetryError::Subscriber(e.to_string()))?;

    Ok(TelemetryGuard { provider })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use opentelemetry::Key;

    fn waggle_config() -> WaggleConfig {
        WaggleConfig {
            env: "staging".to_string(),
            version: "0.3.0".to_string(),
        }
    }

    #[test]
    fn test_sampler_full_rate_always_on() {
        assert!(matches!(sampler_for(1.0), Sampler::AlwaysOn));
        assert!(matches!(sampler_for(2.5), Sampler::AlwaysOn));
    }

    #[test]
    fn test_sampler_zero_or_negative_always_off() {
        assert!(matches!(sampler_for(0.0), Sampler::AlwaysOff));
        assert!(matches!(sampler_for(-1.0), Sampler::AlwaysOff));
    }

    #[test]
    fn test_sampler_fractional_rate_is_ratio_based() {
        match sampler_for(0.25) {
            Sampler::TraceIdRatioBased(rate) => assert!((rate - 0.25).abs() < f64::EPSILON),
            other => panic!("expected ratio sampler, got {other:?}"),
        }
    }

    #[test]
    fn test_resource_carries_deployment_identity() {
        let resource = service_resource("waggle-gateway", &waggle_config());
        assert_eq!(
            resource.get(Key::from_static_str("service.name")),
            Some("waggle-gateway".into()),
        );
        assert_eq!(
            resource.get(Key::from_static_str("service.version")),
            Some("0.3.0".into()),
        );
        assert_eq!(
            resource.get(Key::from_static_str("deployment.environment")),
            Some("staging".into()),
        );
    }

    #[test]
    fn test_default_filter_quiets_http_and_sql_layers() {
        for directive in ["hyper=warn", "h2=warn", "sqlx=warn", "reqwest=warn"] {
            assert!(
                DEFAULT_FILTER.contains(directive),
                "default filter should include {directive}"
            );
        }
        assert!(DEFAULT_FILTER.starts_with("info"));
    }

    #[test]
    fn test_guard_without_provider_drops_cleanly() {
        drop(TelemetryGuard { provider: None });
    }
}
