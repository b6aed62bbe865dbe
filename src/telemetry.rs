//! Traces and logs over OTLP, Prometheus metrics.
use std::time::{Duration, Instant};

use axum::extract::{MatchedPath, Request, State};
use axum::http::Version;
use axum::middleware::Next;
use axum::response::Response;
use metrics::{Unit, counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};
use opentelemetry::trace::{Span, Tracer};
use opentelemetry::{KeyValue, global};
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::{LogExporter, SpanExporter, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::logs::{SdkLogger, SdkLoggerProvider};
use opentelemetry_sdk::trace::SdkTracerProvider;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System};

use crate::{AppState, ServerError};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub const HTTP_REQUESTS: &str = "portal_http_requests_total";
pub const HTTP_DURATION: &str = "portal_http_request_duration_seconds";
pub const LOGINS: &str = "portal_logins_total";
pub const REGISTRATIONS: &str = "portal_registrations_total";

const LATENCY_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];
const PROCESS_REFRESH: Duration = Duration::from_secs(15);

fn resource() -> Resource {
    Resource::builder()
        .with_service_name(env!("CARGO_PKG_NAME"))
        .with_attribute(KeyValue::new("service.version", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Export spans to an OTLP collector. The provider is registered globally.
pub fn setup_tracer(endpoint: &str) -> Result<SdkTracerProvider, BoxError> {
    let exporter = SpanExporter::builder().with_tonic().with_endpoint(endpoint).build()?;
    let provider = SdkTracerProvider::builder()
        .with_resource(resource())
        .with_batch_exporter(exporter)
        .build();

    global::set_tracer_provider(provider.clone());
    Ok(provider)
}

/// `tracing` layer forwarding events to an OTLP collector.
pub fn setup_logging(
    endpoint: &str,
) -> Result<OpenTelemetryTracingBridge<SdkLoggerProvider, SdkLogger>, BoxError> {
    let exporter = LogExporter::builder().with_tonic().with_endpoint(endpoint).build()?;
    let provider = SdkLoggerProvider::builder()
        .with_resource(resource())
        .with_batch_exporter(exporter)
        .build();

    Ok(OpenTelemetryTracingBridge::new(&provider))
}

/// Install the global Prometheus recorder and start sampling the process.
pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    describe_counter!(HTTP_REQUESTS, Unit::Count, "Handled HTTP requests.");
    describe_histogram!(HTTP_DURATION, Unit::Seconds, "HTTP request latency.");
    describe_counter!(LOGINS, Unit::Count, "Token requests, by outcome.");
    describe_counter!(REGISTRATIONS, Unit::Count, "Accounts created, by origin.");
    describe_gauge!("process_cpu_usage", Unit::Percent, "CPU usage of the process.");
    describe_gauge!("process_memory_used_bytes", Unit::Bytes, "Resident memory of the process.");

    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(HTTP_DURATION.to_owned()), LATENCY_BUCKETS)?
        .install_recorder()?;

    spawn_process_gauges();
    Ok(handle)
}

fn spawn_process_gauges() {
    let pid = Pid::from_u32(std::process::id());
    let mut system = System::new_with_specifics(RefreshKind::nothing());

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PROCESS_REFRESH);
        loop {
            interval.tick().await;
            system.refresh_processes_specifics(
                ProcessesToUpdate::Some(&[pid]),
                true,
                ProcessRefreshKind::nothing().with_cpu().with_memory(),
            );

            let Some(process) = system.process(pid) else {
                continue;
            };
            gauge!("process_cpu_usage").set(f64::from(process.cpu_usage()));
            gauge!("process_memory_used_bytes").set(process.memory() as f64);
        }
    });
}

fn http_version(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_11 => "HTTP/1.1",
        Version::HTTP_2 => "HTTP/2",
        Version::HTTP_3 => "HTTP/3",
        _ => "unknown",
    }
}

/// Count, time and trace every routed request.
pub async fn track(req: Request, next: Next) -> Response {
    // Route template, not the raw path.
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map_or("unmatched", MatchedPath::as_str)
        .to_owned();
    let method = req.method().to_string();
    let version = http_version(req.version());

    let mut span = global::tracer("portal").start(format!("{method} {route}"));
    let started = Instant::now();
    let response = next.run(req).await;
    let elapsed = started.elapsed().as_secs_f64();
    let status = response.status().as_u16();

    span.set_attributes([
        KeyValue::new("http.request.method", method.clone()),
        KeyValue::new("http.route", route.clone()),
        KeyValue::new("http.response.status_code", i64::from(status)),
        KeyValue::new("network.protocol.version", version),
    ]);
    span.end();

    let labels = [
        ("method", method),
        ("route", route),
        ("status", status.to_string()),
    ];
    counter!(HTTP_REQUESTS, &labels).increment(1);
    histogram!(HTTP_DURATION, &labels).record(elapsed);

    response
}

/// Prometheus exposition. 404 while no recorder is installed.
pub async fn metrics(State(state): State<AppState>) -> Result<String, ServerError> {
    let handle = state.metrics.as_ref().ok_or(ServerError::NotFound)?;
    Ok(handle.render())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::*;
    use axum::http::StatusCode;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn test_metrics_handler() {
        let mut state = router::state();

        let response = make_request(
            None,
            app(state.clone()),
            Method::GET,
            "/metrics",
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            counter!(LOGINS, "outcome" => "success").increment(3);
        });
        state.metrics = Some(handle);

        let response = make_request(
            None,
            app(state),
            Method::GET,
            "/metrics",
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.contains(r#"portal_logins_total{outcome="success"} 3"#));
    }

    #[test]
    fn test_http_version() {
        assert_eq!(http_version(Version::HTTP_11), "HTTP/1.1");
        assert_eq!(http_version(Version::HTTP_2), "HTTP/2");
    }
}
