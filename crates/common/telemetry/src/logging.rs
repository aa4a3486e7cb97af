// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{collections::HashMap, env, io::IsTerminal, sync::Once};

use bon::Builder;
use once_cell::sync::OnceCell;
use opentelemetry::{KeyValue, global, trace::TracerProvider};
use opentelemetry_otlp::{Protocol, SpanExporter, WithExportConfig, WithHttpConfig};
use opentelemetry_sdk::{propagation::TraceContextPropagator, trace::Sampler};
use opentelemetry_semantic_conventions::resource;
use serde::{Deserialize, Deserializer, Serialize, de};
use smart_default::SmartDefault;
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_log::LogTracer;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, filter, fmt::MakeWriter, layer::Layered, prelude::*, reload,
};

/// Deserializes a string value, using `Default::default()` if the string is
/// empty.
///
/// Lets `log_format = ""` in a config file (or an empty environment
/// variable) fall back to the default format instead of failing.
pub fn empty_string_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    let s = String::deserialize(deserializer)?;
    if s.is_empty() {
        Ok(T::default())
    } else {
        T::deserialize(de::value::StrDeserializer::new(&s)).map_err(|e: de::value::Error| {
            de::Error::custom(format!("invalid value, expect empty string, err: {e}"))
        })
    }
}

/// The default OTLP endpoint when using gRPC exporter protocol.
pub const DEFAULT_OTLP_GRPC_ENDPOINT: &str = "http://localhost:4317";

/// The default OTLP endpoint when using HTTP exporter protocol.
pub const DEFAULT_OTLP_HTTP_ENDPOINT: &str = "http://localhost:4318/v1/traces";

/// Default log level filter when neither `LoggingOptions::level` nor
/// `RUST_LOG` is set.
const DEFAULT_LOG_TARGETS: &str = "info";

type FilteredRegistry = Layered<reload::Layer<filter::Targets, Registry>, Registry>;
type BoxedLayer = Box<dyn Layer<FilteredRegistry> + Send + Sync>;

/// Handle for changing the log filter at runtime.
///
/// Populated by [`init_global_logging`]; `None` before that.
pub static RELOAD_HANDLE: OnceCell<reload::Handle<filter::Targets, Registry>> = OnceCell::new();

/// Configuration options for the logging system.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, SmartDefault, Builder)]
#[serde(default)]
pub struct LoggingOptions {
    /// Directory for hourly rotated log files. Empty disables file logging.
    #[default = ""]
    #[builder(default)]
    pub dir: String,

    /// Target filter such as `"info,artifact_relay_server=debug"`. Falls back
    /// to `RUST_LOG`, then `info`.
    pub level: Option<String>,

    #[serde(default, deserialize_with = "empty_string_as_default")]
    #[builder(default)]
    pub log_format: LogFormat,

    /// Maximum number of rotated files kept per log stream (720 = 30 days).
    #[default = 720]
    #[builder(default = 720)]
    pub max_log_files: usize,

    #[default = true]
    #[builder(default = true)]
    pub append_stdout: bool,

    /// Export spans to an OTLP collector.
    #[default = false]
    #[builder(default)]
    pub enable_otlp_tracing: bool,

    /// Collector endpoint. URLs without a scheme get `http://` prepended.
    pub otlp_endpoint: Option<String>,

    /// Transport for OTLP export, HTTP when unset.
    pub otlp_export_protocol: Option<OtlpExportProtocol>,

    /// Extra headers for OTLP HTTP exports (auth, tenant ids).
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    #[default(_code = "HashMap::new()")]
    #[builder(default)]
    pub otlp_headers: HashMap<String, String>,
}

/// OpenTelemetry Protocol (OTLP) export transport protocols.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, derive_more::Display)]
#[serde(rename_all = "snake_case")]
pub enum OtlpExportProtocol {
    Grpc,
    /// HTTP POST with binary protobuf payloads.
    Http,
}

/// Available log output formats.
#[derive(
    Clone, Debug, Copy, PartialEq, Eq, Serialize, Deserialize, Default, derive_more::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// One JSON object per event, including the current span and span list.
    ///
    /// ```json
    /// {"timestamp":"2025-01-18T12:00:00Z","level":"INFO","fields":{"message":"relay completed","bytes":1024},"target":"artifact_relay_server::relay"}
    /// ```
    Json,

    /// Human-readable text.
    #[default]
    Text,
}

/// Initialize stdout text logging with default options.
///
/// The returned guards flush the non-blocking writers when dropped; keep them
/// alive for the lifetime of the process.
#[must_use]
pub fn init_tracing_subscriber(app_name: &str) -> Vec<WorkerGuard> {
    init_global_logging(app_name, &LoggingOptions::default(), None)
}

/// Initialize the global subscriber from `opts`.
///
/// Layers installed, depending on configuration:
///
/// - stdout (`append_stdout`)
/// - `{app_name}.*` hourly rotated files and `{app_name}-err.*` error-only
///   files (`dir`)
/// - OTLP span export (`enable_otlp_tracing`)
///
/// Only the first call in a process has any effect.
///
/// # Panics
///
/// Panics when the log directory cannot be created, the level string does
/// not parse, or the OTLP exporter cannot be built. Observability is set up
/// before anything else runs, so failing loudly here is intended.
pub fn init_global_logging(
    app_name: &str,
    opts: &LoggingOptions,
    node_id: Option<String>,
) -> Vec<WorkerGuard> {
    static START: Once = Once::new();
    let mut guards = vec![];

    START.call_once(|| {
        LogTracer::init().expect("log tracer must be valid");

        let mut layers: Vec<BoxedLayer> = Vec::new();

        if opts.append_stdout {
            let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
            guards.push(guard);
            layers.push(fmt_layer(
                writer,
                opts.log_format,
                std::io::stdout().is_terminal(),
            ));
        }

        if !opts.dir.is_empty() {
            let (writer, guard) =
                tracing_appender::non_blocking(rolling_appender(app_name, &opts.dir, opts));
            guards.push(guard);
            layers.push(fmt_layer(writer, opts.log_format, false));

            let err_prefix = format!("{app_name}-err");
            let (writer, guard) =
                tracing_appender::non_blocking(rolling_appender(&err_prefix, &opts.dir, opts));
            guards.push(guard);
            layers.push(
                fmt_layer(writer, opts.log_format, false)
                    .with_filter(filter::LevelFilter::ERROR)
                    .boxed(),
            );
        }

        let targets = opts
            .level
            .as_deref()
            .or(env::var(EnvFilter::DEFAULT_ENV).ok().as_deref())
            .unwrap_or(DEFAULT_LOG_TARGETS)
            .parse::<filter::Targets>()
            .expect("error parsing log level string");

        let (dyn_filter, reload_handle) = reload::Layer::new(targets);
        RELOAD_HANDLE
            .set(reload_handle)
            .expect("reload handle already set, maybe init_global_logging get called twice?");

        let subscriber = Registry::default().with(dyn_filter).with(layers);

        if opts.enable_otlp_tracing {
            global::set_text_map_propagator(TraceContextPropagator::new());

            let provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
                .with_batch_exporter(build_otlp_exporter(opts))
                .with_sampler(Sampler::ParentBased(Box::new(Sampler::AlwaysOn)))
                .with_resource(
                    opentelemetry_sdk::Resource::builder_empty()
                        .with_attributes([
                            KeyValue::new(resource::SERVICE_NAME, app_name.to_string()),
                            KeyValue::new(
                                resource::SERVICE_INSTANCE_ID,
                                node_id.unwrap_or_else(|| "none".to_string()),
                            ),
                            KeyValue::new(resource::SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
                            KeyValue::new(resource::PROCESS_PID, std::process::id().to_string()),
                        ])
                        .build(),
                )
                .build();
            let tracer = provider.tracer(app_name.to_string());

            tracing::subscriber::set_global_default(
                subscriber.with(tracing_opentelemetry::layer().with_tracer(tracer)),
            )
            .expect("error setting global tracing subscriber");
        } else {
            tracing::subscriber::set_global_default(subscriber)
                .expect("error setting global tracing subscriber");
        }
    });

    guards
}

fn fmt_layer<W>(writer: W, format: LogFormat, ansi: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    match format {
        LogFormat::Json => tracing_subscriber::fmt::Layer::new()
            .json()
            .with_writer(writer)
            .with_ansi(ansi)
            .with_current_span(true)
            .with_span_list(true)
            .boxed(),
        LogFormat::Text => tracing_subscriber::fmt::Layer::new()
            .with_writer(writer)
            .with_ansi(ansi)
            .boxed(),
    }
}

fn rolling_appender(prefix: &str, dir: &str, opts: &LoggingOptions) -> RollingFileAppender {
    RollingFileAppender::builder()
        .rotation(Rotation::HOURLY)
        .filename_prefix(prefix)
        .max_log_files(opts.max_log_files)
        .build(dir)
        .unwrap_or_else(|e| panic!("initializing rolling file appender at {dir} failed: {e}"))
}

/// Resolve the OTLP endpoint: explicit config first (scheme added when
/// missing), then the protocol default.
fn otlp_endpoint(opts: &LoggingOptions, protocol: &OtlpExportProtocol) -> String {
    opts.otlp_endpoint.as_ref().map_or_else(
        || match protocol {
            OtlpExportProtocol::Grpc => DEFAULT_OTLP_GRPC_ENDPOINT.to_string(),
            OtlpExportProtocol::Http => DEFAULT_OTLP_HTTP_ENDPOINT.to_string(),
        },
        |e| {
            if e.starts_with("http") {
                e.clone()
            } else {
                format!("http://{e}")
            }
        },
    )
}

fn build_otlp_exporter(opts: &LoggingOptions) -> SpanExporter {
    let protocol = opts
        .otlp_export_protocol
        .clone()
        .unwrap_or(OtlpExportProtocol::Http);
    let endpoint = otlp_endpoint(opts, &protocol);

    match protocol {
        OtlpExportProtocol::Grpc => SpanExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .expect("Failed to create OTLP gRPC exporter "),

        OtlpExportProtocol::Http => SpanExporter::builder()
            .with_http()
            .with_endpoint(endpoint)
            .with_protocol(Protocol::HttpBinary)
            .with_headers(opts.otlp_headers.clone())
            .build()
            .expect("Failed to create OTLP HTTP exporter "),
    }
}
