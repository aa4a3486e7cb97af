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

//! # Telemetry
//!
//! - [`logging`]: global `tracing` subscriber (stdout, rolling files, OTLP)
//! - [`panic_hook`]: panics as structured events
//! - [`redact`]: fingerprints for secrets that must never be logged verbatim
//!
//! ```rust,no_run
//! use artifact_relay_common_telemetry::{logging::init_tracing_subscriber, panic_hook::set_panic_hook};
//!
//! let _guards = init_tracing_subscriber("artifact-relay");
//! set_panic_hook();
//! tracing::info!("relay started");
//! ```

pub mod logging;
pub mod panic_hook;
pub mod redact;

pub use tracing_appender::non_blocking::WorkerGuard;
