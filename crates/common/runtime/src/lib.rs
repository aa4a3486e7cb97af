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

mod error;
mod factory;
mod options;

pub use error::{Error, Result};
pub use factory::create_current_thread_runtime;
pub use options::RuntimeOptions;
pub use tokio::{runtime::Runtime, task::JoinHandle};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_multi_thread_runtime_with_names() {
        let runtime = RuntimeOptions::builder()
            .thread_name("test-rt".to_string())
            .worker_threads(2)
            .build()
            .create()
            .unwrap();
        let handle = runtime.spawn(async move { std::thread::current().name().map(str::to_owned) });
        let handle_name = runtime.block_on(handle).unwrap().unwrap();
        assert!(handle_name.starts_with("test-rt-"));
    }

    #[test]
    fn single_worker_selects_current_thread() {
        let options = RuntimeOptions::builder().worker_threads(1).build();
        assert!(options.is_current_thread());
        let runtime = options.create().unwrap();
        let value = runtime.block_on(async {
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            42
        });
        assert_eq!(value, 42);
    }

    #[test]
    fn builds_current_thread_runtime() {
        let runtime = create_current_thread_runtime("single-thread").unwrap();
        let value = runtime.block_on(async { 42 });
        assert_eq!(value, 42);
    }

    #[test]
    fn default_options_use_cpu_count() {
        let options = RuntimeOptions::default();
        assert_eq!(options.worker_threads, None);
        assert!(!options.is_current_thread());
        assert_eq!(options.thread_name, "relay-rt");
    }
}
