//! Config for the tokio IO runtime.

use std::{
    num::NonZeroUsize,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

/// Tokio runtime type.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum TokioRuntimeType {
    /// Current-thread runtime.
    CurrentThread,

    /// Multi-thread runtime.
    #[default]
    MultiThread,
}

/// CLI config for the tokio IO runtime.
#[derive(Debug, Clone, Copy, clap::Parser)]
pub struct TokioIoConfig {
    /// Set the maximum number of IO runtime threads to use.
    ///
    /// Defaults to the number of logical cores on the system.
    #[clap(long = "num-io-threads", env = "SESSIONDB_NUM_IO_THREADS", action)]
    pub num_threads: Option<NonZeroUsize>,

    /// IO tokio runtime type.
    #[clap(
        long = "io-runtime-type",
        env = "SESSIONDB_IO_RUNTIME_TYPE",
        default_value_t = TokioRuntimeType::default(),
        value_enum,
        action
    )]
    pub runtime_type: TokioRuntimeType,

    /// Specifies the limit for additional threads spawned by the IO runtime.
    #[clap(
        long = "io-runtime-max-blocking-threads",
        env = "SESSIONDB_IO_RUNTIME_MAX_BLOCKING_THREADS",
        action
    )]
    pub max_blocking_threads: Option<NonZeroUsize>,

    /// Sets a custom timeout for a thread in the blocking pool of the IO runtime.
    #[clap(
        long = "io-runtime-thread-keep-alive",
        env = "SESSIONDB_IO_RUNTIME_THREAD_KEEP_ALIVE",
        value_parser = humantime::parse_duration
    )]
    pub thread_keep_alive: Option<Duration>,
}

impl TokioIoConfig {
    /// Creates the tokio runtime builder.
    pub fn builder(&self) -> Result<::tokio::runtime::Builder, std::io::Error> {
        // NOTE: no log macros will work here!
        //
        // The log emitter is initialised after the runtime is built, use eprintln!() instead.

        let mut builder = match self.runtime_type {
            TokioRuntimeType::CurrentThread => ::tokio::runtime::Builder::new_current_thread(),
            TokioRuntimeType::MultiThread => {
                let mut builder = ::tokio::runtime::Builder::new_multi_thread();
                let num_threads = match self.num_threads {
                    None => std::thread::available_parallelism()?,
                    Some(n) => n,
                };
                builder.worker_threads(num_threads.get());
                builder
            }
        };

        builder.enable_time();
        builder.enable_io();

        let thread_counter = Arc::new(AtomicUsize::new(1));
        builder.thread_name_fn(move || {
            format!(
                "sessiondb Tokio IO {}",
                thread_counter.fetch_add(1, Ordering::SeqCst)
            )
        });

        if let Some(x) = self.max_blocking_threads {
            builder.max_blocking_threads(x.get());
        }

        if let Some(x) = self.thread_keep_alive {
            builder.thread_keep_alive(x);
        }

        Ok(builder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use clap::Parser;
    use futures::FutureExt;
    use std::ffi::OsString;
    use tokio::net::TcpListener;

    fn default_config() -> TokioIoConfig {
        TokioIoConfig::parse_from(std::iter::empty::<OsString>())
    }

    #[test]
    fn test_thread_name() {
        let rt = default_config().builder().unwrap().build().unwrap();
        rt.block_on(async {
            tokio::spawn(async {
                let thread = std::thread::current();
                let tname = thread.name().expect("thread is named");
                assert!(
                    tname.starts_with("sessiondb Tokio IO"),
                    "Invalid thread name: {tname}"
                );
            })
            .await
            .unwrap();
        });
    }

    #[test]
    fn test_io_enabled() {
        let rt = TokioIoConfig::parse_from(["sessiondb", "--io-runtime-type", "current-thread"])
            .builder()
            .unwrap()
            .build()
            .unwrap();

        // binding panics when the IO driver is missing
        let bound = rt.block_on(async {
            TcpListener::bind("127.0.0.1:0")
                .catch_unwind()
                .await
                .is_ok()
        });
        assert!(bound);
    }
}
