use std::sync::{Arc, OnceLock};

use crate::{EnvironmentConfig, ResolveContext, SelfType};

mod properties;

pub(crate) const DEFAULT_ACCOUNT: &str = "111111111111";
pub(crate) const OTHER_ACCOUNT: &str = "222222222222";

pub(crate) fn config() -> EnvironmentConfig {
    EnvironmentConfig::new(
        "stg",
        "ap-southeast-2",
        [("stg", DEFAULT_ACCOUNT), ("dev", OTHER_ACCOUNT)],
    )
    .unwrap()
}

pub(crate) fn ctx<'a>(
    config: &'a EnvironmentConfig,
    self_type: SelfType,
    self_name: &'a str,
) -> ResolveContext<'a> {
    ResolveContext::new(config, self_type, self_name)
}

#[derive(Clone)]
pub(crate) struct SharedLogBuffer(Arc<std::sync::Mutex<Vec<u8>>>);

pub(crate) struct SharedLogWriter(Arc<std::sync::Mutex<Vec<u8>>>);

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SharedLogBuffer {
    type Writer = SharedLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        SharedLogWriter(Arc::clone(&self.0))
    }
}

impl std::io::Write for SharedLogWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl SharedLogBuffer {
    pub(crate) fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

/// Install the process-wide test subscriber once and hand out its buffer.
///
/// Tests run in parallel, so assertions only check for their own lines.
pub(crate) fn log_sink() -> SharedLogBuffer {
    static LOG_SINK: OnceLock<SharedLogBuffer> = OnceLock::new();
    LOG_SINK
        .get_or_init(|| {
            let sink = SharedLogBuffer(Arc::new(std::sync::Mutex::new(Vec::new())));
            let subscriber = tracing_subscriber::fmt()
                .with_ansi(false)
                .without_time()
                .with_target(false)
                .with_max_level(tracing::Level::DEBUG)
                .with_writer(sink.clone())
                .finish();
            tracing::subscriber::set_global_default(subscriber)
                .expect("global test subscriber should initialize");
            tracing::callsite::rebuild_interest_cache();
            sink
        })
        .clone()
}
