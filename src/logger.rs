//! Formatting for the SDK's own diagnostic output.
//!
//! Every line is prefixed with `SENTRY_SDK` so it can be told apart from the
//! host application's logs:
//!
//! ```text
//! SENTRY_SDK | DEBUG | TRANSPORT | Sending envelope with 1 items
//! SENTRY_SDK | WARN | worker{threads=2}: WORKER | queue is full, dropping job
//! ```

use std::fmt;
use tracing::debug;
use tracing_core::{Event, Subscriber};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::{
    FmtContext, FormattedFields,
    format::{self, FormatEvent, FormatFields},
};
use tracing_subscriber::registry::LookupSpan;

use crate::config::Config;

#[derive(Debug, Clone, Copy)]
pub struct Formatter;

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        write!(&mut writer, "SENTRY_SDK | {} | ", metadata.level())?;

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, "{}", span.name())?;

                let ext = span.extensions();
                if let Some(fields) = ext.get::<FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{fields}}}")?;
                    }
                }
                write!(writer, ": ")?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

/// Installs a global `fmt` subscriber filtered by `config.log_level`.
///
/// Embedders that already own a subscriber should skip this; the SDK only
/// emits `tracing` events and never requires one to be installed.
pub fn enable_logging_subsystem(config: &Config) -> Result<(), String> {
    let level = if config.debug {
        "debug"
    } else {
        config.log_level.as_str()
    };
    let env_filter = format!("h2=off,hyper=off,hyper_util=off,reqwest=off,rustls=off,{level}");
    let filter = EnvFilter::try_new(env_filter)
        .map_err(|e| format!("could not parse log level in configuration: {e}"))?;

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(false)
        .without_time()
        .event_format(Formatter)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| format!("setting default subscriber failed: {e}"))?;

    debug!("Logging subsystem enabled");
    Ok(())
}
