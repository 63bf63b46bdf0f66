use std::io::IsTerminal;

use tracing::Level;
use tracing_subscriber::{EnvFilter, Layer, Registry, filter::Directive, fmt, layer::SubscriberExt};

use crate::cli::{LogColor, LogOptions};

/// Installs the global subscriber. `RUST_LOG` takes precedence over
/// `--log.level`.
pub fn init_tracing(opts: &LogOptions) {
    let log_filter = EnvFilter::builder()
        .with_default_directive(Directive::from(opts.log_level))
        .from_env_lossy();

    let use_color = match opts.log_color {
        LogColor::Always => true,
        LogColor::Never => false,
        LogColor::Auto => std::io::stdout().is_terminal(),
    };
    let include_target = matches!(opts.log_level, Level::DEBUG | Level::TRACE);

    let fmt_layer = fmt::layer()
        .with_target(include_target)
        .with_thread_names(include_target)
        .with_ansi(use_color);
    let subscriber = Registry::default().with(fmt_layer.with_filter(log_filter));

    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install the log subscriber: {err}");
    }
}
