// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

use std::str::FromStr;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Transport crates are chatty at debug; keep them at info unless asked.
const QUIET_TRANSPORTS: &str = "h2=info,hyper=info,hyper_util=info,alloy_transport_http=info,alloy_rpc_client=info";

pub fn filter_spec(log_level: &str) -> String {
    let normalized = log_level.trim();
    if normalized.is_empty() {
        return format!("info,{QUIET_TRANSPORTS}");
    }
    // Custom directive strings are respected as-is.
    if normalized.contains(',') || normalized.contains('=') {
        normalized.to_string()
    } else {
        format!("{normalized},{QUIET_TRANSPORTS}")
    }
}

/// Logs go to stderr so command output on stdout stays machine readable.
pub fn setup_logging(log_level: &str, json_format: bool) {
    let spec = filter_spec(log_level);
    let filter = EnvFilter::from_str(&spec).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::registry().with(filter);

    if json_format {
        let json_layer = fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_current_span(false);
        subscriber.with(json_layer).init();
    } else {
        let fmt_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .compact();
        subscriber.with(fmt_layer).init();
    }

    tracing::debug!(
        target: "logging",
        filter = %spec,
        format = if json_format { "json" } else { "compact" },
        "Logging initialized"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_level_gets_transport_overrides() {
        let spec = filter_spec("debug");
        assert!(spec.starts_with("debug,"));
        assert!(spec.contains("hyper=info"));
    }

    #[test]
    fn directive_strings_pass_through() {
        assert_eq!(filter_spec("warn,orchestrator=debug"), "warn,orchestrator=debug");
        assert!(filter_spec("  ").starts_with("info,"));
    }
}
