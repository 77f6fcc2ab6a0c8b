use anyhow::Context;
use chrono::Utc;
use waterfall_core::config::Config;
use waterfall_core::ids::TraceId;
use waterfall_core::time::{TraceWindow, parse_duration_str, parse_time_or_relative};
use waterfall_tempo::TempoClient;
use waterfall_tree::{QueryKey, SpanCache, TraceSession};

/// Applies the global flags on top of the file and environment config.
pub fn load_config(endpoint: Option<String>, datasource: Option<String>) -> anyhow::Result<Config> {
    let mut cfg = Config::load().context("load configuration")?;
    if let Some(endpoint) = endpoint {
        cfg.endpoint = endpoint;
    }
    if let Some(uid) = datasource {
        cfg.datasource_uid = Some(uid).filter(|uid| !uid.is_empty());
    }
    Ok(cfg)
}

/// Search window for a trace: one second at `start` when the trace start
/// is known, otherwise the lookback ending now.
pub fn trace_window(
    cfg: &Config,
    start: Option<String>,
    since: Option<String>,
) -> anyhow::Result<TraceWindow> {
    if let Some(start) = start {
        let ts = parse_time_or_relative(&start)?;
        return Ok(TraceWindow::starting_at(ts));
    }
    let lookback = match since {
        Some(since) => parse_duration_str(&since)?,
        None => cfg.lookback,
    };
    Ok(TraceWindow::lookback(Utc::now(), lookback))
}

pub fn list_window(
    cfg: &Config,
    since: Option<String>,
    until: Option<String>,
) -> anyhow::Result<TraceWindow> {
    let end = match until {
        Some(until) => parse_time_or_relative(&until)?,
        None => Utc::now(),
    };
    let lookback = match since {
        Some(since) => parse_duration_str(&since)?,
        None => cfg.lookback,
    };
    Ok(TraceWindow::lookback(end, lookback))
}

pub fn open_session(
    cfg: &Config,
    trace_id: &str,
    window: TraceWindow,
) -> anyhow::Result<TraceSession<TempoClient>> {
    let trace_id = TraceId::parse(trace_id)?;
    let client = TempoClient::new(cfg).context("build tempo client")?;
    let datasource = cfg
        .datasource_uid
        .clone()
        .unwrap_or_else(|| cfg.endpoint.clone());
    Ok(TraceSession::new(
        client,
        SpanCache::new(),
        QueryKey::new(datasource, trace_id.as_str()),
        window,
    )
    .with_stale_time(cfg.stale_time))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn known_start_gives_one_second_window() {
        let cfg = Config::default();
        let window = trace_window(&cfg, Some("2026-02-01T00:00:00Z".to_string()), None).unwrap();
        assert_eq!(window.end - window.start, 1);
    }

    #[test]
    fn lookback_defaults_to_config() {
        let cfg = Config {
            lookback: Duration::from_secs(3600),
            ..Config::default()
        };
        let window = trace_window(&cfg, None, None).unwrap();
        assert_eq!(window.end - window.start, 3600);
        let window = trace_window(&cfg, None, Some("10m".to_string())).unwrap();
        assert_eq!(window.end - window.start, 600);
    }

    #[test]
    fn session_rejects_bad_trace_ids() {
        let cfg = Config::default();
        assert!(open_session(&cfg, "not-a-trace", TraceWindow::new(0, 1)).is_err());
        assert!(open_session(&cfg, "4bf92f3577b34da6a3ce929d0e0e4736", TraceWindow::new(0, 1)).is_ok());
    }
}
