use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use owo_colors::OwoColorize;
use serde_json::Value;
use waterfall_core::model::{ChildStatus, SpanInfo};
use waterfall_core::query::TraceSummary;

use crate::protocol::RowsView;

const BAR_WIDTH: usize = 40;

pub fn print_rows_human(trace_id: &str, view: &RowsView, color: bool) {
    let (min_start, max_end) = view
        .rows
        .iter()
        .map(|r| (r.span.start_time_unix_nano, r.span.end_time_unix_nano))
        .fold((u64::MAX, 0u64), |(lo, hi), (s, e)| (lo.min(s), hi.max(e)));
    let duration_ms = if max_end > min_start {
        (max_end - min_start) as f64 / 1_000_000.0
    } else {
        0.0
    };
    println!(
        "TRACE {trace_id} duration={duration_ms:.1}ms spans={} visible={}",
        view.total,
        view.rows.len()
    );

    let name_width = view
        .rows
        .iter()
        .map(|r| r.span.level as usize * 2 + r.span.name.len() + 2)
        .max()
        .unwrap_or(0);
    for row in &view.rows {
        let span = &row.span;
        let label = format!(
            "{}{} {}",
            "  ".repeat(span.level as usize),
            status_marker(span.child_status),
            span.name
        );
        let bar = timeline_bar(span, min_start, max_end, BAR_WIDTH);
        let bar = if color {
            bar.cyan().to_string()
        } else {
            bar
        };
        println!(
            "{label:<name_width$} {:>10.2}ms |{bar}| {}",
            span.duration_ms(),
            span.span_id
        );
    }
}

pub fn print_traces_human(traces: &[TraceSummary]) {
    for trace in traces {
        let start = trace
            .start_time_unix_nano
            .map(|ns| DateTime::<Utc>::from_timestamp_nanos(ns as i64))
            .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Millis, true))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "trace={} start={} duration={}ms service={} root=\"{}\"",
            trace.trace_id,
            start,
            trace.duration_ms.unwrap_or_default(),
            trace.root_service_name.as_deref().unwrap_or("-"),
            trace.root_trace_name.as_deref().unwrap_or("")
        );
    }
    println!("-- {} traces --", traces.len());
}

pub fn print_details_human(span_id: &str, attributes: &BTreeMap<String, Value>) {
    println!("SPAN {span_id} attributes={}", attributes.len());
    for (key, value) in attributes {
        match value {
            Value::String(s) => println!("{key}={s}"),
            other => println!("{key}={other}"),
        }
    }
}

pub fn status_marker(status: ChildStatus) -> &'static str {
    match status {
        ChildStatus::NoChildren => " ",
        ChildStatus::RemoteChildren => "+",
        ChildStatus::LoadingChildren => "~",
        ChildStatus::ShowChildren => "v",
        ChildStatus::HideChildren => ">",
    }
}

/// Span position on a `width`-cell timeline spanning `[min_start, max_end]`.
/// Every span gets at least one cell.
pub fn timeline_bar(span: &SpanInfo, min_start: u64, max_end: u64, width: usize) -> String {
    let total = max_end.saturating_sub(min_start).max(1) as f64;
    let offset = span.start_time_unix_nano.saturating_sub(min_start) as f64 / total;
    let length = span.duration_nanos() as f64 / total;

    let begin = ((offset * width as f64).floor() as usize).min(width.saturating_sub(1));
    let cells = ((length * width as f64).round() as usize).clamp(1, width - begin);

    let mut bar = String::with_capacity(width);
    bar.push_str(&" ".repeat(begin));
    bar.push_str(&"=".repeat(cells));
    bar.push_str(&" ".repeat(width - begin - cells));
    bar
}
