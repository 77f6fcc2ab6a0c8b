//! TraceQL queries issued while walking a trace.

/// Default listing query matching every trace.
pub const MATCH_ALL: &str = "{}";

fn name_selection(with_child_count: bool) -> &'static str {
    if with_child_count {
        "span:name, childCount"
    } else {
        "span:name"
    }
}

pub fn root_spans(trace_id: &str, with_child_count: bool) -> String {
    format!(
        "{{ trace:id = \"{trace_id}\" && nestedSetParent = -1 }} | select ({})",
        name_selection(with_child_count)
    )
}

pub fn child_spans(trace_id: &str, parent_span_id: &str, with_child_count: bool) -> String {
    format!(
        "{{ trace:id = \"{trace_id}\" && span:parentID = \"{parent_span_id}\" }} | select (span:parentID, {})",
        name_selection(with_child_count)
    )
}

pub fn has_children(trace_id: &str, span_id: &str) -> String {
    format!("{{ trace:id = \"{trace_id}\" && span:parentID = \"{span_id}\" }} | count() > 0")
}

/// Matches one span, selecting `tags` from the span scope when given.
pub fn span_by_id(trace_id: &str, span_id: &str, tags: &[String]) -> String {
    let filter = format!("{{ trace:id = \"{trace_id}\" && span:id = \"{span_id}\" }}");
    if tags.is_empty() {
        return filter;
    }
    let selection = tags
        .iter()
        .map(|tag| format!("span.{tag}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{filter} | select ({selection})")
}
