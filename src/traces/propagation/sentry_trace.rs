use lazy_static::lazy_static;
use regex::Regex;

use super::error::Error;
use crate::protocol::{SpanId, TraceId};

pub const SENTRY_TRACE_HEADER: &str = "sentry-trace";

lazy_static! {
    static ref SENTRY_TRACE_REGEX: Regex =
        Regex::new(r"^[ \t]*([0-9a-f]{32})?-?([0-9a-f]{16})?-?([01])?[ \t]*$")
            .expect("failed creating regex");
}

/// Parsed `sentry-trace` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentryTrace {
    pub trace_id: TraceId,
    pub parent_span_id: Option<SpanId>,
    pub parent_sampled: Option<bool>,
}

/// Parses `<trace_id>-<span_id>[-<sampled>]`. A header without a trace id
/// is rejected.
pub fn parse(header: &str) -> Result<SentryTrace, Error> {
    let Some(captures) = SENTRY_TRACE_REGEX.captures(header) else {
        return Err(Error::extract("invalid format", SENTRY_TRACE_HEADER));
    };

    let trace_id = captures
        .get(1)
        .and_then(|m| m.as_str().parse::<TraceId>().ok())
        .ok_or(Error::extract("missing trace id", SENTRY_TRACE_HEADER))?;
    let parent_span_id = captures
        .get(2)
        .and_then(|m| m.as_str().parse::<SpanId>().ok());
    let parent_sampled = captures.get(3).map(|m| m.as_str() == "1");

    Ok(SentryTrace {
        trace_id,
        parent_span_id,
        parent_sampled,
    })
}

#[must_use]
pub fn format(trace_id: TraceId, span_id: SpanId, sampled: Option<bool>) -> String {
    match sampled {
        Some(true) => format!("{trace_id}-{span_id}-1"),
        Some(false) => format!("{trace_id}-{span_id}-0"),
        None => format!("{trace_id}-{span_id}"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const TRACE_ID: &str = "771a43a4192642f0b136d5159a501700";
    const SPAN_ID: &str = "7c51afd529da4a2a";

    #[test]
    fn parse_full_header() {
        let parsed = parse(&format!("{TRACE_ID}-{SPAN_ID}-1")).unwrap();
        assert_eq!(parsed.trace_id.to_string(), TRACE_ID);
        assert_eq!(parsed.parent_span_id.unwrap().to_string(), SPAN_ID);
        assert_eq!(parsed.parent_sampled, Some(true));
    }

    #[test]
    fn parse_without_sampled_flag() {
        let parsed = parse(&format!("  {TRACE_ID}-{SPAN_ID}\t")).unwrap();
        assert_eq!(parsed.parent_sampled, None);
        let parsed = parse(&format!("{TRACE_ID}-{SPAN_ID}-0")).unwrap();
        assert_eq!(parsed.parent_sampled, Some(false));
    }

    #[test]
    fn parse_trace_id_only() {
        let parsed = parse(TRACE_ID).unwrap();
        assert_eq!(parsed.parent_span_id, None);
    }

    #[test]
    fn reject_invalid_headers() {
        assert!(parse("").is_err());
        assert!(parse(&format!("-{SPAN_ID}-1")).is_err());
        assert!(parse("not a trace").is_err());
        assert!(parse(&TRACE_ID.to_uppercase()).is_err());
    }

    #[test]
    fn format_round_trips() {
        let trace_id: TraceId = TRACE_ID.parse().unwrap();
        let span_id: SpanId = SPAN_ID.parse().unwrap();
        let header = format(trace_id, span_id, Some(false));
        assert_eq!(header, format!("{TRACE_ID}-{SPAN_ID}-0"));
        assert_eq!(parse(&header).unwrap().parent_sampled, Some(false));
        assert_eq!(format(trace_id, span_id, None), format!("{TRACE_ID}-{SPAN_ID}"));
    }
}
