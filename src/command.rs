//! Parsing of textual alarm requests into structured operations.
//!
//! Recognized forms:
//!
//! ```text
//! Start_Alarm(12): Group(3) 45 message text
//! Change_Alarm(12): Group(3) 45 message text
//! Cancel_Alarm(12)
//! Suspend_Alarm(12)
//! Reactivate_Alarm(12)
//! View_Alarms
//! ```
//!
//! Numbers parse as signed integers so that validation, not the parser,
//! rejects negative values as invalid arguments.

use crate::alarm::AlarmRequest;

/// A structured request from the command surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Start(AlarmRequest),
    Change(AlarmRequest),
    Cancel(i64),
    Suspend(i64),
    Reactivate(i64),
    View,
}

/// Malformed request text. The request is discarded without side effects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError;

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid request format, request discarded")
    }
}

/// Parse one input line into a request.
pub fn parse_request(input: &str) -> Result<Request, ParseError> {
    let input = input.trim();

    if input == "View_Alarms" {
        return Ok(Request::View);
    }
    if let Some(rest) = input.strip_prefix("Start_Alarm(") {
        return parse_alarm_body(rest).map(Request::Start);
    }
    if let Some(rest) = input.strip_prefix("Change_Alarm(") {
        return parse_alarm_body(rest).map(Request::Change);
    }
    if let Some(rest) = input.strip_prefix("Cancel_Alarm(") {
        return parse_bare_id(rest).map(Request::Cancel);
    }
    if let Some(rest) = input.strip_prefix("Suspend_Alarm(") {
        return parse_bare_id(rest).map(Request::Suspend);
    }
    if let Some(rest) = input.strip_prefix("Reactivate_Alarm(") {
        return parse_bare_id(rest).map(Request::Reactivate);
    }

    Err(ParseError)
}

/// Parse `<id>): Group(<gid>) <secs> <message...>`.
fn parse_alarm_body(rest: &str) -> Result<AlarmRequest, ParseError> {
    let (id_text, rest) = rest.split_once(')').ok_or(ParseError)?;
    let id: i64 = id_text.trim().parse().map_err(|_| ParseError)?;

    let rest = rest.strip_prefix(':').ok_or(ParseError)?;
    let rest = rest.trim_start();
    let rest = rest.strip_prefix("Group(").ok_or(ParseError)?;
    let (group_text, rest) = rest.split_once(')').ok_or(ParseError)?;
    let group_id: i64 = group_text.trim().parse().map_err(|_| ParseError)?;

    let rest = rest.trim_start();
    let (interval_text, message) = rest.split_once(' ').ok_or(ParseError)?;
    let interval_seconds: i64 = interval_text.parse().map_err(|_| ParseError)?;

    let message = message.trim();
    if message.is_empty() {
        return Err(ParseError);
    }

    Ok(AlarmRequest {
        id,
        group_id,
        interval_seconds,
        message: message.to_owned(),
    })
}

/// Parse `<id>)` with nothing meaningful after the closing paren.
fn parse_bare_id(rest: &str) -> Result<i64, ParseError> {
    let (id_text, tail) = rest.split_once(')').ok_or(ParseError)?;
    if !tail.trim().is_empty() {
        return Err(ParseError);
    }
    id_text.trim().parse().map_err(|_| ParseError)
}
