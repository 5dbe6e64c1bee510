use sherlo_types::{
    ACTION_ACK_END, ACTION_ACK_REQUEST_SNAPSHOT, ACTION_ACK_SCROLL_REQUEST, ACTION_ACK_START,
    AckRequestSnapshot, AckScrollRequest, AckStart, ActionPeek, RunnerAck, Snapshot,
};

use crate::WireError;

/// Yields only the newline-terminated lines of a mailbox file.
///
/// The counterpart process may be mid-append when we read; a trailing
/// fragment without `\n` is an in-progress write and must be ignored, so
/// completeness is framed by the terminator rather than guessed at.
pub fn complete_lines(content: &str) -> impl Iterator<Item = &str> {
    let complete_len = match content.rfind('\n') {
        Some(last_newline) => last_newline + 1,
        None => 0,
    };
    content[..complete_len]
        .lines()
        .filter(|line| !line.trim().is_empty())
}

/// The last complete line of a mailbox file, if any.
pub fn last_complete_line(content: &str) -> Option<&str> {
    complete_lines(content).last()
}

/// Decodes one runner-side mailbox line into a typed acknowledgement.
pub fn decode_runner_line(line: &str) -> Result<RunnerAck, WireError> {
    let peek: ActionPeek = facet_json::from_str(line).map_err(|error| WireError::MalformedLine {
        context: "peeking action",
        detail: error.to_string(),
    })?;

    let malformed = |error: String| WireError::MalformedLine {
        context: "decoding runner ack",
        detail: error,
    };

    match peek.action.as_str() {
        ACTION_ACK_START => {
            let ack: AckStart = facet_json::from_str(line).map_err(|e| malformed(e.to_string()))?;
            Ok(RunnerAck::Start(ack))
        }
        ACTION_ACK_REQUEST_SNAPSHOT => {
            let ack: AckRequestSnapshot =
                facet_json::from_str(line).map_err(|e| malformed(e.to_string()))?;
            Ok(RunnerAck::RequestSnapshot(ack))
        }
        ACTION_ACK_SCROLL_REQUEST => {
            let ack: AckScrollRequest =
                facet_json::from_str(line).map_err(|e| malformed(e.to_string()))?;
            Ok(RunnerAck::ScrollRequest(ack))
        }
        ACTION_ACK_END => Ok(RunnerAck::End),
        other => Err(WireError::UnknownAction(other.to_string())),
    }
}

/// Scans the mailbox for the acknowledgement matching an in-flight
/// request.
///
/// Lines are scanned from the end and the scan stops at the first
/// app-side line: the newest app line is the request we just appended,
/// so anything older, including acks that satisfied earlier requests,
/// can never answer it. A runner line matches when its action is one of
/// `expected_actions` and, when the request carried a `request_id`, the
/// ack echoes the same id. Malformed lines are skipped; the poll loop
/// will see the completed line on a later tick.
pub fn find_ack(
    content: &str,
    expected_actions: &[&str],
    request_id: Option<&str>,
) -> Option<RunnerAck> {
    let lines: Vec<&str> = complete_lines(content).collect();
    for line in lines.into_iter().rev() {
        if let Ok(peek) = facet_json::from_str::<ActionPeek>(line)
            && peek.entity == Some(sherlo_types::Entity::App)
        {
            return None;
        }
        let Ok(ack) = decode_runner_line(line) else {
            continue;
        };
        if !expected_actions.contains(&ack.action()) {
            continue;
        }
        if let Some(expected_id) = request_id
            && ack.request_id().is_some_and(|id| id != expected_id)
        {
            continue;
        }
        return Some(ack);
    }
    None
}

/// Session position reconstructed from the mailbox alone.
#[derive(Debug, Clone)]
pub struct MailboxState {
    /// Snapshot the runner last told us to render.
    pub next_snapshot: Option<Snapshot>,
    /// Token of the newest acknowledged exchange. Requests mint fresh
    /// ids, so this is diagnostic, not a correlation input.
    pub request_id: String,
    /// Runner-side filter verdict from the session's `ACK_START`.
    pub filtered_view_ids: Option<Vec<String>>,
}

/// Rebuilds "where we left off" after a restart by scanning the mailbox
/// backward for the most recent `ACK_START` and any later
/// `ACK_REQUEST_SNAPSHOT`.
///
/// Returns `None` when no session was ever acknowledged, in which case
/// the caller starts a fresh session. Garbage lines are skipped, so a
/// crash mid-append cannot poison recovery.
pub fn reconstruct_last_state(content: &str) -> Option<MailboxState> {
    let mut ack_start: Option<AckStart> = None;
    let mut last_request_snapshot: Option<AckRequestSnapshot> = None;

    let lines: Vec<&str> = complete_lines(content).collect();
    for line in lines.into_iter().rev() {
        match decode_runner_line(line) {
            Ok(RunnerAck::Start(ack)) if ack_start.is_none() => {
                ack_start = Some(ack);
                break;
            }
            Ok(RunnerAck::RequestSnapshot(ack)) if last_request_snapshot.is_none() => {
                last_request_snapshot = Some(ack);
            }
            _ => continue,
        }
    }

    let ack_start = ack_start?;

    let state = match last_request_snapshot {
        Some(ack) => MailboxState {
            next_snapshot: ack.next_snapshot,
            request_id: ack.request_id,
            filtered_view_ids: ack_start.filtered_view_ids,
        },
        None => MailboxState {
            next_snapshot: ack_start.next_snapshot,
            request_id: ack_start.request_id,
            filtered_view_ids: ack_start.filtered_view_ids,
        },
    };

    Some(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sherlo_types::{RawStory, SnapshotMode, StoryParameters};

    fn snapshot(story_id: &str) -> Snapshot {
        let story = RawStory {
            id: story_id.to_string(),
            component_id: "components-button".to_string(),
            title: "components/Button".to_string(),
            name: "Primary".to_string(),
            parameters: StoryParameters::default(),
            arg_types: None,
            initial_args: None,
        };
        Snapshot::from_story(&story, SnapshotMode::DeviceHeight)
    }

    fn ack_start_line(request_id: &str, story_id: &str) -> String {
        let ack = AckStart {
            action: ACTION_ACK_START.to_string(),
            timestamp: Some(1),
            entity: Some(sherlo_types::Entity::Runner),
            request_id: request_id.to_string(),
            next_snapshot: Some(snapshot(story_id)),
            filtered_view_ids: Some(vec![format!("{story_id}-deviceHeight")]),
        };
        facet_json::to_string(&ack).expect("encode ack start")
    }

    fn ack_request_line(request_id: &str, story_id: Option<&str>) -> String {
        let ack = AckRequestSnapshot {
            action: ACTION_ACK_REQUEST_SNAPSHOT.to_string(),
            timestamp: Some(2),
            entity: Some(sherlo_types::Entity::Runner),
            request_id: request_id.to_string(),
            next_snapshot: story_id.map(snapshot),
        };
        facet_json::to_string(&ack).expect("encode ack request")
    }

    #[test]
    fn complete_lines_ignores_trailing_fragment() {
        let content = "{\"a\":1}\n{\"b\":2}\n{\"c\":";
        let lines: Vec<&str> = complete_lines(content).collect();
        assert_eq!(lines, vec!["{\"a\":1}", "{\"b\":2}"]);
        assert_eq!(last_complete_line(content), Some("{\"b\":2}"));
    }

    #[test]
    fn complete_lines_of_fragment_only_content_is_empty() {
        assert_eq!(complete_lines("{\"a\":").count(), 0);
        assert_eq!(last_complete_line(""), None);
    }

    #[test]
    fn find_ack_matches_action_and_request_id() {
        let content = format!(
            "{}\n{}\n",
            ack_start_line("req-1", "components-button--primary"),
            ack_request_line("req-2", Some("components-button--secondary")),
        );

        let ack = find_ack(&content, &[ACTION_ACK_REQUEST_SNAPSHOT], Some("req-2"))
            .expect("ack must be found");
        assert!(matches!(ack, RunnerAck::RequestSnapshot(_)));

        assert!(find_ack(&content, &[ACTION_ACK_REQUEST_SNAPSHOT], Some("req-9")).is_none());
        assert!(find_ack(&content, &[ACTION_ACK_START], Some("req-1")).is_some());
    }

    fn app_request_line(request_id: &str) -> String {
        let mut message = sherlo_types::RequestSnapshotMessage::new(request_id.to_string());
        message.timestamp = 9;
        facet_json::to_string(&message).expect("encode request")
    }

    #[test]
    fn find_ack_skips_garbage_and_older_lines() {
        let app_line = facet_json::to_string(&sherlo_types::StartMessage::new(Vec::new()))
            .expect("encode start");
        let content = format!(
            "not json at all\n{app_line}\n{}\n",
            ack_start_line("req-1", "components-button--primary"),
        );
        let ack = find_ack(&content, &[ACTION_ACK_START], None).expect("ack must be found");
        assert_eq!(ack.request_id(), Some("req-1"));
    }

    #[test]
    fn find_ack_stops_at_the_newest_app_line() {
        // A stale ack from the previous exchange sits below our freshly
        // appended request; it must not satisfy the new request.
        let content = format!(
            "{}\n{}\n",
            ack_request_line("req-1", Some("components-button--secondary")),
            app_request_line("req-2"),
        );
        assert!(find_ack(&content, &[ACTION_ACK_REQUEST_SNAPSHOT], None).is_none());
    }

    #[test]
    fn reconstruct_prefers_latest_request_snapshot_ack() {
        let content = format!(
            "{}\n{}\n{}\n",
            ack_start_line("req-1", "components-button--primary"),
            ack_request_line("req-2", Some("components-button--secondary")),
            ack_request_line("req-3", Some("components-button--tertiary")),
        );

        let state = reconstruct_last_state(&content).expect("state must reconstruct");
        assert_eq!(state.request_id, "req-3");
        assert_eq!(
            state
                .next_snapshot
                .as_ref()
                .map(|snapshot| snapshot.story_id.as_str()),
            Some("components-button--tertiary")
        );
        assert_eq!(
            state.filtered_view_ids,
            Some(vec!["components-button--primary-deviceHeight".to_string()])
        );
    }

    #[test]
    fn reconstruct_falls_back_to_ack_start() {
        let content = format!("{}\n", ack_start_line("req-1", "components-button--primary"));
        let state = reconstruct_last_state(&content).expect("state must reconstruct");
        assert_eq!(state.request_id, "req-1");
        assert_eq!(
            state
                .next_snapshot
                .as_ref()
                .map(|snapshot| snapshot.story_id.as_str()),
            Some("components-button--primary")
        );
    }

    #[test]
    fn reconstruct_without_acks_is_none() {
        assert!(reconstruct_last_state("").is_none());
        assert!(reconstruct_last_state("garbage\n").is_none());
    }

    #[test]
    fn ack_without_next_snapshot_signals_end_of_session() {
        let content = format!("{}\n", ack_request_line("req-4", None));
        let ack = find_ack(&content, &[ACTION_ACK_REQUEST_SNAPSHOT], Some("req-4"))
            .expect("ack must be found");
        let RunnerAck::RequestSnapshot(ack) = ack else {
            panic!("expected request-snapshot ack");
        };
        assert!(ack.next_snapshot.is_none());
    }
}
