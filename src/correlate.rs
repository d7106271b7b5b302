use crate::model::{CorrelationMode, FeedbackClass, RawEvent, Turn};
use std::collections::HashMap;

/// Order events within each `(agent_name, thread_id)` partition by
/// timestamp, start timestamp as tie-breaker. The sort is stable.
pub fn sort_partitions(events: &mut [RawEvent]) {
    events.sort_by(|a, b| {
        (&a.agent_name, &a.thread_id, a.timestamp, a.start_timestamp).cmp(&(
            &b.agent_name,
            &b.thread_id,
            b.timestamp,
            b.start_timestamp,
        ))
    });
}

/// Replace each missing correlation key with the last key seen earlier in
/// the same partition. Expects `sort_partitions` order. Events with no
/// earlier key keep `None`.
pub fn forward_fill(events: &mut [RawEvent]) {
    let mut partition: Option<(Option<String>, Option<String>)> = None;
    let mut carried: Option<String> = None;

    for event in events.iter_mut() {
        let current = (event.agent_name.clone(), event.thread_id.clone());
        if partition.as_ref() != Some(&current) {
            partition = Some(current);
            carried = None;
        }
        match &event.correlation_key {
            Some(key) => carried = Some(key.clone()),
            None => event.correlation_key = carried.clone(),
        }
    }
}

/// Group events into turns, one per effective correlation key, ordered by
/// earliest start time. Events without an effective key are dropped.
pub fn correlate(mut events: Vec<RawEvent>, mode: CorrelationMode) -> Vec<Turn> {
    sort_partitions(&mut events);
    forward_fill(&mut events);

    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<(String, Vec<RawEvent>)> = Vec::new();
    let mut unkeyed = 0usize;

    for event in events {
        let Some(key) = event.correlation_key.as_deref() else {
            unkeyed += 1;
            continue;
        };
        let turn_id = mode.turn_id(event.thread_id.as_deref(), key);
        match index.get(&turn_id) {
            Some(&i) => groups[i].1.push(event),
            None => {
                index.insert(turn_id.clone(), groups.len());
                groups.push((turn_id, vec![event]));
            }
        }
    }

    if unkeyed > 0 {
        log::debug!("correlate: {unkeyed} events had no inferable correlation key");
    }

    let mut turns: Vec<Turn> = groups
        .into_iter()
        .map(|(turn_id, group)| aggregate(turn_id, group))
        .collect();
    turns.sort_by(|a, b| (a.start_time, &a.turn_id).cmp(&(b.start_time, &b.turn_id)));
    turns
}

fn aggregate(turn_id: String, mut group: Vec<RawEvent>) -> Turn {
    group.sort_by(|a, b| (a.timestamp, a.start_timestamp).cmp(&(b.timestamp, b.start_timestamp)));

    let first = &group[0];
    let mut turn = Turn {
        turn_id,
        start_time: first.timestamp,
        end_time: first.timestamp,
        agent_name: None,
        thread_id: None,
        input_query: None,
        agent_response: None,
        agent_planning: None,
        tool_invocations: Vec::new(),
        user_feedback: None,
        user_feedback_message: None,
    };

    for event in &group {
        turn.start_time = turn.start_time.min(event.timestamp);
        turn.end_time = turn.end_time.max(event.timestamp);

        let attrs = &event.attributes;
        first_some(&mut turn.agent_name, &event.agent_name);
        first_some(&mut turn.thread_id, &event.thread_id);
        first_some(&mut turn.input_query, &attrs.input_query);
        first_some(&mut turn.agent_response, &attrs.agent_response);
        first_some(&mut turn.agent_planning, &attrs.agent_planning);
        first_some(&mut turn.user_feedback_message, &attrs.feedback_message);
        if turn.user_feedback.is_none() {
            turn.user_feedback = attrs.feedback;
        }

        if let Some(call) = event.tool_call() {
            turn.tool_invocations.push(call);
        }
    }

    turn
}

fn first_some(slot: &mut Option<String>, value: &Option<String>) {
    if slot.is_none() {
        slot.clone_from(value);
    }
}

/// Post-aggregation feedback filter.
pub fn filter_by_feedback(turns: Vec<Turn>, class: Option<FeedbackClass>) -> Vec<Turn> {
    match class {
        None => turns,
        Some(class) => turns
            .into_iter()
            .filter(|t| class.matches(t.user_feedback))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EventAttributes;
    use chrono::{DateTime, Utc};

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn event(t: i64, thread: &str, key: Option<&str>) -> RawEvent {
        RawEvent {
            timestamp: ts(t),
            start_timestamp: None,
            agent_name: Some("sales".into()),
            thread_id: Some(thread.into()),
            correlation_key: key.map(Into::into),
            operation: None,
            attributes: EventAttributes::default(),
        }
    }

    fn tool(mut e: RawEvent, name: &str) -> RawEvent {
        e.operation = Some(name.into());
        e.attributes.tool_id = Some(format!("id-{name}"));
        e
    }

    #[test]
    fn forward_fill_carries_last_key() {
        let mut events = vec![
            event(3, "t1", Some("B")),
            event(1, "t1", Some("A")),
            event(2, "t1", None),
        ];
        sort_partitions(&mut events);
        forward_fill(&mut events);
        let keys: Vec<_> = events.iter().map(|e| e.correlation_key.as_deref()).collect();
        assert_eq!(keys, vec![Some("A"), Some("A"), Some("B")]);
    }

    #[test]
    fn forward_fill_does_not_cross_partitions() {
        let mut events = vec![event(1, "t1", Some("A")), event(2, "t2", None)];
        sort_partitions(&mut events);
        forward_fill(&mut events);
        assert_eq!(events[1].correlation_key, None);
    }

    #[test]
    fn start_timestamp_breaks_ties() {
        let mut a = event(1, "t1", Some("A"));
        a.start_timestamp = Some(ts(5));
        let mut b = event(1, "t1", Some("B"));
        b.start_timestamp = Some(ts(4));
        let mut events = vec![a, b];
        sort_partitions(&mut events);
        assert_eq!(events[0].correlation_key.as_deref(), Some("B"));
    }

    #[test]
    fn unkeyed_leading_events_are_excluded() {
        let mut lonely = event(0, "t1", None);
        lonely.attributes.input_query = Some("orphan".into());
        let mut keyed = event(1, "t1", Some("A"));
        keyed.attributes.input_query = Some("hello".into());
        let turns = correlate(vec![lonely, keyed], CorrelationMode::RecordId);
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].input_query.as_deref(), Some("hello"));
    }

    #[test]
    fn aggregates_first_values_and_ordered_tools() {
        let mut input = event(1, "t1", Some("A"));
        input.attributes.input_query = Some("q".into());
        let mut feedback = event(6, "t1", None);
        feedback.attributes.feedback = Some(false);
        feedback.attributes.feedback_message = Some("wrong".into());
        let mut response = event(5, "t1", None);
        response.attributes.agent_response = Some("first".into());
        let mut late = event(7, "t1", None);
        late.attributes.agent_response = Some("second".into());

        let turns = correlate(
            vec![
                late,
                tool(event(3, "t1", None), "ToolCall-b"),
                feedback,
                tool(event(4, "t1", None), "SqlExecution"),
                input,
                tool(event(2, "t1", None), "ToolCall-a"),
                response,
            ],
            CorrelationMode::RecordId,
        );

        assert_eq!(turns.len(), 1);
        let turn = &turns[0];
        assert_eq!(turn.turn_id, "A");
        assert_eq!(turn.agent_name.as_deref(), Some("sales"));
        assert_eq!(turn.input_query.as_deref(), Some("q"));
        assert_eq!(turn.agent_response.as_deref(), Some("first"));
        assert_eq!(turn.user_feedback, Some(false));
        assert_eq!(turn.user_feedback_message.as_deref(), Some("wrong"));
        assert_eq!(turn.latency_seconds(), 6.0);
        let names: Vec<_> = turn.tool_invocations.iter().map(|c| c.tool_name.as_str()).collect();
        assert_eq!(names, vec!["ToolCall-a", "ToolCall-b"]);
    }

    #[test]
    fn turns_ordered_by_start_time() {
        let turns = correlate(
            vec![
                event(10, "t2", Some("late")),
                event(1, "t1", Some("early")),
                event(5, "t1", Some("middle")),
            ],
            CorrelationMode::RecordId,
        );
        let ids: Vec<_> = turns.iter().map(|t| t.turn_id.as_str()).collect();
        assert_eq!(ids, vec!["early", "middle", "late"]);
    }

    #[test]
    fn parent_message_mode_scopes_keys_to_thread() {
        let turns = correlate(
            vec![event(1, "t1", Some("m1")), event(2, "t2", Some("m1"))],
            CorrelationMode::ParentMessage,
        );
        let ids: Vec<_> = turns.iter().map(|t| t.turn_id.as_str()).collect();
        assert_eq!(ids, vec!["t1-m1", "t2-m1"]);

        let merged = correlate(
            vec![event(1, "t1", Some("m1")), event(2, "t2", Some("m1"))],
            CorrelationMode::RecordId,
        );
        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn feedback_filter_runs_on_aggregates() {
        let mut positive = event(1, "t1", Some("A"));
        positive.attributes.feedback = Some(true);
        let neutral = event(2, "t1", Some("B"));
        let mut negative_later = event(3, "t1", None);
        negative_later.attributes.feedback = Some(false);
        let turns = correlate(vec![positive, neutral, negative_later], CorrelationMode::RecordId);

        let pos = filter_by_feedback(turns.clone(), Some(FeedbackClass::Positive));
        assert_eq!(pos.len(), 1);
        assert_eq!(pos[0].turn_id, "A");

        let neg = filter_by_feedback(turns.clone(), Some(FeedbackClass::Negative));
        assert_eq!(neg.len(), 1);
        assert_eq!(neg[0].turn_id, "B");

        assert_eq!(filter_by_feedback(turns.clone(), Some(FeedbackClass::Any)).len(), 2);
        assert_eq!(filter_by_feedback(turns, None).len(), 2);
    }
}
