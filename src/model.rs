use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

/// Operation names that are plumbing inside a tool call, not tools an
/// evaluator should expect the agent to pick.
pub const INTERNAL_TOOL_NAMES: [&str; 3] = [
    "SqlExecution",
    "SqlExecution_CortexAnalyst",
    "CortexChartToolImpl-data_to_chart",
];

pub fn is_internal_tool(name: &str) -> bool {
    INTERNAL_TOOL_NAMES.contains(&name)
}

/// Attribute columns of one span. Every field is independently optional.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventAttributes {
    pub input_query: Option<String>,
    pub agent_response: Option<String>,
    pub agent_planning: Option<String>,
    pub tool_id: Option<String>,
    pub tool_type: Option<String>,
    pub generated_sql: Option<String>,
    pub search_results: Option<Value>,
    pub custom_tool_result: Option<Value>,
    pub feedback: Option<bool>,
    pub feedback_message: Option<String>,
}

/// One observability event row, already attributed to an
/// `(agent_name, thread_id)` partition by the event source.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    pub timestamp: DateTime<Utc>,
    pub start_timestamp: Option<DateTime<Utc>>,
    pub agent_name: Option<String>,
    pub thread_id: Option<String>,
    pub correlation_key: Option<String>,
    /// Span name. Doubles as the tool name on tool spans.
    pub operation: Option<String>,
    pub attributes: EventAttributes,
}

impl RawEvent {
    /// The tool call carried by this event, if it is an evaluable tool span.
    pub fn tool_call(&self) -> Option<RawToolCall> {
        self.attributes.tool_id.as_ref()?;
        let name = self.operation.as_deref()?;
        if is_internal_tool(name) {
            return None;
        }
        Some(RawToolCall {
            tool_name: name.to_string(),
            tool_type: self.attributes.tool_type.clone(),
            tool_output: ToolOutput {
                sql: self.attributes.generated_sql.clone(),
                search_results: self.attributes.search_results.clone(),
                custom_tool_result: self.attributes.custom_tool_result.clone(),
            },
        })
    }
}

/// Tool payload. Keys that were not observed stay absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    #[serde(rename = "SQL", default, skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    #[serde(rename = "search results", default, skip_serializing_if = "Option::is_none")]
    pub search_results: Option<Value>,
    #[serde(rename = "CUSTOM_TOOL_RESULT", default, skip_serializing_if = "Option::is_none")]
    pub custom_tool_result: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolOutputKind {
    Sql,
    SearchResults,
    Custom,
}

impl FromStr for ToolOutputKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sql" => Ok(ToolOutputKind::Sql),
            "search" | "search_results" => Ok(ToolOutputKind::SearchResults),
            "custom" => Ok(ToolOutputKind::Custom),
            other => Err(format!("unknown tool output kind: {other} (expected sql, search, custom)")),
        }
    }
}

impl ToolOutput {
    pub fn from_kind(kind: ToolOutputKind, text: &str) -> Self {
        let mut out = ToolOutput::default();
        match kind {
            ToolOutputKind::Sql => out.sql = Some(text.to_string()),
            ToolOutputKind::SearchResults => out.search_results = Some(Value::String(text.into())),
            ToolOutputKind::Custom => out.custom_tool_result = Some(Value::String(text.into())),
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawToolCall {
    pub tool_name: String,
    pub tool_type: Option<String>,
    pub tool_output: ToolOutput,
}

/// Field order here is the serialized order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedToolCall {
    pub tool_sequence: u32,
    pub tool_name: String,
    #[serde(default)]
    pub tool_output: ToolOutput,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpectedTools {
    #[serde(default)]
    pub ground_truth_invocations: Vec<NormalizedToolCall>,
    #[serde(default)]
    pub ground_truth_output: Option<String>,
}

/// The unit that is stored, exported and reloaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    #[serde(rename = "INPUT_QUERY")]
    pub input_query: String,
    #[serde(rename = "EXPECTED_TOOLS")]
    pub expected_tools: ExpectedTools,
}

/// One reconstructed turn: every event sharing an effective correlation key.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub turn_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub agent_name: Option<String>,
    pub thread_id: Option<String>,
    pub input_query: Option<String>,
    pub agent_response: Option<String>,
    pub agent_planning: Option<String>,
    pub tool_invocations: Vec<RawToolCall>,
    pub user_feedback: Option<bool>,
    pub user_feedback_message: Option<String>,
}

impl Turn {
    pub fn latency_seconds(&self) -> f64 {
        (self.end_time - self.start_time).num_seconds() as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackClass {
    Positive,
    Negative,
    Any,
}

impl FeedbackClass {
    pub fn matches(self, feedback: Option<bool>) -> bool {
        match self {
            FeedbackClass::Positive => feedback == Some(true),
            FeedbackClass::Negative => feedback == Some(false),
            FeedbackClass::Any => feedback.is_some(),
        }
    }
}

impl FromStr for FeedbackClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "positive" => Ok(FeedbackClass::Positive),
            "negative" => Ok(FeedbackClass::Negative),
            "any" => Ok(FeedbackClass::Any),
            other => Err(format!("unknown feedback class: {other} (expected positive, negative, any)")),
        }
    }
}

/// Which span attribute groups events into turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationMode {
    /// `ai.observability.record_id`, unique across threads.
    #[default]
    RecordId,
    /// `parent_message_id`, only unique within a thread.
    ParentMessage,
}

impl CorrelationMode {
    pub fn attribute(self) -> &'static str {
        match self {
            CorrelationMode::RecordId => "ai.observability.record_id",
            CorrelationMode::ParentMessage => "snow.ai.observability.agent.parent_message_id",
        }
    }

    pub fn turn_id(self, thread_id: Option<&str>, key: &str) -> String {
        match self {
            CorrelationMode::RecordId => key.to_string(),
            CorrelationMode::ParentMessage => format!("{}-{key}", thread_id.unwrap_or("")),
        }
    }
}

impl FromStr for CorrelationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "record_id" => Ok(CorrelationMode::RecordId),
            "parent_message" => Ok(CorrelationMode::ParentMessage),
            other => Err(format!("unknown correlation mode: {other} (expected record_id, parent_message)")),
        }
    }
}

/// Caller-supplied filters. `agent_name`, `thread_id` and `record_id` are
/// row-level; `feedback` applies to the aggregated turn.
#[derive(Debug, Clone, Default)]
pub struct EventFilters {
    pub agent_name: Option<String>,
    pub thread_id: Option<String>,
    pub record_id: Option<String>,
    pub feedback: Option<FeedbackClass>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn tool_event(name: &str, tool_id: Option<&str>) -> RawEvent {
        RawEvent {
            timestamp: ts(10),
            start_timestamp: None,
            agent_name: Some("sales".into()),
            thread_id: Some("t1".into()),
            correlation_key: Some("r1".into()),
            operation: Some(name.into()),
            attributes: EventAttributes {
                tool_id: tool_id.map(Into::into),
                generated_sql: Some("SELECT 1".into()),
                ..Default::default()
            },
        }
    }

    #[test]
    fn tool_call_requires_tool_id() {
        assert!(tool_event("CortexAnalystTool_X", None).tool_call().is_none());
        let call = tool_event("CortexAnalystTool_X", Some("id-1")).tool_call().unwrap();
        assert_eq!(call.tool_name, "CortexAnalystTool_X");
        assert_eq!(call.tool_output.sql.as_deref(), Some("SELECT 1"));
    }

    #[test]
    fn tool_call_skips_internal_operations() {
        for name in INTERNAL_TOOL_NAMES {
            assert!(tool_event(name, Some("id-1")).tool_call().is_none(), "{name}");
        }
    }

    #[test]
    fn tool_output_omits_absent_keys() {
        let out = ToolOutput {
            sql: Some("SELECT 1".into()),
            ..Default::default()
        };
        assert_eq!(serde_json::to_value(&out).unwrap(), json!({"SQL": "SELECT 1"}));
        assert_eq!(serde_json::to_value(ToolOutput::default()).unwrap(), json!({}));
    }

    #[test]
    fn normalized_call_serializes_in_fixed_order() {
        let call = NormalizedToolCall {
            tool_sequence: 1,
            tool_name: "weather".into(),
            tool_output: ToolOutput::from_kind(ToolOutputKind::Custom, "sunny"),
        };
        let text = serde_json::to_string(&call).unwrap();
        assert_eq!(
            text,
            r#"{"tool_sequence":1,"tool_name":"weather","tool_output":{"CUSTOM_TOOL_RESULT":"sunny"}}"#
        );
    }

    #[test]
    fn record_round_trips_through_json() {
        let record = EvaluationRecord {
            input_query: "What were Q1 sales?".into(),
            expected_tools: ExpectedTools {
                ground_truth_invocations: vec![NormalizedToolCall {
                    tool_sequence: 1,
                    tool_name: "SALES_MODEL".into(),
                    tool_output: ToolOutput {
                        sql: Some("SELECT ...".into()),
                        search_results: Some(json!([{"doc": "a"}])),
                        custom_tool_result: None,
                    },
                }],
                ground_truth_output: Some("Q1 sales were $5M".into()),
            },
        };
        let text = serde_json::to_string(&record).unwrap();
        let back: EvaluationRecord = serde_json::from_str(&text).unwrap();
        assert_eq!(back, record);

        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["INPUT_QUERY"], "What were Q1 sales?");
        assert_eq!(
            value["EXPECTED_TOOLS"]["ground_truth_invocations"][0]["tool_output"]["SQL"],
            "SELECT ..."
        );
    }

    #[test]
    fn feedback_class_matching() {
        assert!(FeedbackClass::Positive.matches(Some(true)));
        assert!(!FeedbackClass::Positive.matches(Some(false)));
        assert!(FeedbackClass::Negative.matches(Some(false)));
        assert!(!FeedbackClass::Negative.matches(None));
        assert!(FeedbackClass::Any.matches(Some(false)));
        assert!(!FeedbackClass::Any.matches(None));
        assert_eq!("Positive".parse::<FeedbackClass>(), Ok(FeedbackClass::Positive));
        assert!("bogus".parse::<FeedbackClass>().is_err());
    }

    #[test]
    fn parent_message_turn_ids_are_thread_scoped() {
        assert_eq!(CorrelationMode::RecordId.turn_id(Some("t1"), "r1"), "r1");
        assert_eq!(CorrelationMode::ParentMessage.turn_id(Some("t1"), "m1"), "t1-m1");
        assert_eq!("parent-message".parse(), Ok(CorrelationMode::ParentMessage));
    }
}
