use crate::EvalsetError;
use crate::model::{
    EvaluationRecord, ExpectedTools, NormalizedToolCall, ToolOutput, ToolOutputKind, Turn,
};
use crate::text::normalize_text;
use crate::tools::normalize_tool_calls;
use std::collections::HashSet;
use std::str::FromStr;

/// Build evaluation records from correlated turns.
///
/// Turns are taken in start-time order. The first turn for each
/// `(agent_name, input_query)` pair wins; turns whose normalized input is
/// missing or empty are dropped.
pub fn assemble(turns: &[Turn]) -> Vec<EvaluationRecord> {
    let mut ordered: Vec<&Turn> = turns.iter().collect();
    ordered.sort_by_key(|t| t.start_time);

    let mut seen: HashSet<(Option<String>, Option<String>)> = HashSet::new();
    let mut records = Vec::new();
    let mut duplicates = 0usize;
    let mut empty = 0usize;

    for turn in ordered {
        let input_query = normalize_text(turn.input_query.as_deref());
        let agent_response = normalize_text(turn.agent_response.as_deref());

        if !seen.insert((turn.agent_name.clone(), input_query.clone())) {
            duplicates += 1;
            continue;
        }

        let input_query = match input_query {
            Some(q) if !q.is_empty() => q,
            _ => {
                empty += 1;
                continue;
            }
        };

        records.push(EvaluationRecord {
            input_query,
            expected_tools: ExpectedTools {
                ground_truth_invocations: normalize_tool_calls(&turn.tool_invocations),
                ground_truth_output: agent_response,
            },
        });
    }

    log::debug!(
        "assemble: {} turns -> {} records ({duplicates} duplicate, {empty} without input)",
        turns.len(),
        records.len()
    );
    records
}

/// A tool invocation typed in by hand.
#[derive(Debug, Clone, PartialEq)]
pub struct ManualTool {
    pub name: String,
    pub output: ToolOutput,
}

/// Parses `KIND:NAME=OUTPUT`, e.g. `sql:SALES_MODEL=SELECT 1`.
impl FromStr for ManualTool {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, rest) = s
            .split_once(':')
            .ok_or_else(|| format!("expected KIND:NAME=OUTPUT, got {s:?}"))?;
        let kind: ToolOutputKind = kind.trim().parse()?;
        let (name, output) = rest.split_once('=').unwrap_or((rest, ""));
        let name = name.trim();
        if name.is_empty() {
            return Err(format!("missing tool name in {s:?}"));
        }
        Ok(ManualTool {
            name: name.to_string(),
            output: ToolOutput::from_kind(kind, output),
        })
    }
}

/// Build a record from user-supplied values. Both texts must be non-empty;
/// tools are numbered in the order given, skipping unnamed ones.
pub fn manual_record(
    input_query: &str,
    agent_response: &str,
    tools: &[ManualTool],
) -> Result<EvaluationRecord, EvalsetError> {
    let input_query = input_query.trim();
    let agent_response = agent_response.trim();
    if input_query.is_empty() {
        return Err(EvalsetError::Validation("input query must not be empty".into()));
    }
    if agent_response.is_empty() {
        return Err(EvalsetError::Validation("agent response must not be empty".into()));
    }

    Ok(EvaluationRecord {
        input_query: input_query.to_string(),
        expected_tools: ExpectedTools {
            ground_truth_invocations: number_manual_tools(tools),
            ground_truth_output: Some(agent_response.to_string()),
        },
    })
}

/// Dense 1-based sequence over the named tools, in the order given.
pub fn number_manual_tools(tools: &[ManualTool]) -> Vec<NormalizedToolCall> {
    tools
        .iter()
        .filter(|t| !t.name.trim().is_empty())
        .enumerate()
        .map(|(idx, t)| NormalizedToolCall {
            tool_sequence: idx as u32 + 1,
            tool_name: t.name.trim().to_string(),
            tool_output: t.output.clone(),
        })
        .collect()
}
