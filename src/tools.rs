use crate::model::{NormalizedToolCall, RawToolCall, is_internal_tool};

/// How a tool's display name is rewritten when it carries a given prefix.
enum Rename {
    StripPrefix,
    Replace(&'static str),
}

/// First matching prefix wins.
const RENAME_RULES: [(&str, Rename); 3] = [
    ("CortexAnalystTool_", Rename::StripPrefix),
    ("CortexSearchService_", Rename::Replace("cortex_search")),
    ("ToolCall-", Rename::StripPrefix),
];

/// Evaluator-facing name for a telemetry tool name.
pub fn canonical_tool_name(name: &str) -> String {
    for (prefix, rule) in &RENAME_RULES {
        if let Some(rest) = name.strip_prefix(prefix) {
            return match rule {
                Rename::StripPrefix => rest.to_string(),
                Rename::Replace(literal) => (*literal).to_string(),
            };
        }
    }
    name.to_string()
}

/// Drop internal tools, number the survivors densely from 1 and
/// canonicalize their names. Tool type is not carried over.
pub fn normalize_tool_calls(calls: &[RawToolCall]) -> Vec<NormalizedToolCall> {
    calls
        .iter()
        .filter(|call| !is_internal_tool(&call.tool_name))
        .enumerate()
        .map(|(idx, call)| NormalizedToolCall {
            tool_sequence: idx as u32 + 1,
            tool_name: canonical_tool_name(&call.tool_name),
            tool_output: call.tool_output.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ToolOutput;

    fn call(name: &str) -> RawToolCall {
        RawToolCall {
            tool_name: name.into(),
            tool_type: Some("cortex_analyst_text_to_sql".into()),
            tool_output: ToolOutput::default(),
        }
    }

    #[test]
    fn canonical_names() {
        assert_eq!(canonical_tool_name("CortexAnalystTool_SALES_MODEL"), "SALES_MODEL");
        assert_eq!(canonical_tool_name("CortexSearchService_docs"), "cortex_search");
        assert_eq!(canonical_tool_name("ToolCall-weather"), "weather");
        assert_eq!(canonical_tool_name("other_tool"), "other_tool");
    }

    #[test]
    fn only_first_prefix_is_stripped() {
        assert_eq!(canonical_tool_name("ToolCall-ToolCall-x"), "ToolCall-x");
        assert_eq!(canonical_tool_name("CortexAnalystTool_ToolCall-x"), "ToolCall-x");
    }

    #[test]
    fn internal_tools_dropped_and_sequence_dense() {
        let out = normalize_tool_calls(&[
            call("SqlExecution"),
            call("ToolCall-foo"),
            call("CortexSearchService_bar"),
        ]);
        let pairs: Vec<_> = out
            .iter()
            .map(|c| (c.tool_sequence, c.tool_name.as_str()))
            .collect();
        assert_eq!(pairs, vec![(1, "foo"), (2, "cortex_search")]);
    }

    #[test]
    fn renormalizing_keeps_sequence() {
        let first = normalize_tool_calls(&[call("ToolCall-a"), call("SqlExecution_CortexAnalyst"), call("b")]);
        let again: Vec<RawToolCall> = first
            .iter()
            .map(|c| RawToolCall {
                tool_name: c.tool_name.clone(),
                tool_type: None,
                tool_output: c.tool_output.clone(),
            })
            .collect();
        assert_eq!(normalize_tool_calls(&again), first);
    }

    #[test]
    fn empty_input() {
        assert!(normalize_tool_calls(&[]).is_empty());
    }
}
