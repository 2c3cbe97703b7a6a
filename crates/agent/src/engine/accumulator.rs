//! Reassembly of streamed tool calls.
//!
//! The model streams each tool call as fragments keyed by position, and any
//! field may arrive split across fragments (ids included). Fragments are
//! concatenated per index and only parsed once the model ends its turn.

use ragstream_core::message::MessageToolCall;
use ragstream_core::provider::ToolCallDelta;
use std::collections::BTreeMap;
use tracing::warn;

/// One call under construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallFragment {
    pub index: usize,
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl ToolCallFragment {
    fn apply(&mut self, delta: &ToolCallDelta) {
        if let Some(id) = &delta.id {
            self.id.push_str(id);
        }
        if let Some(name) = &delta.name {
            self.name.push_str(name);
        }
        if let Some(arguments) = &delta.arguments {
            self.arguments.push_str(arguments);
        }
    }
}

/// A finished call with its arguments parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledCall {
    pub id: String,
    pub name: String,
    /// Always a JSON object; `{}` when the model's arguments didn't parse.
    pub arguments: serde_json::Value,
    /// The model's arguments text was not a JSON object.
    pub malformed: bool,
}

impl AssembledCall {
    /// The call as echoed back to the model in the transcript.
    pub fn to_message_call(&self) -> MessageToolCall {
        MessageToolCall {
            id: self.id.clone(),
            name: self.name.clone(),
            arguments: self.arguments.to_string(),
        }
    }
}

/// Per-round fragment accumulator.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    fragments: BTreeMap<usize, ToolCallFragment>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, delta: &ToolCallDelta) {
        self.fragments
            .entry(delta.index)
            .or_insert_with(|| ToolCallFragment {
                index: delta.index,
                ..ToolCallFragment::default()
            })
            .apply(delta);
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Freeze and parse, in index order.
    pub fn finish(self) -> Vec<AssembledCall> {
        self.fragments.into_values().map(assemble).collect()
    }
}

fn assemble(fragment: ToolCallFragment) -> AssembledCall {
    let id = if fragment.id.is_empty() {
        format!("call_{}", uuid::Uuid::new_v4().simple())
    } else {
        fragment.id
    };

    let raw = fragment.arguments.trim();
    let (arguments, malformed) = if raw.is_empty() {
        (serde_json::Value::Object(Default::default()), false)
    } else {
        match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(value @ serde_json::Value::Object(_)) => (value, false),
            Ok(other) => {
                warn!(tool = %fragment.name, arguments = %other, "Tool arguments are not an object, using {{}}");
                (serde_json::Value::Object(Default::default()), true)
            }
            Err(e) => {
                warn!(tool = %fragment.name, error = %e, "Malformed tool arguments, using {{}}");
                (serde_json::Value::Object(Default::default()), true)
            }
        }
    };

    AssembledCall {
        id,
        name: fragment.name,
        arguments,
        malformed,
    }
}
