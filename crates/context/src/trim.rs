//! Token-budget trimming.
//!
//! Three trimmable layers are cut in a fixed priority order by one shared
//! loop. Each layer has a floor (items that always survive) and a removal
//! end:
//!
//! | Layer | Removed from | Floor |
//! |-------|--------------|-------|
//! | code snippets | back (least relevant) | 1 |
//! | conversation history | front (oldest) | 3 |
//! | long-term memories | back (least relevant) | 0 |
//!
//! Current-file content and project rules are never trimmed, so a context
//! can stay over budget when those alone exceed it.

use modelgate_core::context::{Context, estimate_tokens};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A trimmable part of a [`Context`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    CodeSnippets,
    ConversationHistory,
    LongTermMemories,
}

impl Layer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::CodeSnippets => "code_snippets",
            Layer::ConversationHistory => "conversation_history",
            Layer::LongTermMemories => "long_term_memories",
        }
    }

    fn len(&self, context: &Context) -> usize {
        match self {
            Layer::CodeSnippets => context.code_snippets.len(),
            Layer::ConversationHistory => context.conversation_history.len(),
            Layer::LongTermMemories => context.long_term_memories.len(),
        }
    }

    /// Remove one item from `end`; returns its estimated tokens.
    fn remove(&self, context: &mut Context, end: End) -> usize {
        fn take<T>(items: &mut Vec<T>, end: End) -> Option<T> {
            match end {
                End::Front if !items.is_empty() => Some(items.remove(0)),
                End::Front => None,
                End::Back => items.pop(),
            }
        }

        let removed = match self {
            Layer::CodeSnippets => take(&mut context.code_snippets, end)
                .map(|s| estimate_tokens(&s.content)),
            Layer::ConversationHistory => take(&mut context.conversation_history, end)
                .map(|m| estimate_tokens(&m.content)),
            Layer::LongTermMemories => take(&mut context.long_term_memories, end)
                .map(|m| estimate_tokens(&m.content)),
        };
        removed.unwrap_or(0)
    }
}

/// Which end of a layer loses items first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum End {
    Front,
    Back,
}

/// One entry of the trimming priority order.
#[derive(Debug, Clone, Copy)]
pub struct TrimStep {
    pub layer: Layer,
    pub end: End,
    /// Items that are never removed.
    pub floor: usize,
}

/// Priority order: snippets, then history, then memories.
pub const TRIM_ORDER: [TrimStep; 3] = [
    TrimStep {
        layer: Layer::CodeSnippets,
        end: End::Back,
        floor: 1,
    },
    TrimStep {
        layer: Layer::ConversationHistory,
        end: End::Front,
        floor: 3,
    },
    TrimStep {
        layer: Layer::LongTermMemories,
        end: End::Back,
        floor: 0,
    },
];

/// Items dropped from one layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropInfo {
    pub layer: Layer,
    pub items_dropped: usize,
    pub tokens_dropped: usize,
}

/// Outcome of a trimming pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrimReport {
    pub budget: usize,
    pub tokens_before: usize,
    pub tokens_after: usize,
    pub drops: Vec<DropInfo>,
}

impl TrimReport {
    pub fn within_budget(&self) -> bool {
        self.tokens_after <= self.budget
    }

    pub fn items_dropped(&self) -> usize {
        self.drops.iter().map(|d| d.items_dropped).sum()
    }
}

/// Trim `context` until it fits `budget` or every layer is at its floor.
pub fn trim_to_budget(context: &mut Context, budget: usize) -> TrimReport {
    trim_with(context, budget, &TRIM_ORDER)
}

/// Shared trimming loop over an explicit priority order.
pub fn trim_with(context: &mut Context, budget: usize, order: &[TrimStep]) -> TrimReport {
    let tokens_before = context.estimated_tokens();
    let mut estimated = tokens_before;
    let mut drops = Vec::new();

    for step in order {
        if estimated <= budget {
            break;
        }

        let mut items_dropped = 0;
        let mut tokens_dropped = 0;
        while estimated > budget && step.layer.len(context) > step.floor {
            tokens_dropped += step.layer.remove(context, step.end);
            items_dropped += 1;
            estimated = context.estimated_tokens();
        }

        if items_dropped > 0 {
            debug!(
                layer = step.layer.as_str(),
                items_dropped,
                tokens_dropped,
                remaining = step.layer.len(context),
                "Trimmed context layer"
            );
            drops.push(DropInfo {
                layer: step.layer,
                items_dropped,
                tokens_dropped,
            });
        }
    }

    TrimReport {
        budget,
        tokens_before,
        tokens_after: estimated,
        drops,
    }
}
