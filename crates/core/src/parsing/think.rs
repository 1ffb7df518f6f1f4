// crates/core/src/parsing/think.rs
//! Think-tag handling: the one tag convention every provider's output is
//! normalized into before anything downstream looks at it.

const OPEN_TAG: &str = "<think>";
const CLOSE_TAG: &str = "</think>";

/// Wrapper tags the sanitizer knows how to unwrap, in addition to code
/// fences. Order matters only for readability; every pass tries all of them.
const WRAPPER_TAGS: [&str; 5] = [
    "think",
    "reasoning",
    "reasoning_content",
    "reasoning_trace",
    "tool_call",
];

/// Upper bound on sanitizer passes. High enough that any realistic (even
/// adversarial) nesting fully unwraps, fixed so termination never depends
/// on input shape.
const MAX_SANITIZE_PASSES: usize = 128;

/// Result of splitting text on the first `<think>...</think>` span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThinkSplit {
    pub reasoning: String,
    pub answer: String,
    pub has_think_tags: bool,
}

/// Split text into reasoning and answer on the first think span.
///
/// - `<think>R</think>A` → reasoning `R`, answer `A` (both trimmed)
/// - no tag → entire text is the answer
/// - open tag without a close (mid-stream) → everything after the open tag
///   is reasoning, anything before it is answer
pub fn split_think_tags(text: &str) -> ThinkSplit {
    let Some(open) = text.find(OPEN_TAG) else {
        return ThinkSplit {
            reasoning: String::new(),
            answer: text.trim().to_string(),
            has_think_tags: false,
        };
    };

    let after_open = &text[open + OPEN_TAG.len()..];
    let prefix = &text[..open];

    match after_open.find(CLOSE_TAG) {
        Some(close) => {
            let reasoning = &after_open[..close];
            let suffix = &after_open[close + CLOSE_TAG.len()..];
            let mut answer = String::with_capacity(prefix.len() + suffix.len());
            answer.push_str(prefix);
            answer.push_str(suffix);
            ThinkSplit {
                reasoning: reasoning.trim().to_string(),
                answer: answer.trim().to_string(),
                has_think_tags: true,
            }
        }
        None => ThinkSplit {
            reasoning: after_open.trim().to_string(),
            answer: prefix.trim().to_string(),
            has_think_tags: true,
        },
    }
}

/// Re-wrap reasoning and answer into the canonical tag structure.
/// Empty reasoning produces the bare answer.
pub fn combine_reasoning(reasoning: &str, answer: &str) -> String {
    let reasoning = reasoning.trim();
    let answer = answer.trim();
    if reasoning.is_empty() {
        return answer.to_string();
    }
    format!("{OPEN_TAG}\n{reasoning}\n{CLOSE_TAG}\n{answer}")
}

/// Strip code-fence wrappers and repeatedly unwrap known outer tag
/// wrappers, bounded to [`MAX_SANITIZE_PASSES`] iterations so termination
/// holds even on adversarial repeated nesting.
pub fn sanitize_reasoning(text: &str) -> String {
    let mut current = text.trim().to_string();

    for _ in 0..MAX_SANITIZE_PASSES {
        let next = strip_one_wrapper(&current);
        if next == current {
            break;
        }
        current = next;
    }

    current
}

/// Remove at most one outer wrapper (fence or tag pair). Returns the input
/// unchanged when nothing wraps it.
fn strip_one_wrapper(text: &str) -> String {
    let trimmed = text.trim();

    // Code fence: ```lang\n ... \n```
    if let Some(rest) = trimmed.strip_prefix("```") {
        if let Some(inner) = rest.strip_suffix("```") {
            // Drop the language hint on the opening fence line.
            let inner = match inner.find('\n') {
                Some(nl) if inner[..nl].chars().all(|c| c.is_alphanumeric() || c == '_') => {
                    &inner[nl + 1..]
                }
                _ => inner,
            };
            return inner.trim().to_string();
        }
    }

    for tag in WRAPPER_TAGS {
        let open = format!("<{tag}>");
        let close = format!("</{tag}>");
        if let Some(rest) = trimmed.strip_prefix(&open) {
            if let Some(inner) = rest.strip_suffix(&close) {
                return inner.trim().to_string();
            }
        }
    }

    trimmed.to_string()
}
