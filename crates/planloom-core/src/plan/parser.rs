//! Plan grammar parser.
//!
//! Parses the line-oriented plan format that the model is prompted to emit
//! into an id-free tree ([`ParsedPlan`]). Ids and timestamps are assigned
//! when the tree is admitted into the store.
//!
//! Grammar (keywords are case-insensitive):
//!
//! ```text
//! PLAN: <title>                        -- first match wins; optional
//! DESCRIPTION: <text>                  -- first match wins; optional
//! PHASE <int>: <label>
//!   - Estimated time: <text>
//!   - Description: <text>
//!   STEP <dotted-int>: <label>
//!     - Type: code|file|command|review|test
//!     - Files: <comma-separated paths>
//!     - Action: <text>
//!     ```lang ... ```                  -- zero or more fenced blocks
//! ```
//!
//! Phases and steps are ordered by first appearance; the numeric labels in
//! the headers are display hints only. Metadata lines and fenced blocks that
//! arrive while no step is open are dropped rather than treated as errors,
//! to tolerate model formatting drift.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use super::model::{ChangeType, StepType};

static PHASE_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^PHASE\s+\d+:\s*(.+)$").expect("phase header regex"));

static STEP_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^STEP\s+[\d.]+:\s*(.+)$").expect("step header regex"));

/// Maximum length of a title derived from the fallback text.
const FALLBACK_TITLE_MAX: usize = 50;

/// Errors that can occur during plan parsing.
#[derive(Debug, Error)]
pub enum PlanParseError {
    /// The text contained no phase headers at all. Recoverable: the caller
    /// should fall back to treating the text as a plain chat reply.
    #[error("no phases found in plan text")]
    EmptyPlan,
}

// ---------------------------------------------------------------------------
// Parsed tree
// ---------------------------------------------------------------------------

/// An id-free plan tree produced by [`parse_plan_text`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPlan {
    pub title: String,
    pub description: String,
    pub phases: Vec<ParsedPhase>,
}

impl ParsedPlan {
    /// Total number of steps across all phases.
    pub fn total_steps(&self) -> usize {
        self.phases.iter().map(|p| p.steps.len()).sum()
    }
}

/// A parsed phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPhase {
    pub label: String,
    pub description: Option<String>,
    pub estimated_time: Option<String>,
    pub steps: Vec<ParsedStep>,
}

/// A parsed step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedStep {
    pub label: String,
    pub description: Option<String>,
    pub step_type: StepType,
    pub files: Vec<String>,
    pub code_changes: Vec<ParsedCodeChange>,
}

/// A code change extracted from a fenced block inside a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCodeChange {
    pub file: String,
    pub language: String,
    pub change_type: ChangeType,
    pub content: String,
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Parse raw model output into a [`ParsedPlan`].
///
/// `fallback_title` seeds the title (bounded to a fixed length) and the
/// canned description when the text carries no `PLAN:`/`DESCRIPTION:` lines.
///
/// Fails with [`PlanParseError::EmptyPlan`] if no phase header was found.
pub fn parse_plan_text(raw_text: &str, fallback_title: &str) -> Result<ParsedPlan, PlanParseError> {
    let mut title = String::new();
    let mut description = String::new();
    let mut phases: Vec<ParsedPhase> = Vec::new();
    let mut current_phase: Option<ParsedPhase> = None;
    let mut current_step: Option<ParsedStep> = None;

    let mut in_code_block = false;
    let mut code_language = String::new();
    let mut code_content = String::new();
    let mut placeholder_counter = 0usize;

    for raw_line in raw_text.lines() {
        let line = raw_line.trim();

        // Fence toggles come first: everything between fences is verbatim.
        if !in_code_block && line.starts_with("```") {
            in_code_block = true;
            code_language = line.trim_start_matches('`').trim().to_owned();
            if code_language.is_empty() {
                code_language = "text".to_owned();
            }
            code_content.clear();
            continue;
        }
        if in_code_block {
            if line.starts_with("```") {
                in_code_block = false;
                // A block outside any open step is dropped.
                if let Some(step) = current_step.as_mut() {
                    let file = match step.files.first() {
                        Some(f) => f.clone(),
                        None => {
                            placeholder_counter += 1;
                            format!(
                                "generated-{placeholder_counter}.{}",
                                language_extension(&code_language)
                            )
                        }
                    };
                    step.code_changes.push(ParsedCodeChange {
                        file,
                        language: code_language.clone(),
                        change_type: ChangeType::Create,
                        content: code_content.trim_end().to_owned(),
                    });
                }
            } else {
                code_content.push_str(raw_line);
                code_content.push('\n');
            }
            continue;
        }

        // Title and description: first match wins.
        if title.is_empty() {
            if let Some(rest) = strip_keyword(line, "PLAN:") {
                title = rest.to_owned();
                continue;
            }
        }
        if description.is_empty() {
            if let Some(rest) = strip_keyword(line, "DESCRIPTION:") {
                description = rest.to_owned();
                continue;
            }
        }

        // Phase header: flush whatever phase (and step) is open.
        if let Some(caps) = PHASE_HEADER.captures(line) {
            flush_step(&mut current_phase, &mut current_step);
            flush_phase(&mut phases, &mut current_phase);
            current_phase = Some(ParsedPhase {
                label: caps[1].trim().to_owned(),
                description: None,
                estimated_time: None,
                steps: Vec::new(),
            });
            continue;
        }

        // Step header: flush the previous step into the open phase.
        if let Some(caps) = STEP_HEADER.captures(line) {
            if current_phase.is_some() {
                flush_step(&mut current_phase, &mut current_step);
                current_step = Some(ParsedStep {
                    label: caps[1].trim().to_owned(),
                    description: None,
                    step_type: StepType::Code,
                    files: Vec::new(),
                    code_changes: Vec::new(),
                });
            }
            continue;
        }

        // Step metadata binds to the most recently opened step.
        if let Some(step) = current_step.as_mut() {
            if let Some(rest) = strip_keyword(line, "- Type:") {
                step.step_type = rest.to_lowercase().parse().unwrap_or(StepType::Code);
            } else if let Some(rest) = strip_keyword(line, "- Files:") {
                step.files = rest
                    .split(',')
                    .map(str::trim)
                    .filter(|f| !f.is_empty())
                    .map(str::to_owned)
                    .collect();
            } else if let Some(rest) = strip_keyword(line, "- Action:") {
                step.description = Some(rest.to_owned());
            }
            continue;
        }

        // Phase metadata binds to the open phase only while no step is open.
        if let Some(phase) = current_phase.as_mut() {
            if let Some(rest) = strip_keyword(line, "- Estimated time:") {
                phase.estimated_time = Some(rest.to_owned());
            } else if let Some(rest) = strip_keyword(line, "- Description:") {
                phase.description = Some(rest.to_owned());
            }
            // Anything else inside a phase is ignored.
        }
    }

    flush_step(&mut current_phase, &mut current_step);
    flush_phase(&mut phases, &mut current_phase);

    if phases.is_empty() {
        return Err(PlanParseError::EmptyPlan);
    }

    if title.is_empty() {
        title = truncate_chars(fallback_title, FALLBACK_TITLE_MAX);
    }
    if description.is_empty() {
        description = format!("Execution plan for: {fallback_title}");
    }

    Ok(ParsedPlan {
        title,
        description,
        phases,
    })
}

fn flush_step(phase: &mut Option<ParsedPhase>, step: &mut Option<ParsedStep>) {
    if let Some(s) = step.take() {
        if let Some(p) = phase.as_mut() {
            p.steps.push(s);
        }
    }
}

fn flush_phase(phases: &mut Vec<ParsedPhase>, phase: &mut Option<ParsedPhase>) {
    if let Some(p) = phase.take() {
        phases.push(p);
    }
}

/// Strip a case-insensitive keyword prefix, returning the trimmed remainder.
fn strip_keyword<'a>(line: &'a str, keyword: &str) -> Option<&'a str> {
    if line.len() >= keyword.len() && line[..keyword.len()].eq_ignore_ascii_case(keyword) {
        Some(line[keyword.len()..].trim())
    } else {
        None
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_owned()
    } else {
        s.chars().take(max).collect()
    }
}

/// File extension for a fenced-block language tag, used to synthesize
/// placeholder file names.
fn language_extension(language: &str) -> &'static str {
    match language.to_lowercase().as_str() {
        "typescript" | "ts" => "ts",
        "javascript" | "js" => "js",
        "tsx" => "tsx",
        "jsx" => "jsx",
        "python" | "py" => "py",
        "rust" | "rs" => "rs",
        "go" => "go",
        "java" => "java",
        "css" => "css",
        "html" => "html",
        "json" => "json",
        "bash" | "shell" | "sh" => "sh",
        _ => "txt",
    }
}

// ---------------------------------------------------------------------------
// Unparse
// ---------------------------------------------------------------------------

/// Render a parsed tree back into the grammar text.
///
/// Parsing the result reproduces an equivalent tree (same labels, types,
/// files, and order).
pub fn write_plan_text(plan: &ParsedPlan) -> String {
    let mut out = String::new();
    out.push_str(&format!("PLAN: {}\n", plan.title));
    out.push_str(&format!("DESCRIPTION: {}\n", plan.description));

    for (pi, phase) in plan.phases.iter().enumerate() {
        out.push('\n');
        out.push_str(&format!("PHASE {}: {}\n", pi + 1, phase.label));
        if let Some(et) = &phase.estimated_time {
            out.push_str(&format!("- Estimated time: {et}\n"));
        }
        if let Some(desc) = &phase.description {
            out.push_str(&format!("- Description: {desc}\n"));
        }
        for (si, step) in phase.steps.iter().enumerate() {
            out.push('\n');
            out.push_str(&format!("STEP {}.{}: {}\n", pi + 1, si + 1, step.label));
            out.push_str(&format!("- Type: {}\n", step.step_type));
            if !step.files.is_empty() {
                out.push_str(&format!("- Files: {}\n", step.files.join(", ")));
            }
            if let Some(desc) = &step.description {
                out.push_str(&format!("- Action: {desc}\n"));
            }
            for change in &step.code_changes {
                out.push_str(&format!("```{}\n{}\n```\n", change.language, change.content));
            }
        }
    }

    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
PLAN: Add Login
DESCRIPTION: Add a login flow with session handling.

PHASE 1: Setup
- Estimated time: 30 minutes
- Description: Prepare the workspace.

STEP 1.1: Install deps
- Type: command
- Action: Install the auth packages.

STEP 1.2: Write auth.ts
- Type: code
- Files: lib/auth.ts
```typescript
export const login = () => {};
```
";

    #[test]
    fn parses_title_and_description() {
        let plan = parse_plan_text(SAMPLE, "fallback").expect("should parse");
        assert_eq!(plan.title, "Add Login");
        assert_eq!(plan.description, "Add a login flow with session handling.");
    }

    #[test]
    fn parses_phases_and_steps_in_order() {
        let plan = parse_plan_text(SAMPLE, "fallback").expect("should parse");
        assert_eq!(plan.phases.len(), 1);
        let phase = &plan.phases[0];
        assert_eq!(phase.label, "Setup");
        assert_eq!(phase.estimated_time.as_deref(), Some("30 minutes"));
        assert_eq!(phase.description.as_deref(), Some("Prepare the workspace."));
        assert_eq!(phase.steps.len(), 2);
        assert_eq!(phase.steps[0].label, "Install deps");
        assert_eq!(phase.steps[0].step_type, StepType::Command);
        assert_eq!(phase.steps[1].label, "Write auth.ts");
        assert_eq!(phase.steps[1].step_type, StepType::Code);
    }

    #[test]
    fn attaches_code_block_to_open_step() {
        let plan = parse_plan_text(SAMPLE, "fallback").expect("should parse");
        let step = &plan.phases[0].steps[1];
        assert_eq!(step.code_changes.len(), 1);
        let change = &step.code_changes[0];
        assert_eq!(change.file, "lib/auth.ts");
        assert_eq!(change.language, "typescript");
        assert_eq!(change.change_type, ChangeType::Create);
        assert_eq!(change.content, "export const login = () => {};");
        assert!(plan.phases[0].steps[0].code_changes.is_empty());
    }

    #[test]
    fn empty_plan_is_an_error() {
        let err = parse_plan_text("just some prose with no structure", "fallback").unwrap_err();
        assert!(matches!(err, PlanParseError::EmptyPlan));
    }

    #[test]
    fn phase_without_steps_is_not_empty_plan() {
        let plan = parse_plan_text("PHASE 1: Lonely", "fallback").expect("should parse");
        assert_eq!(plan.phases.len(), 1);
        assert!(plan.phases[0].steps.is_empty());
    }

    #[test]
    fn keywords_are_case_insensitive() {
        let text = "plan: Lowercase\n\nphase 1: First\n\nstep 1.1: Do it\n- type: test\n";
        let plan = parse_plan_text(text, "fallback").expect("should parse");
        assert_eq!(plan.title, "Lowercase");
        assert_eq!(plan.phases[0].steps[0].step_type, StepType::Test);
    }

    #[test]
    fn fallback_title_is_truncated() {
        let long = "x".repeat(80);
        let plan = parse_plan_text("PHASE 1: Only", &long).expect("should parse");
        assert_eq!(plan.title.chars().count(), 50);
        assert!(plan.description.contains(&long));
    }

    #[test]
    fn numeric_labels_are_display_hints_only() {
        let text = "PHASE 7: First\n\nSTEP 9.3: Only step\n\nPHASE 2: Second\n";
        let plan = parse_plan_text(text, "fallback").expect("should parse");
        assert_eq!(plan.phases[0].label, "First");
        assert_eq!(plan.phases[1].label, "Second");
        assert_eq!(plan.phases[0].steps.len(), 1);
    }

    #[test]
    fn metadata_outside_any_step_is_dropped() {
        let text = "\
- Type: command
PHASE 1: Setup
- Files: orphan.txt
STEP 1.1: Real step
- Files: real.txt
";
        let plan = parse_plan_text(text, "fallback").expect("should parse");
        let step = &plan.phases[0].steps[0];
        assert_eq!(step.files, vec!["real.txt"]);
    }

    #[test]
    fn code_block_outside_any_step_is_dropped() {
        let text = "PHASE 1: Setup\n```rust\nfn main() {}\n```\nSTEP 1.1: After\n";
        let plan = parse_plan_text(text, "fallback").expect("should parse");
        assert!(plan.phases[0].steps[0].code_changes.is_empty());
    }

    #[test]
    fn unknown_step_type_defaults_to_code() {
        let text = "PHASE 1: P\nSTEP 1.1: S\n- Type: wizardry\n";
        let plan = parse_plan_text(text, "fallback").expect("should parse");
        assert_eq!(plan.phases[0].steps[0].step_type, StepType::Code);
    }

    #[test]
    fn placeholder_file_names_use_language_and_counter() {
        let text = "\
PHASE 1: P
STEP 1.1: S
```rust
fn a() {}
```
```python
def b(): pass
```
";
        let plan = parse_plan_text(text, "fallback").expect("should parse");
        let changes = &plan.phases[0].steps[0].code_changes;
        assert_eq!(changes[0].file, "generated-1.rs");
        assert_eq!(changes[1].file, "generated-2.py");
    }

    #[test]
    fn code_block_preserves_indentation() {
        let text = "PHASE 1: P\nSTEP 1.1: S\n```rust\nfn main() {\n    body();\n}\n```\n";
        let plan = parse_plan_text(text, "fallback").expect("should parse");
        let content = &plan.phases[0].steps[0].code_changes[0].content;
        assert_eq!(content, "fn main() {\n    body();\n}");
    }

    #[test]
    fn unparse_then_parse_is_equivalent() {
        let plan = parse_plan_text(SAMPLE, "fallback").expect("should parse");
        let text = write_plan_text(&plan);
        let reparsed = parse_plan_text(&text, "fallback").expect("unparse should reparse");
        assert_eq!(plan, reparsed);
    }
}
