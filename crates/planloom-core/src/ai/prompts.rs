//! Prompt construction for the chat, plan-generation, and agent-plan
//! completions. Pure string assembly, no I/O.

use serde_json::Value;

use super::retriever::RetrievedChunk;

/// A file from the user's workspace, included in prompt context.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceFile {
    pub name: String,
    pub path: String,
    pub language: String,
    #[serde(default)]
    pub content: String,
}

/// How much file content to inline into a chat prompt.
const FILE_CONTENT_PREVIEW: usize = 500;

/// Conversational system prompt for the plain chat path.
pub const SYSTEM_PROMPT: &str = "\
You are an expert coding assistant integrated into an IDE. You have access \
to the user's workspace files and can see their code.

Your responsibilities:
- Help users understand their code
- Suggest improvements and fixes
- Answer questions about their codebase
- Provide specific code examples when needed
- Reference specific files when making suggestions

When responding:
- Be concise but thorough
- Reference specific files from the workspace when relevant
- Provide code examples in markdown code blocks with the appropriate language
- If suggesting changes, clearly indicate which file should be modified
- Ask clarifying questions if the user's request is ambiguous

Always base your responses on the actual code in the workspace.";

/// Plan-generation prompt. Teaches the model the exact line-oriented format
/// the parser consumes.
pub const PLAN_GENERATION_PROMPT: &str = r#"You are a planning assistant that decomposes a coding request into a structured, multi-phase execution plan.

Respond using EXACTLY this format:

PLAN: <short title for the plan>
DESCRIPTION: <one-sentence summary of what will be built>

PHASE 1: <phase label>
- Estimated time: <rough estimate>
- Description: <what this phase accomplishes>

STEP 1.1: <step label>
- Type: <one of: code, file, command, review, test>
- Files: <comma-separated file paths this step touches>
- Action: <what to do in this step>

STEP 1.2: <next step>
...

PHASE 2: <next phase>
...

Rules:
- Every step needs a Type line. Use "command" for shell commands, "test" for verification steps.
- List concrete file paths on the Files line whenever a step touches files.
- For code steps, include the actual code in a fenced block (```lang ... ```) directly under the step. The block is attached to the step's first listed file.
- Keep phases coarse (2-5 per plan) and steps small (1-4 per phase).
- Do not add commentary outside the format above."#;

/// Agent-plan transformation prompt. Turns a reviewed plan into a document
/// for a coding agent.
pub const AGENT_PLAN_PROMPT: &str = "\
You are a plan transformation specialist. Take a user-reviewed execution \
plan and transform it into a clean, agent-friendly format optimized for \
coding agents.

Your task:
1. Analyze the proposed plan and the user's decisions (approved/skipped steps)
2. Generate a comprehensive, sequential plan that includes ONLY approved steps
3. Provide working code examples for each step
4. Ensure the plan is clear, actionable, and ready for execution by an AI coding agent

Output a markdown document with: a title, an overview, a review summary \
(steps proposed/approved/skipped), one section per phase with its approved \
steps, explicit file paths, and a closing list of execution notes and \
success criteria.

Guidelines:
- Only include approved steps
- Provide complete, working code
- Be specific about file paths
- Include error handling in code examples
- Consider edge cases";

/// Assemble the prompt for the plan-generation completion.
pub fn build_plan_prompt(
    query: &str,
    files: &[WorkspaceFile],
    retrieved: &[RetrievedChunk],
) -> String {
    let mut prompt = String::with_capacity(4096);
    prompt.push_str(PLAN_GENERATION_PROMPT);
    prompt.push_str("\n\n## Current Workspace Context:\n\n### Existing Files:\n");
    prompt.push_str(&format_file_listing(files));
    prompt.push_str("\n### Relevant Code Context:\n");
    prompt.push_str(&format_retrieved(retrieved));
    prompt.push_str("\n---\n\n## User Request:\n");
    prompt.push_str(query);
    prompt.push_str(
        "\n\n---\n\nNow generate a detailed, structured execution plan following the \
         format above. Include actual working code in the steps.",
    );
    prompt
}

/// Assemble the prompt for the plain conversational path.
pub fn build_chat_prompt(
    message: &str,
    files: &[WorkspaceFile],
    retrieved: &[RetrievedChunk],
) -> String {
    let mut prompt = String::with_capacity(4096);
    prompt.push_str(SYSTEM_PROMPT);
    prompt.push_str("\n\nCurrent Workspace Files:\n");
    prompt.push_str(&format_file_previews(files));
    prompt.push_str("\nRelevant Code Snippets (from vector search):\n");
    prompt.push_str(&format_retrieved(retrieved));
    prompt.push_str("\nUser Message:\n");
    prompt.push_str(message);
    prompt.push_str(
        "\n\nPlease provide a helpful response based on the code context above. If \
         you're suggesting changes, be specific about which file and what changes to \
         make. Use code blocks with appropriate language tags.",
    );
    prompt
}

/// Assemble the prompt for the short conversational summary that accompanies
/// a freshly generated plan.
pub fn build_plan_summary_prompt(
    message: &str,
    files: &[WorkspaceFile],
    retrieved: &[RetrievedChunk],
) -> String {
    let mut prompt = String::with_capacity(2048);
    prompt.push_str(SYSTEM_PROMPT);
    prompt.push_str("\n\nCurrent Workspace Files:\n");
    prompt.push_str(&format_file_listing(files));
    prompt.push_str("\nRelevant Code Context:\n");
    prompt.push_str(&format_retrieved(retrieved));
    prompt.push_str("\nUser Message: ");
    prompt.push_str(message);
    prompt.push_str(
        "\n\nI've created a detailed execution plan for this task. Please provide a \
         brief, friendly summary (2-3 sentences) explaining what the plan will \
         accomplish and encourage the user to review the step-by-step breakdown. \
         Be conversational and helpful.",
    );
    prompt
}

/// Assemble the prompt for the agent-plan completion from the reviewed-plan
/// JSON context.
pub fn build_agent_prompt(plan_context: &Value) -> String {
    format!(
        "{AGENT_PLAN_PROMPT}\n\n## Original Plan Details:\n```json\n{}\n```\n\nGenerate the agent-friendly execution plan now:",
        serde_json::to_string_pretty(plan_context).unwrap_or_else(|_| plan_context.to_string())
    )
}

fn format_file_listing(files: &[WorkspaceFile]) -> String {
    if files.is_empty() {
        return "No files in workspace.\n".to_owned();
    }
    let mut out = String::new();
    for file in files {
        out.push_str(&format!("- {} ({})\n", file.path, file.language));
    }
    out
}

fn format_file_previews(files: &[WorkspaceFile]) -> String {
    if files.is_empty() {
        return "No files in workspace.\n".to_owned();
    }
    let mut out = String::new();
    for file in files {
        let preview: String = file.content.chars().take(FILE_CONTENT_PREVIEW).collect();
        out.push_str(&format!(
            "File: {} ({})\n```{}\n{}\n```\n\n",
            file.path, file.language, file.language, preview
        ));
    }
    out
}

fn format_retrieved(retrieved: &[RetrievedChunk]) -> String {
    if retrieved.is_empty() {
        return "No relevant code context found.\n".to_owned();
    }
    let mut out = String::new();
    for chunk in retrieved {
        out.push_str(&format!("From {}:\n{}\n\n", chunk.path, chunk.page_content));
    }
    out
}
