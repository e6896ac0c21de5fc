// Prompt assembly: static directives plus the bounded, role-separated payload builder.
// All model-bound text is built here; no other module formats prompts.

pub mod assembler;
pub mod prompts;

pub use assembler::{ChatMessage, ChatRole, PromptAssembler, PromptPayload};

/// Static directive text the model must never echo back to the user.
pub fn protected_directives() -> [&'static str; 5] {
    [
        prompts::SYSTEM_DIRECTIVE,
        prompts::ANALYSIS_TASK,
        prompts::TAILORING_TASK,
        prompts::FOLLOWUP_TASK,
        prompts::LATEX_BULLET_TASK,
    ]
}
