// Default pattern sets for the input sanitizer.
// Extra denylist entries can be appended at runtime via SANITIZER_EXTRA_PATTERNS.

/// Known injection phrasings. Matched case-insensitively.
///
/// Each entry is `(name, regex)`. Names surface in `SanitizedText::matches`
/// and in advisories, so keep them stable. A match whose optional `keep`
/// group participated is left in place and not reported.
pub const DEFAULT_DENYLIST: &[(&str, &str)] = &[
    (
        "ignore_previous_instructions",
        r"(?i)\b(?:ignore|disregard|forget|override|bypass)\s+(?:(?:all|any|the|your|of)\s+)*(?:previous|prior|above|earlier|preceding|original|system)\s+(?:instructions?|prompts?|directions?|directives?|rules?|messages?|context)\b",
    ),
    (
        "ignore_everything",
        r"(?i)\b(?:ignore|disregard|forget)\s+(?:everything|all)\s+(?:above|before|previously|you\s+were\s+told)\b",
    ),
    ("you_are_now", r"(?i)\byou\s+are\s+now\b"),
    (
        "from_now_on",
        r"(?i)\bfrom\s+now\s+on,?\s+(?:you|act|respond|answer|reply)\b",
    ),
    (
        "role_label",
        r"(?i)(?P<keep>\boperating\s+)?\b(?:system|assistant|developer)\s*[)\]]?\s*:",
    ),
    (
        "reveal_prompt",
        r"(?i)\b(?:print|reveal|show|repeat|output|display|leak|dump|tell\s+me)\s+(?:me\s+)?(?:your|the|all\s+(?:of\s+)?your)\s+(?:(?:system|hidden|initial|original|secret)\s+)?(?:prompt|instructions|directives?|rules)\b",
    ),
    ("system_prompt", r"(?i)\bsystem\s+prompt\b"),
    (
        "your_instructions_are",
        r"(?i)\byour\s+(?:new\s+)?instructions\s+are\b",
    ),
    (
        "new_instructions",
        r"(?i)\bnew\s+(?:instructions|directives?|task)\s*:",
    ),
    (
        "persona_change",
        r"(?i)\b(?:change|switch|drop|abandon)\s+your\s+(?:persona|role|character)\b",
    ),
    ("pretend", r"(?i)\bpretend\s+(?:to\s+be|you\s+are)\b"),
    (
        "jailbreak",
        r"(?i)\b(?:jailbreak|dan\s+mode|developer\s+mode)\b",
    ),
    (
        "code_fence_directive",
        r"(?i)`{3,}\s*(?:system|instructions?|prompt|assistant)\b",
    ),
];

/// Sequences that mimic the prompt's own segment delimiters or common chat-template
/// control tokens. User text must never be able to open or close a segment.
pub const STRUCTURAL_PATTERNS: &[(&str, &str)] = &[
    (
        "segment_marker",
        r"(?i)\[\[\s*/?\s*(?:begin|end)\b[^\]\n]*\]\]",
    ),
    (
        "segment_tag",
        r"(?i)</?\s*(?:system|system_directive|instructions?|resume|user_resume|job_description|chat_history|conversation|history|question|user_question|assistant|user)\s*>",
    ),
    (
        "chat_template_token",
        r"(?i)<\|[a-z_]{1,32}\|>|\[/?inst\]|<</?sys>>",
    ),
];

/// Directive sentences shorter than this are too generic to screen for leaks.
pub const MIN_LEAK_FRAGMENT_CHARS: usize = 24;

/// Builds a whitespace-tolerant, case-insensitive regex source for a literal
/// directive sentence.
pub fn leak_fragment_pattern(fragment: &str) -> String {
    let words: Vec<String> = fragment.split_whitespace().map(regex::escape).collect();
    format!(r"(?i){}", words.join(r"\s+"))
}

/// Splits static directive text into sentences worth screening for.
pub fn leak_fragments(directive: &str) -> Vec<String> {
    directive
        .split(['.', '!', '?', '\n'])
        .map(|s| s.trim().trim_matches(|c: char| c == '*' || c == '-').trim())
        .filter(|s| s.chars().count() >= MIN_LEAK_FRAGMENT_CHARS)
        .map(String::from)
        .collect()
}
