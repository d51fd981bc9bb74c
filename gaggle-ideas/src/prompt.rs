//! Prompt text sent to the capability.
//!
//! Labelled lines (`Parent idea:`, `Idea to develop:`, `Style:`, `Domain:`)
//! are stable so that deterministic backends can read the context back out
//! of a prompt.

use gaggle_core::MergeStrategy;

use crate::pipeline::{GenerationConstraints, GenerationStyle};

pub const PARENT_LABEL: &str = "Parent idea:";
pub const IDEA_LABEL: &str = "Idea to develop:";
pub const STYLE_LABEL: &str = "Style:";
pub const DOMAIN_LABEL: &str = "Domain:";

/// Ask for `count` short idea stubs as a JSON array of strings.
pub fn extraction(
    prompt: &str,
    count: usize,
    parent: Option<&str>,
    constraints: Option<&GenerationConstraints>,
) -> String {
    let mut out = format!(
        "Generate exactly {count} distinct, concise ideas in response to the request below.\n\
         Return them as a JSON array of strings with no other text.\n\n\
         Request: {prompt}\n"
    );
    if let Some(parent) = parent {
        out.push_str(&format!(
            "{PARENT_LABEL} {parent}\nEvery idea should build on the parent idea.\n"
        ));
    }
    push_constraints(&mut out, constraints);
    out
}

/// Ask for the full content of one extracted stub.
pub fn expansion(
    stub: &str,
    original_prompt: &str,
    parent: Option<&str>,
    constraints: Option<&GenerationConstraints>,
) -> String {
    let mut out = format!(
        "Expand the idea below into a short, self-contained description (2-4 sentences).\n\
         Reply with the description only.\n\n\
         {IDEA_LABEL} {stub}\n\
         Original request: {original_prompt}\n"
    );
    if let Some(parent) = parent {
        out.push_str(&format!("{PARENT_LABEL} {parent}\n"));
    }
    push_constraints(&mut out, constraints);
    out
}

pub fn style_guidance(style: GenerationStyle) -> &'static str {
    match style {
        GenerationStyle::Brief => "Keep every idea to one or two plain sentences.",
        GenerationStyle::Detailed => {
            "Give concrete specifics: who it is for, how it works and what it needs."
        }
        GenerationStyle::Creative => "Favour unexpected, unconventional angles over safe ones.",
    }
}

fn push_constraints(out: &mut String, constraints: Option<&GenerationConstraints>) {
    let Some(constraints) = constraints else {
        return;
    };
    if let Some(style) = constraints.style {
        out.push_str(&format!("{STYLE_LABEL} {style}\n{}\n", style_guidance(style)));
    }
    if let Some(domain) = constraints.domain() {
        out.push_str(&format!(
            "{DOMAIN_LABEL} {domain}\nStay within the {domain} domain.\n"
        ));
    }
}

pub fn strategy_description(strategy: MergeStrategy) -> &'static str {
    match strategy {
        MergeStrategy::Synthesize => {
            "Create a single unified idea that captures the strongest elements of every source."
        }
        MergeStrategy::Combine => {
            "Describe how all of the sources work together side by side as one plan."
        }
        MergeStrategy::Abstract => {
            "Derive the higher-level concept or principle the sources have in common."
        }
        MergeStrategy::Contrast => {
            "Explore the differences and tensions between the sources and what they reveal."
        }
    }
}

/// Full merge prompt for providers that take a single text input.
///
/// The expected reply is `{"merged": "..."}`; plain text is accepted too.
pub fn merge(sources: &[String], strategy: MergeStrategy, instruction: Option<&str>) -> String {
    let mut out = format!(
        "Merge the following {} ideas using the \"{strategy}\" strategy.\n{}\n\n",
        sources.len(),
        strategy_description(strategy)
    );
    for (i, source) in sources.iter().enumerate() {
        out.push_str(&format!("Idea {}: {}\n", i + 1, source));
    }
    if let Some(instruction) = instruction.filter(|s| !s.trim().is_empty()) {
        out.push_str(&format!("\nAdditional instruction: {}\n", instruction.trim()));
    }
    out.push_str("\nRespond with JSON of the form {\"merged\": \"<merged idea>\"}.\n");
    out
}

/// Value following `label` on its own line, if present.
pub fn labelled_value<'a>(prompt: &'a str, label: &str) -> Option<&'a str> {
    prompt
        .lines()
        .find_map(|line| line.trim_start().strip_prefix(label))
        .map(str::trim)
        .filter(|v| !v.is_empty())
}
