use serde::Deserialize;
use std::fmt::Write;

/// Built-in violation categories, in checklist order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyCategory {
    MissingPpe,
    DangerousPosition,
    ImproperEquipment,
    BlockedExits,
    OtherHazards,
}

impl SafetyCategory {
    pub const ALL: [SafetyCategory; 5] = [
        SafetyCategory::MissingPpe,
        SafetyCategory::DangerousPosition,
        SafetyCategory::ImproperEquipment,
        SafetyCategory::BlockedExits,
        SafetyCategory::OtherHazards,
    ];

    pub fn checklist_label(self) -> &'static str {
        match self {
            SafetyCategory::MissingPpe => "Missing PPE (hard hats, vests, gloves, harnesses)",
            SafetyCategory::DangerousPosition => "Workers in dangerous positions",
            SafetyCategory::ImproperEquipment => "Improper equipment usage",
            SafetyCategory::BlockedExits => "Blocked emergency exits or pathways",
            SafetyCategory::OtherHazards => "Any other safety hazards",
        }
    }
}

/// The enabled-category set. Every category defaults to on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SafetyChecks {
    pub ppe: bool,
    pub dangerous_positions: bool,
    pub improper_equipment: bool,
    pub blocked_exits: bool,
    pub other_hazards: bool,
}

impl Default for SafetyChecks {
    fn default() -> Self {
        Self {
            ppe: true,
            dangerous_positions: true,
            improper_equipment: true,
            blocked_exits: true,
            other_hazards: true,
        }
    }
}

impl SafetyChecks {
    pub fn is_enabled(&self, category: SafetyCategory) -> bool {
        match category {
            SafetyCategory::MissingPpe => self.ppe,
            SafetyCategory::DangerousPosition => self.dangerous_positions,
            SafetyCategory::ImproperEquipment => self.improper_equipment,
            SafetyCategory::BlockedExits => self.blocked_exits,
            SafetyCategory::OtherHazards => self.other_hazards,
        }
    }

    pub fn enabled(&self) -> impl Iterator<Item = SafetyCategory> + '_ {
        SafetyCategory::ALL
            .into_iter()
            .filter(move |c| self.is_enabled(*c))
    }
}

const SCHEMA_DIRECTIVE: &str = "
Format your response as JSON with these fields:
- violations: [list of specific violations]
- locations: [descriptions of where in the image]
- severity: [low/medium/high for each violation]
- recommendations: [how to fix each issue]
- worker_count: [integer number of workers visible in this frame]
- worker_positions: [descriptions of worker positions to help with tracking]

If there are no violations visible, return an empty violations list.
";

const QUERY_ANSWER_DIRECTIVE: &str = "
For each question, provide a direct answer in this format:
- query_answers: [
    {
        \"question\": \"the original question\",
        \"answer\": \"a direct answer to the question\",
        \"confidence\": \"high/medium/low\"
    }
]
";

const WORKER_DIRECTIVE: &str = "
For each worker with a violation:
- Assign a unique ID based on their appearance (e.g., \"worker_red_helmet_1\", \"worker_blue_shirt_no_helmet\")
- Include distinctive features that would identify the same worker in different frames

Format this information in your response as:
- worker_identifiers: [
    {
        \"worker_id\": \"unique identifier\",
        \"features\": \"description of distinctive features\",
        \"violations\": [list of 0-based indices into the violations list that apply to this worker]
    }
]
";

/// Builds the analysis instruction sent with every frame.
///
/// Pure: the same checks and queries always produce the same bytes. The
/// checklist is numbered from 1 over the enabled categories only, so turning
/// one off renumbers the rest without a gap. Blank queries are dropped.
pub fn build_analysis_prompt(checks: &SafetyChecks, custom_queries: &[String]) -> String {
    let mut prompt =
        String::from("Analyze this construction site image for safety violations.\nCheck for:");

    for (i, category) in checks.enabled().enumerate() {
        let _ = write!(prompt, "\n{}. {}", i + 1, category.checklist_label());
    }
    prompt.push('\n');
    prompt.push_str(SCHEMA_DIRECTIVE);

    let queries: Vec<&str> = custom_queries
        .iter()
        .map(|q| q.trim())
        .filter(|q| !q.is_empty())
        .collect();
    if !queries.is_empty() {
        prompt.push_str("\nAdditionally, please answer these specific questions about the image:\n");
        for (i, query) in queries.iter().enumerate() {
            let _ = writeln!(prompt, "{}. {}", i + 1, query);
        }
        prompt.push_str(QUERY_ANSWER_DIRECTIVE);
    }

    prompt.push_str(WORKER_DIRECTIVE);
    prompt
}
