use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Snapshot of one O.S. entry as rendered in the pending-requests list.
///
/// Recomputed from the live DOM on every scan pass and discarded right
/// after; the markup can change under us at any time, so nothing derived
/// from it is kept across passes.
#[derive(Debug, Clone)]
pub struct RowFacts {
    pub id: String,
    pub text: String,
}

impl RowFacts {
    /// Whether the row already displays a classification line.
    pub fn is_classified(&self) -> bool {
        self.text.contains("Classificação de O.S.")
    }

    /// The classification currently displayed on the row, if any.
    pub fn current_classification(&self) -> Option<String> {
        let pattern = Regex::new(r"(?i)Classificação de O\.S\.\s*:\s*(.*)").unwrap();
        pattern
            .captures(&self.text)
            .and_then(|captures| captures.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|value| !value.is_empty())
    }
}

/// Row identifiers already acted on during this run.
///
/// Membership means "do not act on this row again", success and failure
/// alike. Lives only for the run; nothing is persisted.
#[derive(Debug, Default)]
pub struct ProcessedRows(HashSet<String>);

impl ProcessedRows {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the id was already recorded.
    pub fn record(&mut self, id: &str) -> bool {
        self.0.insert(id.to_string())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0.contains(id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// What the spreadsheet plan says about one row.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanDecision {
    /// The row id is not a key in the spreadsheet mapping.
    NotMapped,
    /// Mapped, but the resolved classification is not on the allow list.
    NotAllowed(String),
    /// The row already shows the target classification.
    AlreadyCorrect(String),
    /// Apply this classification to the row.
    Apply(String),
}

/// Spreadsheet-driven classification plan: the id → classification mapping
/// plus the alias table and the allow list it is checked against.
///
/// Built once during configuration, read-only afterwards.
#[derive(Debug, Clone)]
pub struct ClassificationPlan {
    mapping: HashMap<String, String>,
    aliases: HashMap<String, String>,
    allowed: HashSet<String>,
}

impl ClassificationPlan {
    pub fn new(
        mapping: HashMap<String, String>,
        aliases: &HashMap<String, String>,
        allowed: &[String],
    ) -> Self {
        let aliases = aliases
            .iter()
            .map(|(key, value)| (key.trim().to_lowercase(), value.clone()))
            .collect();
        let allowed = allowed
            .iter()
            .map(|value| value.trim().to_lowercase())
            .collect();
        Self {
            mapping,
            aliases,
            allowed,
        }
    }

    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }

    /// Resolves the target classification for a row: alias substitution
    /// first, then the allow-list check, then the "already correct" check
    /// against what the row currently displays. All comparisons are
    /// case-insensitive.
    pub fn decide(&self, row: &RowFacts) -> PlanDecision {
        let raw = match self.mapping.get(&row.id) {
            Some(value) => value,
            None => return PlanDecision::NotMapped,
        };
        let resolved = self
            .aliases
            .get(&raw.trim().to_lowercase())
            .cloned()
            .unwrap_or_else(|| raw.clone());

        if !self.allowed.contains(&resolved.trim().to_lowercase()) {
            return PlanDecision::NotAllowed(resolved);
        }

        if let Some(current) = row.current_classification() {
            if current.to_lowercase() == resolved.to_lowercase() {
                return PlanDecision::AlreadyCorrect(resolved);
            }
        }

        PlanDecision::Apply(resolved)
    }
}

/// One spreadsheet row of the form-field automation: which field to touch
/// (by its ordinal badge) and the texts to write into it.
#[derive(Debug, Clone, PartialEq)]
pub struct FormTask {
    pub question: String,
    pub ordinal: String,
    pub edit_text: String,
    pub validation_text: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FormAction {
    /// QR-code fields get their description edited and their validation
    /// answer updated.
    EditAndValidate,
    /// Title fields only get the description edit.
    EditOnly,
    /// Anything else is left alone.
    Ignore,
}

impl FormTask {
    pub fn action(&self) -> FormAction {
        let question = self.question.to_lowercase();
        if question.contains("qr-code") {
            FormAction::EditAndValidate
        } else if question.contains("título") {
            FormAction::EditOnly
        } else {
            FormAction::Ignore
        }
    }
}

/// Target values for the bulk group / activity / object reassignment.
#[derive(Debug, Clone)]
pub struct ReassignTargets {
    pub group: String,
    pub activity: String,
    pub object: String,
}

/// Per-row progress through the processing pipeline, used in logs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RowState {
    Found,
    MenuOpened,
    FormOpened,
    FieldsFilled,
    Submitted,
    Recorded,
}

impl fmt::Display for RowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Found => "found",
            Self::MenuOpened => "menu-opened",
            Self::FormOpened => "form-opened",
            Self::FieldsFilled => "fields-filled",
            Self::Submitted => "submitted",
            Self::Recorded => "recorded",
        };
        write!(f, "{name}")
    }
}

/// Counters reported at the end of a run.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RunSummary {
    pub recorded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub pages: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, text: &str) -> RowFacts {
        RowFacts {
            id: id.to_string(),
            text: text.to_string(),
        }
    }

    fn plan(mapping: &[(&str, &str)]) -> ClassificationPlan {
        let mapping = mapping
            .iter()
            .map(|(id, class)| (id.to_string(), class.to_string()))
            .collect();
        let aliases = HashMap::from([
            ("sla".to_string(), "Corretiva".to_string()),
            ("planejada".to_string(), "Corretiva Planejada".to_string()),
        ]);
        let allowed = vec![
            "Corretiva".to_string(),
            "Corretiva Planejada".to_string(),
            "Atendimento".to_string(),
            "Melhoria".to_string(),
            "Acompanhamento".to_string(),
        ];
        ClassificationPlan::new(mapping, &aliases, &allowed)
    }

    #[test]
    fn extracts_current_classification_from_row_text() {
        let row = row("77", "O.S. 77\nClassificação de O.S. : Corretiva\nmore text");
        assert!(row.is_classified());
        assert_eq!(row.current_classification().as_deref(), Some("Corretiva"));
    }

    #[test]
    fn unclassified_row_has_no_current_classification() {
        let row = row("77", "O.S. 77\nsome description");
        assert!(!row.is_classified());
        assert_eq!(row.current_classification(), None);
    }

    #[test]
    fn processed_rows_record_at_most_once() {
        let mut processed = ProcessedRows::new();
        assert!(processed.record("10"));
        assert!(!processed.record("10"));
        assert!(processed.contains("10"));
        assert_eq!(processed.len(), 1);
    }

    #[test]
    fn processed_rows_are_never_selected_again() {
        let rows = vec![row("1", "first"), row("2", "second")];
        let mut processed = ProcessedRows::new();
        processed.record("1");

        let candidate = rows
            .iter()
            .find(|r| !r.is_classified() && !processed.contains(&r.id));
        assert_eq!(candidate.map(|r| r.id.as_str()), Some("2"));

        processed.record("2");
        let candidate = rows
            .iter()
            .find(|r| !r.is_classified() && !processed.contains(&r.id));
        assert!(candidate.is_none());
    }

    #[test]
    fn plan_resolves_aliases_before_the_allow_check() {
        let plan = plan(&[("1", "sla"), ("2", "Planejada")]);
        let decision = plan.decide(&row("1", "no classification yet"));
        assert_eq!(decision, PlanDecision::Apply("Corretiva".to_string()));
        let decision = plan.decide(&row("2", "no classification yet"));
        assert_eq!(
            decision,
            PlanDecision::Apply("Corretiva Planejada".to_string())
        );
    }

    #[test]
    fn plan_rejects_classifications_outside_the_allow_list() {
        let plan = plan(&[("1", "Descarte")]);
        assert_eq!(
            plan.decide(&row("1", "")),
            PlanDecision::NotAllowed("Descarte".to_string())
        );
    }

    #[test]
    fn plan_skips_rows_that_are_already_correct() {
        let plan = plan(&[("1", "Melhoria"), ("2", "Melhoria")]);
        let already = row("1", "Classificação de O.S. : melhoria");
        assert_eq!(
            plan.decide(&already),
            PlanDecision::AlreadyCorrect("Melhoria".to_string())
        );
        // A row classified differently still needs the change.
        let wrong = row("2", "Classificação de O.S. : Corretiva");
        assert_eq!(plan.decide(&wrong), PlanDecision::Apply("Melhoria".to_string()));
    }

    #[test]
    fn plan_ignores_rows_missing_from_the_mapping() {
        let plan = plan(&[("1", "Melhoria")]);
        assert_eq!(plan.decide(&row("99", "")), PlanDecision::NotMapped);
    }

    #[test]
    fn form_task_actions_follow_the_question_text() {
        let task = |question: &str| FormTask {
            question: question.to_string(),
            ordinal: "1".to_string(),
            edit_text: String::new(),
            validation_text: String::new(),
        };
        assert_eq!(task("Leitura do Qr-Code").action(), FormAction::EditAndValidate);
        assert_eq!(task("Título do pavimento").action(), FormAction::EditOnly);
        assert_eq!(task("Observações").action(), FormAction::Ignore);
    }
}
