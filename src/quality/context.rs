use serde::{Deserialize, Serialize};

const SESSION_DEDUCTION: f64 = 30.0;
const USER_DEDUCTION: f64 = 20.0;
const HISTORY_DEDUCTION: f64 = 15.0;
const TOKEN_BUDGET_DEDUCTION: f64 = 15.0;

/// Caller context carried alongside an operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidationContext {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    /// Prior operations in this session, oldest first
    #[serde(default)]
    pub history: Vec<String>,
    #[serde(default)]
    pub token_budget: Option<u64>,
}

impl ValidationContext {
    pub fn new(session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            user_id: Some(user_id.into()),
            ..Self::default()
        }
    }

    pub fn with_history(mut self, operation: impl Into<String>) -> Self {
        self.history.push(operation.into());
        self
    }

    pub fn with_token_budget(mut self, tokens: u64) -> Self {
        self.token_budget = Some(tokens);
        self
    }

    /// Fully populated context, handy for demos and tests
    pub fn complete(session_id: &str, user_id: &str, token_budget: u64) -> Self {
        Self::new(session_id, user_id)
            .with_history("session_start")
            .with_token_budget(token_budget)
    }

    /// 100 minus a fixed deduction per missing field
    pub fn retention(&self) -> f64 {
        let mut score = 100.0;
        if self.session_id.as_deref().map_or(true, str::is_empty) {
            score -= SESSION_DEDUCTION;
        }
        if self.user_id.as_deref().map_or(true, str::is_empty) {
            score -= USER_DEDUCTION;
        }
        if self.history.is_empty() {
            score -= HISTORY_DEDUCTION;
        }
        if self.token_budget.is_none() {
            score -= TOKEN_BUDGET_DEDUCTION;
        }
        f64::max(score, 0.0)
    }

    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.session_id.as_deref().map_or(true, str::is_empty) {
            missing.push("session_id");
        }
        if self.user_id.as_deref().map_or(true, str::is_empty) {
            missing.push("user_id");
        }
        if self.history.is_empty() {
            missing.push("history");
        }
        if self.token_budget.is_none() {
            missing.push("token_budget");
        }
        missing
    }
}
