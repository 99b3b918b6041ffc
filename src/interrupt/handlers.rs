//! Per-kind question formatting, answer validation, and answer handling.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;

use crate::models::interrupt::{InterruptKind, InterruptRequest, UserResponse};
use crate::{AppError, Result};

/// Strategy for one interrupt kind.
pub trait InterruptHandler: Send + Sync {
    /// Render the question delivered to the human.
    fn format_question(&self, request: &InterruptRequest) -> String;

    /// Check that a response is acceptable for this request.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::ValidationFailed`] describing why the answer was
    /// rejected.
    fn validate(&self, request: &InterruptRequest, response: &UserResponse) -> Result<()>;

    /// Turn a validated response into the generic resume payload.
    fn handle(&self, request: &InterruptRequest, response: &UserResponse) -> serde_json::Value;
}

/// Fallback rendering: the question followed by the JSON-encoded options.
#[must_use]
pub fn format_generic(request: &InterruptRequest) -> String {
    if request.options.is_empty() {
        return request.question.clone();
    }
    let options = serde_json::to_string(&request.options).unwrap_or_default();
    format!("{}\n\nOptions: {options}", request.question)
}

/// Fallback resume payload: `{"user_answer": <answer>}`.
#[must_use]
pub fn generic_payload(response: &UserResponse) -> serde_json::Value {
    json!({ "user_answer": response.answer })
}

/// Interpret an answer as an approve/reject decision.
#[must_use]
pub fn parse_decision(answer: &str) -> Option<bool> {
    match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" | "ok" | "approve" | "approved" | "confirm" | "allow" => Some(true),
        "n" | "no" | "reject" | "rejected" | "deny" | "cancel" => Some(false),
        _ => None,
    }
}

fn decision(response: &UserResponse) -> Option<bool> {
    response.approved.or_else(|| parse_decision(&response.answer))
}

fn require_decision(kind: &str, response: &UserResponse) -> Result<bool> {
    decision(response).ok_or_else(|| {
        AppError::ValidationFailed(format!(
            "{kind} needs an explicit decision (yes/no), got {:?}",
            response.answer
        ))
    })
}

fn metadata_str<'a>(request: &'a InterruptRequest, key: &str) -> Option<&'a str> {
    request.metadata.get(key).and_then(serde_json::Value::as_str)
}

/// Free-form clarification question; any non-empty answer is accepted.
#[derive(Debug, Default)]
pub struct AskUserHandler;

impl InterruptHandler for AskUserHandler {
    fn format_question(&self, request: &InterruptRequest) -> String {
        let mut text = format!("\u{2753} {}", request.question);
        for (index, option) in request.options.iter().enumerate() {
            text.push_str(&format!("\n{}. {option}", index + 1));
        }
        text
    }

    fn validate(&self, _request: &InterruptRequest, response: &UserResponse) -> Result<()> {
        if response.answer.trim().is_empty() {
            return Err(AppError::ValidationFailed("answer must not be empty".into()));
        }
        Ok(())
    }

    fn handle(&self, _request: &InterruptRequest, response: &UserResponse) -> serde_json::Value {
        generic_payload(response)
    }
}

/// Plan review; needs an approve/reject decision, may carry modifications.
#[derive(Debug, Default)]
pub struct PlanApprovalHandler;

impl InterruptHandler for PlanApprovalHandler {
    fn format_question(&self, request: &InterruptRequest) -> String {
        format!(
            "\u{1f4cb} Plan approval needed\n\n{}\n\nReply \"approve\" or \"reject\".",
            request.question
        )
    }

    fn validate(&self, _request: &InterruptRequest, response: &UserResponse) -> Result<()> {
        require_decision("plan approval", response).map(|_| ())
    }

    fn handle(&self, _request: &InterruptRequest, response: &UserResponse) -> serde_json::Value {
        json!({
            "user_answer": response.answer,
            "approved": decision(response).unwrap_or(false),
            "modifications": response.modifications,
        })
    }
}

/// Confirmation of a single tool invocation.
#[derive(Debug, Default)]
pub struct ToolConfirmHandler;

impl InterruptHandler for ToolConfirmHandler {
    fn format_question(&self, request: &InterruptRequest) -> String {
        let tool = metadata_str(request, "tool").unwrap_or("tool");
        format!(
            "\u{1f527} Confirm `{tool}`\n\n{}\n\nReply yes or no.",
            request.question
        )
    }

    fn validate(&self, _request: &InterruptRequest, response: &UserResponse) -> Result<()> {
        require_decision("tool confirmation", response).map(|_| ())
    }

    fn handle(&self, _request: &InterruptRequest, response: &UserResponse) -> serde_json::Value {
        json!({
            "user_answer": response.answer,
            "approved": decision(response).unwrap_or(false),
        })
    }
}

/// Confirmation of a file-system operation.
#[derive(Debug, Default)]
pub struct FileOperationHandler;

impl InterruptHandler for FileOperationHandler {
    fn format_question(&self, request: &InterruptRequest) -> String {
        let operation = metadata_str(request, "operation").unwrap_or("modify");
        let path = metadata_str(request, "path").unwrap_or("(unspecified path)");
        format!(
            "\u{1f4c4} {operation} `{path}`\n\n{}\n\nReply yes or no.",
            request.question
        )
    }

    fn validate(&self, _request: &InterruptRequest, response: &UserResponse) -> Result<()> {
        require_decision("file operation", response).map(|_| ())
    }

    fn handle(&self, request: &InterruptRequest, response: &UserResponse) -> serde_json::Value {
        json!({
            "user_answer": response.answer,
            "approved": decision(response).unwrap_or(false),
            "path": metadata_str(request, "path"),
        })
    }
}

/// Built-in handlers keyed by kind.
#[must_use]
pub fn builtin_handlers() -> HashMap<InterruptKind, Arc<dyn InterruptHandler>> {
    let mut handlers: HashMap<InterruptKind, Arc<dyn InterruptHandler>> = HashMap::new();
    handlers.insert(InterruptKind::AskUser, Arc::new(AskUserHandler));
    handlers.insert(InterruptKind::PlanApproval, Arc::new(PlanApprovalHandler));
    handlers.insert(InterruptKind::ToolConfirm, Arc::new(ToolConfirmHandler));
    handlers.insert(InterruptKind::FileOperation, Arc::new(FileOperationHandler));
    handlers
}
