use crate::domain::models::{normalize_due_date, FieldErrors, NewTask, Priority, TaskPatch};
use serde::Serialize;

pub const PASSWORD_MIN_LENGTH: usize = 8;
pub const PASSWORD_MAX_LENGTH: usize = 128;
pub const EMAIL_MAX_LENGTH: usize = 100;

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
}

impl LoginForm {
    pub fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        check_email(&self.email, &mut errors);
        if self.password.is_empty() {
            errors.push("password", "Password is required.");
        }
        errors.into_result()
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct RegisterForm {
    pub email: String,
    pub password: String,
    #[serde(skip)]
    pub confirm_password: String,
}

impl RegisterForm {
    pub fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        check_email(&self.email, &mut errors);
        check_password_length(&self.password, "password", &mut errors);
        if self.password != self.confirm_password {
            errors.push("confirm_password", "Passwords do not match.");
        }
        errors.into_result()
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ForgotPasswordForm {
    pub email: String,
}

impl ForgotPasswordForm {
    pub fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        check_email(&self.email, &mut errors);
        errors.into_result()
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ResetPasswordForm {
    pub token: String,
    pub new_password: String,
    #[serde(skip)]
    pub confirm_password: String,
}

impl ResetPasswordForm {
    pub fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        if self.token.trim().is_empty() {
            errors.push("token", "Invalid or missing reset token.");
        }
        check_password_length(&self.new_password, "new_password", &mut errors);
        if self.new_password != self.confirm_password {
            errors.push("confirm_password", "Passwords do not match.");
        }
        errors.into_result()
    }
}

/// Raw task form input as typed by the user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskForm {
    pub title: String,
    pub description: String,
    pub due_date: String,
    pub priority: String,
}

impl TaskForm {
    /// Validates every field and produces the create payload.
    pub fn to_new_task(&self) -> Result<NewTask, FieldErrors> {
        let mut errors = FieldErrors::new();
        let title = self.title.trim();
        if title.is_empty() {
            errors.push("title", "Title is required.");
        }
        let due_date = parse_optional_due_date(&self.due_date, &mut errors);
        let priority = parse_priority(&self.priority, &mut errors).unwrap_or_default();
        errors.into_result()?;

        Ok(NewTask {
            title: title.to_string(),
            description: non_empty(&self.description),
            due_date,
            priority,
        })
    }

    /// Like [`TaskForm::to_new_task`] but blank fields are left out of the patch.
    pub fn to_patch(&self) -> Result<TaskPatch, FieldErrors> {
        let mut errors = FieldErrors::new();
        let due_date = parse_optional_due_date(&self.due_date, &mut errors);
        let priority = parse_priority(&self.priority, &mut errors);
        errors.into_result()?;

        let patch = TaskPatch {
            title: non_empty(&self.title),
            description: non_empty(&self.description),
            due_date,
            priority,
            is_completed: None,
        };
        if patch.is_empty() {
            return Err(FieldErrors::general("Nothing to update."));
        }
        Ok(patch)
    }
}

fn check_email(email: &str, errors: &mut FieldErrors) {
    let email = email.trim();
    if email.is_empty() {
        errors.push("email", "Email is required.");
        return;
    }
    if email.len() > EMAIL_MAX_LENGTH {
        errors.push("email", "Email is too long.");
        return;
    }
    let Some((local, domain)) = email.split_once('@') else {
        errors.push("email", "Invalid email address.");
        return;
    };
    if local.is_empty() || !domain.contains('.') || domain.starts_with('.') || domain.ends_with('.')
    {
        errors.push("email", "Invalid email address.");
    }
}

fn check_password_length(password: &str, field: &str, errors: &mut FieldErrors) {
    let length = password.chars().count();
    if length < PASSWORD_MIN_LENGTH {
        errors.push(
            field,
            format!("Password must be at least {PASSWORD_MIN_LENGTH} characters long."),
        );
    } else if length > PASSWORD_MAX_LENGTH {
        errors.push(
            field,
            format!("Password must be at most {PASSWORD_MAX_LENGTH} characters long."),
        );
    }
}

fn parse_optional_due_date(raw: &str, errors: &mut FieldErrors) -> Option<String> {
    if raw.trim().is_empty() {
        return None;
    }
    match normalize_due_date(raw) {
        Ok(value) => Some(value),
        Err(_) => {
            errors.push("due_date", "Invalid due date.");
            None
        }
    }
}

fn parse_priority(raw: &str, errors: &mut FieldErrors) -> Option<Priority> {
    if raw.trim().is_empty() {
        return None;
    }
    match raw.parse::<Priority>() {
        Ok(priority) => Some(priority),
        Err(_) => {
            errors.push("priority", "Priority must be LOW, MEDIUM or HIGH.");
            None
        }
    }
}

fn non_empty(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
