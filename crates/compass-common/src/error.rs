/// Application error taxonomy shared by every crate in the workspace.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("agent error: {0}")]
    Agent(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Human-readable category label shown next to user-facing messages.
    pub fn category(&self) -> &'static str {
        match self {
            Error::Database(_) => "Database Error",
            Error::Validation(_) => "Validation Error",
            Error::Agent(_) => "Agent Error",
            Error::Config(_) => "Configuration Error",
            Error::NotFound(_) => "Not Found",
            Error::Serialization(_) | Error::Io(_) => "General Error",
        }
    }

    /// Message safe to show to a student. Internal details stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            Error::Validation(msg) => msg.clone(),
            Error::NotFound(what) => format!("{what} was not found."),
            Error::Database(_) => {
                "We couldn't reach your saved data. Please try again later.".to_string()
            }
            Error::Agent(_) => {
                "The counseling assistant is unavailable right now. Please try again later."
                    .to_string()
            }
            _ => "Something went wrong. Our team has been notified.".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_match_variants() {
        assert_eq!(Error::Database("x".into()).category(), "Database Error");
        assert_eq!(Error::Validation("x".into()).category(), "Validation Error");
        assert_eq!(Error::Agent("x".into()).category(), "Agent Error");
    }

    #[test]
    fn validation_message_is_passed_through() {
        let err = Error::Validation("GPA must be between 0.0 and 5.0".into());
        assert_eq!(err.user_message(), "GPA must be between 0.0 and 5.0");
    }

    #[test]
    fn internal_details_are_hidden_from_users() {
        let err = Error::Database("no such table: profiles".into());
        assert!(!err.user_message().contains("profiles"));

        let err = Error::Config("missing key".into());
        assert!(err.user_message().starts_with("Something went wrong"));
    }
}
