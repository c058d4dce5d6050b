use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("duplicate task name: {0}")]
    DuplicateTask(String),

    #[error("task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: String, dependency: String },

    #[error("dependency cycle: {}", .members.join(" -> "))]
    Cycle { members: Vec<String> },

    #[error("task '{0}' has no interval and no interval-bearing ancestor")]
    UnreachableTask(String),

    #[error("task '{task}' {field} references '{name}', which is not in its dependency closure")]
    UndeclaredReference {
        task: String,
        field: &'static str,
        name: String,
    },

    #[error("task '{task}' references unknown exchange '{exchange}'")]
    UnknownExchange { task: String, exchange: String },

    #[error("task '{task}' has function '{function}' but no exchange binding")]
    MissingExchange { task: String, function: String },

    #[error("task '{task}' has a zero interval")]
    InvalidInterval { task: String },

    #[error("no such task: {0}")]
    TaskNotFound(String),

    #[error("task '{task}' {field}: {source}")]
    Syntax {
        task: String,
        field: &'static str,
        source: crate::expr::ParseError,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
