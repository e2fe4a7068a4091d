use thiserror::Error;

/// Source position of a token or AST node, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pos {
    pub line: u32,
    pub col: u32,
}

impl Pos {
    pub fn new(line: u32, col: u32) -> Self {
        Self { line, col }
    }
}

impl std::fmt::Display for Pos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}, col {}", self.line, self.col)
    }
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("lexical error at {pos}: {msg}")]
    Lexical { pos: Pos, msg: String },

    #[error("syntax error at {pos}: expected {expected}, found '{found}'")]
    Syntax {
        pos: Pos,
        expected: String,
        found: String,
    },

    #[error("semantic error at {pos}: {msg}")]
    Semantic { pos: Pos, msg: String },

    #[error("plan error at {pos}: {msg}")]
    Plan { pos: Pos, msg: String },

    #[error("execution error in {operator}: {msg}")]
    Execution { operator: String, msg: String },

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("foreign key violation: {0}")]
    ForeignKeyViolation(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("corrupt page: {0}")]
    Corruption(String),

    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl DbError {
    pub fn execution(operator: impl Into<String>, msg: impl Into<String>) -> Self {
        DbError::Execution {
            operator: operator.into(),
            msg: msg.into(),
        }
    }

    /// Position of the error when it is derivable from source text.
    pub fn pos(&self) -> Option<Pos> {
        match self {
            DbError::Lexical { pos, .. }
            | DbError::Syntax { pos, .. }
            | DbError::Semantic { pos, .. }
            | DbError::Plan { pos, .. } => Some(*pos),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

impl From<serde_json::Error> for DbError {
    fn from(e: serde_json::Error) -> Self {
        DbError::Serialization(e.to_string())
    }
}
