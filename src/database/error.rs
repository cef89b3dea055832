use std::fmt;

/// Classified database failure. Repositories map every sqlx error
/// through [`DatabaseError::from_sqlx`] so callers can branch on kind
/// without knowing driver details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseErrorKind {
    NotFound,
    UniqueViolation { constraint: Option<String> },
    ForeignKeyViolation { constraint: Option<String> },
    Connection,
    Timeout,
    Unknown { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseError {
    kind: DatabaseErrorKind,
}

impl DatabaseError {
    pub fn new(kind: DatabaseErrorKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> &DatabaseErrorKind {
        &self.kind
    }

    pub fn from_sqlx(err: sqlx::Error) -> Self {
        let kind = match err {
            sqlx::Error::RowNotFound => DatabaseErrorKind::NotFound,
            sqlx::Error::PoolTimedOut => DatabaseErrorKind::Timeout,
            sqlx::Error::PoolClosed | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
                DatabaseErrorKind::Connection
            }
            sqlx::Error::Database(db) => {
                if db.is_unique_violation() {
                    DatabaseErrorKind::UniqueViolation {
                        constraint: db.constraint().map(str::to_string),
                    }
                } else if db.is_foreign_key_violation() {
                    DatabaseErrorKind::ForeignKeyViolation {
                        constraint: db.constraint().map(str::to_string),
                    }
                } else {
                    DatabaseErrorKind::Unknown {
                        message: db.to_string(),
                    }
                }
            }
            other => DatabaseErrorKind::Unknown {
                message: other.to_string(),
            },
        };
        Self { kind }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::NotFound)
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::UniqueViolation { .. })
    }

    /// Connection-level failures are worth retrying; data-shaped ones
    /// are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            DatabaseErrorKind::Connection | DatabaseErrorKind::Timeout
        )
    }
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            DatabaseErrorKind::NotFound => write!(f, "record not found"),
            DatabaseErrorKind::UniqueViolation { constraint } => match constraint {
                Some(name) => write!(f, "unique constraint violated: {name}"),
                None => write!(f, "unique constraint violated"),
            },
            DatabaseErrorKind::ForeignKeyViolation { constraint } => match constraint {
                Some(name) => write!(f, "foreign key constraint violated: {name}"),
                None => write!(f, "foreign key constraint violated"),
            },
            DatabaseErrorKind::Connection => write!(f, "database connection failure"),
            DatabaseErrorKind::Timeout => write!(f, "database operation timed out"),
            DatabaseErrorKind::Unknown { message } => write!(f, "database error: {message}"),
        }
    }
}

impl std::error::Error for DatabaseError {}
