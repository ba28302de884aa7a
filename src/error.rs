#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("ERR: Value at {0} is not a string value.")]
    NotAString(String),

    #[error("ERR: Value at {0} is not a sorted set value.")]
    NotASortedSet(String),

    #[error("Error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArgCount(String),

    #[error("ERR syntax error")]
    SyntaxError,

    #[error("ERR -EX and -PX are mutually exclusive")]
    ExPxConflict,

    #[error("ERR -NX and -XX are mutually exclusive")]
    NxXxConflict,

    #[error("ERR value is not an integer or out of range")]
    NotInteger,

    #[error("ERR score values should be int or float, not string")]
    NotFloat,

    #[error("ERR score member should be in pairs")]
    OddPairCount,

    #[error("ERR -INCR only accepts a single score-member pair")]
    IncrSinglePairOnly,

    #[error("ERR unterminated quote")]
    UnterminatedQuote,
}

pub type ParseResult<T> = Result<T, ParseError>;
