//! Tokens
//!
//! The immutable units of data that flow between processes. A token is
//! either a reference to a file on disk, a scalar parameter value, or a
//! batch of tokens collected by a stream-to-substream aggregator.

use serde::Serialize;

use super::process::ProcessId;

/// A file produced (or supplied) somewhere in the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileToken {
    /// Final path of the file, relative to the working directory unless absolute
    pub path: String,
    /// Process that produced the file (None for paths injected by callers)
    pub producer: Option<ProcessId>,
    /// Intermediate file that may be removed after a successful run
    pub temp: bool,
}

/// A scalar parameter value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParamToken {
    pub value: String,
}

/// One unit of data on a port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Token {
    File(FileToken),
    Param(ParamToken),
    /// Ordered collection emitted by a stream-to-substream aggregator
    Batch(Vec<Token>),
}

impl Token {
    /// Creates a file token produced by a process.
    pub fn file(path: impl Into<String>, producer: Option<ProcessId>) -> Self {
        Token::File(FileToken {
            path: path.into(),
            producer,
            temp: false,
        })
    }

    /// Creates a parameter token.
    pub fn param(value: impl Into<String>) -> Self {
        Token::Param(ParamToken {
            value: value.into(),
        })
    }

    /// Returns the path if this is a file token.
    pub fn path(&self) -> Option<&str> {
        match self {
            Token::File(f) => Some(&f.path),
            _ => None,
        }
    }

    /// Returns the string a single-valued placeholder renders to.
    ///
    /// Batches have no single value; use [`Token::flatten`] for those.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Token::File(f) => Some(&f.path),
            Token::Param(p) => Some(&p.value),
            Token::Batch(_) => None,
        }
    }

    /// All leaf values in order, descending into nested batches.
    pub fn flatten(&self) -> Vec<&str> {
        match self {
            Token::File(f) => vec![f.path.as_str()],
            Token::Param(p) => vec![p.value.as_str()],
            Token::Batch(items) => items.iter().flat_map(|t| t.flatten()).collect(),
        }
    }

    /// Number of items in a batch (1 for plain tokens).
    pub fn len(&self) -> usize {
        match self {
            Token::Batch(items) => items.len(),
            _ => 1,
        }
    }

    /// True for an empty batch.
    pub fn is_empty(&self) -> bool {
        matches!(self, Token::Batch(items) if items.is_empty())
    }

    /// Temporary file tokens, descending into batches.
    pub fn temp_paths(&self) -> Vec<&str> {
        match self {
            Token::File(f) if f.temp => vec![f.path.as_str()],
            Token::Batch(items) => items.iter().flat_map(|t| t.temp_paths()).collect(),
            _ => Vec::new(),
        }
    }
}
