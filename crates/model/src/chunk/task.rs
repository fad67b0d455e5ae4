use crate::core::value::Value;
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum ChunkBound {
    Unbounded,
    Key(Value),
    Row(u64),
}

impl fmt::Display for ChunkBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkBound::Unbounded => write!(f, "-"),
            ChunkBound::Key(value) => write!(f, "{value}"),
            ChunkBound::Row(row) => write!(f, "#{row}"),
        }
    }
}

/// One unit of work handed to a worker.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChunkTask {
    pub chunk_index: usize,
    pub lower_bound: ChunkBound,
    pub upper_bound: ChunkBound,
    pub sql: String,
    pub deadline: Option<Duration>,
}

impl ChunkTask {
    pub fn new(chunk_index: usize, lower_bound: ChunkBound, upper_bound: ChunkBound, sql: String) -> Self {
        ChunkTask {
            chunk_index,
            lower_bound,
            upper_bound,
            sql,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }
}
