use crate::core::value::Value;
use serde::{Deserialize, Serialize};

/// Position a job has safely moved past in its source.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Cursor {
    /// Nothing committed yet.
    None,

    /// Every row with `column <= value` is committed.
    Key { column: String, value: Value },

    /// The first `offset` rows of the ordered source are committed.
    RowOffset { offset: u64 },
}

impl Cursor {
    pub fn is_none(&self) -> bool {
        matches!(self, Cursor::None)
    }

    /// Merges two cursors keeping the furthest position. Cursors of different
    /// kinds do not merge and `self` wins.
    pub fn advance(self, other: Cursor) -> Cursor {
        match (self, other) {
            (Cursor::None, other) => other,
            (current, Cursor::None) => current,
            (
                Cursor::Key { column, value },
                Cursor::Key {
                    column: other_col,
                    value: other_val,
                },
            ) if column.eq_ignore_ascii_case(&other_col) => Cursor::Key {
                column,
                value: value.max_of(other_val),
            },
            (Cursor::RowOffset { offset }, Cursor::RowOffset { offset: other }) => {
                Cursor::RowOffset {
                    offset: offset.max(other),
                }
            }
            (current, _) => current,
        }
    }

    /// True when `other` lies strictly behind `self`.
    pub fn is_ahead_of(&self, other: &Cursor) -> bool {
        match (self, other) {
            (Cursor::None, _) => false,
            (_, Cursor::None) => true,
            (Cursor::Key { value: a, .. }, Cursor::Key { value: b, .. }) => {
                a.compare(b) == Some(std::cmp::Ordering::Greater)
            }
            (Cursor::RowOffset { offset: a }, Cursor::RowOffset { offset: b }) => a > b,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(v: i64) -> Cursor {
        Cursor::Key {
            column: "txn_id".into(),
            value: Value::Int(v),
        }
    }

    #[test]
    fn test_advance_never_moves_backwards() {
        assert_eq!(key(10).advance(key(4)), key(10));
        assert_eq!(key(4).advance(key(10)), key(10));
        assert_eq!(Cursor::None.advance(key(3)), key(3));
        assert_eq!(
            Cursor::RowOffset { offset: 9 }.advance(Cursor::RowOffset { offset: 2 }),
            Cursor::RowOffset { offset: 9 }
        );
    }

    #[test]
    fn test_is_ahead_of() {
        assert!(key(5).is_ahead_of(&key(4)));
        assert!(!key(4).is_ahead_of(&key(4)));
        assert!(key(1).is_ahead_of(&Cursor::None));
        assert!(!Cursor::None.is_ahead_of(&key(1)));
    }
}
