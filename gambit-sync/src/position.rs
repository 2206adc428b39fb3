//! Helpers for the compact board notation (six-field FEN).
//!
//! The session layer never interprets chess rules. It only needs to count
//! pieces in the placement field, read the embedded side-to-move field, and
//! produce a copy with that one field rewritten.
use once_cell::sync::Lazy;
use regex::Regex;

use crate::state::Side;

static RANK_SHAPE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[pnbrqkPNBRQK1-8]{1,8}$").ok());

/// Placement field, if the encoding has eight well-formed ranks of eight squares.
#[must_use]
pub fn placement(encoded: &str) -> Option<&str> {
    let field = encoded.split_whitespace().next()?;
    let shape = RANK_SHAPE.as_ref()?;
    let mut ranks = 0;
    for rank in field.split('/') {
        if !shape.is_match(rank) {
            return None;
        }
        let width: u32 = rank
            .chars()
            .map(|c| c.to_digit(10).unwrap_or(1))
            .sum();
        if width != 8 {
            return None;
        }
        ranks += 1;
    }
    (ranks == 8).then_some(field)
}

/// Number of pieces on the board. Malformed encodings count as empty.
#[must_use]
pub fn piece_count(encoded: &str) -> usize {
    placement(encoded).map_or(0, |field| {
        field.chars().filter(char::is_ascii_alphabetic).count()
    })
}

#[must_use]
pub fn has_pieces(encoded: &str) -> bool {
    piece_count(encoded) > 0
}

/// Side named by the embedded turn field.
#[must_use]
pub fn side_to_move(encoded: &str) -> Option<Side> {
    let mut field = encoded.split_whitespace().nth(1)?.chars();
    let side = Side::from_fen_char(field.next()?)?;
    field.next().is_none().then_some(side)
}

/// Copy of `encoded` with only the turn field replaced.
///
/// Returns `None` when the encoding has no turn field to rewrite.
#[must_use]
pub fn with_side_to_move(encoded: &str, side: Side) -> Option<String> {
    let turn = side.fen_char().to_string();
    let mut fields: Vec<&str> = encoded.split_whitespace().collect();
    if fields.len() < 2 {
        return None;
    }
    fields[1] = &turn;
    Some(fields.join(" "))
}

/// True when both encodings place the same pieces on the same squares.
#[must_use]
pub fn same_placement(a: &str, b: &str) -> bool {
    matches!((placement(a), placement(b)), (Some(x), Some(y)) if x == y)
}
