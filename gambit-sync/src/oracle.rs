//! Board Oracle seam.
//!
//! Chess legality is consumed, never implemented, by this crate. Hosts plug a
//! real rules engine in through [`BoardOracle`]. [`PlacementBoard`] is a
//! rules-free stand-in that moves pieces anywhere they are not blocked by a
//! friendly piece; the replay tester and the test suites drive it.
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::state::{EndReason, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PieceKind {
    Pawn,
    Knight,
    Bishop,
    Rook,
    Queen,
    King,
}

impl PieceKind {
    #[must_use]
    pub const fn from_fen_char(c: char) -> Option<(Side, Self)> {
        let side = if c.is_ascii_uppercase() {
            Side::White
        } else {
            Side::Black
        };
        let kind = match c.to_ascii_lowercase() {
            'p' => Self::Pawn,
            'n' => Self::Knight,
            'b' => Self::Bishop,
            'r' => Self::Rook,
            'q' => Self::Queen,
            'k' => Self::King,
            _ => return None,
        };
        Some((side, kind))
    }

    #[must_use]
    pub const fn fen_char(self, side: Side) -> char {
        let c = match self {
            Self::Pawn => 'p',
            Self::Knight => 'n',
            Self::Bishop => 'b',
            Self::Rook => 'r',
            Self::Queen => 'q',
            Self::King => 'k',
        };
        match side {
            Side::White => c.to_ascii_uppercase(),
            Side::Black => c,
        }
    }
}

/// Board square, `a1` = 0 through `h8` = 63.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Square(u8);

impl Square {
    #[must_use]
    pub const fn from_coords(file: u8, rank: u8) -> Option<Self> {
        if file < 8 && rank < 8 {
            Some(Self(rank * 8 + file))
        } else {
            None
        }
    }

    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let mut chars = text.chars();
        let file = chars.next()?;
        let rank = chars.next()?;
        if chars.next().is_some() || !('a'..='h').contains(&file) || !('1'..='8').contains(&rank)
        {
            return None;
        }
        Self::from_coords(file as u8 - b'a', rank as u8 - b'1')
    }

    #[must_use]
    pub const fn file(self) -> u8 {
        self.0 % 8
    }

    #[must_use]
    pub const fn rank(self) -> u8 {
        self.0 / 8
    }

    const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Square {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}",
            char::from(b'a' + self.file()),
            char::from(b'1' + self.rank())
        )
    }
}

impl TryFrom<String> for Square {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("invalid square '{value}'"))
    }
}

impl From<Square> for String {
    fn from(value: Square) -> Self {
        value.to_string()
    }
}

/// A move as reported by the oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Move {
    pub from: Square,
    pub to: Square,
    pub piece: PieceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captured: Option<PieceKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promotion: Option<PieceKind>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveResult {
    pub applied: Move,
    pub encoded_position: String,
}

/// Move-legality engine consumed by the session layer.
pub trait BoardOracle {
    /// Replace the oracle's position. Returns `false` and keeps the previous
    /// position when the encoding is rejected.
    fn load(&mut self, encoded: &str) -> bool;

    fn moves_from(&self, square: Square) -> Vec<Move>;

    /// Apply a move; `None` when the move is not legal in the current position.
    fn apply_move(&mut self, mv: &Move) -> Option<MoveResult>;

    fn side_to_move(&self) -> Side;

    fn is_checkmate(&self) -> bool;

    fn is_stalemate(&self) -> bool;

    fn is_draw(&self) -> bool;

    fn encode(&self) -> String;
}

/// Terminal verdict for the oracle's current position, if any.
pub fn terminal_state<O: BoardOracle + ?Sized>(oracle: &O) -> Option<EndReason> {
    if oracle.is_checkmate() {
        Some(EndReason::Checkmate)
    } else if oracle.is_stalemate() {
        Some(EndReason::Stalemate)
    } else if oracle.is_draw() {
        Some(EndReason::Draw)
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Piece {
    side: Side,
    kind: PieceKind,
}

/// Rules-free board.
///
/// Any piece of the side to move may go to any square not holding a friendly
/// piece; pawns reaching the far rank become queens. A side whose king has been
/// captured is "checkmated", a side with no moves is stalemated, and bare
/// kings or a 100-ply quiet streak are a draw.
#[derive(Debug, Clone)]
pub struct PlacementBoard {
    squares: [Option<Piece>; 64],
    side: Side,
    castling: String,
    halfmove: u32,
    fullmove: u32,
}

impl PlacementBoard {
    #[must_use]
    pub fn new() -> Self {
        let mut board = Self {
            squares: [None; 64],
            side: Side::White,
            castling: "-".to_string(),
            halfmove: 0,
            fullmove: 1,
        };
        board.load(crate::constants::INITIAL_POSITION);
        board
    }

    fn parse(encoded: &str) -> Option<Self> {
        let placement = crate::position::placement(encoded)?;
        let mut fields = encoded.split_whitespace().skip(1);
        let side = crate::position::side_to_move(encoded)?;
        fields.next();
        let castling = fields.next().unwrap_or("-").to_string();
        let _en_passant = fields.next();
        let halfmove = fields.next().map_or(Some(0), |f| f.parse().ok())?;
        let fullmove = fields.next().map_or(Some(1), |f| f.parse().ok())?;

        let mut squares = [None; 64];
        for (row, rank_text) in placement.split('/').enumerate() {
            let rank = 7 - u8::try_from(row).ok()?;
            let mut file = 0_u8;
            for c in rank_text.chars() {
                if let Some(skip) = c.to_digit(10) {
                    file += u8::try_from(skip).ok()?;
                    continue;
                }
                let (side, kind) = PieceKind::from_fen_char(c)?;
                let square = Square::from_coords(file, rank)?;
                squares[square.index()] = Some(Piece { side, kind });
                file += 1;
            }
        }
        Some(Self {
            squares,
            side,
            castling,
            halfmove,
            fullmove,
        })
    }

    fn has_king(&self, side: Side) -> bool {
        self.squares
            .iter()
            .flatten()
            .any(|p| p.side == side && p.kind == PieceKind::King)
    }

    fn has_any_move(&self) -> bool {
        (0..64_u8)
            .filter_map(|idx| Square::from_coords(idx % 8, idx / 8))
            .any(|sq| !self.moves_from(sq).is_empty())
    }
}

impl Default for PlacementBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl BoardOracle for PlacementBoard {
    fn load(&mut self, encoded: &str) -> bool {
        match Self::parse(encoded) {
            Some(parsed) => {
                *self = parsed;
                true
            }
            None => false,
        }
    }

    fn moves_from(&self, square: Square) -> Vec<Move> {
        let Some(piece) = self.squares[square.index()] else {
            return Vec::new();
        };
        if piece.side != self.side || !self.has_king(self.side) {
            return Vec::new();
        }
        let last_rank = match piece.side {
            Side::White => 7,
            Side::Black => 0,
        };
        (0..64_u8)
            .filter_map(|idx| Square::from_coords(idx % 8, idx / 8))
            .filter(|&to| to != square)
            .filter_map(|to| {
                let occupant = self.squares[to.index()];
                if occupant.is_some_and(|p| p.side == piece.side) {
                    return None;
                }
                let promotion = (piece.kind == PieceKind::Pawn && to.rank() == last_rank)
                    .then_some(PieceKind::Queen);
                Some(Move {
                    from: square,
                    to,
                    piece: piece.kind,
                    captured: occupant.map(|p| p.kind),
                    promotion,
                })
            })
            .collect()
    }

    fn apply_move(&mut self, mv: &Move) -> Option<MoveResult> {
        let applied = self
            .moves_from(mv.from)
            .into_iter()
            .find(|candidate| candidate.to == mv.to)?;
        let mover = self.squares[applied.from.index()].take()?;
        let kind = applied.promotion.unwrap_or(mover.kind);
        self.squares[applied.to.index()] = Some(Piece {
            side: mover.side,
            kind,
        });
        if applied.captured.is_some() || mover.kind == PieceKind::Pawn {
            self.halfmove = 0;
        } else {
            self.halfmove += 1;
        }
        if mover.side == Side::Black {
            self.fullmove += 1;
        }
        self.side = mover.side.opponent();
        Some(MoveResult {
            applied,
            encoded_position: self.encode(),
        })
    }

    fn side_to_move(&self) -> Side {
        self.side
    }

    fn is_checkmate(&self) -> bool {
        !self.has_king(self.side)
    }

    fn is_stalemate(&self) -> bool {
        self.has_king(self.side) && !self.has_any_move()
    }

    fn is_draw(&self) -> bool {
        let only_kings = self
            .squares
            .iter()
            .flatten()
            .all(|p| p.kind == PieceKind::King);
        only_kings || self.halfmove >= 100
    }

    fn encode(&self) -> String {
        let mut placement = String::new();
        for rank in (0..8_u8).rev() {
            let mut gap = 0;
            for file in 0..8_u8 {
                let piece = Square::from_coords(file, rank).and_then(|sq| self.squares[sq.index()]);
                match piece {
                    Some(p) => {
                        if gap > 0 {
                            placement.push_str(&gap.to_string());
                            gap = 0;
                        }
                        placement.push(p.kind.fen_char(p.side));
                    }
                    None => gap += 1,
                }
            }
            if gap > 0 {
                placement.push_str(&gap.to_string());
            }
            if rank > 0 {
                placement.push('/');
            }
        }
        format!(
            "{placement} {} {} - {} {}",
            self.side.fen_char(),
            self.castling,
            self.halfmove,
            self.fullmove
        )
    }
}
