//! Board Oracle backed by a chess.js-compatible object owned by the page.
use gambit_sync::{BoardOracle, Move, MoveResult, PieceKind, Side, Square};
use serde::Deserialize;
use serde_json::json;
use wasm_bindgen::prelude::*;

#[wasm_bindgen]
extern "C" {
    /// Rules engine supplied by the page. Anything with the chess.js method
    /// names works.
    #[derive(Debug, Clone)]
    pub type JsBoard;

    #[wasm_bindgen(method, catch)]
    fn load(this: &JsBoard, fen: &str) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(method, catch)]
    fn moves(this: &JsBoard, options: &JsValue) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(method, catch, js_name = "move")]
    fn play(this: &JsBoard, mv: &JsValue) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(method)]
    fn turn(this: &JsBoard) -> String;

    #[wasm_bindgen(method, js_name = "isCheckmate")]
    fn checkmate(this: &JsBoard) -> bool;

    #[wasm_bindgen(method, js_name = "isStalemate")]
    fn stalemate(this: &JsBoard) -> bool;

    #[wasm_bindgen(method, js_name = "isDraw")]
    fn draw(this: &JsBoard) -> bool;

    #[wasm_bindgen(method)]
    fn fen(this: &JsBoard) -> String;
}

/// Verbose move object as returned by chess.js.
#[derive(Debug, Deserialize)]
struct VerboseMove {
    from: String,
    to: String,
    piece: String,
    #[serde(default)]
    captured: Option<String>,
    #[serde(default)]
    promotion: Option<String>,
}

fn piece_from_letter(letter: &str) -> Option<PieceKind> {
    let c = letter.chars().next()?;
    PieceKind::from_fen_char(c).map(|(_, kind)| kind)
}

fn to_move(raw: VerboseMove) -> Option<Move> {
    Some(Move {
        from: Square::parse(&raw.from)?,
        to: Square::parse(&raw.to)?,
        piece: piece_from_letter(&raw.piece)?,
        captured: raw.captured.as_deref().and_then(piece_from_letter),
        promotion: raw.promotion.as_deref().and_then(piece_from_letter),
    })
}

fn to_js(value: &serde_json::Value) -> Option<JsValue> {
    js_sys::JSON::parse(&value.to_string()).ok()
}

fn from_js<T: for<'de> Deserialize<'de>>(value: &JsValue) -> Option<T> {
    if value.is_null() || value.is_undefined() {
        return None;
    }
    let text: String = js_sys::JSON::stringify(value).ok()?.into();
    serde_json::from_str(&text).ok()
}

#[derive(Debug, Clone)]
pub struct JsOracle {
    board: JsBoard,
}

impl JsOracle {
    #[must_use]
    pub const fn new(board: JsBoard) -> Self {
        Self { board }
    }
}

impl BoardOracle for JsOracle {
    fn load(&mut self, encoded: &str) -> bool {
        // Older chess.js returns a boolean, newer versions throw on bad input.
        match self.board.load(encoded) {
            Ok(result) => result.as_bool().unwrap_or(true),
            Err(_) => false,
        }
    }

    fn moves_from(&self, square: Square) -> Vec<Move> {
        let Some(options) = to_js(&json!({ "square": square.to_string(), "verbose": true })) else {
            return Vec::new();
        };
        self.board
            .moves(&options)
            .ok()
            .and_then(|list| from_js::<Vec<VerboseMove>>(&list))
            .unwrap_or_default()
            .into_iter()
            .filter_map(to_move)
            .collect()
    }

    fn apply_move(&mut self, mv: &Move) -> Option<MoveResult> {
        let promotion = mv
            .promotion
            .map_or('q', |kind| kind.fen_char(Side::Black))
            .to_string();
        let request = to_js(&json!({
            "from": mv.from.to_string(),
            "to": mv.to.to_string(),
            "promotion": promotion,
        }))?;
        let played = self.board.play(&request).ok()?;
        let applied = to_move(from_js(&played)?)?;
        Some(MoveResult {
            applied,
            encoded_position: self.board.fen(),
        })
    }

    fn side_to_move(&self) -> Side {
        self.board
            .turn()
            .chars()
            .next()
            .and_then(Side::from_fen_char)
            .unwrap_or(Side::White)
    }

    fn is_checkmate(&self) -> bool {
        self.board.checkmate()
    }

    fn is_stalemate(&self) -> bool {
        self.board.stalemate()
    }

    fn is_draw(&self) -> bool {
        self.board.draw()
    }

    fn encode(&self) -> String {
        self.board.fen()
    }
}
