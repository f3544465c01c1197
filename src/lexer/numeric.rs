//! Numeric literal grammar: decimal, hex, octal, binary, typed suffixes,
//! and floats. See spec §4.1.

use super::{Lexer, Token, TokenKind};

pub(super) fn lex_number(lx: &mut Lexer<'_>, start: usize) -> Token {
    if lx.peek_raw() == Some(b'0') && matches!(lx.peek_raw_at(1), Some(b'x') | Some(b'X')) {
        lx.bump_raw();
        lx.bump_raw();
        consume_digits(lx, |c| c.is_ascii_hexdigit());
        return finish(lx, start);
    }
    if lx.peek_raw() == Some(b'0') && matches!(lx.peek_raw_at(1), Some(b'o') | Some(b'O')) {
        lx.bump_raw();
        lx.bump_raw();
        consume_digits(lx, |c| (b'0'..=b'7').contains(&c));
        return finish(lx, start);
    }
    if lx.peek_raw() == Some(b'0') && matches!(lx.peek_raw_at(1), Some(b'b') | Some(b'B')) {
        lx.bump_raw();
        lx.bump_raw();
        consume_digits(lx, |c| c == b'0' || c == b'1');
        return finish(lx, start);
    }

    // Leading-zero decimal (`0123`) is invalid; a lone `0` is fine.
    let leads_with_zero = lx.peek_raw() == Some(b'0');
    consume_digits(lx, |c| c.is_ascii_digit());
    let int_end = lx.pos();
    if leads_with_zero && int_end - start > 1 && lx.peek_raw() != Some(b'.') {
        return lx.make_raw(TokenKind::Invalid, start);
    }

    let mut is_float = false;
    if lx.peek_raw() == Some(b'.') && matches!(lx.peek_raw_at(1), Some(c) if c.is_ascii_digit()) {
        is_float = true;
        lx.bump_raw();
        consume_digits(lx, |c| c.is_ascii_digit());
        if matches!(lx.peek_raw(), Some(b'e') | Some(b'E')) {
            lx.bump_raw();
            if matches!(lx.peek_raw(), Some(b'+') | Some(b'-')) {
                lx.bump_raw();
            }
            consume_digits(lx, |c| c.is_ascii_digit());
        }
    }

    if is_float {
        return lx.make_raw(TokenKind::FloatLiteral, start);
    }
    finish(lx, start)
}

fn consume_digits(lx: &mut Lexer<'_>, pred: impl Fn(u8) -> bool) {
    while matches!(lx.peek_raw(), Some(c) if pred(c)) {
        lx.bump_raw();
    }
}

/// Consume an optional typed suffix from `{u, l, ul, b, s, us}` and emit the
/// int-literal token.
fn finish(lx: &mut Lexer<'_>, start: usize) -> Token {
    match (lx.peek_raw(), lx.peek_raw_at(1)) {
        (Some(b'u'), Some(b'l')) | (Some(b'u'), Some(b's')) => {
            lx.bump_raw();
            lx.bump_raw();
        }
        (Some(b'u'), _) | (Some(b'l'), _) | (Some(b'b'), _) | (Some(b's'), _) => {
            lx.bump_raw();
        }
        _ => {}
    }
    lx.make_raw(TokenKind::IntLiteral, start)
}
