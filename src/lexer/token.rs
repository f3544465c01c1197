use crate::source::Span;

/// A lexed token. Carries only a span; the parser slices source text from
/// it on demand via `SourceMap::slice`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Eof,
    Invalid,
    Newline,

    // Structural
    Semi,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Dot,
    DotDot,
    Colon,
    Question,
    QuestionColon,

    // Literals
    IntLiteral,
    FloatLiteral,
    StringLiteral,
    RegexLiteral,
    SignalLiteral,
    Identifier,

    // Keywords
    KwVar,
    KwLet,
    KwFunction,
    KwInterface,
    KwType,
    KwIf,
    KwElif,
    KwElse,
    KwFor,
    KwWhile,
    KwDo,
    KwIn,
    KwCase,
    KwTry,
    KwCatch,
    KwFinally,
    KwThrow,
    KwBreak,
    KwContinue,
    KwReturn,
    KwAssert,
    KwTrue,
    KwFalse,
    KwNew,
    KwAs,
    KwIs,
    KwWith,
    KwSource,
    KwImportEnv,
    KwExportEnv,
    KwTypeof,

    // Operators
    Assign,
    EqEq,
    NotEq,
    Lt,
    Gt,
    Le,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    PercentEq,
    Amp,
    Pipe,
    Caret,
    Tilde,
    Bang,
    AndAnd,
    OrOr,

    // Interpolation
    DStringOpen,
    DStringClose,
    StrElement,
    DollarName,
    DollarBraceOpen,
    DollarParen,

    // Command mode
    CmdWord,
    Less,
    Great,
    DGreat,
    TLess,
    LessAmp,
    GreatAmp,
    FdGreat,
    FdDGreat,
    FdGreatAmp,
    AmpGreat,
    AmpDGreat,
    DSemi,
    PipeAmp,
    AmpBang,
    AmpPipe,
}
