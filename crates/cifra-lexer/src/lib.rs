//! cifra-lexer — analyse lexicale du format texte mmCIF
//!
//! Produit une séquence paresseuse et restartable de jetons typés au-dessus du
//! tampon glissant de `cifra-core` :
//! - valeurs nues, citées (`'...'`, `"..."`) et multilignes (`;...;`)
//! - mots réservés `data_`, `loop_`, `save_` et variables `_categorie.motcle`
//! - littéraux réservés `.` (omis) et `?` (inconnu)
//! - commentaires `#` (ligne entière ou fin de ligne)
//!
//! Les jetons portent des *spans* (tranche de la ligne courante, ou tampon de
//! travail multiligne) plutôt que des tranches : le texte se résout via
//! [`Tokenizer::bytes`] / [`Tokenizer::text`] tant que la ligne porteuse est
//! vivante. L'appelant doit consommer un jeton avant de demander le suivant
//! au-delà de sa ligne.
//!
//! Règle de terminaison des citations : la quote fermante doit être suivie
//! d'un blanc ou de la fin de ligne ; une quote en plein milieu d'un jeton est
//! un caractère ordinaire. Une valeur citée reste une valeur, même si son
//! contenu est `.` ou `?`.

#![deny(missing_docs)]

use cifra_core::{BufferOptions, CifError, CifResult, InputBuffer, PullSource};

/* ─────────────────────────── Jetons ─────────────────────────── */

/// Genre d'un jeton.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TokenKind {
    /// Valeur (nue, citée ou multiligne).
    Value,
    /// Littéral `.` nu.
    Omitted,
    /// Littéral `?` nu.
    Unknown,
    /// Mot réservé `loop_`.
    Loop,
    /// Mot réservé `data_...`.
    DataBlock,
    /// Mot réservé `save_...` (ouverture ou fermeture).
    SaveFrame,
    /// Variable `_categorie.motcle`.
    Variable,
}

/// Localisation du contenu d'un jeton.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokSpan {
    /// Tranche de la ligne courante, offsets relatifs au début de ligne.
    Line {
        /// Début inclus.
        start: u32,
        /// Fin exclue.
        end: u32,
    },
    /// Contenu accumulé dans le tampon de travail multiligne.
    Scratch,
    /// Aucun contenu (multiligne ignoré).
    Empty,
}

/// Jeton : genre, span, numéro de ligne d'origine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    /// Genre.
    pub kind: TokenKind,
    /// Localisation du contenu.
    pub span: TokSpan,
    /// Ligne (1-based) où le jeton commence.
    pub line: u64,
}

/* ─────────────────────────── Tokenizer ─────────────────────────── */

/// Analyseur lexical ligne à ligne, restartable entre blocs de données.
#[derive(Debug)]
pub struct Tokenizer<S> {
    input: InputBuffer<S>,
    /// Curseur dans la ligne courante.
    cursor: usize,
    /// Vrai tant que la ligne courante a potentiellement des jetons.
    line_ready: bool,
    /// Tampon de travail des valeurs multilignes (vit aussi longtemps que le
    /// lecteur ; écrasé au prochain jeton multiligne).
    scratch: String,
    /// Jeton rendu par `unget`, au plus un.
    pushed_back: Option<Token>,
}

impl<S: PullSource> Tokenizer<S> {
    /// Construit un tokenizer avec les réglages de tampon par défaut.
    pub fn new(source: S) -> Self {
        Self::with_options(source, BufferOptions::default())
    }

    /// Construit un tokenizer avec des réglages de tampon explicites.
    pub fn with_options(source: S, opts: BufferOptions) -> Self {
        Self {
            input: InputBuffer::with_options(source, opts),
            cursor: 0,
            line_ready: false,
            scratch: String::new(),
            pushed_back: None,
        }
    }

    /// Numéro de la ligne courante (1-based, 0 avant la première ligne).
    pub fn line_number(&self) -> u64 {
        self.input.line_number()
    }

    /// Octets de la ligne courante (pour résoudre les spans au moment du
    /// callback).
    pub fn line_bytes(&self) -> &[u8] {
        self.input.line()
    }

    /// Rend un jeton ; le prochain `next_token` le relivrera.
    ///
    /// Au plus un jeton peut être rendu à la fois.
    pub fn unget(&mut self, tok: Token) {
        debug_assert!(self.pushed_back.is_none());
        self.pushed_back = Some(tok);
    }

    /// Octets du contenu d'un jeton.
    pub fn bytes(&self, tok: &Token) -> &[u8] {
        match tok.span {
            TokSpan::Line { start, end } => &self.input.line()[start as usize..end as usize],
            TokSpan::Scratch => self.scratch.as_bytes(),
            TokSpan::Empty => b"",
        }
    }

    /// Contenu d'un jeton comme chaîne UTF-8.
    pub fn text(&self, tok: &Token) -> CifResult<&str> {
        core::str::from_utf8(self.bytes(tok))
            .map_err(|_| CifError::format("invalid UTF-8 in value", tok.line))
    }

    /// Jeton suivant, ou `None` à la fin de la source.
    ///
    /// Avec `ignore_multiline`, le contenu d'une valeur `;...;` est jeté sans
    /// copie (le terminateur est tout de même consommé) et le jeton rendu
    /// porte un span vide.
    pub fn next_token(&mut self, ignore_multiline: bool) -> CifResult<Option<Token>> {
        if let Some(tok) = self.pushed_back.take() {
            return Ok(Some(tok));
        }
        loop {
            if !self.line_ready {
                if !self.input.advance_line()? {
                    return Ok(None);
                }
                self.cursor = 0;
                self.line_ready = true;
                // `;` en colonne 0 ouvre une valeur multiligne
                if self.input.line().first() == Some(&b';') {
                    return self.lex_multiline(ignore_multiline).map(Some);
                }
            }
            let line = self.input.line();
            let mut i = self.cursor;
            while i < line.len() && is_space(line[i]) {
                i += 1;
            }
            if i >= line.len() || line[i] == b'#' {
                // ligne épuisée ou commentaire jusqu'à la fin de ligne
                self.line_ready = false;
                continue;
            }
            if line[i] == b'\'' || line[i] == b'"' {
                return self.lex_quoted(i).map(Some);
            }
            let start = i;
            while i < line.len() && !is_space(line[i]) {
                i += 1;
            }
            self.cursor = i;
            let word = &self.input.line()[start..i];
            let kind = classify(word);
            return Ok(Some(Token {
                kind,
                span: TokSpan::Line { start: start as u32, end: i as u32 },
                line: self.input.line_number(),
            }));
        }
    }

    /// Compte les jetons restants sur la ligne courante, jeton rendu compris.
    ///
    /// Sert au chemin rapide « ligne unique » des boucles : si une ligne porte
    /// au moins autant de jetons que la boucle a de colonnes, les valeurs de
    /// la ligne peuvent être livrées sans copie.
    pub fn tokens_left_on_line(&self) -> usize {
        let mut n = usize::from(self.pushed_back.is_some());
        if !self.line_ready {
            return n;
        }
        let line = self.input.line();
        let mut i = self.cursor;
        loop {
            while i < line.len() && is_space(line[i]) {
                i += 1;
            }
            if i >= line.len() || line[i] == b'#' {
                return n;
            }
            n += 1;
            if line[i] == b'\'' || line[i] == b'"' {
                let quote = line[i];
                i += 1;
                loop {
                    match line[i..].iter().position(|&b| b == quote) {
                        Some(rel) => {
                            i += rel + 1;
                            if i >= line.len() || is_space(line[i]) {
                                break;
                            }
                        }
                        None => return n, // citation non terminée : l'erreur sortira au lexage
                    }
                }
            } else {
                while i < line.len() && !is_space(line[i]) {
                    i += 1;
                }
            }
        }
    }

    /* ────────── Primitives internes ────────── */

    fn lex_quoted(&mut self, start: usize) -> CifResult<Token> {
        let line = self.input.line();
        let quote = line[start];
        let mut i = start + 1;
        loop {
            match line[i..].iter().position(|&b| b == quote) {
                Some(rel) => {
                    let pos = i + rel;
                    // la quote fermante doit précéder un blanc ou la fin de ligne
                    if pos + 1 >= line.len() || is_space(line[pos + 1]) {
                        self.cursor = pos + 1;
                        return Ok(Token {
                            kind: TokenKind::Value,
                            span: TokSpan::Line { start: (start + 1) as u32, end: pos as u32 },
                            line: self.input.line_number(),
                        });
                    }
                    i = pos + 1;
                }
                None => {
                    return Err(CifError::format(
                        "unterminated quoted value",
                        self.input.line_number(),
                    ))
                }
            }
        }
    }

    fn lex_multiline(&mut self, ignore: bool) -> CifResult<Token> {
        let opened_at = self.input.line_number();
        if !ignore {
            self.scratch.clear();
            let first = &self.input.line()[1..];
            self.scratch.push_str(
                core::str::from_utf8(first)
                    .map_err(|_| CifError::format("invalid UTF-8 in value", opened_at))?,
            );
        }
        loop {
            if !self.input.advance_line()? {
                return Err(CifError::format("unterminated multiline value", opened_at));
            }
            let line = self.input.line();
            if line.first() == Some(&b';') {
                // le reste de la ligne fermante reste tokenizable
                self.cursor = 1;
                self.line_ready = true;
                break;
            }
            if !ignore {
                self.scratch.push('\n');
                self.scratch.push_str(core::str::from_utf8(line).map_err(|_| {
                    CifError::format("invalid UTF-8 in value", self.input.line_number())
                })?);
            }
        }
        Ok(Token {
            kind: TokenKind::Value,
            span: if ignore { TokSpan::Empty } else { TokSpan::Scratch },
            line: opened_at,
        })
    }
}

#[inline]
fn is_space(b: u8) -> bool {
    b == b' ' || b == b'\t' || b == 0x0b || b == 0x0c
}

/// Classe un mot nu : mots réservés, littéraux réservés, variable, valeur.
fn classify(word: &[u8]) -> TokenKind {
    match word {
        b"." => TokenKind::Omitted,
        b"?" => TokenKind::Unknown,
        _ if word.first() == Some(&b'_') => TokenKind::Variable,
        _ if word.eq_ignore_ascii_case(b"loop_") => TokenKind::Loop,
        _ if starts_with_ci(word, b"data_") => TokenKind::DataBlock,
        _ if starts_with_ci(word, b"save_") => TokenKind::SaveFrame,
        _ => TokenKind::Value,
    }
}

#[inline]
fn starts_with_ci(word: &[u8], prefix: &[u8]) -> bool {
    word.len() >= prefix.len() && word[..prefix.len()].eq_ignore_ascii_case(prefix)
}

/* ─────────────────────────── Tests ─────────────────────────── */

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    use super::*;

    fn toks(src: &str) -> Vec<(TokenKind, String)> {
        let mut lx = Tokenizer::new(src.as_bytes());
        let mut out = Vec::new();
        while let Some(t) = lx.next_token(false).unwrap() {
            out.push((t.kind, lx.text(&t).unwrap().to_owned()));
        }
        out
    }

    #[test]
    fn reserved_words_and_values() {
        use TokenKind::*;
        let v = toks("data_x loop_ save_foo save_ _entry.id 1YTI . ?");
        assert_eq!(
            v,
            vec![
                (DataBlock, "data_x".into()),
                (Loop, "loop_".into()),
                (SaveFrame, "save_foo".into()),
                (SaveFrame, "save_".into()),
                (Variable, "_entry.id".into()),
                (Value, "1YTI".into()),
                (Omitted, ".".into()),
                (Unknown, "?".into()),
            ]
        );
    }

    #[test]
    fn reserved_words_are_case_insensitive() {
        use TokenKind::*;
        let v = toks("DATA_X LOOP_ SAVE_Y _Entry.ID");
        assert_eq!(v[0].0, DataBlock);
        assert_eq!(v[1].0, Loop);
        assert_eq!(v[2].0, SaveFrame);
        assert_eq!(v[3].0, Variable);
    }

    #[test]
    fn quoted_values() {
        use TokenKind::*;
        let v = toks("'abc' \"d e f\" 'it''s ok'");
        assert_eq!(
            v,
            vec![
                (Value, "abc".into()),
                (Value, "d e f".into()),
                // la quote interne n'est pas suivie d'un blanc : caractère ordinaire
                (Value, "it''s ok".into()),
            ]
        );
    }

    #[test]
    fn quoted_dot_stays_a_value() {
        use TokenKind::*;
        let v = toks("'.' \"?\"");
        assert_eq!(v, vec![(Value, ".".into()), (Value, "?".into())]);
    }

    #[test]
    fn quote_must_close() {
        let mut lx = Tokenizer::new(&b"'never closed"[..]);
        let err = lx.next_token(false).unwrap_err();
        assert!(err.to_string().contains("unterminated quoted value"));
    }

    #[test]
    fn comments() {
        use TokenKind::*;
        let v = toks("# full line\nabc # trailing\ndef");
        assert_eq!(v, vec![(Value, "abc".into()), (Value, "def".into())]);
    }

    #[test]
    fn multiline_value() {
        use TokenKind::*;
        let v = toks("before\n;first\nsecond line\n;\nafter\n");
        assert_eq!(
            v,
            vec![
                (Value, "before".into()),
                (Value, "first\nsecond line".into()),
                (Value, "after".into()),
            ]
        );
    }

    #[test]
    fn multiline_ignored_but_consumed() {
        let mut lx = Tokenizer::new(&b";skipped\ncontent\n;\nnext\n"[..]);
        let t = lx.next_token(true).unwrap().unwrap();
        assert_eq!(t.kind, TokenKind::Value);
        assert_eq!(lx.text(&t).unwrap(), "");
        let t = lx.next_token(false).unwrap().unwrap();
        assert_eq!(lx.text(&t).unwrap(), "next");
    }

    #[test]
    fn multiline_unterminated() {
        let mut lx = Tokenizer::new(&b";open\nnever closed\n"[..]);
        let err = lx.next_token(false).unwrap_err();
        assert!(err.to_string().contains("unterminated multiline value"));
    }

    #[test]
    fn unget_roundtrip() {
        let mut lx = Tokenizer::new(&b"one two"[..]);
        let t1 = lx.next_token(false).unwrap().unwrap();
        assert_eq!(lx.text(&t1).unwrap(), "one");
        lx.unget(t1);
        let t1b = lx.next_token(false).unwrap().unwrap();
        assert_eq!(lx.text(&t1b).unwrap(), "one");
        let t2 = lx.next_token(false).unwrap().unwrap();
        assert_eq!(lx.text(&t2).unwrap(), "two");
        assert!(lx.next_token(false).unwrap().is_none());
    }

    #[test]
    fn tokens_left_on_line_counts() {
        let mut lx = Tokenizer::new(&b"a b 'c d' e\nf\n"[..]);
        let t = lx.next_token(false).unwrap().unwrap();
        assert_eq!(lx.text(&t).unwrap(), "a");
        assert_eq!(lx.tokens_left_on_line(), 3);
        lx.unget(t);
        assert_eq!(lx.tokens_left_on_line(), 4);
    }

    #[test]
    fn line_numbers_on_tokens() {
        let mut lx = Tokenizer::new(&b"a\nb\n"[..]);
        let t = lx.next_token(false).unwrap().unwrap();
        assert_eq!(t.line, 1);
        let t = lx.next_token(false).unwrap().unwrap();
        assert_eq!(t.line, 2);
    }

    proptest! {
        /// Toute valeur citable ressort identique, y compris `.`, `?`, blancs
        /// et la quote opposée.
        #[test]
        fn quoted_roundtrip(v in "[a-z .?']{0,24}") {
            let src = format!("\"{v}\" end");
            let mut lx = Tokenizer::new(src.as_bytes());
            let t = lx.next_token(false).unwrap().unwrap();
            prop_assert_eq!(t.kind, TokenKind::Value);
            prop_assert_eq!(lx.text(&t).unwrap(), v.as_str());
        }
    }
}
