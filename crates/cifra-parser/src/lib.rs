//! cifra-parser — interpréteur de blocs du format texte mmCIF
//!
//! Pilote la machine à états `data_` / variable / `loop_` / save frame
//! au-dessus du tokenizer et route les valeurs vers le [`Dispatcher`] :
//! - un bloc de données par appel à [`TextReader::read_block`] ; le second
//!   `data_` rencontré est rendu au tokenizer et « encore des blocs » est
//!   signalé à l'appelant
//! - hors boucle, les valeurs s'accumulent dans les slots et sont livrées à
//!   la clôture du bloc ou de la save frame
//! - dans une boucle, chaque rangée complète est livrée immédiatement ; une
//!   rangée qui tient sur la ligne courante est livrée sans copie (les
//!   cellules empruntent le tampon de ligne), sinon chaque cellule est
//!   copiée dans son slot
//!
//! Les callbacks « catégorie inconnue » / « mot-clé inconnu » sont notifiés
//! une fois par site d'apparition ; le contenu non reconnu est sauté à
//! moindre coût (`ignore_multiline`).

#![deny(missing_docs)]

use cifra_core::{BufferOptions, CifError, CifResult, Dispatcher, PullSource};
use cifra_lexer::{TokSpan, Token, TokenKind, Tokenizer};
use smallvec::SmallVec;

/// Liaisons de colonnes d'une boucle : index de mot-clé, ou `None` pour une
/// colonne consommée mais non distribuée.
type Bindings = SmallVec<[Option<usize>; 16]>;

/* ─────────────────────────── Lecteur texte ─────────────────────────── */

/// Interpréteur du format texte ; un bloc de données par `read_block`.
#[derive(Debug)]
pub struct TextReader<S> {
    tok: Tokenizer<S>,
    in_frame: bool,
}

impl<S: PullSource> TextReader<S> {
    /// Construit un lecteur texte avec les réglages de tampon par défaut.
    pub fn new(source: S) -> Self {
        Self::with_options(source, BufferOptions::default())
    }

    /// Construit un lecteur texte avec des réglages de tampon explicites.
    pub fn with_options(source: S, opts: BufferOptions) -> Self {
        Self { tok: Tokenizer::with_options(source, opts), in_frame: false }
    }

    /// Lit un bloc de données entier. `Ok(true)` si d'autres blocs suivent.
    ///
    /// À la clôture du bloc : livraison des valeurs en attente, puis callback
    /// de finalisation de chaque catégorie enregistrée.
    pub fn read_block(&mut self, disp: &mut Dispatcher) -> CifResult<bool> {
        let mut seen_block = false;
        let mut dirty = false;
        loop {
            let Some(tok) = self.tok.next_token(true)? else {
                if seen_block || dirty {
                    disp.finish_block()?;
                }
                return Ok(false);
            };
            match tok.kind {
                TokenKind::DataBlock => {
                    if seen_block {
                        self.tok.unget(tok);
                        disp.finish_block()?;
                        return Ok(true);
                    }
                    seen_block = true;
                    self.in_frame = false;
                }
                TokenKind::Variable => {
                    self.handle_variable(&tok, disp)?;
                    dirty = true;
                }
                TokenKind::Loop => {
                    self.handle_loop(disp)?;
                    dirty = true;
                }
                TokenKind::SaveFrame => {
                    if self.in_frame {
                        disp.end_frame()?;
                        self.in_frame = false;
                    } else {
                        self.in_frame = true;
                    }
                }
                // valeur égarée hors de toute construction : ignorée
                TokenKind::Value | TokenKind::Omitted | TokenKind::Unknown => {}
            }
        }
    }

    /* ────────── Variables hors boucle ────────── */

    fn handle_variable(&mut self, tok: &Token, disp: &mut Dispatcher) -> CifResult<()> {
        let line_no = tok.line;
        let (cat, kw) = {
            let full = self.tok.text(tok)?;
            let (cat_name, kw_name) = split_variable(full, line_no)?;
            match disp.lookup_category(cat_name) {
                None => {
                    disp.notify_unknown_category(cat_name, line_no);
                    (None, None)
                }
                Some(c) => match disp.lookup_keyword(c, kw_name) {
                    None => {
                        disp.notify_unknown_keyword(cat_name, kw_name, line_no);
                        (Some(c), None)
                    }
                    Some(k) => (Some(c), Some(k)),
                },
            }
        };
        let (Some(cat), Some(kw)) = (cat, kw) else {
            // la valeur suivante sera sautée par la boucle principale
            return Ok(());
        };
        let Some(val) = self.tok.next_token(false)? else {
            return Err(CifError::format("missing value for variable", line_no));
        };
        match val.kind {
            TokenKind::Omitted => disp.set_omitted(cat, kw),
            TokenKind::Unknown => disp.set_unknown(cat, kw),
            TokenKind::Value => disp.set_str_owned(cat, kw, self.tok.text(&val)?),
            _ => {
                return Err(CifError::format("expected value after variable", val.line));
            }
        }
        Ok(())
    }

    /* ────────── Boucles ────────── */

    fn handle_loop(&mut self, disp: &mut Dispatcher) -> CifResult<()> {
        // en-tête : une suite de variables, toutes de la même catégorie
        let mut cat: Option<usize> = None;
        let mut cat_name = String::new();
        let mut bindings: Bindings = SmallVec::new();
        let lookahead = loop {
            let Some(tok) = self.tok.next_token(false)? else {
                break None;
            };
            if tok.kind != TokenKind::Variable {
                break Some(tok);
            }
            let line_no = tok.line;
            let full = self.tok.text(&tok)?;
            let (this_cat, kw_name) = split_variable(full, line_no)?;
            if bindings.is_empty() {
                cat_name = this_cat.to_owned();
                cat = disp.lookup_category(this_cat);
                if cat.is_none() {
                    disp.notify_unknown_category(this_cat, line_no);
                }
            } else if !this_cat.eq_ignore_ascii_case(&cat_name) {
                return Err(CifError::format(
                    format!("mismatched categories in loop: `{cat_name}` and `{this_cat}`"),
                    line_no,
                ));
            }
            let binding = match cat {
                Some(c) => {
                    let k = disp.lookup_keyword(c, kw_name);
                    if k.is_none() {
                        disp.notify_unknown_keyword(this_cat, kw_name, line_no);
                    }
                    k
                }
                None => None,
            };
            bindings.push(binding);
        };
        if bindings.is_empty() {
            return Err(CifError::format(
                "loop_ not followed by variables",
                self.tok.line_number(),
            ));
        }
        // le premier jeton hors en-tête doit ouvrir une rangée
        match lookahead {
            Some(tok) if is_value_class(tok.kind) => self.tok.unget(tok),
            Some(tok) => return Err(CifError::format("loop with no data", tok.line)),
            None => {
                return Err(CifError::format("loop with no data", self.tok.line_number()))
            }
        }
        self.read_loop_rows(disp, cat, &bindings)
    }

    /// Rangées : exactement `n` jetons-valeurs par rangée ; sortie propre
    /// sur frontière de rangée, erreur au milieu d'une rangée.
    fn read_loop_rows(
        &mut self,
        disp: &mut Dispatcher,
        cat: Option<usize>,
        bindings: &Bindings,
    ) -> CifResult<()> {
        let ncols = bindings.len();
        loop {
            let first_binding_null = bindings[0].is_none();
            let Some(first) = self.tok.next_token(first_binding_null)? else {
                return Ok(());
            };
            if !is_value_class(first.kind) {
                self.tok.unget(first);
                return Ok(());
            }
            // une rangée qui tient sur la ligne courante est livrée sans copie
            let one_line = self.tok.tokens_left_on_line() >= ncols - 1;
            self.assign(disp, cat, bindings[0], &first, one_line)?;
            for j in 1..ncols {
                let Some(val) = self.tok.next_token(bindings[j].is_none())? else {
                    return Err(CifError::format(
                        "loop ended in mid-row",
                        self.tok.line_number(),
                    ));
                };
                if !is_value_class(val.kind) {
                    return Err(CifError::format("loop ended in mid-row", val.line));
                }
                self.assign(disp, cat, bindings[j], &val, one_line)?;
            }
            if let Some(c) = cat {
                disp.fire_row(c, self.tok.line_bytes())?;
            }
        }
    }

    /// Dépose une cellule de boucle dans son slot (ou la jette si la colonne
    /// n'est pas distribuée).
    fn assign(
        &self,
        disp: &mut Dispatcher,
        cat: Option<usize>,
        binding: Option<usize>,
        val: &Token,
        one_line: bool,
    ) -> CifResult<()> {
        let (Some(c), Some(k)) = (cat, binding) else {
            return Ok(());
        };
        match val.kind {
            TokenKind::Omitted => disp.set_omitted(c, k),
            TokenKind::Unknown => disp.set_unknown(c, k),
            _ => match (one_line, val.span) {
                (true, TokSpan::Line { start, end }) => {
                    // valide l'UTF-8 avant de n'emprunter que le span
                    self.tok.text(val)?;
                    disp.set_str_span(c, k, start as usize, end as usize);
                }
                _ => disp.set_str_owned(c, k, self.tok.text(val)?),
            },
        }
        Ok(())
    }
}

#[inline]
fn is_value_class(kind: TokenKind) -> bool {
    matches!(kind, TokenKind::Value | TokenKind::Omitted | TokenKind::Unknown)
}

/// Scinde `_categorie.motcle` au premier `.` ; le `_` de tête fait partie du
/// nom de catégorie.
fn split_variable(full: &str, line: u64) -> CifResult<(&str, &str)> {
    match full.find('.') {
        Some(dot) => Ok((&full[..dot], &full[dot + 1..])),
        None => Err(CifError::format(format!("missing `.` in variable `{full}`"), line)),
    }
}

/* ─────────────────────────── Tests ─────────────────────────── */

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use cifra_core::{CategoryHandler, Cell, CellType, Row};
    use pretty_assertions::assert_eq;

    use super::*;

    /// Journalise chaque événement d'une catégorie sous forme de texte plat.
    struct Log {
        events: Rc<RefCell<Vec<String>>>,
        keys: Vec<String>,
    }

    impl CategoryHandler for Log {
        fn on_row(&mut self, row: &Row<'_>) -> CifResult<()> {
            let mut parts = Vec::new();
            for (i, key) in self.keys.iter().enumerate() {
                let cell = row.at(i);
                let shown = match cell {
                    Cell::Missing => "<missing>".to_owned(),
                    Cell::Omitted => "<omitted>".to_owned(),
                    Cell::Unknown => "<unknown>".to_owned(),
                    Cell::Str(s) => s.to_owned(),
                    Cell::Int(v) => v.to_string(),
                    Cell::Float(v) => v.to_string(),
                };
                parts.push(format!("{key}={shown}"));
            }
            self.events.borrow_mut().push(format!("row {}", parts.join(" ")));
            Ok(())
        }

        fn on_end_frame(&mut self) -> CifResult<()> {
            self.events.borrow_mut().push("end_frame".to_owned());
            Ok(())
        }

        fn on_finish(&mut self) -> CifResult<()> {
            self.events.borrow_mut().push("finish".to_owned());
            Ok(())
        }
    }

    fn register(
        disp: &mut Dispatcher,
        name: &str,
        keys: &[&str],
    ) -> Rc<RefCell<Vec<String>>> {
        let events = Rc::new(RefCell::new(Vec::new()));
        let handler = Log {
            events: Rc::clone(&events),
            keys: keys.iter().map(|&k| k.to_owned()).collect(),
        };
        let cat = disp.register_category(name, Box::new(handler));
        for &k in keys {
            disp.register_keyword(cat, k, CellType::Str);
        }
        events
    }

    fn run(src: &str, cats: &[(&str, &[&str])]) -> Vec<(String, Vec<String>)> {
        let mut disp = Dispatcher::new();
        let logs: Vec<_> = cats
            .iter()
            .map(|&(name, keys)| (name.to_owned(), register(&mut disp, name, keys)))
            .collect();
        let mut rd = TextReader::new(src.as_bytes());
        while rd.read_block(&mut disp).unwrap() {}
        logs.into_iter()
            .map(|(name, log)| (name, log.borrow().clone()))
            .collect()
    }

    #[test]
    fn single_valued_category() {
        // S1 : une valeur libre, livrée à la clôture du bloc
        let out = run("data_x\n_entry.id   1YTI\n", &[("_entry", &["id"])]);
        assert_eq!(out[0].1, vec!["row id=1YTI", "finish"]);
    }

    #[test]
    fn omitted_vs_unknown_in_loop() {
        // S2
        let out = run(
            "data_x\nloop_\n_t.a\n_t.b\n. ?\n",
            &[("_t", &["a", "b"])],
        );
        assert_eq!(out[0].1, vec!["row a=<omitted> b=<unknown>", "finish"]);
    }

    #[test]
    fn quoted_dot_is_a_value() {
        // S3
        let out = run("data_x\n_t.a '.'\n", &[("_t", &["a"])]);
        assert_eq!(out[0].1, vec!["row a=.", "finish"]);
    }

    #[test]
    fn multirow_loop_with_multiline_cell() {
        // S4 : trois colonnes, la dernière cellule de la 3e rangée est un
        // bloc multiligne
        let src = "data_x\nloop_\n_t.a\n_t.b\n_t.c\n\
                   1 2 3\n4 5 6\n7 8\n;two\nlines\n;\n";
        let out = run(src, &[("_t", &["a", "b", "c"])]);
        assert_eq!(
            out[0].1,
            vec![
                "row a=1 b=2 c=3",
                "row a=4 b=5 c=6",
                "row a=7 b=8 c=two\nlines",
                "finish",
            ]
        );
    }

    #[test]
    fn one_line_and_split_rows_agree() {
        // invariant : mêmes données logiques, que la rangée tienne ou non sur
        // une seule ligne
        let flat = run(
            "data_x\nloop_\n_t.a\n_t.b\n1 2\n3 4\n",
            &[("_t", &["a", "b"])],
        );
        let split = run(
            "data_x\nloop_\n_t.a\n_t.b\n1\n2\n3\n4\n",
            &[("_t", &["a", "b"])],
        );
        assert_eq!(flat, split);
    }

    #[test]
    fn multiple_rows_on_one_line() {
        let out = run(
            "data_x\nloop_\n_t.a\n_t.b\n1 2 3 4\n",
            &[("_t", &["a", "b"])],
        );
        assert_eq!(out[0].1, vec!["row a=1 b=2", "row a=3 b=4", "finish"]);
    }

    #[test]
    fn unknown_category_notified_once_per_site() {
        // S6
        let mut disp = Dispatcher::new();
        let events = register(&mut disp, "_entry", &["id"]);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen2 = Rc::clone(&seen);
        disp.set_unknown_category_callback(Box::new(move |name, line| {
            seen2.borrow_mut().push((name.to_owned(), line));
        }));
        let mut rd = TextReader::new(&b"data_x\n_newcat.x val\n_entry.id 1\n"[..]);
        assert!(!rd.read_block(&mut disp).unwrap());
        assert_eq!(seen.borrow().as_slice(), &[("_newcat".to_owned(), 2)]);
        assert_eq!(events.borrow().as_slice(), &["row id=1", "finish"]);
    }

    #[test]
    fn unknown_keyword_notified() {
        let mut disp = Dispatcher::new();
        register(&mut disp, "_t", &["a"]);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen2 = Rc::clone(&seen);
        disp.set_unknown_keyword_callback(Box::new(move |cat, kw, line| {
            seen2.borrow_mut().push(format!("{cat}.{kw}@{line}"));
        }));
        let mut rd = TextReader::new(&b"data_x\n_t.zzz v\n"[..]);
        rd.read_block(&mut disp).unwrap();
        assert_eq!(seen.borrow().as_slice(), &["_t.zzz@2".to_owned()]);
    }

    #[test]
    fn case_insensitive_matching() {
        let out = run("data_x\n_ENTRY.ID abc\n", &[("_Entry", &["Id"])]);
        assert_eq!(out[0].1, vec!["row Id=abc", "finish"]);
    }

    #[test]
    fn save_frames_fire_end_frame() {
        let src = "data_x\nsave_foo\n_t.a 1\nsave_\n_t.a 2\n";
        let out = run(src, &[("_t", &["a"])]);
        assert_eq!(
            out[0].1,
            vec!["end_frame", "row a=1", "row a=2", "finish"]
        );
    }

    #[test]
    fn two_blocks_two_calls() {
        let mut disp = Dispatcher::new();
        let events = register(&mut disp, "_t", &["a"]);
        let mut rd = TextReader::new(&b"data_x\n_t.a 1\ndata_y\n_t.a 2\n"[..]);
        assert!(rd.read_block(&mut disp).unwrap());
        assert_eq!(events.borrow().as_slice(), &["row a=1", "finish"]);
        assert!(!rd.read_block(&mut disp).unwrap());
        assert_eq!(
            events.borrow().as_slice(),
            &["row a=1", "finish", "row a=2", "finish"]
        );
    }

    #[test]
    fn duplicate_keyword_overwrites() {
        let out = run("data_x\n_t.a first\n_t.a second\n", &[("_t", &["a"])]);
        assert_eq!(out[0].1, vec!["row a=second", "finish"]);
    }

    #[test]
    fn loop_mixed_categories_is_an_error() {
        let mut disp = Dispatcher::new();
        register(&mut disp, "_t", &["a"]);
        let mut rd = TextReader::new(&b"data_x\nloop_\n_t.a\n_u.b\n1 2\n"[..]);
        let err = rd.read_block(&mut disp).unwrap_err();
        assert!(err.to_string().contains("mismatched categories"));
    }

    #[test]
    fn loop_short_row_is_an_error() {
        let mut disp = Dispatcher::new();
        register(&mut disp, "_t", &["a", "b"]);
        let mut rd = TextReader::new(&b"data_x\nloop_\n_t.a\n_t.b\n1 2 3\ndata_y\n"[..]);
        let err = rd.read_block(&mut disp).unwrap_err();
        assert!(err.to_string().contains("mid-row"));
    }

    #[test]
    fn loop_without_data_is_an_error() {
        let mut disp = Dispatcher::new();
        register(&mut disp, "_t", &["a"]);
        let mut rd = TextReader::new(&b"data_x\nloop_\n_t.a\ndata_y\n"[..]);
        let err = rd.read_block(&mut disp).unwrap_err();
        assert!(err.to_string().contains("loop with no data"));
    }

    #[test]
    fn variable_without_dot_is_an_error() {
        let mut disp = Dispatcher::new();
        register(&mut disp, "_t", &["a"]);
        let mut rd = TextReader::new(&b"data_x\n_nodot v\n"[..]);
        let err = rd.read_block(&mut disp).unwrap_err();
        assert!(err.to_string().contains("missing `.`"));
    }

    #[test]
    fn unregistered_multiline_is_skipped() {
        // la valeur multiligne d'une catégorie inconnue est consommée sans copie
        let src = "data_x\n_other.big\n;lots\nof text\n;\n_t.a ok\n";
        let out = run(src, &[("_t", &["a"])]);
        assert_eq!(out[0].1, vec!["row a=ok", "finish"]);
    }
}
