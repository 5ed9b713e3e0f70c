//! cifra-reader — point d'entrée du lecteur mmCIF / BinaryCIF
//!
//! Un [`Reader`] enveloppe l'un des deux pilotes (texte ou binaire) et le
//! registre de catégories partagé. Usage type :
//!
//! ```
//! use cifra_core::{CategoryHandler, CellType, CifResult, Row};
//! use cifra_reader::Reader;
//!
//! struct Entry;
//! impl CategoryHandler for Entry {
//!     fn on_row(&mut self, row: &Row<'_>) -> CifResult<()> {
//!         assert_eq!(row.by_name("id").as_str()?, "1YTI");
//!         Ok(())
//!     }
//! }
//!
//! let src: &[u8] = b"data_x\n_entry.id 1YTI\n";
//! let mut reader = Reader::text(src);
//! let cat = reader.register_category("_entry", Box::new(Entry));
//! reader.register_keyword(cat, "id", CellType::Str);
//! while reader.read_block().unwrap() {}
//! ```
//!
//! Les enregistrements survivent d'un bloc à l'autre ; les valeurs de slot ne
//! vivent que de leur première observation au retour du callback de rangée.
//! Un lecteur n'est pas réentrant : un callback ne doit pas le piloter.

#![deny(missing_docs)]

pub use cifra_bcif::{BinaryReader, ByteType, Data, Encoding, ObjReader, StringTable};
pub use cifra_core::{
    BufferOptions, CategoryHandle, CategoryHandler, Cell, CellType, CifError, CifResult,
    Dispatcher, ErrorKind, KeywordHandle, PullSource, Row, SlotFlags, UnknownCategoryFn,
    UnknownKeywordFn,
};
pub use cifra_parser::TextReader;

/* ─────────────────────────── Lecteur ─────────────────────────── */

enum Mode<S> {
    Text(TextReader<S>),
    Binary(BinaryReader<S>),
}

/// Lecteur à callbacks au-dessus d'une source à tirage.
///
/// `read_block` renvoie `true` tant qu'il reste des blocs ; les erreurs
/// laissent le lecteur dans un état cohérent mais définitif : l'appelant doit
/// l'abandonner.
pub struct Reader<S> {
    disp: Dispatcher,
    mode: Mode<S>,
}

impl<S: PullSource> Reader<S> {
    /// Lecteur du format texte mmCIF.
    pub fn text(source: S) -> Self {
        Self { disp: Dispatcher::new(), mode: Mode::Text(TextReader::new(source)) }
    }

    /// Lecteur texte avec réglages de tampon explicites.
    pub fn text_with_options(source: S, opts: BufferOptions) -> Self {
        Self {
            disp: Dispatcher::new(),
            mode: Mode::Text(TextReader::with_options(source, opts)),
        }
    }

    /// Lecteur du format binaire BinaryCIF.
    pub fn binary(source: S) -> Self {
        Self { disp: Dispatcher::new(), mode: Mode::Binary(BinaryReader::new(source)) }
    }

    /// Lecteur binaire avec réglages de tampon explicites.
    pub fn binary_with_options(source: S, opts: BufferOptions) -> Self {
        Self {
            disp: Dispatcher::new(),
            mode: Mode::Binary(BinaryReader::with_options(source, opts)),
        }
    }

    /// Enregistre une catégorie ; voir [`Dispatcher::register_category`].
    pub fn register_category(
        &mut self,
        name: &str,
        handler: Box<dyn CategoryHandler>,
    ) -> CategoryHandle {
        self.disp.register_category(name, handler)
    }

    /// Enregistre un mot-clé ; le chemin texte livre toujours des chaînes,
    /// le type déclaré ne contraint que le chemin binaire.
    pub fn register_keyword(
        &mut self,
        cat: CategoryHandle,
        name: &str,
        ty: CellType,
    ) -> KeywordHandle {
        self.disp.register_keyword(cat, name, ty)
    }

    /// Installe le callback « catégorie inconnue ».
    pub fn set_unknown_category_callback(&mut self, cb: UnknownCategoryFn) {
        self.disp.set_unknown_category_callback(cb);
    }

    /// Installe le callback « mot-clé inconnu ».
    pub fn set_unknown_keyword_callback(&mut self, cb: UnknownKeywordFn) {
        self.disp.set_unknown_keyword_callback(cb);
    }

    /// Jette tous les gestionnaires et remet les callbacks à zéro.
    pub fn clear_categories(&mut self) {
        self.disp.clear_categories();
    }

    /// Lit un bloc de données entier. `Ok(true)` si d'autres blocs suivent.
    pub fn read_block(&mut self) -> CifResult<bool> {
        match &mut self.mode {
            Mode::Text(rd) => rd.read_block(&mut self.disp),
            Mode::Binary(rd) => rd.read_block(&mut self.disp),
        }
    }

    /// Épuise la source : lit tous les blocs restants.
    pub fn read_all(&mut self) -> CifResult<()> {
        while self.read_block()? {}
        Ok(())
    }
}

/* ─────────────────────────── Tests ─────────────────────────── */
