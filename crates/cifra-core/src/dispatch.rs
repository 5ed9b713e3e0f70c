//! Registre insensible à la casse et dispatch de catégories.
//!
//! Les catégories et leurs mots-clés sont stockés dans l'ordre
//! d'enregistrement (les poignées restent stables) ; un index trié à part,
//! construit paresseusement au premier lookup, donne la recherche
//! dichotomique insensible à la casse ASCII. Les tables sont petites
//! (dizaines de catégories, quelques mots-clés chacune) : des tableaux plats
//! battent une table de hachage.

use crate::{Cell, CellType, CifResult, SlotFlags};

/* ─────────────────────────── Callbacks ─────────────────────────── */

/// Callback « catégorie inconnue » : nom tel qu'écrit (avec `_` de tête) et
/// numéro de ligne (0 en mode binaire).
pub type UnknownCategoryFn = Box<dyn FnMut(&str, u64)>;

/// Callback « mot-clé inconnu » : catégorie, mot-clé, numéro de ligne.
pub type UnknownKeywordFn = Box<dyn FnMut(&str, &str, u64)>;

/// Réactions d'une catégorie enregistrée.
///
/// Le trait object est à la fois le gestionnaire et son état opaque ; `Drop`
/// tient lieu de hook de libération.
pub trait CategoryHandler {
    /// Une ligne complète de la catégorie est disponible.
    ///
    /// Les tranches empruntées de `row` ne doivent pas survivre au retour.
    fn on_row(&mut self, row: &Row<'_>) -> CifResult<()>;

    /// Fin d'une save frame (mode texte uniquement).
    fn on_end_frame(&mut self) -> CifResult<()> {
        Ok(())
    }

    /// Fin de bloc de données.
    fn on_finish(&mut self) -> CifResult<()> {
        Ok(())
    }
}

/* ─────────────────────────── Poignées ─────────────────────────── */

/// Poignée stable d'une catégorie enregistrée.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryHandle(pub(crate) u32);

impl CategoryHandle {
    /// Index de la catégorie dans l'ordre d'enregistrement.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Poignée stable d'un mot-clé, relative à sa catégorie.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeywordHandle(pub(crate) u32);

impl KeywordHandle {
    /// Index du mot-clé dans l'ordre d'enregistrement de sa catégorie.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/* ─────────────────────────── Slots ─────────────────────────── */

/// Contenu typé d'un slot entre deux callbacks.
#[derive(Debug, Default)]
enum SlotData {
    /// Rien d'observé.
    #[default]
    None,
    /// Chaîne possédée par le slot.
    Owned(String),
    /// Tranche empruntée à la ligne courante du tampon (offsets relatifs).
    Span(u32, u32),
    /// Entier (mode binaire).
    Int(i32),
    /// Flottant (mode binaire).
    Float(f64),
}

#[derive(Debug)]
struct KeywordSlot {
    name: String,
    ty: CellType,
    flags: SlotFlags,
    data: SlotData,
}

impl KeywordSlot {
    fn reset(&mut self) {
        self.flags = SlotFlags::empty();
        self.data = SlotData::None;
    }
}

struct Category {
    name: String,
    handler: Box<dyn CategoryHandler>,
    keywords: Vec<KeywordSlot>,
    kw_index: Vec<u32>,
    kw_sorted: bool,
    /// Valeurs accumulées hors boucle, pas encore livrées.
    pending: bool,
}

impl Category {
    fn reset_slots(&mut self) {
        for kw in &mut self.keywords {
            kw.reset();
        }
        self.pending = false;
    }
}

/* ─────────────────────────── Vue de ligne ─────────────────────────── */

/// Vue ordonnée des slots d'une catégorie, passée au callback de ligne.
pub struct Row<'a> {
    slots: &'a [KeywordSlot],
    /// Ligne courante du tampon, pour résoudre les tranches empruntées.
    line: &'a [u8],
}

impl<'a> Row<'a> {
    /// Nombre de mots-clés enregistrés de la catégorie.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Vrai si la catégorie n'a aucun mot-clé.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Cellule d'un mot-clé par poignée.
    pub fn get(&self, kw: KeywordHandle) -> Cell<'a> {
        self.at(kw.index())
    }

    /// Cellule par index d'enregistrement.
    ///
    /// Hors bornes vaut `Missing`.
    pub fn at(&self, idx: usize) -> Cell<'a> {
        let Some(slot) = self.slots.get(idx) else {
            return Cell::Missing;
        };
        if slot.flags.contains(SlotFlags::OMITTED) {
            return Cell::Omitted;
        }
        if slot.flags.contains(SlotFlags::UNKNOWN) {
            return Cell::Unknown;
        }
        if !slot.flags.contains(SlotFlags::IN_FILE) {
            return Cell::Missing;
        }
        match &slot.data {
            SlotData::Owned(s) => Cell::Str(s),
            SlotData::Span(a, b) => self
                .line
                .get(*a as usize..*b as usize)
                .and_then(|seg| core::str::from_utf8(seg).ok())
                .map_or(Cell::Missing, Cell::Str),
            SlotData::Int(v) => Cell::Int(*v),
            SlotData::Float(v) => Cell::Float(*v),
            SlotData::None => Cell::Missing,
        }
    }

    /// Cellule par nom de mot-clé (recherche linéaire, tables petites).
    pub fn by_name(&self, name: &str) -> Cell<'a> {
        self.slots
            .iter()
            .position(|kw| kw.name.eq_ignore_ascii_case(name))
            .map_or(Cell::Missing, |i| self.at(i))
    }

    /// Itère `(nom, cellule)` dans l'ordre d'enregistrement.
    pub fn iter(&self) -> impl Iterator<Item = (&'a str, Cell<'a>)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .map(|(i, kw)| (kw.name.as_str(), self.at(i)))
    }
}

/* ─────────────────────────── Dispatcher ─────────────────────────── */

/// Registre des catégories et routage des valeurs vers leurs callbacks.
///
/// Partagé par les chemins texte et binaire ; voir les crates `cifra-parser`
/// et `cifra-bcif` pour les deux pilotes.
#[derive(Default)]
pub struct Dispatcher {
    categories: Vec<Category>,
    cat_index: Vec<u32>,
    cat_sorted: bool,
    unknown_category: Option<UnknownCategoryFn>,
    unknown_keyword: Option<UnknownKeywordFn>,
}

impl Dispatcher {
    /// Construit un dispatcher vide.
    pub fn new() -> Self {
        Self::default()
    }

    /* ────────── Enregistrement ────────── */

    /// Enregistre une catégorie ; un nom déjà connu (comparaison insensible à
    /// la casse) remplace l'enregistrement précédent, poignée comprise.
    pub fn register_category(
        &mut self,
        name: &str,
        handler: Box<dyn CategoryHandler>,
    ) -> CategoryHandle {
        if let Some(idx) = self.lookup_category(name) {
            let cat = &mut self.categories[idx];
            cat.name = name.to_owned();
            cat.handler = handler;
            cat.keywords.clear();
            cat.kw_index.clear();
            cat.kw_sorted = false;
            cat.pending = false;
            return CategoryHandle(idx as u32);
        }
        self.categories.push(Category {
            name: name.to_owned(),
            handler,
            keywords: Vec::new(),
            kw_index: Vec::new(),
            kw_sorted: false,
            pending: false,
        });
        self.cat_sorted = false;
        CategoryHandle((self.categories.len() - 1) as u32)
    }

    /// Enregistre un mot-clé dans une catégorie ; un doublon remplace le slot.
    pub fn register_keyword(
        &mut self,
        cat: CategoryHandle,
        name: &str,
        ty: CellType,
    ) -> KeywordHandle {
        let category = &mut self.categories[cat.index()];
        if let Some(idx) = category
            .keywords
            .iter()
            .position(|kw| kw.name.eq_ignore_ascii_case(name))
        {
            category.keywords[idx] = KeywordSlot {
                name: name.to_owned(),
                ty,
                flags: SlotFlags::empty(),
                data: SlotData::None,
            };
            return KeywordHandle(idx as u32);
        }
        category.keywords.push(KeywordSlot {
            name: name.to_owned(),
            ty,
            flags: SlotFlags::empty(),
            data: SlotData::None,
        });
        category.kw_sorted = false;
        KeywordHandle((category.keywords.len() - 1) as u32)
    }

    /// Installe le callback « catégorie inconnue ».
    pub fn set_unknown_category_callback(&mut self, cb: UnknownCategoryFn) {
        self.unknown_category = Some(cb);
    }

    /// Installe le callback « mot-clé inconnu ».
    pub fn set_unknown_keyword_callback(&mut self, cb: UnknownKeywordFn) {
        self.unknown_keyword = Some(cb);
    }

    /// Jette tous les gestionnaires (leurs `Drop` s'exécutent) et remet les
    /// callbacks d'inconnu à zéro.
    pub fn clear_categories(&mut self) {
        self.categories.clear();
        self.cat_index.clear();
        self.cat_sorted = false;
        self.unknown_category = None;
        self.unknown_keyword = None;
    }

    /* ────────── Lookup ────────── */

    /// Cherche une catégorie par nom (insensible à la casse).
    pub fn lookup_category(&mut self, name: &str) -> Option<usize> {
        if !self.cat_sorted {
            self.cat_index = (0..self.categories.len() as u32).collect();
            let cats = &self.categories;
            self.cat_index
                .sort_by(|&a, &b| cmp_ci(&cats[a as usize].name, &cats[b as usize].name));
            self.cat_sorted = true;
        }
        let cats = &self.categories;
        self.cat_index
            .binary_search_by(|&i| cmp_ci(&cats[i as usize].name, name))
            .ok()
            .map(|pos| self.cat_index[pos] as usize)
    }

    /// Cherche un mot-clé dans une catégorie (insensible à la casse).
    pub fn lookup_keyword(&mut self, cat: usize, name: &str) -> Option<usize> {
        let category = &mut self.categories[cat];
        if !category.kw_sorted {
            category.kw_index = (0..category.keywords.len() as u32).collect();
            let kws = &category.keywords;
            category
                .kw_index
                .sort_by(|&a, &b| cmp_ci(&kws[a as usize].name, &kws[b as usize].name));
            category.kw_sorted = true;
        }
        let kws = &category.keywords;
        category
            .kw_index
            .binary_search_by(|&i| cmp_ci(&kws[i as usize].name, name))
            .ok()
            .map(|pos| category.kw_index[pos] as usize)
    }

    /// Nombre de catégories enregistrées.
    pub fn category_count(&self) -> usize {
        self.categories.len()
    }

    /// Nom d'une catégorie.
    pub fn category_name(&self, cat: usize) -> &str {
        &self.categories[cat].name
    }

    /// Nombre de mots-clés d'une catégorie.
    pub fn keyword_count(&self, cat: usize) -> usize {
        self.categories[cat].keywords.len()
    }

    /// Type déclaré d'un mot-clé.
    pub fn keyword_type(&self, cat: usize, kw: usize) -> CellType {
        self.categories[cat].keywords[kw].ty
    }

    /* ────────── Notifications ────────── */

    /// Signale une catégorie non enregistrée (une fois par site d'apparition).
    pub fn notify_unknown_category(&mut self, name: &str, line: u64) {
        if let Some(cb) = self.unknown_category.as_mut() {
            cb(name, line);
        }
    }

    /// Signale un mot-clé non enregistré (une fois par site d'apparition).
    pub fn notify_unknown_keyword(&mut self, category: &str, keyword: &str, line: u64) {
        if let Some(cb) = self.unknown_keyword.as_mut() {
            cb(category, keyword, line);
        }
    }

    /* ────────── Écriture de slots ────────── */

    /// Marque un mot-clé « omis » (`.`).
    pub fn set_omitted(&mut self, cat: usize, kw: usize) {
        let slot = &mut self.categories[cat].keywords[kw];
        slot.data = SlotData::None;
        slot.flags = SlotFlags::IN_FILE | SlotFlags::OMITTED;
        self.categories[cat].pending = true;
    }

    /// Marque un mot-clé « inconnu » (`?`).
    pub fn set_unknown(&mut self, cat: usize, kw: usize) {
        let slot = &mut self.categories[cat].keywords[kw];
        slot.data = SlotData::None;
        slot.flags = SlotFlags::IN_FILE | SlotFlags::UNKNOWN;
        self.categories[cat].pending = true;
    }

    /// Dépose une chaîne possédée ; une valeur précédente de la même ligne est
    /// écrasée (son stockage possédé est libéré).
    pub fn set_str_owned(&mut self, cat: usize, kw: usize, value: &str) {
        let slot = &mut self.categories[cat].keywords[kw];
        // réutilise l'allocation du slot quand il y en a une
        if let SlotData::Owned(s) = &mut slot.data {
            s.clear();
            s.push_str(value);
        } else {
            slot.data = SlotData::Owned(value.to_owned());
        }
        slot.flags = SlotFlags::IN_FILE;
        self.categories[cat].pending = true;
    }

    /// Dépose une tranche empruntée à la ligne courante (offsets relatifs à la
    /// ligne) ; valide jusqu'au prochain avancement de ligne.
    pub fn set_str_span(&mut self, cat: usize, kw: usize, start: usize, end: usize) {
        let slot = &mut self.categories[cat].keywords[kw];
        slot.data = SlotData::Span(start as u32, end as u32);
        slot.flags = SlotFlags::IN_FILE;
        self.categories[cat].pending = true;
    }

    /// Dépose un entier (mode binaire).
    pub fn set_int(&mut self, cat: usize, kw: usize, value: i32) {
        let slot = &mut self.categories[cat].keywords[kw];
        slot.data = SlotData::Int(value);
        slot.flags = SlotFlags::IN_FILE;
        self.categories[cat].pending = true;
    }

    /// Dépose un flottant (mode binaire).
    pub fn set_float(&mut self, cat: usize, kw: usize, value: f64) {
        let slot = &mut self.categories[cat].keywords[kw];
        slot.data = SlotData::Float(value);
        slot.flags = SlotFlags::IN_FILE;
        self.categories[cat].pending = true;
    }

    /* ────────── Tirs de callbacks ────────── */

    /// Livre une ligne au callback de la catégorie puis remet tous ses slots à
    /// zéro. `line` est la ligne courante du tampon, pour résoudre les
    /// tranches empruntées.
    pub fn fire_row(&mut self, cat: usize, line: &[u8]) -> CifResult<()> {
        let category = &mut self.categories[cat];
        let row = Row { slots: category.keywords.as_slice(), line };
        let outcome = category.handler.on_row(&row);
        category.reset_slots();
        outcome
    }

    /// Livre les lignes en attente (valeurs hors boucle accumulées).
    pub fn fire_pending(&mut self) -> CifResult<()> {
        for idx in 0..self.categories.len() {
            if self.categories[idx].pending {
                self.fire_row(idx, &[])?;
            }
        }
        Ok(())
    }

    /// Clôture d'une save frame : callbacks de fin de frame pour toutes les
    /// catégories, puis livraison des lignes en attente.
    pub fn end_frame(&mut self) -> CifResult<()> {
        for category in &mut self.categories {
            category.handler.on_end_frame()?;
        }
        self.fire_pending()
    }

    /// Clôture d'un bloc : livraison des lignes en attente, puis callback de
    /// finalisation de chaque catégorie.
    pub fn finish_block(&mut self) -> CifResult<()> {
        self.fire_pending()?;
        for category in &mut self.categories {
            category.handler.on_finish()?;
        }
        Ok(())
    }

    /// Callback de finalisation d'une seule catégorie (mode binaire, après la
    /// dernière ligne de la catégorie).
    pub fn fire_finish(&mut self, cat: usize) -> CifResult<()> {
        self.categories[cat].handler.on_finish()
    }
}

/// Comparaison membre à membre en minuscules ASCII.
fn cmp_ci(a: &str, b: &str) -> core::cmp::Ordering {
    let mut ai = a.bytes().map(|c| c.to_ascii_lowercase());
    let mut bi = b.bytes().map(|c| c.to_ascii_lowercase());
    loop {
        match (ai.next(), bi.next()) {
            (None, None) => return core::cmp::Ordering::Equal,
            (x, y) => match x.cmp(&y) {
                core::cmp::Ordering::Equal => {}
                other => return other,
            },
        }
    }
}

/* ─────────────────────────── Tests ─────────────────────────── */
