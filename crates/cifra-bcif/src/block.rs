//! Parcours des blocs BinaryCIF et matérialisation des rangées.
//!
//! Le fichier est une map dont la clé `dataBlocks` porte le tableau des
//! blocs ; chaque appel à [`BinaryReader::read_block`] en consomme un. Une
//! catégorie non enregistrée est sautée sans décodage ; une catégorie
//! enregistrée voit ses colonnes liées décodées, puis chaque rangée est
//! projetée dans le [`Dispatcher`] sous le même contrat que le chemin texte
//! (octet de masque `1` → omis, `2` → inconnu).

use cifra_core::{BufferOptions, CellType, CifResult, Dispatcher, PullSource};
use tracing::debug;

use crate::decode::{decode, decode_mask, Data};
use crate::encoding::{read_encoding_list, Encoding};
use crate::obj::{err, ObjReader};

/* ─────────────────────────── Lecteur binaire ─────────────────────────── */

/// Lecteur du format binaire ; un bloc de données par `read_block`.
#[derive(Debug)]
pub struct BinaryReader<S> {
    rd: ObjReader<S>,
    /// Blocs restants ; −1 tant que l'en-tête du fichier n'est pas lu.
    blocks_remaining: i64,
}

/// Colonne liée à un mot-clé enregistré, pas encore décodée.
struct Column {
    kw: usize,
    data: Vec<u8>,
    encodings: Vec<Encoding>,
    mask: Option<(Vec<u8>, Vec<Encoding>)>,
}

/// Colonne décodée, prête pour la projection rangée par rangée.
struct Decoded {
    kw: usize,
    data: Data,
    mask: Option<Vec<u8>>,
}

impl<S: PullSource> BinaryReader<S> {
    /// Construit un lecteur binaire avec les réglages de tampon par défaut.
    pub fn new(source: S) -> Self {
        Self::with_options(source, BufferOptions::default())
    }

    /// Construit un lecteur binaire avec des réglages de tampon explicites.
    pub fn with_options(source: S, opts: BufferOptions) -> Self {
        Self { rd: ObjReader::with_options(source, opts), blocks_remaining: -1 }
    }

    /// Lit un bloc de données entier. `Ok(true)` si d'autres blocs suivent.
    ///
    /// Le premier appel lit la map d'en-tête du fichier pour compter les
    /// blocs ; chaque appel suivant consomme un élément de `dataBlocks`.
    pub fn read_block(&mut self, disp: &mut Dispatcher) -> CifResult<bool> {
        if self.blocks_remaining < 0 {
            self.read_header()?;
            debug!(blocks = self.blocks_remaining, "binary header read");
        }
        if self.blocks_remaining == 0 {
            return Ok(false);
        }
        self.read_one_block(disp)?;
        self.blocks_remaining -= 1;
        Ok(self.blocks_remaining > 0)
    }

    /* ────────── En-tête du fichier ────────── */

    fn read_header(&mut self) -> CifResult<()> {
        let entries = self.rd.read_map_len()?;
        for _ in 0..entries {
            if self.rd.expect_string("dataBlocks")? {
                let blocks = self.rd.read_array_len()?;
                self.blocks_remaining = blocks as i64;
                // les entrées d'en-tête qui suivraient le tableau ne sont
                // jamais lues : les blocs sont consommés paresseusement
                return Ok(());
            }
            self.rd.skip_any()?;
        }
        Err(err("missing dataBlocks in file header"))
    }

    /* ────────── Blocs et catégories ────────── */

    fn read_one_block(&mut self, disp: &mut Dispatcher) -> CifResult<()> {
        let entries = self.rd.read_map_len()?;
        let mut seen: Vec<usize> = Vec::new();
        let mut found = false;
        for _ in 0..entries {
            if found {
                // clé puis valeur, toutes deux sautées
                self.rd.skip_any()?;
                self.rd.skip_any()?;
                continue;
            }
            if self.rd.expect_string("categories")? {
                found = true;
                let ncats = self.rd.read_array_len()?;
                for _ in 0..ncats {
                    self.read_category(disp, &mut seen)?;
                }
            } else {
                self.rd.skip_any()?;
            }
        }
        if !found {
            return Err(err("data block without categories"));
        }
        // chaque catégorie enregistrée finalise exactement une fois par bloc
        for idx in 0..disp.category_count() {
            if !seen.contains(&idx) {
                disp.fire_finish(idx)?;
            }
        }
        Ok(())
    }

    fn read_category(&mut self, disp: &mut Dispatcher, seen: &mut Vec<usize>) -> CifResult<()> {
        let entries = self.rd.read_map_len()?;
        let mut name: Option<String> = None;
        let mut cat: Option<usize> = None;
        let mut columns: Vec<Column> = Vec::new();
        for _ in 0..entries {
            enum Key {
                Name,
                Columns,
                Other,
            }
            let key = match self.rd.read_str()? {
                "name" => Key::Name,
                "columns" => Key::Columns,
                _ => Key::Other,
            };
            match key {
                Key::Name => {
                    let s = self.rd.read_str()?.to_owned();
                    cat = disp.lookup_category(&s);
                    if cat.is_none() {
                        disp.notify_unknown_category(&s, 0);
                    }
                    name = Some(s);
                }
                Key::Columns => {
                    let Some(cname) = name.clone() else {
                        return Err(err("category name must precede columns"));
                    };
                    let ncols = self.rd.read_array_len()?;
                    match cat {
                        Some(c) => {
                            for _ in 0..ncols {
                                self.read_column(disp, &cname, c, &mut columns)?;
                            }
                        }
                        // catégorie non distribuée : colonnes sautées sans décodage
                        None => {
                            for _ in 0..ncols {
                                self.rd.skip_any()?;
                            }
                        }
                    }
                }
                Key::Other => self.rd.skip_any()?,
            }
        }
        if let Some(c) = cat {
            debug!(
                category = name.as_deref().unwrap_or(""),
                columns = columns.len(),
                "emitting binary category"
            );
            emit_rows(disp, c, columns)?;
            disp.fire_finish(c)?;
            seen.push(c);
        }
        Ok(())
    }

    fn read_column(
        &mut self,
        disp: &mut Dispatcher,
        cat_name: &str,
        cat: usize,
        out: &mut Vec<Column>,
    ) -> CifResult<()> {
        let entries = self.rd.read_map_len()?;
        let mut kw: Option<usize> = None;
        let mut data: Option<(Vec<u8>, Vec<Encoding>)> = None;
        let mut mask: Option<(Vec<u8>, Vec<Encoding>)> = None;
        for _ in 0..entries {
            enum Key {
                Name,
                Data,
                Mask,
                Other,
            }
            let key = match self.rd.read_str()? {
                "name" => Key::Name,
                "data" => Key::Data,
                "mask" => Key::Mask,
                _ => Key::Other,
            };
            match key {
                Key::Name => {
                    let s = self.rd.read_str()?;
                    kw = disp.lookup_keyword(cat, s);
                    if kw.is_none() {
                        disp.notify_unknown_keyword(cat_name, s, 0);
                    }
                }
                Key::Data => data = Some(self.read_payload()?),
                Key::Mask => {
                    if self.rd.peek_is_nil()? {
                        self.rd.skip_scalar()?;
                    } else {
                        mask = Some(self.read_payload()?);
                    }
                }
                Key::Other => self.rd.skip_any()?,
            }
        }
        // colonne non distribuée : consommée mais jetée
        if let Some(kw) = kw {
            let (raw, encodings) =
                data.ok_or_else(|| err("column without data payload"))?;
            out.push(Column { kw, data: raw, encodings, mask });
        }
        Ok(())
    }

    /// Charge `{ data: bin, encoding: [...] }` d'une colonne ou d'un masque.
    fn read_payload(&mut self) -> CifResult<(Vec<u8>, Vec<Encoding>)> {
        let entries = self.rd.read_map_len()?;
        let mut raw: Option<Vec<u8>> = None;
        let mut encodings: Option<Vec<Encoding>> = None;
        for _ in 0..entries {
            enum Key {
                Data,
                Encoding,
                Other,
            }
            let key = match self.rd.read_str()? {
                "data" => Key::Data,
                "encoding" => Key::Encoding,
                _ => Key::Other,
            };
            match key {
                Key::Data => raw = Some(self.rd.read_bin()?.to_vec()),
                Key::Encoding => encodings = Some(read_encoding_list(&mut self.rd)?),
                Key::Other => self.rd.skip_any()?,
            }
        }
        Ok((
            raw.ok_or_else(|| err("payload without data"))?,
            encodings.ok_or_else(|| err("payload without encoding"))?,
        ))
    }
}

/* ─────────────────────────── Matérialisation ─────────────────────────── */

/// Décode les colonnes liées puis livre chaque rangée au dispatcher.
fn emit_rows(disp: &mut Dispatcher, cat: usize, columns: Vec<Column>) -> CifResult<()> {
    let mut decoded = Vec::with_capacity(columns.len());
    for col in columns {
        let data = decode(col.data, col.encodings)?;
        let mask = col.mask.map(|(raw, enc)| decode_mask(raw, enc)).transpose()?;
        decoded.push(Decoded { kw: col.kw, data, mask });
    }
    let n_rows = decoded.first().map_or(0, |d| d.data.len());
    for d in &decoded {
        if d.data.len() != n_rows {
            return Err(err(format!(
                "column length mismatch: {} rows vs {n_rows}",
                d.data.len()
            )));
        }
        if let Some(m) = &d.mask {
            if m.len() != n_rows {
                return Err(err(format!(
                    "mask length mismatch: {} entries for {n_rows} rows",
                    m.len()
                )));
            }
        }
    }
    debug!(rows = n_rows, "decoded category columns");
    for i in 0..n_rows {
        for d in &decoded {
            match d.mask.as_ref().map_or(0u8, |m| m[i]) {
                1 => disp.set_omitted(cat, d.kw),
                2 => disp.set_unknown(cat, d.kw),
                _ => set_cell(disp, cat, d.kw, &d.data, i)?,
            }
        }
        disp.fire_row(cat, &[])?;
    }
    Ok(())
}

/// Projette une cellule décodée selon le type déclaré du mot-clé ; un slot
/// déclaré chaîne reçoit la représentation textuelle des numériques.
fn set_cell(disp: &mut Dispatcher, cat: usize, kw: usize, data: &Data, i: usize) -> CifResult<()> {
    let ty = disp.keyword_type(cat, kw);
    if let Data::Strings(table) = data {
        let s = table.get(i).ok_or_else(|| err("string row out of range"))?;
        match ty {
            CellType::Str => disp.set_str_owned(cat, kw, s),
            CellType::Int => {
                let v = s
                    .trim()
                    .parse()
                    .map_err(|_| err(format!("not an integer: {s:?}")))?;
                disp.set_int(cat, kw, v);
            }
            CellType::Float => {
                let v = s.trim().parse().map_err(|_| err(format!("not a float: {s:?}")))?;
                disp.set_float(cat, kw, v);
            }
        }
        return Ok(());
    }
    if let Some(v) = int_at(data, i) {
        match ty {
            CellType::Int => {
                let v = i32::try_from(v).map_err(|_| err(format!("integer out of range: {v}")))?;
                disp.set_int(cat, kw, v);
            }
            CellType::Float => disp.set_float(cat, kw, v as f64),
            CellType::Str => disp.set_str_owned(cat, kw, &v.to_string()),
        }
        return Ok(());
    }
    if let Some(v) = float_at(data, i) {
        match ty {
            CellType::Float => disp.set_float(cat, kw, v),
            CellType::Str => disp.set_str_owned(cat, kw, &v.to_string()),
            CellType::Int => return Err(err("float column bound to integer keyword")),
        }
        return Ok(());
    }
    Err(err("column not fully decoded"))
}

fn int_at(data: &Data, i: usize) -> Option<i64> {
    match data {
        Data::I8(v) => Some(i64::from(v[i])),
        Data::U8(v) => Some(i64::from(v[i])),
        Data::I16(v) => Some(i64::from(v[i])),
        Data::U16(v) => Some(i64::from(v[i])),
        Data::I32(v) => Some(i64::from(v[i])),
        Data::U32(v) => Some(i64::from(v[i])),
        _ => None,
    }
}

fn float_at(data: &Data, i: usize) -> Option<f64> {
    match data {
        Data::F32(v) => Some(f64::from(v[i])),
        Data::F64(v) => Some(v[i]),
        _ => None,
    }
}

/* ─────────────────────────── Tests ─────────────────────────── */
