//! Pipeline de décodage des colonnes.
//!
//! La charge décodée est une variante typée : octets bruts, tableaux
//! élémentaires, ou table de sous-chaînes. Le pipeline part de `Raw` (le blob
//! `data` de la colonne) et applique chaque encodage dans l'ordre de la
//! liste. ByteArray est spécifié little-endian ; la réinterprétation passe
//! par `byteorder`, qui fait l'échange d'octets sur hôte big-endian.

use byteorder::{ByteOrder, LittleEndian};
use cifra_core::CifResult;

use crate::encoding::{ByteType, Encoding, StringArrayEnc};
use crate::obj::err;

/* ─────────────────────────── Charge décodée ─────────────────────────── */

/// Table de sous-chaînes : les rangées sont des tranches de `data`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringTable {
    data: String,
    /// (début, fin) par rangée, en octets dans `data`.
    rows: Vec<(u32, u32)>,
}

impl StringTable {
    /// Nombre de rangées.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Vrai si la table n'a aucune rangée.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Sous-chaîne de la rangée `i`.
    pub fn get(&self, i: usize) -> Option<&str> {
        self.rows.get(i).and_then(|&(a, b)| self.data.get(a as usize..b as usize))
    }
}

/// Charge utile d'une colonne à un étage du pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Data {
    /// Octets bruts, pas encore réinterprétés.
    Raw(Vec<u8>),
    /// Entiers signés 8 bits.
    I8(Vec<i8>),
    /// Entiers non signés 8 bits.
    U8(Vec<u8>),
    /// Entiers signés 16 bits.
    I16(Vec<i16>),
    /// Entiers non signés 16 bits.
    U16(Vec<u16>),
    /// Entiers signés 32 bits.
    I32(Vec<i32>),
    /// Entiers non signés 32 bits.
    U32(Vec<u32>),
    /// Flottants 32 bits.
    F32(Vec<f32>),
    /// Flottants 64 bits.
    F64(Vec<f64>),
    /// Sous-chaînes par rangée.
    Strings(StringTable),
}

impl Data {
    /// Nombre d'éléments (de rangées, une fois la chaîne épuisée).
    pub fn len(&self) -> usize {
        match self {
            Data::Raw(v) => v.len(),
            Data::I8(v) => v.len(),
            Data::U8(v) => v.len(),
            Data::I16(v) => v.len(),
            Data::U16(v) => v.len(),
            Data::I32(v) => v.len(),
            Data::U32(v) => v.len(),
            Data::F32(v) => v.len(),
            Data::F64(v) => v.len(),
            Data::Strings(t) => t.len(),
        }
    }

    /// Vrai si la charge est vide.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/* ─────────────────────────── Pipeline ─────────────────────────── */

/// Applique une chaîne d'encodages (ordre de décodage) à un blob brut.
pub fn decode(raw: Vec<u8>, encodings: Vec<Encoding>) -> CifResult<Data> {
    let mut data = Data::Raw(raw);
    for enc in encodings {
        data = apply(data, enc)?;
    }
    Ok(data)
}

/// Décode un masque de présence : `U8` tel quel, `I32` tronqué vers `U8`.
pub fn decode_mask(raw: Vec<u8>, encodings: Vec<Encoding>) -> CifResult<Vec<u8>> {
    match decode(raw, encodings)? {
        Data::U8(v) => Ok(v),
        Data::I32(v) => Ok(v.into_iter().map(|x| x as u8).collect()),
        other => Err(err(format!("mask must decode to uint8 or int32, got {other:?}"))),
    }
}

fn apply(data: Data, enc: Encoding) -> CifResult<Data> {
    match enc {
        Encoding::ByteArray { ty } => byte_array(data, ty),
        Encoding::IntegerPacking { ty } => integer_packing(data, ty),
        Encoding::Delta { origin } => delta(data, origin),
        Encoding::RunLength => run_length(data),
        Encoding::FixedPoint { factor } => fixed_point(data, factor),
        Encoding::StringArray(sa) => string_array(data, *sa),
    }
}

/* ─────────────────────────── Étages ─────────────────────────── */

fn byte_array(data: Data, ty: ByteType) -> CifResult<Data> {
    let Data::Raw(bytes) = data else {
        return Err(err("ByteArray input must be raw bytes"));
    };
    let width = ty.width();
    if bytes.len() % width != 0 {
        return Err(err(format!(
            "byte array of {} bytes not divisible by element width {width}",
            bytes.len()
        )));
    }
    let n = bytes.len() / width;
    Ok(match ty {
        ByteType::I8 => Data::I8(bytes.iter().map(|&b| b as i8).collect()),
        ByteType::U8 => Data::U8(bytes),
        ByteType::I16 => {
            let mut v = vec![0i16; n];
            LittleEndian::read_i16_into(&bytes, &mut v);
            Data::I16(v)
        }
        ByteType::U16 => {
            let mut v = vec![0u16; n];
            LittleEndian::read_u16_into(&bytes, &mut v);
            Data::U16(v)
        }
        ByteType::I32 => {
            let mut v = vec![0i32; n];
            LittleEndian::read_i32_into(&bytes, &mut v);
            Data::I32(v)
        }
        ByteType::U32 => {
            let mut v = vec![0u32; n];
            LittleEndian::read_u32_into(&bytes, &mut v);
            Data::U32(v)
        }
        ByteType::F32 => {
            let mut v = vec![0f32; n];
            LittleEndian::read_f32_into(&bytes, &mut v);
            Data::F32(v)
        }
        ByteType::F64 => {
            let mut v = vec![0f64; n];
            LittleEndian::read_f64_into(&bytes, &mut v);
            Data::F64(v)
        }
    })
}

/// Déplie les sentinelles saturées : la somme courante s'accumule tant que
/// l'élément vaut la sentinelle de son type, et s'émet au premier élément
/// ordinaire. La longueur de sortie est le nombre de terminateurs
/// non-sentinelles de l'entrée.
fn integer_packing(data: Data, ty: ByteType) -> CifResult<Data> {
    fn unpack(values: impl Iterator<Item = i32>, hi: i32, lo: Option<i32>) -> Vec<i32> {
        let mut out = Vec::new();
        let mut sum: i32 = 0;
        for x in values {
            sum = sum.wrapping_add(x);
            if x == hi || lo == Some(x) {
                continue;
            }
            out.push(sum);
            sum = 0;
        }
        out
    }

    let unpacked = match (data, ty) {
        (Data::I8(v), ByteType::I8) => unpack(
            v.into_iter().map(i32::from),
            i32::from(i8::MAX),
            Some(i32::from(i8::MIN)),
        ),
        (Data::U8(v), ByteType::U8) => {
            unpack(v.into_iter().map(i32::from), i32::from(u8::MAX), None)
        }
        (Data::I16(v), ByteType::I16) => unpack(
            v.into_iter().map(i32::from),
            i32::from(i16::MAX),
            Some(i32::from(i16::MIN)),
        ),
        (Data::U16(v), ByteType::U16) => {
            unpack(v.into_iter().map(i32::from), i32::from(u16::MAX), None)
        }
        (other, _) => {
            return Err(err(format!(
                "IntegerPacking input does not match source type {ty:?}: {other:?}"
            )))
        }
    };
    Ok(Data::I32(unpacked))
}

fn delta(data: Data, origin: i32) -> CifResult<Data> {
    let Data::I32(mut v) = data else {
        return Err(err("Delta input must be int32"));
    };
    let mut run = origin;
    for x in &mut v {
        run = run.wrapping_add(*x);
        *x = run;
    }
    Ok(Data::I32(v))
}

fn run_length(data: Data) -> CifResult<Data> {
    let Data::I32(v) = data else {
        return Err(err("RunLength input must be int32"));
    };
    if v.len() % 2 != 0 {
        return Err(err(format!("RunLength input of odd length {}", v.len())));
    }
    let mut total: usize = 0;
    for pair in v.chunks_exact(2) {
        let count = pair[1];
        if count < 0 {
            return Err(err(format!("negative run length {count}")));
        }
        total = total
            .checked_add(count as usize)
            .ok_or_else(|| err("run length overflow"))?;
    }
    let mut out = Vec::with_capacity(total);
    for pair in v.chunks_exact(2) {
        out.extend(core::iter::repeat(pair[0]).take(pair[1] as usize));
    }
    Ok(Data::I32(out))
}

fn fixed_point(data: Data, factor: i32) -> CifResult<Data> {
    let Data::I32(v) = data else {
        return Err(err("FixedPoint input must be int32"));
    };
    if factor == 0 {
        return Err(err("FixedPoint factor must be nonzero"));
    }
    Ok(Data::F64(v.into_iter().map(|x| f64::from(x) / f64::from(factor)).collect()))
}

fn string_array(data: Data, sa: StringArrayEnc) -> CifResult<Data> {
    let StringArrayEnc { string_data, offsets, data_encoding, offset_encoding } = sa;

    let indices = match data {
        Data::I32(v) => v,
        Data::Raw(raw) => match decode(raw, data_encoding)? {
            Data::I32(v) => v,
            other => {
                return Err(err(format!(
                    "StringArray dataEncoding must decode to int32, got {other:?}"
                )))
            }
        },
        other => {
            return Err(err(format!("StringArray input must be int32, got {other:?}")))
        }
    };

    let Data::I32(raw_offsets) = decode(offsets, offset_encoding)? else {
        return Err(err("StringArray offsets must decode to int32"));
    };

    let limit = string_data.len();
    let mut bounds = Vec::with_capacity(raw_offsets.len());
    for &off in &raw_offsets {
        if off < 0 || off as usize > limit {
            return Err(err(format!("string offset {off} outside [0, {limit}]")));
        }
        if !string_data.is_char_boundary(off as usize) {
            return Err(err(format!("string offset {off} splits a UTF-8 sequence")));
        }
        bounds.push(off as u32);
    }
    for pair in bounds.windows(2) {
        if pair[0] > pair[1] {
            return Err(err(format!("string offsets not ascending: {} > {}", pair[0], pair[1])));
        }
    }

    let substrings = bounds.len().saturating_sub(1);
    let mut rows = Vec::with_capacity(indices.len());
    for &idx in &indices {
        if idx < 0 || idx as usize >= substrings {
            return Err(err(format!("string index {idx} outside [0, {substrings})")));
        }
        rows.push((bounds[idx as usize], bounds[idx as usize + 1]));
    }
    Ok(Data::Strings(StringTable { data: string_data, rows }))
}

/* ─────────────────────────── Tests ─────────────────────────── */
