//! Arbre déclaratif d'encodages de colonnes.
//!
//! Chaque colonne (et chaque masque) porte une chaîne ordonnée d'encodages
//! appliqués à l'écriture ; sur le fil, la liste est dans l'ordre
//! d'encodage, et le parseur la renverse pour la stocker dans l'ordre
//! d'application des décodeurs. L'ensemble est clos : un `kind` inconnu est
//! une erreur de format, les clés auxiliaires inconnues sont sautées.

use cifra_core::{CifResult, PullSource};

use crate::obj::{err, ObjReader};

/* ─────────────────────────── Types d'octets ─────────────────────────── */

/// Type élémentaire d'un tableau d'octets, avec son code sur le fil.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ByteType {
    /// Entier signé 8 bits (code 1).
    I8,
    /// Entier signé 16 bits (code 2).
    I16,
    /// Entier signé 32 bits (code 3).
    I32,
    /// Entier non signé 8 bits (code 4).
    U8,
    /// Entier non signé 16 bits (code 5).
    U16,
    /// Entier non signé 32 bits (code 6).
    U32,
    /// Flottant 32 bits (code 32).
    F32,
    /// Flottant 64 bits (code 33).
    F64,
}

impl ByteType {
    /// Décode le code du champ `type`.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(ByteType::I8),
            2 => Some(ByteType::I16),
            3 => Some(ByteType::I32),
            4 => Some(ByteType::U8),
            5 => Some(ByteType::U16),
            6 => Some(ByteType::U32),
            32 => Some(ByteType::F32),
            33 => Some(ByteType::F64),
            _ => None,
        }
    }

    /// Largeur en octets d'un élément.
    pub fn width(self) -> usize {
        match self {
            ByteType::I8 | ByteType::U8 => 1,
            ByteType::I16 | ByteType::U16 => 2,
            ByteType::I32 | ByteType::U32 | ByteType::F32 => 4,
            ByteType::F64 => 8,
        }
    }

    /// Vrai pour les types source admis par IntegerPacking.
    pub fn packs(self) -> bool {
        matches!(self, ByteType::I8 | ByteType::U8 | ByteType::I16 | ByteType::U16)
    }
}

/* ─────────────────────────── Encodages ─────────────────────────── */

/// Un étage d'encodage ; le décodeur les applique dans l'ordre de la liste.
#[derive(Debug, Clone)]
pub enum Encoding {
    /// Octets bruts réinterprétés en tableau typé little-endian.
    ByteArray {
        /// Type élémentaire.
        ty: ByteType,
    },
    /// Dépliage des sentinelles saturées en entiers 32 bits.
    IntegerPacking {
        /// Type source (i8, u8, i16 ou u16).
        ty: ByteType,
    },
    /// Somme préfixe amorcée à `origin`.
    Delta {
        /// Valeur initiale de la somme.
        origin: i32,
    },
    /// Paires (valeur, longueur de plage) dépliées à plat.
    RunLength,
    /// Division de chaque entier par `factor` vers du flottant 64 bits.
    FixedPoint {
        /// Diviseur (non nul).
        factor: i32,
    },
    /// Indices de rangée dans une table de sous-chaînes.
    StringArray(Box<StringArrayEnc>),
}

/// Charge utile de l'encodage `StringArray`.
#[derive(Debug, Clone)]
pub struct StringArrayEnc {
    /// Données de chaînes concaténées.
    pub string_data: String,
    /// Charge brute des offsets, encodée séparément.
    pub offsets: Vec<u8>,
    /// Chaîne de décodage des indices de rangée.
    pub data_encoding: Vec<Encoding>,
    /// Chaîne de décodage des offsets.
    pub offset_encoding: Vec<Encoding>,
}

/* ─────────────────────────── Parsing ─────────────────────────── */

/// Lit un tableau d'encodages et le renverse en ordre de décodage.
pub fn read_encoding_list<S: PullSource>(rd: &mut ObjReader<S>) -> CifResult<Vec<Encoding>> {
    let n = rd.read_array_len()?;
    let mut list = Vec::with_capacity(n);
    for _ in 0..n {
        list.push(read_encoding(rd)?);
    }
    list.reverse();
    Ok(list)
}

enum Key {
    Kind,
    Type,
    Origin,
    Factor,
    StringData,
    Offsets,
    DataEncoding,
    OffsetEncoding,
    Other,
}

fn read_encoding<S: PullSource>(rd: &mut ObjReader<S>) -> CifResult<Encoding> {
    let entries = rd.read_map_len()?;
    let mut kind: Option<String> = None;
    let mut ty: Option<i64> = None;
    let mut origin: Option<i64> = None;
    let mut factor: Option<i64> = None;
    let mut string_data: Option<String> = None;
    let mut offsets: Option<Vec<u8>> = None;
    let mut data_encoding: Option<Vec<Encoding>> = None;
    let mut offset_encoding: Option<Vec<Encoding>> = None;

    for _ in 0..entries {
        let key = match rd.read_str()? {
            "kind" => Key::Kind,
            "type" => Key::Type,
            "origin" => Key::Origin,
            "factor" => Key::Factor,
            "stringData" => Key::StringData,
            "offsets" => Key::Offsets,
            "dataEncoding" => Key::DataEncoding,
            "offsetEncoding" => Key::OffsetEncoding,
            _ => Key::Other,
        };
        match key {
            Key::Kind => kind = Some(rd.read_str()?.to_owned()),
            Key::Type => ty = Some(rd.read_int()?),
            Key::Origin => origin = Some(rd.read_int()?),
            Key::Factor => factor = Some(rd.read_int()?),
            Key::StringData => string_data = Some(read_str_or_bin(rd)?),
            Key::Offsets => offsets = Some(rd.read_bin()?.to_vec()),
            Key::DataEncoding => data_encoding = Some(read_encoding_list(rd)?),
            Key::OffsetEncoding => offset_encoding = Some(read_encoding_list(rd)?),
            // clé auxiliaire inconnue : tolérée
            Key::Other => rd.skip_any()?,
        }
    }

    let Some(kind) = kind else {
        return Err(err("encoding without kind"));
    };
    match kind.as_str() {
        "ByteArray" => Ok(Encoding::ByteArray { ty: required_type(ty)? }),
        "IntegerPacking" => {
            let ty = required_type(ty)?;
            if !ty.packs() {
                return Err(err(format!("IntegerPacking source cannot be {ty:?}")));
            }
            Ok(Encoding::IntegerPacking { ty })
        }
        "Delta" => {
            let origin = origin.unwrap_or(0);
            let origin = i32::try_from(origin)
                .map_err(|_| err(format!("Delta origin out of range: {origin}")))?;
            Ok(Encoding::Delta { origin })
        }
        "RunLength" => Ok(Encoding::RunLength),
        "FixedPoint" => {
            let factor = factor.ok_or_else(|| err("FixedPoint without factor"))?;
            let factor = i32::try_from(factor)
                .map_err(|_| err(format!("FixedPoint factor out of range: {factor}")))?;
            Ok(Encoding::FixedPoint { factor })
        }
        "StringArray" => Ok(Encoding::StringArray(Box::new(StringArrayEnc {
            string_data: string_data.ok_or_else(|| err("StringArray without stringData"))?,
            offsets: offsets.ok_or_else(|| err("StringArray without offsets"))?,
            data_encoding: data_encoding
                .ok_or_else(|| err("StringArray without dataEncoding"))?,
            offset_encoding: offset_encoding
                .ok_or_else(|| err("StringArray without offsetEncoding"))?,
        }))),
        other => Err(err(format!("unknown encoding kind `{other}`"))),
    }
}

fn required_type(ty: Option<i64>) -> CifResult<ByteType> {
    let code = ty.ok_or_else(|| err("encoding without type"))?;
    ByteType::from_code(code).ok_or_else(|| err(format!("unknown byte type code {code}")))
}

/// `stringData` arrive comme chaîne msgpack ou comme blob binaire UTF-8.
fn read_str_or_bin<S: PullSource>(rd: &mut ObjReader<S>) -> CifResult<String> {
    let marker = rd.peek_marker()?;
    match marker {
        0xc4..=0xc6 => {
            let bytes = rd.read_bin()?;
            core::str::from_utf8(bytes)
                .map(str::to_owned)
                .map_err(|_| err("invalid UTF-8 in stringData"))
        }
        _ => Ok(rd.read_str()?.to_owned()),
    }
}

/* ─────────────────────────── Tests ─────────────────────────── */

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::obj::build::{arr, bin, int, map, s};

    fn parse(bytes: Vec<u8>) -> CifResult<Vec<Encoding>> {
        let mut rd = ObjReader::new(std::io::Cursor::new(bytes));
        read_encoding_list(&mut rd)
    }

    #[test]
    fn chain_is_reversed_into_decode_order() {
        // sur le fil : ordre d'encodage Delta → ByteArray
        let wire = arr(&[
            map(&[("kind", s("Delta")), ("origin", int(10))]),
            map(&[("kind", s("ByteArray")), ("type", int(3))]),
        ]);
        let list = parse(wire).unwrap();
        assert_eq!(list.len(), 2);
        assert!(matches!(list[0], Encoding::ByteArray { ty: ByteType::I32 }));
        assert!(matches!(list[1], Encoding::Delta { origin: 10 }));
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let wire = arr(&[map(&[("kind", s("Rle2"))])]);
        let err = parse(wire).unwrap_err();
        assert!(err.to_string().contains("unknown encoding kind `Rle2`"));
    }

    #[test]
    fn unknown_auxiliary_key_is_skipped() {
        let wire = arr(&[map(&[
            ("srcSize", int(12)),
            ("kind", s("RunLength")),
        ])]);
        let list = parse(wire).unwrap();
        assert!(matches!(list[0], Encoding::RunLength));
    }

    #[test]
    fn integer_packing_requires_narrow_source() {
        let wire = arr(&[map(&[("kind", s("IntegerPacking")), ("type", int(3))])]);
        assert!(parse(wire).unwrap_err().to_string().contains("IntegerPacking source"));
        let wire = arr(&[map(&[("kind", s("IntegerPacking")), ("type", int(5))])]);
        assert!(matches!(
            parse(wire).unwrap()[0],
            Encoding::IntegerPacking { ty: ByteType::U16 }
        ));
    }

    #[test]
    fn string_array_payload() {
        let wire = arr(&[map(&[
            ("kind", s("StringArray")),
            ("stringData", s("abcdef")),
            ("offsets", bin(&[0, 3, 6])),
            ("dataEncoding", arr(&[map(&[("kind", s("ByteArray")), ("type", int(3))])])),
            ("offsetEncoding", arr(&[map(&[("kind", s("ByteArray")), ("type", int(4))])])),
        ])]);
        let list = parse(wire).unwrap();
        let Encoding::StringArray(sa) = &list[0] else {
            panic!("expected StringArray");
        };
        assert_eq!(sa.string_data, "abcdef");
        assert_eq!(sa.offsets, vec![0, 3, 6]);
        assert_eq!(sa.data_encoding.len(), 1);
        assert_eq!(sa.offset_encoding.len(), 1);
    }

    #[test]
    fn missing_required_field() {
        let wire = arr(&[map(&[("kind", s("ByteArray"))])]);
        assert!(parse(wire).unwrap_err().to_string().contains("without type"));
        let wire = arr(&[map(&[("kind", s("FixedPoint"))])]);
        assert!(parse(wire).unwrap_err().to_string().contains("without factor"));
    }

    #[test]
    fn byte_type_codes() {
        assert_eq!(ByteType::from_code(33), Some(ByteType::F64));
        assert_eq!(ByteType::from_code(7), None);
        assert_eq!(ByteType::I16.width(), 2);
        assert!(ByteType::U8.packs());
        assert!(!ByteType::F32.packs());
    }
}
