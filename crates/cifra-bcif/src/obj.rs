//! Lecteur à tirage du sous-ensemble msgpack utilisé par BinaryCIF.
//!
//! Grammaire acceptée : maps et tableaux fix/16/32, entiers signés et non
//! signés jusqu'à 32 bits, chaînes courtes et longues (UTF-8), blobs
//! binaires, `nil` et booléens. Les entiers 64 bits et les flottants sont
//! acceptés par les opérateurs de saut (tolérance aux champs d'en-tête
//! étrangers) mais pas par `read_int`.

use byteorder::{BigEndian, ByteOrder};
use cifra_core::{BufferOptions, CifError, CifResult, InputBuffer, PullSource};

/// Erreur de format binaire (le mode binaire n'a pas de numéro de ligne).
pub(crate) fn err(message: impl Into<String>) -> CifError {
    CifError::format(message, 0)
}

/// Lecteur séquentiel d'objets msgpack au-dessus du tampon glissant.
#[derive(Debug)]
pub struct ObjReader<S> {
    input: InputBuffer<S>,
    /// Marqueur lu par `peek_marker`, pas encore consommé.
    peeked: Option<u8>,
}

impl<S: PullSource> ObjReader<S> {
    /// Construit un lecteur avec les réglages de tampon par défaut.
    pub fn new(source: S) -> Self {
        Self::with_options(source, BufferOptions::default())
    }

    /// Construit un lecteur avec des réglages de tampon explicites.
    pub fn with_options(source: S, opts: BufferOptions) -> Self {
        Self { input: InputBuffer::with_options(source, opts), peeked: None }
    }

    /* ────────── Marqueurs ────────── */

    fn take_marker(&mut self) -> CifResult<u8> {
        if let Some(m) = self.peeked.take() {
            return Ok(m);
        }
        Ok(self.input.read_exact(1)?[0])
    }

    /// Regarde le prochain marqueur sans le consommer.
    pub fn peek_marker(&mut self) -> CifResult<u8> {
        let m = self.take_marker()?;
        self.peeked = Some(m);
        Ok(m)
    }

    /// Vrai si le prochain objet est `nil` (sans le consommer).
    pub fn peek_is_nil(&mut self) -> CifResult<bool> {
        Ok(self.peek_marker()? == 0xc0)
    }

    /* ────────── Objets composés ────────── */

    /// Longueur d'une map ; erreur si l'objet suivant n'en est pas une.
    pub fn read_map_len(&mut self) -> CifResult<usize> {
        match self.take_marker()? {
            m @ 0x80..=0x8f => Ok((m & 0x0f) as usize),
            0xde => self.read_len16(),
            0xdf => self.read_len32(),
            m => Err(err(format!("expected a map, found marker 0x{m:02x}"))),
        }
    }

    /// Longueur d'un tableau ; erreur si l'objet suivant n'en est pas un.
    pub fn read_array_len(&mut self) -> CifResult<usize> {
        match self.take_marker()? {
            m @ 0x90..=0x9f => Ok((m & 0x0f) as usize),
            0xdc => self.read_len16(),
            0xdd => self.read_len32(),
            m => Err(err(format!("expected an array, found marker 0x{m:02x}"))),
        }
    }

    /* ────────── Scalaires ────────── */

    /// Entier signé ou non signé jusqu'à 32 bits.
    pub fn read_int(&mut self) -> CifResult<i64> {
        match self.take_marker()? {
            m @ 0x00..=0x7f => Ok(i64::from(m)),
            m @ 0xe0..=0xff => Ok(i64::from(m as i8)),
            0xcc => Ok(i64::from(self.input.read_exact(1)?[0])),
            0xcd => Ok(i64::from(BigEndian::read_u16(self.input.read_exact(2)?))),
            0xce => Ok(i64::from(BigEndian::read_u32(self.input.read_exact(4)?))),
            0xd0 => Ok(i64::from(self.input.read_exact(1)?[0] as i8)),
            0xd1 => Ok(i64::from(BigEndian::read_i16(self.input.read_exact(2)?))),
            0xd2 => Ok(i64::from(BigEndian::read_i32(self.input.read_exact(4)?))),
            m => Err(err(format!("expected an integer, found marker 0x{m:02x}"))),
        }
    }

    /// Chaîne UTF-8, empruntée au tampon jusqu'au prochain appel.
    pub fn read_str(&mut self) -> CifResult<&str> {
        let len = match self.take_marker()? {
            m @ 0xa0..=0xbf => (m & 0x1f) as usize,
            0xd9 => self.input.read_exact(1)?[0] as usize,
            0xda => self.read_len16()?,
            0xdb => self.read_len32()?,
            m => return Err(err(format!("expected a string, found marker 0x{m:02x}"))),
        };
        core::str::from_utf8(self.input.read_exact(len)?)
            .map_err(|_| err("invalid UTF-8 in string"))
    }

    /// Blob binaire, emprunté au tampon jusqu'au prochain appel.
    pub fn read_bin(&mut self) -> CifResult<&[u8]> {
        let len = match self.take_marker()? {
            0xc4 => self.input.read_exact(1)?[0] as usize,
            0xc5 => self.read_len16()?,
            0xc6 => self.read_len32()?,
            m => return Err(err(format!("expected binary data, found marker 0x{m:02x}"))),
        };
        self.input.read_exact(len)
    }

    /// Lit une chaîne et la compare à `lit` sans copie.
    pub fn expect_string(&mut self, lit: &str) -> CifResult<bool> {
        Ok(self.read_str()? == lit)
    }

    /* ────────── Sauts ────────── */

    /// Saute un scalaire (nil, booléen, entier, flottant, chaîne, blob).
    pub fn skip_scalar(&mut self) -> CifResult<()> {
        let skip = |n: usize, input: &mut InputBuffer<S>| -> CifResult<()> {
            input.read_exact(n)?;
            Ok(())
        };
        match self.take_marker()? {
            0x00..=0x7f | 0xe0..=0xff | 0xc0 | 0xc2 | 0xc3 => Ok(()),
            0xcc | 0xd0 => skip(1, &mut self.input),
            0xcd | 0xd1 => skip(2, &mut self.input),
            0xce | 0xd2 | 0xca => skip(4, &mut self.input),
            0xcf | 0xd3 | 0xcb => skip(8, &mut self.input),
            m @ 0xa0..=0xbf => skip((m & 0x1f) as usize, &mut self.input),
            0xd9 | 0xc4 => {
                let n = self.input.read_exact(1)?[0] as usize;
                skip(n, &mut self.input)
            }
            0xda | 0xc5 => {
                let n = self.read_len16()?;
                skip(n, &mut self.input)
            }
            0xdb | 0xc6 => {
                let n = self.read_len32()?;
                skip(n, &mut self.input)
            }
            m => Err(err(format!("unsupported msgpack marker 0x{m:02x}"))),
        }
    }

    /// Saute n'importe quel objet, maps et tableaux récursivement compris.
    pub fn skip_any(&mut self) -> CifResult<()> {
        match self.peek_marker()? {
            0x80..=0x8f | 0xde | 0xdf => {
                let n = self.read_map_len()?;
                for _ in 0..n {
                    self.skip_any()?;
                    self.skip_any()?;
                }
                Ok(())
            }
            0x90..=0x9f | 0xdc | 0xdd => {
                let n = self.read_array_len()?;
                for _ in 0..n {
                    self.skip_any()?;
                }
                Ok(())
            }
            _ => self.skip_scalar(),
        }
    }

    /* ────────── Primitives internes ────────── */

    fn read_len16(&mut self) -> CifResult<usize> {
        Ok(BigEndian::read_u16(self.input.read_exact(2)?) as usize)
    }

    fn read_len32(&mut self) -> CifResult<usize> {
        Ok(BigEndian::read_u32(self.input.read_exact(4)?) as usize)
    }
}

/* ─────────────────────────── Constructeurs de test ─────────────────────────── */


/* ─────────────────────────── Tests ─────────────────────────── */

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::build::{arr, bin, int, map, nil, s};
    use super::*;

    fn reader(bytes: Vec<u8>) -> ObjReader<std::io::Cursor<Vec<u8>>> {
        ObjReader::new(std::io::Cursor::new(bytes))
    }

    #[test]
    fn integers_all_widths() {
        for v in [0, 1, 42, 127, -1, -32, -100, 200, 40_000, -40_000, 3_000_000_000] {
            let mut rd = reader(int(v));
            assert_eq!(rd.read_int().unwrap(), v, "value {v}");
        }
    }

    #[test]
    fn strings_and_bins() {
        let long = "x".repeat(80);
        let mut rd = reader([s("abc"), s(""), s(&long), bin(&[1, 2, 3])].concat());
        assert_eq!(rd.read_str().unwrap(), "abc");
        assert_eq!(rd.read_str().unwrap(), "");
        assert_eq!(rd.read_str().unwrap(), long);
        assert_eq!(rd.read_bin().unwrap(), &[1, 2, 3]);
    }

    #[test]
    fn maps_and_arrays_large_forms() {
        let entries: Vec<(String, Vec<u8>)> =
            (0..20).map(|i| (format!("k{i}"), int(i))).collect();
        let borrowed: Vec<(&str, Vec<u8>)> =
            entries.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();
        let mut rd = reader(map(&borrowed));
        assert_eq!(rd.read_map_len().unwrap(), 20);

        let items: Vec<Vec<u8>> = (0..17).map(int).collect();
        let mut rd = reader(arr(&items));
        assert_eq!(rd.read_array_len().unwrap(), 17);
        for i in 0..17 {
            assert_eq!(rd.read_int().unwrap(), i);
        }
    }

    #[test]
    fn wrong_shape_is_an_error() {
        let mut rd = reader(int(5));
        assert!(rd.read_map_len().is_err());
        let mut rd = reader(s("x"));
        assert!(rd.read_int().is_err());
        // entiers 64 bits hors du sous-ensemble accepté
        let mut rd = reader(vec![0xd3, 0, 0, 0, 0, 0, 0, 0, 1]);
        assert!(rd.read_int().is_err());
    }

    #[test]
    fn expect_string_without_copy() {
        let mut rd = reader([s("dataBlocks"), s("other")].concat());
        assert!(rd.expect_string("dataBlocks").unwrap());
        assert!(!rd.expect_string("dataBlocks").unwrap());
    }

    #[test]
    fn skip_any_recursive() {
        let nested = map(&[
            ("a", arr(&[int(1), s("two"), nil()])),
            ("b", map(&[("inner", bin(&[9, 9]))])),
        ]);
        let mut rd = reader([nested, int(77)].concat());
        rd.skip_any().unwrap();
        assert_eq!(rd.read_int().unwrap(), 77);
    }

    #[test]
    fn skip_scalar_accepts_floats_and_wide_ints() {
        // f64 + u64, tolérés en saut seulement
        let mut bytes = vec![0xcb];
        bytes.extend_from_slice(&1.5f64.to_be_bytes());
        bytes.push(0xcf);
        bytes.extend_from_slice(&7u64.to_be_bytes());
        bytes.extend_from_slice(&int(3));
        let mut rd = reader(bytes);
        rd.skip_scalar().unwrap();
        rd.skip_scalar().unwrap();
        assert_eq!(rd.read_int().unwrap(), 3);
    }

    #[test]
    fn peek_does_not_consume() {
        let mut rd = reader(nil());
        assert!(rd.peek_is_nil().unwrap());
        assert!(rd.peek_is_nil().unwrap());
        rd.skip_scalar().unwrap();
    }
}
