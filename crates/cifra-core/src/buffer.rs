//! Source à tirage et tampon d'octets glissant.
//!
//! Le tampon maintient deux offsets : `line_start` (début de la région encore
//! référencée par des jetons en cours de vie) et `next_line` (début de la
//! prochaine ligne non lue). Quand un rechargement est nécessaire, les octets
//! avant `line_start` sont jetés par un déplacement compactant, puis au moins
//! `chunk` octets sont tirés en un seul appel à la source.

use memchr::memchr3;

use crate::{CifError, CifResult};

/// Taille minimale d'un rechargement (4 MiB).
pub const DEFAULT_CHUNK: usize = 4 << 20;

/* ─────────────────────────── Source à tirage ─────────────────────────── */

/// Source d'octets à tirage.
///
/// `pull` remplit au plus `dst.len()` octets et renvoie le nombre lu ;
/// `Ok(0)` signale la fin de la source. En livrer moins que demandé est permis.
pub trait PullSource {
    /// Tire des octets dans `dst`.
    fn pull(&mut self, dst: &mut [u8]) -> std::io::Result<usize>;
}

impl<R: std::io::Read> PullSource for R {
    fn pull(&mut self, dst: &mut [u8]) -> std::io::Result<usize> {
        self.read(dst)
    }
}

/* ─────────────────────────── Options ─────────────────────────── */

/// Réglages du tampon d'entrée.
#[derive(Debug, Clone, Copy)]
pub struct BufferOptions {
    /// Taille minimale tirée à chaque rechargement.
    pub chunk: usize,
}

impl Default for BufferOptions {
    fn default() -> Self {
        Self { chunk: DEFAULT_CHUNK }
    }
}

/* ─────────────────────────── Tampon glissant ─────────────────────────── */

/// Tampon d'entrée glissant au-dessus d'une [`PullSource`].
///
/// Deux primitives : [`advance_line`](InputBuffer::advance_line) /
/// [`line`](InputBuffer::line) pour le mode texte, et
/// [`read_exact`](InputBuffer::read_exact) pour le mode binaire.
#[derive(Debug)]
pub struct InputBuffer<S> {
    source: S,
    buf: Vec<u8>,
    /// Octets valides dans `buf`.
    len: usize,
    /// Début de la région encore référencée (début de la ligne courante).
    line_start: usize,
    /// Fin (exclue) de la ligne courante.
    line_end: usize,
    /// Début de la prochaine ligne non lue.
    next_line: usize,
    eof: bool,
    line_no: u64,
    chunk: usize,
}

impl<S: PullSource> InputBuffer<S> {
    /// Construit un tampon avec les réglages par défaut.
    pub fn new(source: S) -> Self {
        Self::with_options(source, BufferOptions::default())
    }

    /// Construit un tampon avec des réglages explicites.
    pub fn with_options(source: S, opts: BufferOptions) -> Self {
        Self {
            source,
            buf: Vec::new(),
            len: 0,
            line_start: 0,
            line_end: 0,
            next_line: 0,
            eof: false,
            line_no: 0,
            chunk: opts.chunk.max(1),
        }
    }

    /// Numéro (1-based) de la ligne courante ; 0 tant qu'aucune ligne n'a été lue.
    pub fn line_number(&self) -> u64 {
        self.line_no
    }

    /// Vue sur la ligne courante, terminateur exclu.
    pub fn line(&self) -> &[u8] {
        &self.buf[self.line_start..self.line_end]
    }

    /// Avance sur la ligne suivante. `Ok(false)` à la fin de la source.
    ///
    /// Les terminateurs reconnus sont `\n`, `\r`, `\r\n` et NUL. La vue
    /// renvoyée par [`line`](InputBuffer::line) reste valide jusqu'au prochain
    /// appel.
    pub fn advance_line(&mut self) -> CifResult<bool> {
        self.line_start = self.next_line;
        let mut scan = self.line_start;
        let (term, term_len) = loop {
            if let Some(rel) = memchr3(b'\n', b'\r', 0, &self.buf[scan..self.len]) {
                let pos = scan + rel;
                if self.buf[pos] == b'\r' {
                    // Un `\n` d'appariement peut ne pas être chargé encore.
                    if pos + 1 >= self.len && !self.eof {
                        let shift = self.refill(0)?;
                        scan = pos - shift;
                        continue;
                    }
                    let two = pos + 1 < self.len && self.buf[pos + 1] == b'\n';
                    break (pos, if two { 2 } else { 1 });
                }
                break (pos, 1);
            }
            if self.eof {
                // Dernière ligne sans terminateur.
                break (self.len, 0);
            }
            let before = self.len;
            let shift = self.refill(0)?;
            scan = before - shift;
        };
        if term_len == 0 && term == self.line_start {
            self.line_end = term;
            return Ok(false);
        }
        self.line_end = term;
        self.next_line = term + term_len;
        self.line_no += 1;
        Ok(true)
    }

    /// Lit exactement `n` octets (mode binaire).
    ///
    /// Échoue avec une erreur `Io` si la source se termine avant d'avoir livré
    /// la tranche promise. La vue renvoyée reste valide jusqu'au prochain appel.
    pub fn read_exact(&mut self, n: usize) -> CifResult<&[u8]> {
        self.line_start = self.next_line;
        while self.len - self.line_start < n {
            if self.eof {
                return Err(CifError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "source ended before a promised span",
                )));
            }
            self.refill(n)?;
        }
        let start = self.line_start;
        self.next_line = start + n;
        self.line_start = self.next_line;
        Ok(&self.buf[start..start + n])
    }

    /// Vrai si la source est épuisée et le tampon entièrement consommé.
    pub fn at_eof(&mut self) -> CifResult<bool> {
        while self.len == self.next_line && !self.eof {
            self.line_start = self.next_line;
            self.refill(0)?;
        }
        Ok(self.eof && self.len == self.next_line)
    }

    /// Compacte puis tire au moins `chunk` octets (ou assez pour couvrir
    /// `min_ahead` au-delà de `line_start`). Renvoie le décalage appliqué
    /// par le compactage.
    fn refill(&mut self, min_ahead: usize) -> CifResult<usize> {
        let shift = self.line_start;
        if shift > 0 {
            self.buf.copy_within(shift..self.len, 0);
            self.len -= shift;
            self.line_start = 0;
            self.line_end = self.line_end.saturating_sub(shift);
            self.next_line = self.next_line.saturating_sub(shift);
        }
        let target = (self.len + self.chunk).max(min_ahead);
        if self.buf.len() < target {
            self.buf.resize(target, 0);
        }
        let got = self.source.pull(&mut self.buf[self.len..])?;
        if got == 0 {
            self.eof = true;
        } else {
            self.len += got;
        }
        Ok(shift)
    }
}

/* ─────────────────────────── Tests ─────────────────────────── */

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    /// Source qui livre `step` octets au plus par tirage, pour exercer les
    /// rechargements et le compactage.
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        step: usize,
    }

    impl Trickle {
        fn new(data: &[u8], step: usize) -> Self {
            Self { data: data.to_vec(), pos: 0, step }
        }
    }

    impl std::io::Read for Trickle {
        fn read(&mut self, dst: &mut [u8]) -> std::io::Result<usize> {
            let n = self.step.min(dst.len()).min(self.data.len() - self.pos);
            dst[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    fn lines_of(data: &[u8], step: usize, chunk: usize) -> Vec<String> {
        let mut buf =
            InputBuffer::with_options(Trickle::new(data, step), BufferOptions { chunk });
        let mut out = Vec::new();
        while buf.advance_line().unwrap() {
            out.push(String::from_utf8(buf.line().to_vec()).unwrap());
        }
        out
    }

    #[test]
    fn terminators() {
        let got = lines_of(b"a\nbb\r\nccc\rd\0e", 3, 4);
        assert_eq!(got, vec!["a", "bb", "ccc", "d", "e"]);
    }

    #[test]
    fn last_line_without_terminator() {
        let got = lines_of(b"one\ntwo", 2, 4);
        assert_eq!(got, vec!["one", "two"]);
    }

    #[test]
    fn crlf_split_across_refills() {
        // Le `\r` arrive en fin de tirage, le `\n` au tirage suivant.
        let got = lines_of(b"ab\r\ncd\r\n", 3, 3);
        assert_eq!(got, vec!["ab", "cd"]);
    }

    #[test]
    fn line_longer_than_chunk() {
        let long = "x".repeat(100);
        let data = format!("{long}\nshort\n");
        let got = lines_of(data.as_bytes(), 7, 8);
        assert_eq!(got, vec![long, "short".to_string()]);
    }

    #[test]
    fn empty_lines_are_delivered() {
        let got = lines_of(b"a\n\nb\n", 2, 4);
        assert_eq!(got, vec!["a", "", "b"]);
    }

    #[test]
    fn line_numbers() {
        let mut buf = InputBuffer::new(Trickle::new(b"a\nb\nc\n", 2));
        assert_eq!(buf.line_number(), 0);
        buf.advance_line().unwrap();
        buf.advance_line().unwrap();
        assert_eq!(buf.line_number(), 2);
    }

    #[test]
    fn read_exact_across_refills() {
        let data: Vec<u8> = (0..64).collect();
        let mut buf =
            InputBuffer::with_options(Trickle::new(&data, 5), BufferOptions { chunk: 8 });
        assert_eq!(buf.read_exact(3).unwrap(), &data[0..3]);
        assert_eq!(buf.read_exact(40).unwrap(), &data[3..43]);
        assert_eq!(buf.read_exact(21).unwrap(), &data[43..64]);
    }

    #[test]
    fn read_exact_short_source() {
        let mut buf = InputBuffer::new(Trickle::new(b"abc", 2));
        let err = buf.read_exact(4).unwrap_err();
        assert!(matches!(err, CifError::Io(_)));
    }

    #[test]
    fn at_eof() {
        let mut buf = InputBuffer::new(Trickle::new(b"ab", 2));
        assert!(!buf.at_eof().unwrap());
        assert_eq!(buf.read_exact(2).unwrap(), b"ab");
        assert!(buf.at_eof().unwrap());
    }
}
