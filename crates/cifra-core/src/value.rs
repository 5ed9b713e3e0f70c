//! Modèle de cellule tri-état.
//!
//! Une observation de mot-clé est soit une valeur typée, soit le littéral `.`
//! (valeur omise), soit le littéral `?` (valeur inconnue). Les deux derniers
//! impliquent « présent dans le fichier » ; ils sont mutuellement exclusifs.

use crate::{CifError, CifResult};

bitflags::bitflags! {
    /// Indicateurs d'un slot de mot-clé entre deux callbacks.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SlotFlags: u8 {
        /// Le mot-clé a été observé depuis la dernière remise à zéro.
        const IN_FILE = 1 << 0;
        /// L'observation était le littéral `.`.
        const OMITTED = 1 << 1;
        /// L'observation était le littéral `?`.
        const UNKNOWN = 1 << 2;
    }
}

/// Type déclaré d'une cellule.
///
/// Le mode texte livre toujours des chaînes ; le mode binaire peut livrer les
/// trois types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CellType {
    /// Chaîne.
    Str,
    /// Entier 32 bits.
    Int,
    /// Flottant 64 bits.
    Float,
}

/// Valeur d'une cellule telle que vue par un callback de ligne.
///
/// Les variantes empruntées (`Str`) ne doivent pas survivre au retour du
/// callback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cell<'a> {
    /// Mot-clé jamais observé sur cette ligne.
    Missing,
    /// Valeur omise (littéral `.`).
    Omitted,
    /// Valeur inconnue (littéral `?`).
    Unknown,
    /// Chaîne empruntée au tampon de ligne ou au slot.
    Str(&'a str),
    /// Entier.
    Int(i32),
    /// Flottant.
    Float(f64),
}

impl<'a> Cell<'a> {
    /// Vrai si le mot-clé a été observé (valeur, `.` ou `?`).
    pub fn is_in_file(&self) -> bool {
        !matches!(self, Cell::Missing)
    }

    /// Vrai pour le littéral `.`.
    pub fn is_omitted(&self) -> bool {
        matches!(self, Cell::Omitted)
    }

    /// Vrai pour le littéral `?`.
    pub fn is_unknown(&self) -> bool {
        matches!(self, Cell::Unknown)
    }

    /// La cellule comme chaîne empruntée.
    pub fn as_str(&self) -> CifResult<&'a str> {
        match *self {
            Cell::Str(s) => Ok(s),
            other => Err(CifError::value(format!("cell is not a string: {other:?}"))),
        }
    }

    /// La cellule comme entier 32 bits ; les chaînes sont analysées.
    pub fn as_i32(&self) -> CifResult<i32> {
        match *self {
            Cell::Int(v) => Ok(v),
            Cell::Str(s) => s
                .trim()
                .parse()
                .map_err(|_| CifError::value(format!("not an integer: {s:?}"))),
            other => Err(CifError::value(format!("cell is not an integer: {other:?}"))),
        }
    }

    /// La cellule comme flottant 64 bits ; les chaînes sont analysées.
    pub fn as_f64(&self) -> CifResult<f64> {
        match *self {
            Cell::Float(v) => Ok(v),
            Cell::Int(v) => Ok(f64::from(v)),
            Cell::Str(s) => s
                .trim()
                .parse()
                .map_err(|_| CifError::value(format!("not a float: {s:?}"))),
            other => Err(CifError::value(format!("cell is not a float: {other:?}"))),
        }
    }
}

/* ─────────────────────────── Tests ─────────────────────────── */
