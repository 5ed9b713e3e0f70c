//! Erreurs communes du lecteur.

use thiserror::Error;

/// Alias résultat commun au workspace.
pub type CifResult<T> = core::result::Result<T, CifError>;

/// Erreur du lecteur, classée par genre.
///
/// Aucune erreur d'analyse n'est rattrapable sur place : le lecteur reste dans
/// un état cohérent mais doit être abandonné par l'appelant. Les erreurs
/// remontées par un callback utilisateur traversent `read_block` sans être
/// altérées.
#[derive(Debug, Error)]
pub enum CifError {
    /// La source a échoué, ou s'est terminée avant la fin d'une tranche promise.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// L'entrée viole la grammaire textuelle ou binaire.
    #[error("file format error: {message} (line {line})")]
    FileFormat {
        /// Description de la violation.
        message: String,
        /// Numéro de ligne fautif (0 en mode binaire).
        line: u64,
    },

    /// Un appel ou un accesseur a reçu un argument invalide.
    #[error("value error: {0}")]
    Value(String),

    /// Un callback utilisateur a signalé un échec ; message transmis tel quel.
    #[error("{0}")]
    Callback(String),
}

/// Genre d'erreur, pour les appelants qui veulent réagir sans déstructurer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Erreur d'entrée/sortie.
    Io,
    /// Violation de grammaire.
    FileFormat,
    /// Argument invalide.
    Value,
    /// Échec signalé par un callback.
    Callback,
}

impl CifError {
    /// Construit une erreur de format avec numéro de ligne.
    pub fn format(message: impl Into<String>, line: u64) -> Self {
        CifError::FileFormat { message: message.into(), line }
    }

    /// Construit une erreur de valeur.
    pub fn value(message: impl Into<String>) -> Self {
        CifError::Value(message.into())
    }

    /// Genre de l'erreur.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CifError::Io(_) => ErrorKind::Io,
            CifError::FileFormat { .. } => ErrorKind::FileFormat,
            CifError::Value(_) => ErrorKind::Value,
            CifError::Callback(_) => ErrorKind::Callback,
        }
    }
}

/* ─────────────────────────── Tests ─────────────────────────── */
