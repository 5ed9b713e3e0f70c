//! cifra-bcif — lecteur du format binaire BinaryCIF
//!
//! Quatre étages au-dessus du tampon de `cifra-core` :
//! - [`obj`] : lecteur à tirage du sous-ensemble msgpack (maps, tableaux,
//!   entiers ≤ 32 bits, chaînes, blobs binaires, nil)
//! - [`encoding`] : l'arbre déclaratif d'encodages attaché à chaque colonne
//!   (ByteArray, IntegerPacking, Delta, RunLength, FixedPoint, StringArray)
//! - [`decode`] : le pipeline qui applique la chaîne en ordre de décodage et
//!   matérialise des vecteurs typés i32 / f64 / chaînes, plus le masque de
//!   présence
//! - [`block`] : le parcours `dataBlocks` → catégories → colonnes, et la
//!   projection rangée par rangée vers le [`Dispatcher`](cifra_core::Dispatcher)
//!
//! Le contrat de callbacks est exactement celui du chemin texte : mêmes
//! lignes logiques, même tri-état omis/inconnu (octets de masque `1` et `2`).

#![deny(missing_docs)]

pub mod decode;
pub mod encoding;
pub mod obj;

mod block;

pub use block::BinaryReader;
pub use decode::{Data, StringTable};
pub use encoding::{ByteType, Encoding};
pub use obj::ObjReader;
