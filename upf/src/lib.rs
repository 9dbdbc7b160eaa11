//! Reading and writing UPF pseudopotential files, both the legacy (v1)
//! pseudo-markup and the XML form (v2).
//!
//! ```no_run
//! let text = std::fs::read_to_string("Si.pbe-nc.UPF").unwrap();
//! let doc = upf::UpfDocument::from_text(&text).unwrap();
//! println!("{}", doc.get_f64("header", "z_valence").unwrap());
//! ```
//!
//! The crate does no file I/O of its own; it works on text and bytes.

mod atompsp;
mod block;
mod document;
pub mod error;
mod field;
mod projectors;
pub mod schema;
pub mod serializer;
pub mod value;
pub mod version;

pub use atompsp::AtomPSP;
pub use document::{BetaProjector, GeneratorInput, PseudoWavefunction, UpfDocument};
pub use error::{ConsistencyError, FormatError, Result, SchemaError, UpfError, UpfWarning};
pub use projectors::{Projector, Projectors};
pub use serializer::{OutputMarkup, WriteOptions};
pub use value::{BlockContent, Record, Value};
pub use version::Markup;
