//! Turning raw blocks into typed records.
//!
//! The header is mapped first because it declares the mesh size and the
//! number of projectors every array is checked against. The remaining blocks
//! keep their file order.

mod legacy;
mod xml;

use crate::block::BlockMap;
use crate::error::{ConsistencyError, Result, SchemaError};
use crate::schema::{self, Extent, FieldKind, FieldSchema};
use crate::value::{BlockContent, Record, Value};
use crate::version::Markup;
use indexmap::IndexMap;
use log::{debug, trace};

/// Sizes declared in the header.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Extents {
    pub mesh_size: Option<usize>,
    pub number_of_wfc: Option<usize>,
    pub number_of_proj: Option<usize>,
}

impl Extents {
    pub fn from_header(header: &Record) -> Extents {
        let size = |name: &str| {
            header
                .get(name)
                .and_then(|v| v.as_i64())
                .and_then(|i| usize::try_from(i).ok())
        };

        Extents {
            mesh_size: size("mesh_size"),
            number_of_wfc: size("number_of_wfc"),
            number_of_proj: size("number_of_proj"),
        }
    }

    /// Length of the D_ij matrix, `number_of_proj` squared.
    pub fn dij_len(&self) -> Result<Option<usize>> {
        let Some(nproj) = self.number_of_proj else {
            return Ok(None);
        };

        match nproj.checked_mul(nproj) {
            Some(n) => Ok(Some(n)),
            None => Err(SchemaError::InvalidValue {
                block: "header".to_string(),
                field: "number_of_proj".to_string(),
                token: nproj.to_string(),
                expected: "a projector count whose D_ij matrix fits in memory",
            }
            .into()),
        }
    }

    /// Fails rather than pads or truncates.
    pub fn check(&self, block: &str, field: &str, extent: Extent, found: usize) -> Result<()> {
        let mismatch = |expected: usize| ConsistencyError::LengthMismatch {
            block: block.to_string(),
            field: field.to_string(),
            expected,
            found,
        };

        match (extent, self.mesh_size) {
            (Extent::Mesh, Some(mesh)) if found != mesh => Err(mismatch(mesh).into()),
            (Extent::UpToMesh, Some(mesh)) if found > mesh => {
                Err(ConsistencyError::ExceedsMesh {
                    block: block.to_string(),
                    field: field.to_string(),
                    mesh_size: mesh,
                    found,
                }
                .into())
            }
            (Extent::ProjSquared, _) => match self.dij_len()? {
                Some(n) if n != found => Err(mismatch(n).into()),
                _ => Ok(()),
            },
            _ => Ok(()),
        }
    }
}

/// Number of items in a list field. A lone record counts as one.
fn item_count(blocks: &BlockContents, block: &str, field: &str) -> Option<usize> {
    let BlockContent::Record(rec) = blocks.get(block)? else {
        return None;
    };

    match rec.get(field) {
        Some(Value::List(items)) => Some(items.len()),
        Some(_) => Some(1),
        None => Some(0),
    }
}

/// Header declarations that other blocks restate: `mesh.mesh` against
/// `mesh_size`, the `PP_CHI` count against `number_of_wfc` and the
/// `PP_BETA` count against `number_of_proj`.
pub fn check_declarations(blocks: &BlockContents, extents: &Extents) -> Result<()> {
    let mismatch = |block: &str, field: &str, expected: usize, found: usize| -> Result<()> {
        Err(ConsistencyError::LengthMismatch {
            block: block.to_string(),
            field: field.to_string(),
            expected,
            found,
        }
        .into())
    };

    if let (Some(BlockContent::Record(mesh)), Some(mesh_size)) = (blocks.get("mesh"), extents.mesh_size) {
        if let Some(declared) = mesh.get("mesh").and_then(|v| v.as_i64()) {
            if usize::try_from(declared).ok() != Some(mesh_size) {
                return mismatch("mesh", "mesh", mesh_size, usize::try_from(declared).unwrap_or(0));
            }
        }
    }

    let counts = [
        ("pswfc", "chi", extents.number_of_wfc),
        ("nonlocal", "beta", extents.number_of_proj),
    ];

    for (block, field, declared) in counts {
        if let (Some(declared), Some(found)) = (declared, item_count(blocks, block, field)) {
            if declared != found {
                return mismatch(block, field, declared, found);
            }
        }
    }

    Ok(())
}

pub type BlockContents = IndexMap<String, BlockContent>;

/// Map every raw block. Unrecognized blocks are kept verbatim under their tag.
pub fn map_blocks(raw: &BlockMap, markup: Markup) -> Result<BlockContents> {
    let header_schema = schema::block_by_key("header");

    let mut extents = Extents::default();
    let mut header = None;

    if let Some(raw_header) = raw.get("PP_HEADER") {
        let record = match markup {
            Markup::Legacy => legacy::map_header(raw_header)?,
            Markup::Xml => xml::map_block(raw_header, header_schema, &extents)?,
        };
        extents = Extents::from_header(&record);
        header = Some(record);
    }

    debug!(
        "mapping {} blocks, mesh_size = {:?}, number_of_proj = {:?}",
        raw.len(),
        extents.mesh_size,
        extents.number_of_proj
    );

    let mut blocks = BlockContents::new();

    for (tag, block) in raw.iter() {
        if tag == "PP_HEADER" {
            if let Some(record) = header.take() {
                blocks.insert("header".to_string(), BlockContent::Record(record));
            }
            continue;
        }

        let schema = schema::block_by_tag(tag);

        let content = match (markup, schema) {
            (Markup::Legacy, Some(s)) if legacy::handles(s.key) => {
                BlockContent::Record(legacy::map_block(block, s, &extents)?)
            }
            (Markup::Xml, Some(s)) => BlockContent::Record(xml::map_block(block, Some(s), &extents)?),
            _ => {
                trace!("keeping unrecognized block <{}> verbatim", tag);
                BlockContent::Verbatim(block.text.clone())
            }
        };

        let key = schema.map(|s| s.key.to_string()).unwrap_or_else(|| tag.clone());
        blocks.insert(key, content);
    }

    check_declarations(&blocks, &extents)?;

    Ok(blocks)
}

/// Reads reals written by Fortran: `1.0D+02`, `1.0d-3`, and the exponent
/// without a letter that `E` edit descriptors produce for three-digit
/// exponents (`1.0-100`). Only finite values are accepted.
pub fn parse_fortran_f64(token: &str) -> Option<f64> {
    parse_real(token).filter(|x| x.is_finite())
}

fn parse_real(token: &str) -> Option<f64> {
    let token = token.trim();

    if let Ok(x) = token.parse::<f64>() {
        return Some(x);
    }

    let mut s: String = token
        .chars()
        .map(|c| match c {
            'D' | 'd' | 'Q' | 'q' => 'E',
            c => c,
        })
        .collect();

    if let Ok(x) = s.parse::<f64>() {
        return Some(x);
    }

    let pos = s
        .char_indices()
        .skip(1)
        .filter(|(_, c)| *c == '+' || *c == '-')
        .map(|(i, _)| i)
        .last()?;

    let before = s[..pos].chars().last()?;
    if before.is_ascii_digit() || before == '.' {
        s.insert(pos, 'E');
        return s.parse().ok();
    }

    None
}

/// `T`/`F` and the Fortran `.true.`/`.false.` spellings.
pub fn parse_fortran_bool(token: &str) -> Option<bool> {
    match token.trim().to_ascii_lowercase().as_str() {
        "t" | ".t." | "true" | ".true." => Some(true),
        "f" | ".f." | "false" | ".false." => Some(false),
        _ => None,
    }
}

pub fn coerce(block: &str, field: &str, kind: FieldKind, raw: &str) -> Result<Value> {
    let invalid = || SchemaError::InvalidValue {
        block: block.to_string(),
        field: field.to_string(),
        token: raw.trim().to_string(),
        expected: kind.name(),
    };

    let value = match kind {
        FieldKind::Str => Value::Str(raw.trim().to_string()),
        FieldKind::Int => Value::Int(raw.trim().parse().map_err(|_| invalid())?),
        FieldKind::Float => Value::Float(parse_fortran_f64(raw).ok_or_else(invalid)?),
        FieldKind::Bool => Value::Bool(parse_fortran_bool(raw).ok_or_else(invalid)?),
        FieldKind::Array(_) => Value::Array(parse_array(block, field, raw)?),
    };

    Ok(value)
}

pub fn parse_array(block: &str, field: &str, text: &str) -> Result<Vec<f64>> {
    text.split_whitespace()
        .map(|token| {
            parse_fortran_f64(token).ok_or_else(|| {
                SchemaError::InvalidValue {
                    block: block.to_string(),
                    field: field.to_string(),
                    token: token.to_string(),
                    expected: FieldKind::Array(Extent::Free).name(),
                }
                .into()
            })
        })
        .collect()
}

/// Type for a value no schema entry describes: integer, real, logical, string.
pub fn infer_scalar(raw: &str) -> Value {
    let raw = raw.trim();

    if let Ok(i) = raw.parse::<i64>() {
        Value::Int(i)
    } else if let Some(x) = parse_fortran_f64(raw) {
        Value::Float(x)
    } else if let Some(b) = parse_fortran_bool(raw) {
        Value::Bool(b)
    } else {
        Value::Str(raw.to_string())
    }
}

/// Payload of a block no schema entry describes.
pub fn infer_payload(text: &str) -> Option<(&'static str, Value)> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    let numbers: Option<Vec<f64>> = text.split_whitespace().map(parse_fortran_f64).collect();

    match numbers {
        Some(v) => Some((crate::value::VALUES, Value::Array(v))),
        None => Some((crate::value::TEXT, Value::Str(text.to_string()))),
    }
}

/// `prefix` names the child record (`chi.2`), empty for the block itself.
pub fn check_required(block: &str, prefix: &str, record: &Record, fields: &[FieldSchema]) -> Result<()> {
    for f in fields.iter().filter(|f| f.required) {
        if !record.contains_key(f.name) {
            let field = if prefix.is_empty() {
                f.name.to_string()
            } else {
                format!("{}.{}", prefix, f.name)
            };

            return Err(SchemaError::MissingField {
                block: block.to_string(),
                field,
            }
            .into());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UpfError;
    use proptest::prelude::*;

    #[test]
    fn test_fortran_exponents() {
        assert_eq!(parse_fortran_f64("1.0D+02"), Some(100.0));
        assert_eq!(parse_fortran_f64("-2.5d-1"), Some(-0.25));
        assert_eq!(parse_fortran_f64("1.0E+02"), Some(100.0));
        assert_eq!(parse_fortran_f64("1.0-100"), Some(1.0e-100));
        assert_eq!(parse_fortran_f64("-1.5+101"), Some(-1.5e101));
        assert_eq!(parse_fortran_f64("3S"), None);
        assert_eq!(parse_fortran_f64("-"), None);
        assert_eq!(parse_fortran_f64(""), None);
    }

    #[test]
    fn test_non_finite_reals_are_rejected() {
        for token in ["NaN", "nan", "inf", "-inf", "Infinity", "1.0D+400", "1.0+400"] {
            assert_eq!(parse_fortran_f64(token), None, "{}", token);
        }

        assert!(coerce("header", "z_valence", FieldKind::Float, "NaN").is_err());
        assert!(parse_array("local", "values", "1.0 inf 2.0").is_err());
        assert_eq!(infer_scalar("NaN"), Value::Str("NaN".to_string()));
    }

    #[test]
    fn test_coerce_bool() {
        assert_eq!(coerce("header", "core_correction", FieldKind::Bool, "T").unwrap(), Value::Bool(true));
        assert_eq!(coerce("header", "has_so", FieldKind::Bool, ".false.").unwrap(), Value::Bool(false));
        assert!(coerce("header", "has_so", FieldKind::Bool, "maybe").is_err());
    }

    #[test]
    fn test_coerce_names_field() {
        let err = coerce("header", "z_valence", FieldKind::Float, "four").unwrap_err();

        assert_eq!(
            err,
            UpfError::Schema(SchemaError::InvalidValue {
                block: "header".to_string(),
                field: "z_valence".to_string(),
                token: "four".to_string(),
                expected: "a real number",
            })
        );
    }

    #[test]
    fn test_infer_scalar() {
        assert_eq!(infer_scalar(" 12 "), Value::Int(12));
        assert_eq!(infer_scalar("1.5D0"), Value::Float(1.5));
        assert_eq!(infer_scalar("F"), Value::Bool(false));
        assert_eq!(infer_scalar("3S"), Value::Str("3S".to_string()));
    }

    #[test]
    fn test_extents_check() {
        let ext = Extents {
            mesh_size: Some(4),
            number_of_wfc: None,
            number_of_proj: Some(2),
        };

        assert!(ext.check("local", "values", Extent::Mesh, 4).is_ok());
        assert!(ext.check("local", "values", Extent::Mesh, 5).is_err());
        assert!(ext.check("nonlocal", "values", Extent::UpToMesh, 3).is_ok());
        assert!(ext.check("nonlocal", "values", Extent::UpToMesh, 5).is_err());
        assert!(ext.check("nonlocal", "dij", Extent::ProjSquared, 4).is_ok());
        assert!(ext.check("nonlocal", "dij", Extent::ProjSquared, 2).is_err());
    }

    #[test]
    fn test_huge_projector_count_is_an_error() {
        let ext = Extents {
            number_of_proj: Some(usize::MAX / 2),
            ..Extents::default()
        };

        assert!(matches!(
            ext.check("nonlocal", "dij", Extent::ProjSquared, 4).unwrap_err(),
            UpfError::Schema(SchemaError::InvalidValue { ref field, .. }) if field == "number_of_proj"
        ));
    }

    fn record_block(rec: Record) -> BlockContent {
        BlockContent::Record(rec)
    }

    #[test]
    fn test_check_declarations() {
        let mut mesh = Record::new();
        mesh.insert("mesh", 9i64);

        let mut pswfc = Record::new();
        pswfc.push("chi", Value::Record(Record::new()));
        pswfc.push("chi", Value::Record(Record::new()));

        let mut blocks = BlockContents::new();
        blocks.insert("mesh".to_string(), record_block(mesh));
        blocks.insert("pswfc".to_string(), record_block(pswfc));

        let ext = Extents {
            mesh_size: Some(8),
            number_of_wfc: Some(2),
            number_of_proj: None,
        };

        assert_eq!(
            check_declarations(&blocks, &ext).unwrap_err(),
            UpfError::Consistency(ConsistencyError::LengthMismatch {
                block: "mesh".to_string(),
                field: "mesh".to_string(),
                expected: 8,
                found: 9,
            })
        );

        let ext = Extents {
            mesh_size: Some(9),
            number_of_wfc: Some(3),
            number_of_proj: None,
        };
        assert!(matches!(
            check_declarations(&blocks, &ext).unwrap_err(),
            UpfError::Consistency(ConsistencyError::LengthMismatch { expected: 3, found: 2, .. })
        ));

        let ext = Extents {
            number_of_wfc: Some(2),
            ..ext
        };
        assert!(check_declarations(&blocks, &ext).is_ok());
    }

    proptest! {
        #[test]
        fn prop_d_exponent_matches_e_exponent(m in -9.0f64..9.0, e in -99i32..99) {
            let with_e = format!("{:.6}E{:+03}", m, e);
            let with_d = with_e.replace('E', "D");
            prop_assert_eq!(parse_fortran_f64(&with_d), with_e.parse::<f64>().ok());
        }
    }
}
