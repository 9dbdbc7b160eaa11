//! Field mapping for the legacy markup (UPF 1.x).
//!
//! Legacy blocks carry no attributes. The header is a column of values, one
//! per line, each followed by a free-text description:
//!
//! ```text
//! <PP_HEADER>
//!    0                   Version Number
//!   Si                   Element
//!    NC                  Norm - Conserving pseudopotential
//!     F                  Nonlinear Core Correction
//!  SLA  PW   PBE  PBE     PBE  Exchange-Correlation functional
//!     4.00000000000      Z valence
//!   ...
//! ```

use super::{check_required, coerce, infer_payload, parse_array, Extents};
use crate::block::RawBlock;
use crate::error::{ConsistencyError, Result, SchemaError};
use crate::schema::{self, BlockSchema, ChildShape, Extent, FieldKind, CHI_FIELDS};
use crate::value::{Record, Value, TEXT, VALUES};
use crate::version::LEGACY_VERSION;
use log::trace;

const HEADER: &str = "header";

/// Blocks the legacy layout defines. Anything else is kept verbatim.
pub fn handles(key: &str) -> bool {
    schema::block_by_key(key).map_or(false, |s| s.applies.includes(&LEGACY_VERSION))
}

fn split_lines(text: &str) -> Vec<Vec<&str>> {
    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>())
        .filter(|tokens| !tokens.is_empty())
        .collect()
}

fn header_token<'a>(lines: &[Vec<&'a str>], line: usize, pos: usize, field: &str) -> Result<&'a str> {
    lines
        .get(line)
        .and_then(|tokens| tokens.get(pos))
        .copied()
        .ok_or_else(|| {
            SchemaError::MissingField {
                block: HEADER.to_string(),
                field: field.to_string(),
            }
            .into()
        })
}

pub fn map_header(raw: &RawBlock) -> Result<Record> {
    let lines = split_lines(&raw.body);
    let token = |line: usize, pos: usize, field: &str| header_token(&lines, line, pos, field);

    let mut rec = Record::new();

    rec.insert("element", token(1, 0, "element")?);

    let pseudo_type = token(2, 0, "pseudo_type")?;
    rec.insert("pseudo_type", pseudo_type);
    rec.insert("is_ultrasoft", pseudo_type == "US");
    rec.insert("is_paw", pseudo_type == "PAW");

    let nlcc = token(3, 0, "core_correction")?;
    rec.insert("core_correction", coerce(HEADER, "core_correction", FieldKind::Bool, nlcc)?);

    let functional: Vec<&str> = lines
        .get(4)
        .map(|tokens| {
            tokens
                .iter()
                .take_while(|t| !t.starts_with("Exchange"))
                .copied()
                .collect()
        })
        .unwrap_or_default();
    if !functional.is_empty() {
        rec.insert("functional", functional.join(" "));
    }

    let scalars: [(&str, usize, usize, FieldKind); 8] = [
        ("z_valence", 5, 0, FieldKind::Float),
        ("total_psenergy", 6, 0, FieldKind::Float),
        ("wfc_cutoff", 7, 0, FieldKind::Float),
        ("rho_cutoff", 7, 1, FieldKind::Float),
        ("l_max", 8, 0, FieldKind::Int),
        ("mesh_size", 9, 0, FieldKind::Int),
        ("number_of_wfc", 10, 0, FieldKind::Int),
        ("number_of_proj", 10, 1, FieldKind::Int),
    ];

    for (name, line, pos, kind) in scalars {
        let raw_value = token(line, pos, name)?;
        rec.insert(name, coerce(HEADER, name, kind, raw_value)?);
    }

    trace!("legacy header with {} lines", lines.len());

    Ok(rec)
}

pub fn map_block(raw: &RawBlock, schema: &'static BlockSchema, extents: &Extents) -> Result<Record> {
    let key = schema.key;
    let mut rec = Record::new();

    match key {
        "info" => {
            let text = raw.body.trim();
            if !text.is_empty() {
                rec.insert(TEXT, text);
            }
        }
        "pswfc" => {
            for chi in map_chis(raw, extents)? {
                rec.push("chi", Value::Record(chi));
            }
        }
        _ if schema::field_of(schema.fields, VALUES).is_some() => {
            let values = parse_array(key, VALUES, &raw.body)?;
            extents.check(key, VALUES, Extent::Mesh, values.len())?;
            rec.insert(VALUES, values);
        }
        _ => {
            if let Some((name, value)) = infer_payload(&raw.body) {
                rec.insert(name, value);
            }
        }
    }

    let beta_blocks = raw
        .children
        .iter()
        .filter(|c| schema::child_key(&c.tag).0 == "beta")
        .count();
    let mut nbeta = 0;

    for child in raw.children.iter() {
        let (child_key, _) = schema::child_key(&child.tag);

        let value = match (child_key.as_str(), schema.child(&child_key).map(|c| c.shape)) {
            ("beta", _) => {
                nbeta += 1;
                Value::Record(map_beta(child, nbeta, extents)?)
            }
            ("dij", _) => Value::Array(map_dij(child, extents, beta_blocks)?),
            (_, Some(ChildShape::Payload(kind))) => {
                let value = coerce(key, &child_key, kind, &child.body)?;
                if let (FieldKind::Array(extent), Value::Array(v)) = (kind, &value) {
                    extents.check(key, &child_key, extent, v.len())?;
                }
                value
            }
            _ => match infer_payload(&child.body) {
                Some((_, v)) => v,
                None => Value::Record(Record::new()),
            },
        };

        let list = schema.child(&child_key).map_or(false, |c| c.list);
        if list || rec.contains_key(&child_key) {
            rec.push(&child_key, value);
        } else {
            rec.insert(child_key, value);
        }
    }

    for c in schema.children.iter().filter(|c| c.required) {
        if !rec.contains_key(c.key) {
            return Err(SchemaError::MissingField {
                block: key.to_string(),
                field: c.key.to_string(),
            }
            .into());
        }
    }

    check_required(key, "", &rec, schema.fields)?;

    Ok(rec)
}

/// `index l Beta L`, the number of points inside the cutoff, then the values.
fn map_beta(raw: &RawBlock, position: usize, extents: &Extents) -> Result<Record> {
    let block = "nonlocal";
    let label = format!("beta.{}", position);
    let field = |name: &str| format!("{}.{}", label, name);

    let mut lines = raw.body.lines().filter(|l| !l.trim().is_empty());

    let first: Vec<&str> = lines.next().map(|l| l.split_whitespace().collect()).unwrap_or_default();
    let (Some(index), Some(l)) = (first.first(), first.get(1)) else {
        return Err(SchemaError::MissingField {
            block: block.to_string(),
            field: field("angular_momentum"),
        }
        .into());
    };

    let count = lines.next().and_then(|l| l.split_whitespace().next()).ok_or_else(|| {
        SchemaError::MissingField {
            block: block.to_string(),
            field: field("cutoff_radius_index"),
        }
    })?;

    let mut rec = Record::new();
    rec.insert("index", coerce(block, &field("index"), FieldKind::Int, index)?);
    rec.insert("angular_momentum", coerce(block, &field("angular_momentum"), FieldKind::Int, l)?);

    let cutoff = coerce(block, &field("cutoff_radius_index"), FieldKind::Int, count)?;
    let expected = cutoff.as_i64().and_then(|i| usize::try_from(i).ok()).unwrap_or(0);
    rec.insert("cutoff_radius_index", cutoff);

    let rest: Vec<&str> = lines.collect();
    let values = parse_array(block, &field(VALUES), &rest.join("\n"))?;

    if values.len() != expected {
        return Err(ConsistencyError::LengthMismatch {
            block: block.to_string(),
            field: field(VALUES),
            expected,
            found: values.len(),
        }
        .into());
    }
    extents.check(block, &field(VALUES), Extent::UpToMesh, values.len())?;

    rec.insert(VALUES, values);
    Ok(rec)
}

/// Number of nonzero entries, then `i j value` rows. The matrix is symmetric;
/// rows may list either triangle. Its order is the number of `PP_BETA`
/// blocks, which the header must agree with.
fn map_dij(raw: &RawBlock, extents: &Extents, nbeta: usize) -> Result<Vec<f64>> {
    let block = "nonlocal";
    let lines = split_lines(&raw.body);

    let Some(first) = lines.first().and_then(|t| t.first()) else {
        return Ok(Vec::new());
    };
    let nnz = coerce(block, "dij", FieldKind::Int, first)?
        .as_i64()
        .unwrap_or(0);

    let mut entries = Vec::with_capacity(lines.len().saturating_sub(1));
    for row in lines.iter().skip(1) {
        let [i, j, v] = row.as_slice() else {
            return Err(SchemaError::InvalidValue {
                block: block.to_string(),
                field: "dij".to_string(),
                token: row.join(" "),
                expected: "an 'i j value' row",
            }
            .into());
        };

        let i = coerce(block, "dij", FieldKind::Int, i)?.as_i64().unwrap_or(0);
        let j = coerce(block, "dij", FieldKind::Int, j)?.as_i64().unwrap_or(0);
        let v = coerce(block, "dij", FieldKind::Float, v)?.as_f64().unwrap_or(0.0);
        entries.push((i, j, v));
    }

    if entries.len() as i64 != nnz {
        return Err(ConsistencyError::LengthMismatch {
            block: block.to_string(),
            field: "dij".to_string(),
            expected: usize::try_from(nnz).unwrap_or(0),
            found: entries.len(),
        }
        .into());
    }

    if let Some(declared) = extents.number_of_proj.filter(|&n| n != nbeta) {
        return Err(ConsistencyError::LengthMismatch {
            block: block.to_string(),
            field: "beta".to_string(),
            expected: declared,
            found: nbeta,
        }
        .into());
    }

    let n = nbeta;
    let size = Extents {
        number_of_proj: Some(n),
        ..Extents::default()
    }
    .dij_len()?
    .unwrap_or_default();

    let mut dij = vec![0.0; size];

    for (i, j, v) in entries {
        for index in [i, j] {
            if index < 1 || index as usize > n {
                return Err(ConsistencyError::IndexOutOfRange {
                    block: block.to_string(),
                    field: "dij".to_string(),
                    index,
                    bound: n,
                }
                .into());
            }
        }

        let (i, j) = (i as usize - 1, j as usize - 1);
        dij[i * n + j] = v;
        dij[j * n + i] = v;
    }

    Ok(dij)
}

/// Orbitals separated by `label l occupation Wavefunction` lines.
fn map_chis(raw: &RawBlock, extents: &Extents) -> Result<Vec<Record>> {
    let block = "pswfc";
    let mut chis: Vec<(Record, Vec<&str>)> = Vec::new();

    for line in raw.body.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.is_empty() {
            continue;
        }

        if !line.contains("Wavefunction") {
            let Some((_, values)) = chis.last_mut() else {
                return Err(SchemaError::InvalidValue {
                    block: block.to_string(),
                    field: "chi".to_string(),
                    token: line.trim().to_string(),
                    expected: "a 'label l occupation Wavefunction' line",
                }
                .into());
            };
            values.extend(tokens);
            continue;
        }

        let prefix = format!("chi.{}", chis.len() + 1);
        let field = |name: &str| format!("{}.{}", prefix, name);

        let [label, l, occupation, ..] = tokens.as_slice() else {
            return Err(SchemaError::MissingField {
                block: block.to_string(),
                field: field("occupation"),
            }
            .into());
        };

        let mut rec = Record::new();
        rec.insert("label", *label);
        if let Some(n) = label.chars().next().and_then(|c| c.to_digit(10)) {
            rec.insert("n", n as i64);
        }
        rec.insert("l", coerce(block, &field("l"), FieldKind::Int, l)?);
        rec.insert("occupation", coerce(block, &field("occupation"), FieldKind::Float, occupation)?);

        chis.push((rec, Vec::new()));
    }

    let mut out = Vec::with_capacity(chis.len());

    for (i, (mut rec, tokens)) in chis.into_iter().enumerate() {
        let prefix = format!("chi.{}", i + 1);
        let field = format!("{}.{}", prefix, VALUES);

        let values = parse_array(block, &field, &tokens.join(" "))?;
        extents.check(block, &field, Extent::Mesh, values.len())?;
        rec.insert(VALUES, values);

        check_required(block, &prefix, &rec, CHI_FIELDS)?;
        out.push(rec);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::split_blocks;
    use crate::error::UpfError;
    use crate::version::Markup;

    fn raw(text: &str) -> RawBlock {
        split_blocks(text, Markup::Legacy).unwrap().values().next().unwrap().clone()
    }

    fn extents(mesh: usize, nproj: usize) -> Extents {
        Extents {
            mesh_size: Some(mesh),
            number_of_wfc: None,
            number_of_proj: Some(nproj),
        }
    }

    const HEADER_TEXT: &str = "<PP_HEADER>
   0                   Version Number
  Si                   Element
   NC                  Norm - Conserving pseudopotential
    T                  Nonlinear Core Correction
 SLA  PW   PBE  PBE     PBE  Exchange-Correlation functional
    4.00000000000      Z valence
   -7.47480832270      Total energy
    0.0000000    0.0000000 Suggested cutoff for wfc and rho
    1                  Max angular momentum component
    4                  Number of points in mesh
    2    2             Number of Wavefunctions, Number of Projectors
 Wavefunctions         nl  l   occ
                       3S  0  2.00
                       3P  1  2.00
</PP_HEADER>
";

    #[test]
    fn test_positional_header() {
        let rec = map_header(&raw(HEADER_TEXT)).unwrap();

        assert_eq!(rec.get("element"), Some(&Value::Str("Si".to_string())));
        assert_eq!(rec.get("core_correction"), Some(&Value::Bool(true)));
        assert_eq!(rec.get("is_ultrasoft"), Some(&Value::Bool(false)));
        assert_eq!(
            rec.get("functional"),
            Some(&Value::Str("SLA PW PBE PBE PBE".to_string()))
        );
        assert_eq!(rec.get("z_valence"), Some(&Value::Float(4.0)));
        assert_eq!(rec.get("mesh_size"), Some(&Value::Int(4)));
        assert_eq!(rec.get("number_of_proj"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_header_bad_token_names_field() {
        let text = HEADER_TEXT.replace("4.00000000000", "four");
        let err = map_header(&raw(&text)).unwrap_err();

        assert!(matches!(
            err,
            UpfError::Schema(SchemaError::InvalidValue { ref field, .. }) if field == "z_valence"
        ));
    }

    #[test]
    fn test_beta_and_dij() {
        let text = "<PP_NONLOCAL>
  <PP_BETA>
    1    0             Beta    L
     3
  1.0D-01  2.0D-01  3.0D-01
  </PP_BETA>
  <PP_BETA>
    2    1             Beta    L
     2
  4.0E-01  5.0E-01
  </PP_BETA>
  <PP_DIJ>
    3                  Number of nonzero Dij
    1    1  1.5
    1    2  0.5
    2    2 -2.0
  </PP_DIJ>
</PP_NONLOCAL>
";
        let schema = schema::block_by_key("nonlocal").unwrap();
        let rec = map_block(&raw(text), schema, &extents(4, 2)).unwrap();

        let betas = rec.get("beta").and_then(|v| v.as_list()).unwrap();
        assert_eq!(betas.len(), 2);

        let second = betas[1].as_record().unwrap();
        assert_eq!(second.get("angular_momentum"), Some(&Value::Int(1)));
        assert_eq!(second.get("cutoff_radius_index"), Some(&Value::Int(2)));
        assert_eq!(second.get("values"), Some(&Value::Array(vec![0.4, 0.5])));

        assert_eq!(
            rec.get("dij"),
            Some(&Value::Array(vec![1.5, 0.5, 0.5, -2.0]))
        );
    }

    #[test]
    fn test_dij_index_out_of_range() {
        let text = "<PP_NONLOCAL>
<PP_BETA>
 1 0 Beta L
 1
 0.5
</PP_BETA>
<PP_BETA>
 2 1 Beta L
 1
 0.5
</PP_BETA>
<PP_DIJ>
 1
 1 3 1.0
</PP_DIJ>
</PP_NONLOCAL>
";
        let schema = schema::block_by_key("nonlocal").unwrap();
        let err = map_block(&raw(text), schema, &extents(4, 2)).unwrap_err();

        assert!(matches!(
            err,
            UpfError::Consistency(ConsistencyError::IndexOutOfRange { index: 3, bound: 2, .. })
        ));
    }

    #[test]
    fn test_dij_order_follows_beta_count() {
        let text = "<PP_NONLOCAL>\n<PP_DIJ>\n 1\n 1 1 1.0\n</PP_DIJ>\n</PP_NONLOCAL>\n";
        let schema = schema::block_by_key("nonlocal").unwrap();

        // a huge declared count is refused before anything is allocated
        let err = map_block(&raw(text), schema, &extents(4, usize::MAX / 2)).unwrap_err();
        assert_eq!(
            err,
            UpfError::Consistency(ConsistencyError::LengthMismatch {
                block: "nonlocal".to_string(),
                field: "beta".to_string(),
                expected: usize::MAX / 2,
                found: 0,
            })
        );
    }

    #[test]
    fn test_pswfc_orbitals() {
        let text = "<PP_PSWFC>
3S    0  2.00          Wavefunction
  0.1 0.2
  0.3 0.4
3P    1  2.00          Wavefunction
  0.5 0.6 0.7 0.8
3D    2  0.00          Wavefunction
  0.0 0.0 0.0 0.0
</PP_PSWFC>
";
        let schema = schema::block_by_key("pswfc").unwrap();
        let rec = map_block(&raw(text), schema, &extents(4, 0)).unwrap();
        let chis = rec.get("chi").and_then(|v| v.as_list()).unwrap();

        assert_eq!(chis.len(), 3);

        let first = chis[0].as_record().unwrap();
        assert_eq!(first.get("n"), Some(&Value::Int(3)));
        assert_eq!(first.get("values"), Some(&Value::Array(vec![0.1, 0.2, 0.3, 0.4])));

        let third = chis[2].as_record().unwrap();
        assert_eq!(third.get("l"), Some(&Value::Int(2)));
        assert_eq!(third.get("occupation"), Some(&Value::Float(0.0)));
    }

    #[test]
    fn test_short_orbital_is_rejected() {
        let text = "<PP_PSWFC>\n3S 0 2.00 Wavefunction\n 0.1 0.2 0.3\n</PP_PSWFC>\n";
        let schema = schema::block_by_key("pswfc").unwrap();

        assert!(matches!(
            map_block(&raw(text), schema, &extents(4, 0)).unwrap_err(),
            UpfError::Consistency(ConsistencyError::LengthMismatch { expected: 4, found: 3, .. })
        ));
    }

    #[test]
    fn test_mesh_children() {
        let text = "<PP_MESH>\n  <PP_R>\n 0.0 0.1 0.2 0.3\n  </PP_R>\n  <PP_RAB>\n 0.1 0.1 0.1 0.1\n  </PP_RAB>\n</PP_MESH>\n";
        let schema = schema::block_by_key("mesh").unwrap();
        let rec = map_block(&raw(text), schema, &extents(4, 0)).unwrap();

        assert_eq!(rec.get("r"), Some(&Value::Array(vec![0.0, 0.1, 0.2, 0.3])));
        assert!(rec.contains_key("rab"));
    }
}
