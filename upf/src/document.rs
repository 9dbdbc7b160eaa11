//! The parsed UPF document and its typed accessors.

use crate::block::split_blocks;
use crate::error::{ConsistencyError, Result, SchemaError, UpfError, UpfWarning};
use crate::field::{self, BlockContents, Extents};
use crate::schema::{self, ChildShape, Extent, FieldKind, FieldSchema};
use crate::serializer::{self, WriteOptions};
use crate::value::{BlockContent, Record, Value, VALUES};
use crate::version::{self, Markup};
use itertools::Itertools;
use log::debug;
use semver::Version;
use std::fmt;

#[derive(Debug, Clone)]
pub struct UpfDocument {
    version: Version,
    markup: Markup,
    inferred: bool,
    blocks: BlockContents,
    warnings: Vec<UpfWarning>,
    checksum: u32,
}

/// One pseudo-atomic orbital of `PP_PSWFC`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PseudoWavefunction<'a> {
    pub label: &'a str,
    /// Principal quantum number, when the file gives one.
    pub n: Option<usize>,
    pub l: usize,
    pub occupation: f64,
    pub values: &'a [f64],
}

/// One projector of `PP_NONLOCAL`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BetaProjector<'a> {
    pub index: Option<usize>,
    pub angular_momentum: usize,
    pub cutoff_radius_index: Option<usize>,
    pub values: &'a [f64],
}

/// The generator input stored in `PP_INFO`, classified by program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorInput<'a> {
    /// `ld1.x` namelist input (contains `&input`).
    Ld1(&'a str),
    Oncvpsp(&'a str),
}

impl<'a> GeneratorInput<'a> {
    pub fn text(&self) -> &'a str {
        match self {
            GeneratorInput::Ld1(s) | GeneratorInput::Oncvpsp(s) => s,
        }
    }
}

impl UpfDocument {
    pub fn from_text(text: &str) -> Result<UpfDocument> {
        let text = version::normalize_newlines(text);
        UpfDocument::parse(&text, Vec::new())
    }

    /// Decodes first: UTF-8 when valid, Latin-1 otherwise.
    pub fn from_bytes(bytes: &[u8]) -> Result<UpfDocument> {
        let (text, warnings) = version::decode_input(bytes);
        UpfDocument::parse(&text, warnings)
    }

    fn parse(text: &str, mut warnings: Vec<UpfWarning>) -> Result<UpfDocument> {
        let checksum = adler2::adler32_slice(text.as_bytes());

        let detected = version::detect(text)?;
        let raw = split_blocks(text, detected.markup)?;
        let blocks = field::map_blocks(&raw, detected.markup)?;

        for b in schema::BLOCKS.iter().filter(|b| b.required) {
            if !blocks.contains_key(b.key) {
                return Err(SchemaError::MissingBlock(b.key.to_string()).into());
            }
        }

        warnings.extend(detected.warnings);

        debug!(
            "parsed UPF v{} document with {} blocks, checksum {:08x}",
            detected.version,
            blocks.len(),
            checksum
        );

        Ok(UpfDocument {
            version: detected.version,
            markup: detected.markup,
            inferred: detected.inferred,
            blocks,
            warnings,
            checksum,
        })
    }

    /// Serialize with the default options: modern markup unless the document
    /// declared a legacy version itself.
    pub fn to_text(&self) -> String {
        serializer::write(self, &WriteOptions::default())
    }

    pub fn to_text_with(&self, options: &WriteOptions) -> String {
        serializer::write(self, options)
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    /// Markup the document was read from.
    pub fn markup(&self) -> Markup {
        self.markup
    }

    pub fn is_version_inferred(&self) -> bool {
        self.inferred
    }

    pub fn warnings(&self) -> &[UpfWarning] {
        &self.warnings
    }

    /// Adler-32 of the normalized input text.
    pub fn source_checksum(&self) -> u32 {
        self.checksum
    }

    pub fn blocks(&self) -> impl Iterator<Item = (&str, &BlockContent)> {
        self.blocks.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.blocks.keys().map(|k| k.as_str())
    }

    pub fn block(&self, key: &str) -> Option<&BlockContent> {
        self.blocks.get(key)
    }

    pub fn contains_block(&self, key: &str) -> bool {
        self.blocks.contains_key(key)
    }

    fn record(&self, block: &str) -> Result<&Record> {
        match self.blocks.get(block) {
            Some(BlockContent::Record(r)) => Ok(r),
            Some(BlockContent::Verbatim(_)) => Err(SchemaError::NotEditable(block.to_string()).into()),
            None => Err(SchemaError::UnknownBlock(block.to_string()).into()),
        }
    }

    pub fn get(&self, block: &str, field: &str) -> Result<&Value> {
        self.record(block)?.get(field).ok_or_else(|| {
            SchemaError::MissingField {
                block: block.to_string(),
                field: field.to_string(),
            }
            .into()
        })
    }

    fn get_as<'a, T>(
        &'a self,
        block: &str,
        field: &str,
        expected: FieldKind,
        convert: impl FnOnce(&'a Value) -> Option<T>,
    ) -> Result<T> {
        convert(self.get(block, field)?).ok_or_else(|| {
            SchemaError::WrongType {
                block: block.to_string(),
                field: field.to_string(),
                expected: expected.name(),
            }
            .into()
        })
    }

    pub fn get_f64(&self, block: &str, field: &str) -> Result<f64> {
        self.get_as(block, field, FieldKind::Float, Value::as_f64)
    }

    pub fn get_i64(&self, block: &str, field: &str) -> Result<i64> {
        self.get_as(block, field, FieldKind::Int, Value::as_i64)
    }

    pub fn get_usize(&self, block: &str, field: &str) -> Result<usize> {
        self.get_as(block, field, FieldKind::Int, |v| {
            v.as_i64().and_then(|i| usize::try_from(i).ok())
        })
    }

    pub fn get_bool(&self, block: &str, field: &str) -> Result<bool> {
        self.get_as(block, field, FieldKind::Bool, Value::as_bool)
    }

    pub fn get_str(&self, block: &str, field: &str) -> Result<&str> {
        self.get_as(block, field, FieldKind::Str, Value::as_str)
    }

    pub fn get_array(&self, block: &str, field: &str) -> Result<&[f64]> {
        self.get_as(block, field, FieldKind::Array(Extent::Free), Value::as_array)
    }

    /// Set one field. Values are checked against the field's declared type,
    /// record children such as `chi` item by item, and array lengths and
    /// child counts against the header. `header.mesh_size` and `mesh.mesh`
    /// are kept equal. Nothing changes if a check fails.
    pub fn set(&mut self, block: &str, field: &str, value: impl Into<Value>) -> Result<()> {
        let mut value = value.into();

        self.record(block)?;

        if let Some(s) = schema::block_by_key(block) {
            if let Some(kind) = s.kind_of(field) {
                value = conform(block, field, kind, value)?;
            } else if let Some(ChildShape::Record(fields)) = s.child(field).map(|c| c.shape) {
                value = conform_records(block, field, fields, value)?;
            }
        }

        let mut candidate = self.blocks.clone();

        match (block, field) {
            ("header", "mesh_size") | ("mesh", "mesh") => {
                let n = non_negative(block, field, &value)?;
                set_field(&mut candidate, "header", "mesh_size", Value::Int(n));
                if has_field(&candidate, "mesh", "mesh") {
                    set_field(&mut candidate, "mesh", "mesh", Value::Int(n));
                }
            }
            ("header", "number_of_proj") | ("header", "number_of_wfc") => {
                non_negative(block, field, &value)?;
            }
            _ => {}
        }

        set_field(&mut candidate, block, field, value);
        validate(&mut candidate)?;

        self.blocks = candidate;
        Ok(())
    }

    /// Cut every radial array down to the first `n` mesh points. Projectors
    /// are clipped and their cutoff index lowered where needed; the header,
    /// `mesh.mesh` and `mesh.rmax` follow.
    pub fn truncate_mesh(&mut self, n: usize) -> Result<()> {
        let mesh_size = self.get_usize("header", "mesh_size")?;

        if n > mesh_size {
            return Err(ConsistencyError::ExceedsMesh {
                block: "header".to_string(),
                field: "mesh_size".to_string(),
                mesh_size,
                found: n,
            }
            .into());
        }

        let mut candidate = self.blocks.clone();

        visit_arrays(&mut candidate, |_, _, extent, values| {
            if matches!(extent, Extent::Mesh | Extent::UpToMesh) {
                values.truncate(n);
            }
            Ok(())
        })?;

        if let Some(BlockContent::Record(nonlocal)) = candidate.get_mut("nonlocal") {
            for beta in records_mut(nonlocal, "beta") {
                if let Some(Value::Int(cutoff)) = beta.get_mut("cutoff_radius_index") {
                    *cutoff = (*cutoff).min(n as i64);
                }
            }
        }

        set_field(&mut candidate, "header", "mesh_size", Value::Int(n as i64));

        if let Some(BlockContent::Record(mesh)) = candidate.get_mut("mesh") {
            if mesh.contains_key("mesh") {
                mesh.insert("mesh", n as i64);
            }

            let rmax = mesh.get("r").and_then(|r| r.as_array()).and_then(|r| r.last().copied());
            if let Some(rmax) = rmax.filter(|_| mesh.contains_key("rmax")) {
                mesh.insert("rmax", rmax);
            }
        }

        validate(&mut candidate)?;

        debug!("truncated mesh from {} to {} points", mesh_size, n);
        self.blocks = candidate;
        Ok(())
    }

    /// Put the named blocks first, in the given order. The remaining blocks
    /// keep their relative order after them.
    pub fn reorder_blocks(&mut self, order: &[&str]) -> Result<()> {
        if let Some(unknown) = order.iter().find(|k| !self.blocks.contains_key(**k)) {
            return Err(SchemaError::UnknownBlock(unknown.to_string()).into());
        }

        let mut reordered = BlockContents::with_capacity(self.blocks.len());

        for key in order.iter().unique() {
            if let Some((k, v)) = self.blocks.shift_remove_entry(*key) {
                reordered.insert(k, v);
            }
        }
        reordered.extend(self.blocks.drain(..));

        self.blocks = reordered;
        Ok(())
    }

    pub fn pseudo_wavefunctions(&self) -> Result<Vec<PseudoWavefunction<'_>>> {
        let pswfc = self.record("pswfc")?;

        records(pswfc, "chi")
            .enumerate()
            .map(|(i, chi)| chi_view(i + 1, chi))
            .collect()
    }

    pub fn beta_projectors(&self) -> Result<Vec<BetaProjector<'_>>> {
        let nonlocal = self.record("nonlocal")?;

        records(nonlocal, "beta")
            .enumerate()
            .map(|(i, beta)| beta_view(i + 1, beta))
            .collect()
    }

    /// Text of `PP_INFO/PP_INPUTFILE`, if the generator stored it.
    pub fn input_file(&self) -> Option<&str> {
        self.record("info").ok()?.get("inputfile")?.as_str()
    }

    pub fn generator_input(&self) -> Option<GeneratorInput<'_>> {
        let text = self.input_file()?;

        if text.to_lowercase().contains("&input") {
            Some(GeneratorInput::Ld1(text))
        } else {
            Some(GeneratorInput::Oncvpsp(text))
        }
    }
}

impl PartialEq for UpfDocument {
    fn eq(&self, other: &Self) -> bool {
        self.blocks == other.blocks
    }
}

impl fmt::Display for UpfDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "UpfDocument(keys=({}), version={})",
            self.blocks.keys().join(", "),
            self.version
        )
    }
}

fn wrong_type(block: &str, field: String, expected: &'static str) -> UpfError {
    SchemaError::WrongType {
        block: block.to_string(),
        field,
        expected,
    }
    .into()
}

fn chi_view(position: usize, chi: Option<&Record>) -> Result<PseudoWavefunction<'_>> {
    let block = "pswfc";
    let chi = chi.ok_or_else(|| wrong_type(block, format!("chi.{}", position), "a record"))?;
    let field = |name: &str| format!("chi.{}.{}", position, name);

    Ok(PseudoWavefunction {
        label: required(chi, block, &field("label"), "label", Value::as_str)?,
        n: chi.get("n").and_then(as_usize),
        l: required(chi, block, &field("l"), "l", as_usize)?,
        occupation: required(chi, block, &field("occupation"), "occupation", Value::as_f64)?,
        values: required(chi, block, &field(VALUES), VALUES, Value::as_array)?,
    })
}

fn beta_view(position: usize, beta: Option<&Record>) -> Result<BetaProjector<'_>> {
    let block = "nonlocal";
    let beta = beta.ok_or_else(|| wrong_type(block, format!("beta.{}", position), "a record"))?;
    let field = |name: &str| format!("beta.{}.{}", position, name);

    Ok(BetaProjector {
        index: beta.get("index").and_then(as_usize),
        angular_momentum: required(beta, block, &field("angular_momentum"), "angular_momentum", as_usize)?,
        cutoff_radius_index: beta.get("cutoff_radius_index").and_then(as_usize),
        values: required(beta, block, &field(VALUES), VALUES, Value::as_array)?,
    })
}

fn as_usize(v: &Value) -> Option<usize> {
    v.as_i64().and_then(|i| usize::try_from(i).ok())
}

fn required<'a, T>(
    rec: &'a Record,
    block: &str,
    label: &str,
    name: &str,
    convert: impl FnOnce(&'a Value) -> Option<T>,
) -> Result<T> {
    let value = rec.get(name).ok_or_else(|| SchemaError::MissingField {
        block: block.to_string(),
        field: label.to_string(),
    })?;

    convert(value).ok_or_else(|| wrong_type(block, label.to_string(), "a value of another type"))
}

/// Items of a record-valued list field. A lone record counts as a list of one;
/// `None` marks an item that is not a record.
fn records<'a>(rec: &'a Record, name: &str) -> impl Iterator<Item = Option<&'a Record>> {
    let items: Vec<&'a Value> = match rec.get(name) {
        Some(Value::List(items)) => items.iter().collect(),
        Some(v) => vec![v],
        None => Vec::new(),
    };

    items.into_iter().map(|v| v.as_record())
}

fn records_mut<'a>(rec: &'a mut Record, name: &str) -> Vec<&'a mut Record> {
    match rec.get_mut(name) {
        Some(Value::List(items)) => items
            .iter_mut()
            .filter_map(|v| match v {
                Value::Record(r) => Some(r),
                _ => None,
            })
            .collect(),
        Some(Value::Record(r)) => vec![r],
        _ => Vec::new(),
    }
}

fn has_field(blocks: &BlockContents, block: &str, field: &str) -> bool {
    match blocks.get(block) {
        Some(BlockContent::Record(rec)) => rec.contains_key(field),
        _ => false,
    }
}

fn set_field(blocks: &mut BlockContents, block: &str, field: &str, value: Value) {
    if let Some(BlockContent::Record(rec)) = blocks.get_mut(block) {
        rec.insert(field, value);
    }
}

fn non_negative(block: &str, field: &str, value: &Value) -> Result<i64> {
    match value.as_i64() {
        Some(n) if n >= 0 => Ok(n),
        _ => Err(SchemaError::InvalidValue {
            block: block.to_string(),
            field: field.to_string(),
            token: format!("{:?}", value),
            expected: "a non-negative integer",
        }
        .into()),
    }
}

/// Check a value against the declared kind. Integers are accepted for reals;
/// reals must be finite.
fn conform(block: &str, field: &str, kind: FieldKind, value: Value) -> Result<Value> {
    let value = match (kind, value) {
        (FieldKind::Float, Value::Int(i)) => Value::Float(i as f64),
        (FieldKind::Str, v @ Value::Str(_))
        | (FieldKind::Int, v @ Value::Int(_))
        | (FieldKind::Float, v @ Value::Float(_))
        | (FieldKind::Bool, v @ Value::Bool(_))
        | (FieldKind::Array(_), v @ Value::Array(_)) => v,
        _ => return Err(wrong_type(block, field.to_string(), kind.name())),
    };

    let non_finite = match &value {
        Value::Float(x) => Some(*x).filter(|x| !x.is_finite()),
        Value::Array(v) => v.iter().copied().find(|x| !x.is_finite()),
        _ => None,
    };

    if let Some(x) = non_finite {
        return Err(SchemaError::InvalidValue {
            block: block.to_string(),
            field: field.to_string(),
            token: x.to_string(),
            expected: kind.name(),
        }
        .into());
    }

    Ok(value)
}

/// Items of a record child (`chi`, `beta`, ...): each must be a record whose
/// known fields conform and whose required fields are present.
fn conform_records(block: &str, field: &str, fields: &'static [FieldSchema], value: Value) -> Result<Value> {
    let items = match value {
        Value::List(items) => items,
        v @ Value::Record(_) => vec![v],
        _ => return Err(wrong_type(block, field.to_string(), "a list of records")),
    };

    let mut conformed = Vec::with_capacity(items.len());

    for (i, item) in items.into_iter().enumerate() {
        let prefix = format!("{}.{}", field, i + 1);
        let Value::Record(rec) = item else {
            return Err(wrong_type(block, prefix, "a record"));
        };

        let mut checked = Record::new();
        for (name, v) in rec.iter() {
            let v = match schema::field_of(fields, name) {
                Some(f) => conform(block, &format!("{}.{}", prefix, name), f.kind, v.clone())?,
                None => v.clone(),
            };
            checked.insert(name, v);
        }

        field::check_required(block, &prefix, &checked, fields)?;
        conformed.push(Value::Record(checked));
    }

    Ok(Value::List(conformed))
}

/// Walk every schema-described array: block fields, payload children and the
/// fields of record children.
fn visit_arrays<F>(blocks: &mut BlockContents, mut visit: F) -> Result<()>
where
    F: FnMut(&str, &str, Extent, &mut Vec<f64>) -> Result<()>,
{
    for (key, content) in blocks.iter_mut() {
        let (Some(schema), BlockContent::Record(rec)) = (schema::block_by_key(key), content) else {
            continue;
        };

        for (name, value) in rec.iter_mut() {
            if let (Some(FieldKind::Array(extent)), Value::Array(values)) = (schema.kind_of(name), &mut *value) {
                visit(key.as_str(), name, extent, values)?;
                continue;
            }

            let Some(ChildShape::Record(fields)) = schema.child(name).map(|c| c.shape) else {
                continue;
            };

            let items: Vec<&mut Value> = match value {
                Value::List(items) => items.iter_mut().collect(),
                v => vec![v],
            };

            for (i, item) in items.into_iter().enumerate() {
                let Value::Record(child) = item else {
                    continue;
                };

                for (field_name, field_value) in child.iter_mut() {
                    let kind = schema::field_of(fields, field_name).map(|f| f.kind);
                    if let (Some(FieldKind::Array(extent)), Value::Array(values)) = (kind, field_value) {
                        let label = format!("{}.{}.{}", name, i + 1, field_name);
                        visit(key.as_str(), &label, extent, values)?;
                    }
                }
            }
        }
    }

    Ok(())
}

fn validate(blocks: &mut BlockContents) -> Result<()> {
    let extents = match blocks.get("header") {
        Some(BlockContent::Record(header)) => Extents::from_header(header),
        _ => Extents::default(),
    };

    visit_arrays(blocks, |block, field, extent, values| {
        extents.check(block, field, extent, values.len())
    })?;

    field::check_declarations(blocks, &extents)
}
