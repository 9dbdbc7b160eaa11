//! Writing documents back to UPF text.
//!
//! Modern output is the XML markup of UPF 2.x. Legacy output reproduces the
//! line-oriented 1.x layout for the blocks that layout knows about.

use crate::document::UpfDocument;
use crate::schema::{self, BlockSchema};
use crate::value::{BlockContent, Record, Value, TEXT, VALUES};
use crate::version::MODERN_VERSION;
use itertools::Itertools;
use log::debug;
use std::fmt;
use xml::escape::{escape_str_attribute, escape_str_pcdata};

/// Which markup to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMarkup {
    /// Legacy only for documents that declared a 1.x version explicitly.
    /// Documents whose version had to be inferred are written modern.
    #[default]
    Auto,
    Modern,
    Legacy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOptions {
    pub markup: OutputMarkup,
    /// Values per line in array payloads.
    pub columns: usize,
}

impl Default for WriteOptions {
    fn default() -> Self {
        WriteOptions {
            markup: OutputMarkup::Auto,
            columns: 4,
        }
    }
}

impl WriteOptions {
    pub fn legacy() -> WriteOptions {
        WriteOptions {
            markup: OutputMarkup::Legacy,
            ..WriteOptions::default()
        }
    }

    pub fn modern() -> WriteOptions {
        WriteOptions {
            markup: OutputMarkup::Modern,
            ..WriteOptions::default()
        }
    }

    pub fn writes_legacy(&self, doc: &UpfDocument) -> bool {
        match self.markup {
            OutputMarkup::Legacy => true,
            OutputMarkup::Modern => false,
            OutputMarkup::Auto => !doc.is_version_inferred() && doc.version().major < 2,
        }
    }
}

pub fn write(doc: &UpfDocument, options: &WriteOptions) -> String {
    let columns = options.columns.max(1);

    if options.writes_legacy(doc) {
        debug!("writing {} blocks in legacy markup", doc.keys().count());
        LegacyText { doc, columns }.to_string()
    } else {
        debug!("writing {} blocks in XML markup", doc.keys().count());
        ModernText { doc, columns }.to_string()
    }
}

/// `{:.16E}` with a signed two-digit exponent, e.g. `-1.2500000000000000E-03`.
/// Seventeen significant digits read back to the same `f64`.
pub fn fortran_e(x: f64) -> String {
    scientific(x, 16, 'E')
}

/// Scientific notation with `precision` decimals and an exponent of at least
/// two digits, the way C and Fortran print it.
pub(crate) fn scientific(x: f64, precision: usize, marker: char) -> String {
    let s = format!("{:.*e}", precision, x);

    let Some((mantissa, exp)) = s.split_once('e') else {
        return s;
    };

    match exp.parse::<i32>() {
        Ok(e) => format!("{}{}{}{:02}", mantissa, marker, if e < 0 { '-' } else { '+' }, e.abs()),
        Err(_) => s,
    }
}

fn scalar_text(v: &Value) -> String {
    match v {
        Value::Bool(true) => "T".to_string(),
        Value::Bool(false) => "F".to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(x) => format!("{:?}", x),
        Value::Str(s) => s.clone(),
        _ => String::new(),
    }
}

fn write_array(f: &mut fmt::Formatter<'_>, indent: &str, values: &[f64], columns: usize) -> fmt::Result {
    let rows = values.iter().map(|x| format!("{:>24}", fortran_e(*x))).chunks(columns);

    for row in &rows {
        let line: String = row.collect();
        writeln!(f, "{}{}", indent, line)?;
    }

    Ok(())
}

struct ModernText<'a> {
    doc: &'a UpfDocument,
    columns: usize,
}

impl fmt::Display for ModernText<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let version = if self.doc.version().major >= 2 {
            self.doc.version().clone()
        } else {
            MODERN_VERSION
        };

        writeln!(f, "<UPF version=\"{}\">", version)?;

        for (key, content) in self.doc.blocks() {
            match content {
                BlockContent::Verbatim(text) => writeln!(f, "{}", text)?,
                BlockContent::Record(rec) => {
                    let schema = schema::block_by_key(key);
                    let tag = match schema {
                        Some(s) => s.tag.to_string(),
                        None => format!("PP_{}", key.to_uppercase()),
                    };
                    self.write_record(f, 1, &tag, rec, schema)?;
                }
            }
        }

        writeln!(f, "</UPF>")
    }
}

impl ModernText<'_> {
    fn write_record(
        &self,
        f: &mut fmt::Formatter<'_>,
        depth: usize,
        tag: &str,
        rec: &Record,
        schema: Option<&BlockSchema>,
    ) -> fmt::Result {
        let indent = "  ".repeat(depth);

        let mut attrs: Vec<(&str, String)> = Vec::new();
        let mut children: Vec<(&str, &Value)> = Vec::new();
        let mut payload: Option<&Value> = None;

        for (name, value) in rec.iter() {
            let is_child = schema.map_or(false, |s| s.child(name).is_some());

            match value {
                Value::Array(_) if name == VALUES && payload.is_none() => payload = Some(value),
                Value::Str(_) if name == TEXT && payload.is_none() && !is_child => {
                    payload = Some(value)
                }
                v if v.is_scalar() && !is_child => attrs.push((name, scalar_text(v))),
                _ => children.push((name, value)),
            }
        }

        if let Some(Value::Array(values)) = payload {
            let mut with_format = vec![
                ("type", "real".to_string()),
                ("size", values.len().to_string()),
                ("columns", self.columns.to_string()),
            ];
            with_format.append(&mut attrs);
            attrs = with_format;
        }

        let attr_text = |sep: &str| -> String {
            attrs
                .iter()
                .map(|(name, value)| format!("{}{}=\"{}\"", sep, name, escape_str_attribute(value)))
                .collect()
        };

        if payload.is_none() && children.is_empty() {
            if attrs.len() > 3 {
                writeln!(f, "{}<{}", indent, tag)?;
                writeln!(f, "{}", attr_text(&format!("\n{}    ", indent)).trim_start_matches('\n'))?;
                return writeln!(f, "{}/>", indent);
            }
            return writeln!(f, "{}<{}{}/>", indent, tag, attr_text(" "));
        }

        writeln!(f, "{}<{}{}>", indent, tag, attr_text(" "))?;

        match payload {
            Some(Value::Array(values)) => write_array(f, &format!("{}  ", indent), values, self.columns)?,
            Some(Value::Str(text)) => writeln!(f, "{}", escape_str_pcdata(text))?,
            _ => {}
        }

        for (name, value) in children {
            let child_tag = schema::child_tag(schema, name);

            match value {
                Value::List(items) => {
                    for (i, item) in items.iter().enumerate() {
                        self.write_child(f, depth + 1, &format!("{}.{}", child_tag, i + 1), item)?;
                    }
                }
                _ => self.write_child(f, depth + 1, &child_tag, value)?,
            }
        }

        writeln!(f, "{}</{}>", indent, tag)
    }

    fn write_child(&self, f: &mut fmt::Formatter<'_>, depth: usize, tag: &str, value: &Value) -> fmt::Result {
        let indent = "  ".repeat(depth);

        match value {
            Value::Record(rec) => self.write_record(f, depth, tag, rec, None),
            Value::Array(values) => {
                writeln!(
                    f,
                    "{}<{} type=\"real\" size=\"{}\" columns=\"{}\">",
                    indent,
                    tag,
                    values.len(),
                    self.columns
                )?;
                write_array(f, &format!("{}  ", indent), values, self.columns)?;
                writeln!(f, "{}</{}>", indent, tag)
            }
            Value::Str(text) => {
                writeln!(f, "{}<{}>", indent, tag)?;
                writeln!(f, "{}", escape_str_pcdata(text))?;
                writeln!(f, "{}</{}>", indent, tag)
            }
            Value::List(items) => {
                for item in items.iter() {
                    self.write_child(f, depth, tag, item)?;
                }
                Ok(())
            }
            scalar => writeln!(f, "{}<{}>{}</{}>", indent, tag, scalar_text(scalar), tag),
        }
    }
}

struct LegacyText<'a> {
    doc: &'a UpfDocument,
    columns: usize,
}

/// Record-valued list items (`chi`, `beta`), a lone record counting as one.
fn record_items<'a>(rec: &'a Record, name: &str) -> Vec<&'a Record> {
    match rec.get(name) {
        Some(Value::List(items)) => items.iter().filter_map(|v| v.as_record()).collect(),
        Some(Value::Record(r)) => vec![r],
        _ => Vec::new(),
    }
}

fn array<'a>(rec: &'a Record, name: &str) -> &'a [f64] {
    rec.get(name).and_then(|v| v.as_array()).unwrap_or(&[])
}

impl fmt::Display for LegacyText<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, content) in self.doc.blocks() {
            let rec = match content {
                BlockContent::Verbatim(text) => {
                    writeln!(f, "{}", text)?;
                    continue;
                }
                BlockContent::Record(rec) => rec,
            };

            match key {
                "info" => self.write_info(f, rec)?,
                "header" => self.write_header(f, rec)?,
                "mesh" => {
                    writeln!(f, "<PP_MESH>")?;
                    for (name, tag) in [("r", "PP_R"), ("rab", "PP_RAB")] {
                        writeln!(f, "  <{}>", tag)?;
                        write_array(f, "  ", array(rec, name), self.columns)?;
                        writeln!(f, "  </{}>", tag)?;
                    }
                    writeln!(f, "</PP_MESH>")?;
                }
                "nlcc" | "local" | "rhoatom" => {
                    let tag = format!("PP_{}", key.to_uppercase());
                    writeln!(f, "<{}>", tag)?;
                    write_array(f, "", array(rec, VALUES), self.columns)?;
                    writeln!(f, "</{}>", tag)?;
                }
                "nonlocal" => self.write_nonlocal(f, rec)?,
                "pswfc" => self.write_pswfc(f, rec)?,
                _ => debug!("block '{}' has no legacy layout, not written", key),
            }
        }

        Ok(())
    }
}

impl LegacyText<'_> {
    fn write_info(&self, f: &mut fmt::Formatter<'_>, rec: &Record) -> fmt::Result {
        writeln!(f, "<PP_INFO>")?;
        if let Some(text) = rec.get(TEXT).and_then(|v| v.as_str()) {
            writeln!(f, "{}", text)?;
        }
        if let Some(input) = rec.get("inputfile").and_then(|v| v.as_str()) {
            writeln!(f, "  <PP_INPUTFILE>")?;
            writeln!(f, "{}", input)?;
            writeln!(f, "  </PP_INPUTFILE>")?;
        }
        writeln!(f, "</PP_INFO>")
    }

    fn write_header(&self, f: &mut fmt::Formatter<'_>, rec: &Record) -> fmt::Result {
        let text = |name: &str| rec.get(name).map(scalar_text).unwrap_or_default();
        let real = |name: &str| fortran_e(rec.get(name).and_then(|v| v.as_f64()).unwrap_or(0.0));
        let int = |name: &str| rec.get(name).and_then(|v| v.as_i64()).unwrap_or(0);

        let pseudo_type = text("pseudo_type");
        let description = match pseudo_type.as_str() {
            "US" => "Ultrasoft pseudopotential",
            "PAW" => "Projector Augmented Wave",
            _ => "Norm - Conserving pseudopotential",
        };
        let nlcc = rec.get("core_correction").and_then(|v| v.as_bool()).unwrap_or(false);

        let lines = [
            ("0".to_string(), "Version Number"),
            (text("element"), "Element"),
            (pseudo_type.clone(), description),
            (scalar_text(&Value::Bool(nlcc)), "Nonlinear Core Correction"),
            (text("functional"), "Exchange-Correlation functional"),
            (real("z_valence"), "Z valence"),
            (real("total_psenergy"), "Total energy"),
            (
                format!("{} {}", real("wfc_cutoff"), real("rho_cutoff")),
                "Suggested cutoff for wfc and rho",
            ),
            (int("l_max").to_string(), "Max angular momentum component"),
            (int("mesh_size").to_string(), "Number of points in mesh"),
            (
                format!("{:>5}{:>5}", int("number_of_wfc"), int("number_of_proj")),
                "Number of Wavefunctions, Number of Projectors",
            ),
        ];

        writeln!(f, "<PP_HEADER>")?;
        for (value, description) in lines.iter() {
            writeln!(f, "  {:<24} {}", value, description)?;
        }

        if let Some(pswfc) = self.doc.block("pswfc").and_then(|b| b.as_record()) {
            writeln!(f, " Wavefunctions         nl  l   occ")?;
            for chi in record_items(pswfc, "chi") {
                let label = chi.get("label").map(scalar_text).unwrap_or_default();
                let l = chi.get("l").and_then(|v| v.as_i64()).unwrap_or(0);
                let occ = chi.get("occupation").and_then(|v| v.as_f64()).unwrap_or(0.0);
                writeln!(f, "{:>25}{:>3}{:>6.2}", label, l, occ)?;
            }
        }

        writeln!(f, "</PP_HEADER>")
    }

    fn write_nonlocal(&self, f: &mut fmt::Formatter<'_>, rec: &Record) -> fmt::Result {
        writeln!(f, "<PP_NONLOCAL>")?;

        for (i, beta) in record_items(rec, "beta").into_iter().enumerate() {
            let index = beta.get("index").and_then(|v| v.as_i64()).unwrap_or(i as i64 + 1);
            let l = beta.get("angular_momentum").and_then(|v| v.as_i64()).unwrap_or(0);
            let values = array(beta, VALUES);

            writeln!(f, "  <PP_BETA>")?;
            writeln!(f, "{:>5}{:>5}             Beta    L", index, l)?;
            writeln!(f, "{:>6}", values.len())?;
            write_array(f, "  ", values, self.columns)?;
            writeln!(f, "  </PP_BETA>")?;
        }

        let dij = array(rec, "dij");
        let n = (dij.len() as f64).sqrt().round() as usize;

        if !dij.is_empty() && n * n == dij.len() {
            let entries: Vec<(usize, usize, f64)> = (0..n)
                .flat_map(|i| (i..n).map(move |j| (i, j)))
                .map(|(i, j)| (i + 1, j + 1, dij[i * n + j]))
                .filter(|&(_, _, v)| v != 0.0)
                .collect();

            writeln!(f, "  <PP_DIJ>")?;
            writeln!(f, "{:>5}                  Number of nonzero Dij", entries.len())?;
            for (i, j, v) in entries {
                writeln!(f, "{:>5}{:>5}{:>25}", i, j, fortran_e(v))?;
            }
            writeln!(f, "  </PP_DIJ>")?;
        }

        writeln!(f, "</PP_NONLOCAL>")
    }

    fn write_pswfc(&self, f: &mut fmt::Formatter<'_>, rec: &Record) -> fmt::Result {
        writeln!(f, "<PP_PSWFC>")?;

        for chi in record_items(rec, "chi") {
            let label = chi.get("label").map(scalar_text).unwrap_or_else(|| "?".to_string());
            let l = chi.get("l").and_then(|v| v.as_i64()).unwrap_or(0);
            let occ = chi.get("occupation").and_then(|v| v.as_f64()).unwrap_or(0.0);

            writeln!(f, "{:<6}{:>5}{:>25}          Wavefunction", label, l, fortran_e(occ))?;
            write_array(f, "", array(chi, VALUES), self.columns)?;
        }

        writeln!(f, "</PP_PSWFC>")
    }
}
