//! Field mapping for XML markup (UPF 2.x).

use super::{check_required, coerce, infer_payload, infer_scalar, Extents};
use crate::block::RawBlock;
use crate::error::{ConsistencyError, FormatError, Result, SchemaError};
use crate::schema::{self, BlockSchema, ChildShape, FieldKind, FieldSchema};
use crate::value::{Record, Value, TEXT, VALUES};
use regex::{Captures, Regex};
use std::sync::LazyLock;
use xml::reader::{EventReader, XmlEvent};

/// Attributes describing the payload layout rather than its content.
pub const FORMAT_ATTRS: [&str; 3] = ["type", "size", "columns"];

// entity references pass through, any other '&' is escaped
static AMPERSAND_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(#[0-9]+;|#x[0-9A-Fa-f]+;|[A-Za-z][A-Za-z0-9]*;)?").unwrap()
});

#[derive(Debug, Default)]
struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    text: String,
    children: Vec<Element>,
}

impl Element {
    fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn has_content_attributes(&self) -> bool {
        self.attributes.iter().any(|(n, _)| !is_format_attr(n))
    }
}

fn is_format_attr(name: &str) -> bool {
    FORMAT_ATTRS.iter().any(|f| f.eq_ignore_ascii_case(name))
}

fn escape_ampersands(text: &str) -> std::borrow::Cow<'_, str> {
    AMPERSAND_RE.replace_all(text, |caps: &Captures| {
        if caps.get(1).is_some() {
            caps[0].to_string()
        } else {
            "&amp;".to_string()
        }
    })
}

fn parse_element(raw: &RawBlock) -> Result<Element> {
    let source = escape_ampersands(&raw.text);
    let mut parser = EventReader::from_str(&source);

    let markup_error = |message: String| FormatError::Markup {
        block: raw.tag.clone(),
        message: format!("{} (block starts on line {})", message, raw.line),
    };

    let mut stack: Vec<Element> = Vec::new();

    loop {
        match parser.next() {
            Ok(XmlEvent::StartElement {
                name, attributes, ..
            }) => {
                stack.push(Element {
                    name: name.local_name,
                    attributes: attributes
                        .into_iter()
                        .map(|a| (a.name.local_name, a.value))
                        .collect(),
                    ..Default::default()
                });
            }

            Ok(XmlEvent::Characters(s)) | Ok(XmlEvent::CData(s)) | Ok(XmlEvent::Whitespace(s)) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&s);
                }
            }

            Ok(XmlEvent::EndElement { .. }) => {
                let Some(done) = stack.pop() else {
                    continue;
                };

                match stack.last_mut() {
                    Some(parent) => parent.children.push(done),
                    None => return Ok(done),
                }
            }

            Ok(XmlEvent::EndDocument) => break,

            Ok(_) => {}

            Err(e) => return Err(markup_error(e.to_string()).into()),
        }
    }

    Err(markup_error("block ended before its root element was closed".to_string()).into())
}

pub fn map_block(
    raw: &RawBlock,
    schema: Option<&'static BlockSchema>,
    extents: &Extents,
) -> Result<Record> {
    let elem = parse_element(raw)?;

    let key = match schema {
        Some(s) => s.key.to_string(),
        None => schema::child_key(&raw.tag).0,
    };
    let fields: &'static [FieldSchema] = schema.map(|s| s.fields).unwrap_or(&[]);

    let mut record = element_record(&key, "", &elem, fields, extents)?;

    for child in elem.children.iter() {
        let (child_key, number) = schema::child_key(&child.name);
        let child_schema = schema.and_then(|s| s.child(&child_key));

        let label = match number {
            Some(n) => format!("{}.{}", child_key, n),
            None => child_key.clone(),
        };

        let value = match child_schema.map(|c| c.shape) {
            Some(ChildShape::Payload(kind)) if !child.has_content_attributes() => {
                payload_value(&key, &label, kind, child, extents)?
            }
            Some(ChildShape::Record(child_fields)) => {
                let r = element_record(&key, &label, child, child_fields, extents)?;
                check_required(&key, &label, &r, child_fields)?;
                Value::Record(r)
            }
            _ if child.has_content_attributes() => {
                Value::Record(element_record(&key, &label, child, &[], extents)?)
            }
            _ => match infer_payload(&child.text) {
                Some((_, v)) => v,
                None => Value::Record(Record::new()),
            },
        };

        let list = child_schema.map_or(false, |c| c.list);
        if list || number.is_some() || record.contains_key(&child_key) {
            record.push(&child_key, value);
        } else {
            record.insert(child_key, value);
        }
    }

    if let Some(s) = schema {
        for c in s.children.iter().filter(|c| c.required) {
            if !record.contains_key(c.key) {
                return Err(SchemaError::MissingField {
                    block: key.clone(),
                    field: c.key.to_string(),
                }
                .into());
            }
        }
    }

    check_required(&key, "", &record, fields)?;

    Ok(record)
}

fn qualified(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

/// Attributes plus the text payload of one element.
fn element_record(
    block: &str,
    prefix: &str,
    elem: &Element,
    fields: &'static [FieldSchema],
    extents: &Extents,
) -> Result<Record> {
    let mut record = Record::new();

    for (name, raw) in elem.attributes.iter() {
        if is_format_attr(name) {
            continue;
        }

        let name = name.to_lowercase();
        let value = match schema::field_of(fields, &name) {
            Some(f) => coerce(block, &qualified(prefix, &name), f.kind, raw)?,
            None => infer_scalar(raw),
        };
        record.insert(name, value);
    }

    if elem.text.trim().is_empty() {
        return Ok(record);
    }

    if let Some(f) = schema::field_of(fields, VALUES) {
        let value = payload_value(block, &qualified(prefix, VALUES), f.kind, elem, extents)?;
        record.insert(VALUES, value);
    } else if let Some(f) = schema::field_of(fields, TEXT) {
        let value = coerce(block, &qualified(prefix, TEXT), f.kind, &elem.text)?;
        record.insert(TEXT, value);
    } else if let Some((name, value)) = infer_payload(&elem.text) {
        record.insert(name, value);
    }

    Ok(record)
}

fn payload_value(
    block: &str,
    field: &str,
    kind: FieldKind,
    elem: &Element,
    extents: &Extents,
) -> Result<Value> {
    let value = coerce(block, field, kind, &elem.text)?;

    if let (FieldKind::Array(extent), Value::Array(values)) = (kind, &value) {
        if let Some(size) = elem.attribute("size") {
            let size: usize = size.trim().parse().map_err(|_| SchemaError::InvalidValue {
                block: block.to_string(),
                field: qualified(field, "size"),
                token: size.to_string(),
                expected: FieldKind::Int.name(),
            })?;

            if size != values.len() {
                return Err(ConsistencyError::LengthMismatch {
                    block: block.to_string(),
                    field: field.to_string(),
                    expected: size,
                    found: values.len(),
                }
                .into());
            }
        }

        extents.check(block, field, extent, values.len())?;
    }

    Ok(value)
}
