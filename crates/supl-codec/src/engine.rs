use std::collections::HashMap;

use tracing::trace;

use crate::bits::{BitReader, BitWriter};
use crate::error::{DecodeError, EncodeError, SchemaError};
use crate::schema::{
    AlternativeSpec, Constructed, FieldSpec, GrammarFile, SizeSpec, StringSpec, TypeSpec,
};
use crate::value::StructuredValue;
use crate::MessageCodec;

// ---------------------------------------------------------------------------
// Compiled representation
// ---------------------------------------------------------------------------

/// Index of a compiled type in the schema arena.
pub(crate) type TypeId = usize;

/// PER-visible size constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Size {
    pub lb: u64,
    pub ub: Option<u64>,
    pub extensible: bool,
}

impl Size {
    pub const UNCONSTRAINED: Size = Size {
        lb: 0,
        ub: None,
        extensible: false,
    };

    pub fn contains(&self, n: u64) -> bool {
        n >= self.lb && self.ub.map_or(true, |ub| n <= ub)
    }
}

/// Character set of a known-multiplier string after applying any permitted
/// alphabet constraint.
#[derive(Debug, Clone)]
pub(crate) struct Charset {
    /// Bits per character.
    pub bits: u32,
    /// Sorted alphabet when characters are encoded as indices, `None` when
    /// they are encoded by their own code point.
    pub table: Option<Vec<char>>,
    /// Every permitted character, for validation on encode.
    pub permitted: Vec<char>,
}

#[derive(Debug, Clone)]
pub(crate) struct Field {
    pub name: String,
    pub ty: TypeId,
    pub optional: bool,
}

#[derive(Debug, Clone)]
pub(crate) enum Node {
    /// Placeholder for a named type that has not been compiled yet.
    Pending,
    /// Named type defined as another type name; replaced after compilation.
    Alias(TypeId),
    Null,
    Boolean,
    Integer {
        min: Option<i64>,
        max: Option<i64>,
        extensible: bool,
    },
    Enumerated {
        root: Vec<String>,
        extensible: bool,
        extensions: Vec<String>,
    },
    OctetString(Size),
    BitString(Size),
    KnownString {
        size: Size,
        charset: Charset,
    },
    Utf8String,
    Time,
    Sequence {
        root: Vec<Field>,
        extensible: bool,
        extensions: Vec<Field>,
    },
    SequenceOf {
        item: TypeId,
        size: Size,
    },
    Choice {
        root: Vec<Field>,
        extensible: bool,
        extensions: Vec<Field>,
    },
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// A compiled grammar set: every type of every file, resolved into one arena.
///
/// Construct via [`Schema::compile`] (or the helpers in [`crate::loader`]).
/// A `Schema` is immutable and can be shared across threads behind an `Arc`.
pub struct Schema {
    name: String,
    pub(crate) nodes: Vec<Node>,
    named: HashMap<String, TypeId>,
}

impl std::fmt::Debug for Schema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Schema")
            .field("name", &self.name)
            .field("num_types", &self.named.len())
            .finish()
    }
}

impl Schema {
    /// Compile a set of parsed grammar files into one schema.
    pub fn compile(name: impl Into<String>, files: Vec<GrammarFile>) -> Result<Self, SchemaError> {
        let mut schema = Schema {
            name: name.into(),
            nodes: Vec::new(),
            named: HashMap::new(),
        };

        // Pass 1: reserve an arena slot for every named type so references
        // (including recursive ones) resolve regardless of file order.
        let mut definitions = Vec::new();
        for file in files {
            for (type_name, spec) in file.types {
                if schema.named.contains_key(&type_name) {
                    return Err(SchemaError::DuplicateType(type_name));
                }
                let id = schema.push(Node::Pending);
                schema.named.insert(type_name.clone(), id);
                definitions.push((type_name, id, spec));
            }
        }

        // Pass 2: compile each definition into its reserved slot.
        for (type_name, id, spec) in &definitions {
            let node = match spec {
                TypeSpec::Inline(constructed) => schema.compile_constructed(type_name, constructed)?,
                TypeSpec::Reference(target) => {
                    // Alias: share the target's node.
                    let target_id = schema.resolve(type_name, target)?;
                    if target_id == *id {
                        return Err(SchemaError::Invalid {
                            name: type_name.clone(),
                            reason: "type is an alias of itself".to_string(),
                        });
                    }
                    Node::Alias(target_id)
                }
            };
            schema.nodes[*id] = node;
        }

        schema.resolve_aliases(&definitions)?;

        trace!(schema = %schema.name, types = schema.named.len(), "grammar compiled");
        Ok(schema)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether `type_name` is defined in this schema.
    pub fn has_type(&self, type_name: &str) -> bool {
        self.named.contains_key(type_name)
    }

    fn push(&mut self, node: Node) -> TypeId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    fn resolve(&mut self, from: &str, target: &str) -> Result<TypeId, SchemaError> {
        if let Some(id) = self.named.get(target) {
            return Ok(*id);
        }
        let builtin = match target {
            "NULL" => Node::Null,
            "BOOLEAN" => Node::Boolean,
            "INTEGER" => Node::Integer {
                min: None,
                max: None,
                extensible: false,
            },
            "OCTET STRING" => Node::OctetString(Size::UNCONSTRAINED),
            "BIT STRING" => Node::BitString(Size::UNCONSTRAINED),
            "IA5String" => Node::KnownString {
                size: Size::UNCONSTRAINED,
                charset: Charset::ia5(None).map_err(|reason| invalid(from, reason))?,
            },
            "VisibleString" => Node::KnownString {
                size: Size::UNCONSTRAINED,
                charset: Charset::visible(None).map_err(|reason| invalid(from, reason))?,
            },
            "UTF8String" => Node::Utf8String,
            "UTCTime" | "GeneralizedTime" => Node::Time,
            _ => {
                return Err(SchemaError::UnresolvedReference {
                    from: from.to_string(),
                    referenced: target.to_string(),
                })
            }
        };
        Ok(self.push(builtin))
    }

    fn compile_spec(&mut self, from: &str, spec: &TypeSpec) -> Result<TypeId, SchemaError> {
        match spec {
            TypeSpec::Reference(target) => self.resolve(from, target),
            TypeSpec::Inline(constructed) => {
                let node = self.compile_constructed(from, constructed)?;
                Ok(self.push(node))
            }
        }
    }

    fn compile_constructed(&mut self, from: &str, spec: &Constructed) -> Result<Node, SchemaError> {
        let node = match spec {
            Constructed::Integer(int) => {
                if let (Some(min), Some(max)) = (int.min, int.max) {
                    if min > max {
                        return Err(invalid(from, format!("integer range {min}..{max} is empty")));
                    }
                }
                if int.extensible && (int.min.is_none() || int.max.is_none()) {
                    return Err(invalid(from, "only fully constrained integers may be extensible"));
                }
                Node::Integer {
                    min: int.min,
                    max: int.max,
                    extensible: int.extensible,
                }
            }
            Constructed::Enumerated(e) => {
                if e.values.is_empty() {
                    return Err(invalid(from, "enumerated type has no values"));
                }
                if !e.extensions.is_empty() && !e.extensible {
                    return Err(invalid(from, "extension values require 'extensible: true'"));
                }
                Node::Enumerated {
                    root: e.values.clone(),
                    extensible: e.extensible,
                    extensions: e.extensions.clone(),
                }
            }
            Constructed::OctetString(s) => Node::OctetString(size_of(from, s.size.as_ref())?),
            Constructed::BitString(s) => Node::BitString(size_of(from, s.size.as_ref())?),
            Constructed::Ia5String(s) => self.known_string(from, s, Charset::ia5)?,
            Constructed::VisibleString(s) => self.known_string(from, s, Charset::visible)?,
            // The size of a UTF8String is not PER-visible.
            Constructed::Utf8String(_) => Node::Utf8String,
            Constructed::Sequence(seq) => {
                if !seq.extensions.is_empty() && !seq.extensible {
                    return Err(invalid(from, "extension fields require 'extensible: true'"));
                }
                Node::Sequence {
                    root: self.compile_fields(from, &seq.fields)?,
                    extensible: seq.extensible,
                    extensions: self.compile_fields(from, &seq.extensions)?,
                }
            }
            Constructed::SequenceOf(list) => Node::SequenceOf {
                item: self.compile_spec(from, &list.item)?,
                size: size_of(from, list.size.as_ref())?,
            },
            Constructed::Choice(choice) => {
                if choice.alternatives.is_empty() {
                    return Err(invalid(from, "choice has no alternatives"));
                }
                if !choice.extensions.is_empty() && !choice.extensible {
                    return Err(invalid(from, "extension alternatives require 'extensible: true'"));
                }
                Node::Choice {
                    root: self.compile_alternatives(from, &choice.alternatives)?,
                    extensible: choice.extensible,
                    extensions: self.compile_alternatives(from, &choice.extensions)?,
                }
            }
        };
        Ok(node)
    }

    fn known_string(
        &mut self,
        from: &str,
        spec: &StringSpec,
        charset: fn(Option<&str>) -> Result<Charset, String>,
    ) -> Result<Node, SchemaError> {
        Ok(Node::KnownString {
            size: size_of(from, spec.size.as_ref())?,
            charset: charset(spec.alphabet.as_deref()).map_err(|reason| invalid(from, reason))?,
        })
    }

    fn compile_fields(&mut self, from: &str, fields: &[FieldSpec]) -> Result<Vec<Field>, SchemaError> {
        let mut out = Vec::with_capacity(fields.len());
        for f in fields {
            if out.iter().any(|existing: &Field| existing.name == f.name) {
                return Err(invalid(from, format!("duplicate field '{}'", f.name)));
            }
            out.push(Field {
                name: f.name.clone(),
                ty: self.compile_spec(from, &f.ty)?,
                optional: f.optional,
            });
        }
        Ok(out)
    }

    fn compile_alternatives(
        &mut self,
        from: &str,
        alternatives: &[AlternativeSpec],
    ) -> Result<Vec<Field>, SchemaError> {
        let mut out = Vec::with_capacity(alternatives.len());
        for alt in alternatives {
            if out.iter().any(|existing: &Field| existing.name == alt.name) {
                return Err(invalid(from, format!("duplicate alternative '{}'", alt.name)));
            }
            out.push(Field {
                name: alt.name.clone(),
                ty: self.compile_spec(from, &alt.ty)?,
                optional: false,
            });
        }
        Ok(out)
    }

    /// Replace alias placeholders with a copy of the aliased node, following
    /// chains of aliases.
    fn resolve_aliases(&mut self, definitions: &[(String, TypeId, TypeSpec)]) -> Result<(), SchemaError> {
        for (type_name, id, _) in definitions {
            let mut seen = vec![*id];
            let mut current = *id;
            while let Some(target) = self.alias_target(current) {
                if seen.contains(&target) {
                    return Err(invalid(type_name, "circular type alias"));
                }
                seen.push(target);
                current = target;
            }
            if current != *id {
                self.nodes[*id] = self.nodes[current].clone();
            }
        }
        Ok(())
    }

    fn alias_target(&self, id: TypeId) -> Option<TypeId> {
        match &self.nodes[id] {
            Node::Alias(target) => Some(*target),
            _ => None,
        }
    }

    pub(crate) fn lookup_type(&self, message_type: &str) -> Option<TypeId> {
        self.named.get(message_type).copied()
    }
}

impl Charset {
    fn ia5(alphabet: Option<&str>) -> Result<Charset, String> {
        Charset::build((0u8..=127).map(char::from).collect(), alphabet)
    }

    fn visible(alphabet: Option<&str>) -> Result<Charset, String> {
        Charset::build((32u8..=126).map(char::from).collect(), alphabet)
    }

    fn build(base: Vec<char>, alphabet: Option<&str>) -> Result<Charset, String> {
        let mut permitted: Vec<char> = match alphabet {
            Some(a) => {
                let chars: Vec<char> = a.chars().collect();
                if let Some(bad) = chars.iter().find(|c| !base.contains(c)) {
                    return Err(format!("character {bad:?} is outside the base character set"));
                }
                chars
            }
            None => base,
        };
        permitted.sort_unstable();
        permitted.dedup();
        if permitted.is_empty() {
            return Err("empty permitted alphabet".to_string());
        }

        let bits = crate::bits::bits_for_range(permitted.len() as u128);
        let largest = *permitted.last().unwrap_or(&'\0') as u64;
        // Characters keep their own code when the largest one already fits
        // in the reduced width; otherwise they are encoded by index.
        let table = if largest < (1u64 << bits) {
            None
        } else {
            Some(permitted.clone())
        };
        Ok(Charset {
            bits,
            table,
            permitted,
        })
    }
}

fn size_of(from: &str, spec: Option<&SizeSpec>) -> Result<Size, SchemaError> {
    let size = match spec {
        None => Size::UNCONSTRAINED,
        Some(SizeSpec::Fixed(n)) => Size {
            lb: *n,
            ub: Some(*n),
            extensible: false,
        },
        Some(SizeSpec::Range {
            min,
            max,
            extensible,
        }) => Size {
            lb: *min,
            ub: *max,
            extensible: *extensible,
        },
    };
    if let Some(ub) = size.ub {
        if size.lb > ub {
            return Err(invalid(from, format!("size range {}..{} is empty", size.lb, ub)));
        }
    }
    if size.extensible && size.ub.is_none() {
        return Err(invalid(from, "only bounded sizes may be extensible"));
    }
    Ok(size)
}

fn invalid(name: &str, reason: impl Into<String>) -> SchemaError {
    SchemaError::Invalid {
        name: name.to_string(),
        reason: reason.into(),
    }
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

impl MessageCodec for Schema {
    fn decode(&self, message_type: &str, bytes: &[u8]) -> Result<StructuredValue, DecodeError> {
        let id = self
            .lookup_type(message_type)
            .ok_or_else(|| DecodeError::UnknownType(message_type.to_string()))?;
        let mut reader = BitReader::new(bytes);
        let value = self.decode_node(id, &mut reader)?;
        if reader.remaining() >= 8 {
            return Err(DecodeError::invalid(format!(
                "{} trailing bits after {message_type}",
                reader.remaining()
            )));
        }
        Ok(value)
    }

    fn encode(&self, message_type: &str, value: &StructuredValue) -> Result<Vec<u8>, EncodeError> {
        let id = self
            .lookup_type(message_type)
            .ok_or_else(|| EncodeError::UnknownType(message_type.to_string()))?;
        let mut writer = BitWriter::new();
        self.encode_node(id, value, &mut writer)?;
        let mut bytes = writer.into_bytes();
        // A complete encoding is never empty.
        if bytes.is_empty() {
            bytes.push(0);
        }
        Ok(bytes)
    }
}
