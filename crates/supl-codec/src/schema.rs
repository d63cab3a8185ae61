use std::collections::BTreeMap;

use serde::Deserialize;

/// One grammar file: a module name and its type assignments.
#[derive(Debug, Clone, Deserialize)]
pub struct GrammarFile {
    /// ASN.1 module the definitions were transcribed from.
    pub module: String,
    #[serde(default)]
    pub types: BTreeMap<String, TypeSpec>,
}

/// Either the name of a type (defined in the grammar set or a builtin such as
/// `BOOLEAN`), or an inline constructed type.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TypeSpec {
    Reference(String),
    Inline(Box<Constructed>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Constructed {
    Integer(IntegerSpec),
    Enumerated(EnumeratedSpec),
    OctetString(SizedSpec),
    BitString(SizedSpec),
    Ia5String(StringSpec),
    VisibleString(StringSpec),
    Utf8String(SizedSpec),
    Sequence(SequenceSpec),
    SequenceOf(SequenceOfSpec),
    Choice(ChoiceSpec),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IntegerSpec {
    pub min: Option<i64>,
    pub max: Option<i64>,
    pub extensible: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnumeratedSpec {
    pub values: Vec<String>,
    #[serde(default)]
    pub extensible: bool,
    /// Extension additions after the `...` marker.
    #[serde(default)]
    pub extensions: Vec<String>,
}

/// SIZE constraint: `size: 8` or `size: { min: 1, max: 64 }`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SizeSpec {
    Fixed(u64),
    Range {
        #[serde(default)]
        min: u64,
        max: Option<u64>,
        #[serde(default)]
        extensible: bool,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SizedSpec {
    pub size: Option<SizeSpec>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StringSpec {
    pub size: Option<SizeSpec>,
    /// Permitted alphabet (`FROM (...)`), listed character by character.
    pub alphabet: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: TypeSpec,
    /// OPTIONAL or DEFAULT; both take a preamble bit.
    #[serde(default)]
    pub optional: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SequenceSpec {
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
    #[serde(default)]
    pub extensible: bool,
    #[serde(default)]
    pub extensions: Vec<FieldSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SequenceOfSpec {
    pub item: TypeSpec,
    #[serde(default)]
    pub size: Option<SizeSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AlternativeSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: TypeSpec,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChoiceSpec {
    pub alternatives: Vec<AlternativeSpec>,
    #[serde(default)]
    pub extensible: bool,
    #[serde(default)]
    pub extensions: Vec<AlternativeSpec>,
}
