//! The decoded message tree.
//!
//! Every accessor returns an `Option` instead of failing, so callers can walk
//! into a message along a path and treat any missing field or mismatched
//! choice variant as "absent".

/// A terminal value in the decoded tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Leaf {
    Null,
    Boolean(bool),
    Integer(i64),
    /// Name of the enumerated value (`extension-N` for unknown additions).
    Enumerated(String),
    /// OCTET STRING contents.
    Bytes(Vec<u8>),
    /// BIT STRING contents, `len` significant bits, zero padded.
    Bits { data: Vec<u8>, len: usize },
    /// Character string contents.
    Text(String),
    /// UTCTime or GeneralizedTime in its ASN.1 string form.
    Time(String),
    /// Open-type contents of an extension the grammar does not describe,
    /// carried verbatim so it re-encodes to the same bytes.
    Opaque(Vec<u8>),
}

/// Decoded form of one schema-defined message.
#[derive(Debug, Clone, PartialEq)]
pub enum StructuredValue {
    Leaf(Leaf),
    /// SEQUENCE: present fields in schema order.
    Sequence(Vec<(String, StructuredValue)>),
    /// SEQUENCE OF.
    List(Vec<StructuredValue>),
    /// CHOICE: selected variant and its payload.
    Choice(String, Box<StructuredValue>),
}

/// One hop in a path through a [`StructuredValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step<'a> {
    /// Named field of a sequence.
    Field(&'a str),
    /// Payload of a choice, only if the named variant is selected.
    Variant(&'a str),
}

impl StructuredValue {
    pub fn sequence<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = (S, StructuredValue)>,
        S: Into<String>,
    {
        Self::Sequence(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn choice(tag: impl Into<String>, value: StructuredValue) -> Self {
        Self::Choice(tag.into(), Box::new(value))
    }

    pub fn integer(value: i64) -> Self {
        Self::Leaf(Leaf::Integer(value))
    }

    pub fn bytes(value: impl Into<Vec<u8>>) -> Self {
        Self::Leaf(Leaf::Bytes(value.into()))
    }

    pub fn boolean(value: bool) -> Self {
        Self::Leaf(Leaf::Boolean(value))
    }

    pub fn enumerated(name: impl Into<String>) -> Self {
        Self::Leaf(Leaf::Enumerated(name.into()))
    }

    pub fn text(value: impl Into<String>) -> Self {
        Self::Leaf(Leaf::Text(value.into()))
    }

    pub fn null() -> Self {
        Self::Leaf(Leaf::Null)
    }

    pub fn field(&self, name: &str) -> Option<&StructuredValue> {
        match self {
            Self::Sequence(fields) => fields.iter().find(|(k, _)| k == name).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut StructuredValue> {
        match self {
            Self::Sequence(fields) => fields
                .iter_mut()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v),
            _ => None,
        }
    }

    /// Selected variant of a choice.
    pub fn choice_tag(&self) -> Option<&str> {
        match self {
            Self::Choice(tag, _) => Some(tag),
            _ => None,
        }
    }

    /// Payload of a choice if `tag` is the selected variant.
    pub fn variant(&self, tag: &str) -> Option<&StructuredValue> {
        match self {
            Self::Choice(t, v) if t == tag => Some(v),
            _ => None,
        }
    }

    pub fn variant_mut(&mut self, tag: &str) -> Option<&mut StructuredValue> {
        match self {
            Self::Choice(t, v) if t == tag => Some(v),
            _ => None,
        }
    }

    pub fn lookup(&self, path: &[Step<'_>]) -> Option<&StructuredValue> {
        path.iter().try_fold(self, |node, step| match *step {
            Step::Field(name) => node.field(name),
            Step::Variant(tag) => node.variant(tag),
        })
    }

    pub fn lookup_mut(&mut self, path: &[Step<'_>]) -> Option<&mut StructuredValue> {
        let mut node = self;
        for step in path {
            node = match *step {
                Step::Field(name) => node.field_mut(name)?,
                Step::Variant(tag) => node.variant_mut(tag)?,
            };
        }
        Some(node)
    }

    pub fn as_leaf(&self) -> Option<&Leaf> {
        match self {
            Self::Leaf(leaf) => Some(leaf),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Leaf(Leaf::Bytes(b)) => Some(b),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Leaf(Leaf::Integer(i)) => Some(*i),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[StructuredValue]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }
}
