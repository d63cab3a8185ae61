//! Unaligned PER (X.691) encoding and decoding over a compiled [`Schema`].

use crate::bits::{bits_for_range, BitReader, BitWriter};
use crate::engine::{Charset, Field, Node, Schema, Size, TypeId};
use crate::error::{DecodeError, EncodeError};
use crate::value::{Leaf, StructuredValue};

/// Length determinants above this need fragmentation, which is not supported.
const MAX_UNFRAGMENTED: u64 = 16_383;

/// Name given to extension additions the grammar does not describe.
fn extension_name(index: usize) -> String {
    format!("extension-{index}")
}

fn parse_extension_name(name: &str) -> Option<usize> {
    name.strip_prefix("extension-")?.parse().ok()
}

// ---------------------------------------------------------------------------
// Shared primitives
// ---------------------------------------------------------------------------

fn write_constrained(w: &mut BitWriter, offset: u128, range: u128) {
    w.write_bits(offset as u64, bits_for_range(range));
}

fn read_constrained(r: &mut BitReader<'_>, range: u128) -> Result<u128, DecodeError> {
    let value = u128::from(r.read_bits(bits_for_range(range))?);
    if value >= range {
        return Err(DecodeError::invalid(format!(
            "constrained value {value} outside range of {range}"
        )));
    }
    Ok(value)
}

fn write_general_length(w: &mut BitWriter, n: u64) -> Result<(), EncodeError> {
    if n < 128 {
        w.write_bits(n, 8);
    } else if n <= MAX_UNFRAGMENTED {
        w.write_bits(0b10, 2);
        w.write_bits(n, 14);
    } else {
        return Err(EncodeError::unsupported(format!(
            "length {n} requires fragmentation"
        )));
    }
    Ok(())
}

fn read_general_length(r: &mut BitReader<'_>) -> Result<u64, DecodeError> {
    if !r.read_bit()? {
        return r.read_bits(7);
    }
    if !r.read_bit()? {
        return r.read_bits(14);
    }
    Err(DecodeError::unsupported("fragmented length determinant"))
}

/// Length determinant for a count subject to a SIZE constraint.
fn write_length(w: &mut BitWriter, n: u64, size: &Size) -> Result<(), EncodeError> {
    let in_root = size.contains(n);
    if size.extensible {
        w.write_bit(!in_root);
        if !in_root {
            return write_general_length(w, n);
        }
    } else if !in_root {
        return Err(EncodeError::constraint(format!(
            "size {n} outside {}..{}",
            size.lb,
            size.ub.map_or("MAX".to_string(), |ub| ub.to_string())
        )));
    }
    match size.ub {
        Some(ub) if ub < 65_536 => {
            if ub != size.lb {
                write_constrained(w, u128::from(n - size.lb), u128::from(ub - size.lb) + 1);
            }
            Ok(())
        }
        _ => write_general_length(w, n),
    }
}

fn read_length(r: &mut BitReader<'_>, size: &Size) -> Result<u64, DecodeError> {
    if size.extensible && r.read_bit()? {
        return read_general_length(r);
    }
    match size.ub {
        Some(ub) if ub < 65_536 => {
            if ub == size.lb {
                Ok(ub)
            } else {
                let offset = read_constrained(r, u128::from(ub - size.lb) + 1)?;
                Ok(size.lb + offset as u64)
            }
        }
        _ => {
            let n = read_general_length(r)?;
            if n < size.lb {
                return Err(DecodeError::invalid(format!(
                    "length {n} below minimum {}",
                    size.lb
                )));
            }
            Ok(n)
        }
    }
}

fn write_normally_small(w: &mut BitWriter, n: u64) -> Result<(), EncodeError> {
    if n < 64 {
        w.write_bit(false);
        w.write_bits(n, 6);
        Ok(())
    } else {
        w.write_bit(true);
        let octets = minimal_unsigned(n);
        write_general_length(w, octets.len() as u64)?;
        w.write_bytes(&octets);
        Ok(())
    }
}

fn read_normally_small(r: &mut BitReader<'_>) -> Result<u64, DecodeError> {
    if !r.read_bit()? {
        return r.read_bits(6);
    }
    let len = read_general_length(r)? as usize;
    if len == 0 || len > 8 {
        return Err(DecodeError::invalid(format!("normally small number of {len} octets")));
    }
    Ok(from_unsigned(&r.read_bytes(len)?))
}

fn minimal_unsigned(n: u64) -> Vec<u8> {
    let bytes = n.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count().min(7);
    bytes[skip..].to_vec()
}

fn minimal_signed(n: i64) -> Vec<u8> {
    let bytes = n.to_be_bytes();
    let mut skip = 0;
    while skip < 7 {
        let redundant = (bytes[skip] == 0x00 && bytes[skip + 1] & 0x80 == 0)
            || (bytes[skip] == 0xff && bytes[skip + 1] & 0x80 != 0);
        if !redundant {
            break;
        }
        skip += 1;
    }
    bytes[skip..].to_vec()
}

fn from_unsigned(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
}

fn from_signed(bytes: &[u8]) -> i64 {
    let negative = bytes.first().is_some_and(|b| b & 0x80 != 0);
    let mut acc: i64 = if negative { -1 } else { 0 };
    for b in bytes {
        acc = (acc << 8) | i64::from(*b);
    }
    acc
}

/// Encode `value` as an open type: a length-prefixed, octet-padded encoding.
fn write_open_type(
    w: &mut BitWriter,
    encode: impl FnOnce(&mut BitWriter) -> Result<(), EncodeError>,
) -> Result<(), EncodeError> {
    let mut inner = BitWriter::new();
    encode(&mut inner)?;
    let mut bytes = inner.into_bytes();
    if bytes.is_empty() {
        bytes.push(0);
    }
    write_general_length(w, bytes.len() as u64)?;
    w.write_bytes(&bytes);
    Ok(())
}

fn read_open_type(r: &mut BitReader<'_>) -> Result<Vec<u8>, DecodeError> {
    let len = read_general_length(r)? as usize;
    r.read_bytes(len)
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

impl Schema {
    fn node(&self, id: TypeId) -> &Node {
        let mut node = &self.nodes[id];
        while let Node::Alias(target) = node {
            node = &self.nodes[*target];
        }
        node
    }

    pub(crate) fn encode_node(
        &self,
        id: TypeId,
        value: &StructuredValue,
        w: &mut BitWriter,
    ) -> Result<(), EncodeError> {
        match self.node(id) {
            Node::Pending | Node::Alias(_) => {
                Err(EncodeError::unsupported("type was never compiled"))
            }
            Node::Null => match value {
                StructuredValue::Leaf(Leaf::Null) => Ok(()),
                _ => Err(EncodeError::mismatch("NULL")),
            },
            Node::Boolean => match value {
                StructuredValue::Leaf(Leaf::Boolean(b)) => {
                    w.write_bit(*b);
                    Ok(())
                }
                _ => Err(EncodeError::mismatch("BOOLEAN")),
            },
            Node::Integer {
                min,
                max,
                extensible,
            } => {
                let v = value.as_integer().ok_or_else(|| EncodeError::mismatch("INTEGER"))?;
                encode_integer(w, v, *min, *max, *extensible)
            }
            Node::Enumerated {
                root,
                extensible,
                extensions,
            } => {
                let name = match value {
                    StructuredValue::Leaf(Leaf::Enumerated(name)) => name,
                    _ => return Err(EncodeError::mismatch("ENUMERATED")),
                };
                if let Some(idx) = root.iter().position(|v| v == name) {
                    if *extensible {
                        w.write_bit(false);
                    }
                    write_constrained(w, idx as u128, root.len() as u128);
                    return Ok(());
                }
                let ext_idx = extensions
                    .iter()
                    .position(|v| v == name)
                    .or_else(|| parse_extension_name(name));
                match ext_idx {
                    Some(idx) if *extensible => {
                        w.write_bit(true);
                        write_normally_small(w, idx as u64)
                    }
                    _ => Err(EncodeError::constraint(format!(
                        "'{name}' is not a value of this enumeration"
                    ))),
                }
            }
            Node::OctetString(size) => {
                let bytes = value.as_bytes().ok_or_else(|| EncodeError::mismatch("OCTET STRING"))?;
                write_length(w, bytes.len() as u64, size)?;
                w.write_bytes(bytes);
                Ok(())
            }
            Node::BitString(size) => match value {
                StructuredValue::Leaf(Leaf::Bits { data, len }) => {
                    if data.len() * 8 < *len {
                        return Err(EncodeError::constraint("bit length exceeds data"));
                    }
                    write_length(w, *len as u64, size)?;
                    w.write_bit_slice(data, *len);
                    Ok(())
                }
                _ => Err(EncodeError::mismatch("BIT STRING")),
            },
            Node::KnownString { size, charset } => match value {
                StructuredValue::Leaf(Leaf::Text(text)) => encode_known_string(w, text, size, charset),
                _ => Err(EncodeError::mismatch("character string")),
            },
            Node::Utf8String => match value {
                StructuredValue::Leaf(Leaf::Text(text)) => {
                    write_general_length(w, text.len() as u64)?;
                    w.write_bytes(text.as_bytes());
                    Ok(())
                }
                _ => Err(EncodeError::mismatch("UTF8String")),
            },
            Node::Time => match value {
                StructuredValue::Leaf(Leaf::Time(text)) => {
                    encode_known_string(w, text, &Size::UNCONSTRAINED, &time_charset())
                }
                _ => Err(EncodeError::mismatch("time")),
            },
            Node::Sequence {
                root,
                extensible,
                extensions,
            } => self.encode_sequence(value, root, *extensible, extensions, w),
            Node::SequenceOf { item, size } => {
                let items = value.as_list().ok_or_else(|| EncodeError::mismatch("SEQUENCE OF"))?;
                write_length(w, items.len() as u64, size)?;
                for (i, element) in items.iter().enumerate() {
                    self.encode_node(*item, element, w)
                        .map_err(|e| e.within(&format!("[{i}]")))?;
                }
                Ok(())
            }
            Node::Choice {
                root,
                extensible,
                extensions,
            } => {
                let (tag, payload) = match value {
                    StructuredValue::Choice(tag, payload) => (tag, payload.as_ref()),
                    _ => return Err(EncodeError::mismatch("CHOICE")),
                };
                if let Some(idx) = root.iter().position(|alt| &alt.name == tag) {
                    if *extensible {
                        w.write_bit(false);
                    }
                    write_constrained(w, idx as u128, root.len() as u128);
                    return self
                        .encode_node(root[idx].ty, payload, w)
                        .map_err(|e| e.within(tag));
                }
                if !*extensible {
                    return Err(EncodeError::constraint(format!("unknown alternative '{tag}'")));
                }
                if let Some(idx) = extensions.iter().position(|alt| &alt.name == tag) {
                    w.write_bit(true);
                    write_normally_small(w, idx as u64)?;
                    let ty = extensions[idx].ty;
                    return write_open_type(w, |inner| self.encode_node(ty, payload, inner))
                        .map_err(|e| e.within(tag));
                }
                match (parse_extension_name(tag), payload) {
                    (Some(idx), StructuredValue::Leaf(Leaf::Opaque(bytes))) => {
                        w.write_bit(true);
                        write_normally_small(w, idx as u64)?;
                        write_general_length(w, bytes.len() as u64)?;
                        w.write_bytes(bytes);
                        Ok(())
                    }
                    _ => Err(EncodeError::constraint(format!("unknown alternative '{tag}'"))),
                }
            }
        }
    }

    fn encode_sequence(
        &self,
        value: &StructuredValue,
        root: &[Field],
        extensible: bool,
        extensions: &[Field],
        w: &mut BitWriter,
    ) -> Result<(), EncodeError> {
        let fields = match value {
            StructuredValue::Sequence(fields) => fields,
            _ => return Err(EncodeError::mismatch("SEQUENCE")),
        };
        let get = |name: &str| fields.iter().find(|(k, _)| k == name).map(|(_, v)| v);

        if let Some((name, _)) = fields.iter().find(|(k, _)| {
            !root.iter().any(|f| &f.name == k)
                && !extensions.iter().any(|f| &f.name == k)
                && parse_extension_name(k).is_none()
        }) {
            return Err(EncodeError::constraint(format!("unknown field '{name}'")));
        }

        // Extension additions present, by index.
        let mut additions: Vec<(usize, &StructuredValue, Option<TypeId>)> = Vec::new();
        for (idx, f) in extensions.iter().enumerate() {
            if let Some(v) = get(&f.name) {
                additions.push((idx, v, Some(f.ty)));
            }
        }
        for (k, v) in fields {
            if let Some(idx) = parse_extension_name(k) {
                if idx < extensions.len() {
                    return Err(EncodeError::constraint(format!(
                        "'{k}' collides with known extension '{}'",
                        extensions[idx].name
                    )));
                }
                additions.push((idx, v, None));
            }
        }
        additions.sort_by_key(|(idx, _, _)| *idx);

        if !extensible && !additions.is_empty() {
            return Err(EncodeError::constraint("extension fields on a non-extensible sequence"));
        }
        if extensible {
            w.write_bit(!additions.is_empty());
        }

        for f in root.iter().filter(|f| f.optional) {
            w.write_bit(get(&f.name).is_some());
        }
        for f in root {
            match get(&f.name) {
                Some(v) => self.encode_node(f.ty, v, w).map_err(|e| e.within(&f.name))?,
                None if f.optional => {}
                None => {
                    return Err(EncodeError::constraint(format!(
                        "missing mandatory field '{}'",
                        f.name
                    )))
                }
            }
        }

        if additions.is_empty() {
            return Ok(());
        }
        let known = if additions.iter().any(|(idx, _, _)| *idx < extensions.len()) {
            extensions.len()
        } else {
            0
        };
        let count = additions
            .last()
            .map_or(0, |(idx, _, _)| idx + 1)
            .max(known);
        // Normally small length of the presence bitmap.
        if count <= 64 {
            w.write_bit(false);
            w.write_bits(count as u64 - 1, 6);
        } else {
            w.write_bit(true);
            write_general_length(w, count as u64)?;
        }
        for idx in 0..count {
            w.write_bit(additions.iter().any(|(i, _, _)| *i == idx));
        }
        for (idx, v, ty) in additions {
            match ty {
                Some(ty) => {
                    let name = &extensions[idx].name;
                    write_open_type(w, |inner| self.encode_node(ty, v, inner))
                        .map_err(|e| e.within(name))?;
                }
                None => match v {
                    StructuredValue::Leaf(Leaf::Opaque(bytes)) => {
                        write_general_length(w, bytes.len() as u64)?;
                        w.write_bytes(bytes);
                    }
                    _ => {
                        return Err(EncodeError::mismatch("opaque extension contents")
                            .within(&extension_name(idx)))
                    }
                },
            }
        }
        Ok(())
    }
}

fn encode_integer(
    w: &mut BitWriter,
    v: i64,
    min: Option<i64>,
    max: Option<i64>,
    extensible: bool,
) -> Result<(), EncodeError> {
    let in_root = min.map_or(true, |m| v >= m) && max.map_or(true, |m| v <= m);
    if extensible {
        w.write_bit(!in_root);
        if !in_root {
            let octets = minimal_signed(v);
            write_general_length(w, octets.len() as u64)?;
            w.write_bytes(&octets);
            return Ok(());
        }
    } else if !in_root {
        return Err(EncodeError::constraint(format!(
            "{v} outside {}..{}",
            min.map_or("MIN".to_string(), |m| m.to_string()),
            max.map_or("MAX".to_string(), |m| m.to_string())
        )));
    }
    match (min, max) {
        (Some(lo), Some(hi)) => {
            let range = (i128::from(hi) - i128::from(lo) + 1) as u128;
            write_constrained(w, (i128::from(v) - i128::from(lo)) as u128, range);
        }
        (Some(lo), None) => {
            let offset = (i128::from(v) - i128::from(lo)) as u64;
            let octets = minimal_unsigned(offset);
            write_general_length(w, octets.len() as u64)?;
            w.write_bytes(&octets);
        }
        _ => {
            let octets = minimal_signed(v);
            write_general_length(w, octets.len() as u64)?;
            w.write_bytes(&octets);
        }
    }
    Ok(())
}

fn encode_known_string(
    w: &mut BitWriter,
    text: &str,
    size: &Size,
    charset: &Charset,
) -> Result<(), EncodeError> {
    let chars: Vec<char> = text.chars().collect();
    if let Some(bad) = chars.iter().find(|c| !charset.permitted.contains(c)) {
        return Err(EncodeError::constraint(format!("character {bad:?} not permitted")));
    }
    write_length(w, chars.len() as u64, size)?;
    for c in chars {
        let code = match &charset.table {
            Some(table) => table.iter().position(|t| *t == c).unwrap_or(0) as u64,
            None => c as u64,
        };
        w.write_bits(code, charset.bits);
    }
    Ok(())
}

fn time_charset() -> Charset {
    Charset {
        bits: 7,
        table: None,
        permitted: (32u8..=126).map(char::from).collect(),
    }
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

impl Schema {
    pub(crate) fn decode_node(
        &self,
        id: TypeId,
        r: &mut BitReader<'_>,
    ) -> Result<StructuredValue, DecodeError> {
        let value = match self.node(id) {
            Node::Pending | Node::Alias(_) => {
                return Err(DecodeError::unsupported("type was never compiled"))
            }
            Node::Null => StructuredValue::Leaf(Leaf::Null),
            Node::Boolean => StructuredValue::Leaf(Leaf::Boolean(r.read_bit()?)),
            Node::Integer {
                min,
                max,
                extensible,
            } => StructuredValue::Leaf(Leaf::Integer(decode_integer(r, *min, *max, *extensible)?)),
            Node::Enumerated {
                root,
                extensible,
                extensions,
            } => {
                let name = if *extensible && r.read_bit()? {
                    let idx = read_normally_small(r)? as usize;
                    extensions
                        .get(idx)
                        .cloned()
                        .unwrap_or_else(|| extension_name(idx))
                } else {
                    let idx = read_constrained(r, root.len() as u128)? as usize;
                    root[idx].clone()
                };
                StructuredValue::Leaf(Leaf::Enumerated(name))
            }
            Node::OctetString(size) => {
                let len = read_length(r, size)? as usize;
                StructuredValue::Leaf(Leaf::Bytes(r.read_bytes(len)?))
            }
            Node::BitString(size) => {
                let len = read_length(r, size)? as usize;
                StructuredValue::Leaf(Leaf::Bits {
                    data: r.read_bit_slice(len)?,
                    len,
                })
            }
            Node::KnownString { size, charset } => {
                StructuredValue::Leaf(Leaf::Text(decode_known_string(r, size, charset)?))
            }
            Node::Utf8String => {
                let len = read_general_length(r)? as usize;
                let bytes = r.read_bytes(len)?;
                let text = String::from_utf8(bytes)
                    .map_err(|_| DecodeError::invalid("UTF8String is not valid UTF-8"))?;
                StructuredValue::Leaf(Leaf::Text(text))
            }
            Node::Time => StructuredValue::Leaf(Leaf::Time(decode_known_string(
                r,
                &Size::UNCONSTRAINED,
                &time_charset(),
            )?)),
            Node::Sequence {
                root,
                extensible,
                extensions,
            } => self.decode_sequence(r, root, *extensible, extensions)?,
            Node::SequenceOf { item, size } => {
                let count = read_length(r, size)? as usize;
                let mut items = Vec::with_capacity(count.min(1024));
                for i in 0..count {
                    items.push(
                        self.decode_node(*item, r)
                            .map_err(|e| e.within(&format!("[{i}]")))?,
                    );
                }
                StructuredValue::List(items)
            }
            Node::Choice {
                root,
                extensible,
                extensions,
            } => {
                if *extensible && r.read_bit()? {
                    let idx = read_normally_small(r)? as usize;
                    let bytes = read_open_type(r)?;
                    match extensions.get(idx) {
                        Some(alt) => {
                            let payload = self
                                .decode_open(alt.ty, &bytes)
                                .map_err(|e| e.within(&alt.name))?;
                            StructuredValue::choice(alt.name.clone(), payload)
                        }
                        None => StructuredValue::choice(
                            extension_name(idx),
                            StructuredValue::Leaf(Leaf::Opaque(bytes)),
                        ),
                    }
                } else {
                    let idx = read_constrained(r, root.len() as u128)? as usize;
                    let alt = &root[idx];
                    let payload = self
                        .decode_node(alt.ty, r)
                        .map_err(|e| e.within(&alt.name))?;
                    StructuredValue::choice(alt.name.clone(), payload)
                }
            }
        };
        Ok(value)
    }

    /// Decode the contents of an open type. The contents must fill the
    /// octets up to the final padding bits.
    fn decode_open(&self, id: TypeId, bytes: &[u8]) -> Result<StructuredValue, DecodeError> {
        let mut r = BitReader::new(bytes);
        let value = self.decode_node(id, &mut r)?;
        if r.remaining() >= 8 {
            return Err(DecodeError::invalid(format!(
                "{} unused bits in open type",
                r.remaining()
            )));
        }
        Ok(value)
    }

    fn decode_sequence(
        &self,
        r: &mut BitReader<'_>,
        root: &[Field],
        extensible: bool,
        extensions: &[Field],
    ) -> Result<StructuredValue, DecodeError> {
        let has_additions = extensible && r.read_bit()?;

        let mut present = Vec::with_capacity(root.len());
        for f in root {
            present.push(!f.optional || r.read_bit()?);
        }

        let mut fields = Vec::with_capacity(root.len());
        for (f, is_present) in root.iter().zip(present) {
            if is_present {
                let v = self.decode_node(f.ty, r).map_err(|e| e.within(&f.name))?;
                fields.push((f.name.clone(), v));
            }
        }

        if has_additions {
            let count = if r.read_bit()? {
                read_general_length(r)? as usize
            } else {
                r.read_bits(6)? as usize + 1
            };
            let mut bitmap = Vec::with_capacity(count);
            for _ in 0..count {
                bitmap.push(r.read_bit()?);
            }
            for (idx, is_present) in bitmap.into_iter().enumerate() {
                if !is_present {
                    continue;
                }
                let bytes = read_open_type(r)?;
                match extensions.get(idx) {
                    Some(f) => {
                        let v = self
                            .decode_open(f.ty, &bytes)
                            .map_err(|e| e.within(&f.name))?;
                        fields.push((f.name.clone(), v));
                    }
                    None => fields.push((
                        extension_name(idx),
                        StructuredValue::Leaf(Leaf::Opaque(bytes)),
                    )),
                }
            }
        }

        Ok(StructuredValue::Sequence(fields))
    }
}

fn decode_integer(
    r: &mut BitReader<'_>,
    min: Option<i64>,
    max: Option<i64>,
    extensible: bool,
) -> Result<i64, DecodeError> {
    let unconstrained = |r: &mut BitReader<'_>| -> Result<i64, DecodeError> {
        let len = read_general_length(r)? as usize;
        if len == 0 || len > 8 {
            return Err(DecodeError::invalid(format!("integer of {len} octets")));
        }
        Ok(from_signed(&r.read_bytes(len)?))
    };

    if extensible && r.read_bit()? {
        return unconstrained(r);
    }
    match (min, max) {
        (Some(lo), Some(hi)) => {
            let range = (i128::from(hi) - i128::from(lo) + 1) as u128;
            let offset = read_constrained(r, range)?;
            Ok((i128::from(lo) + offset as i128) as i64)
        }
        (Some(lo), None) => {
            let len = read_general_length(r)? as usize;
            if len == 0 || len > 8 {
                return Err(DecodeError::invalid(format!("integer of {len} octets")));
            }
            let offset = from_unsigned(&r.read_bytes(len)?);
            i64::try_from(i128::from(lo) + i128::from(offset))
                .map_err(|_| DecodeError::invalid("integer does not fit in 64 bits"))
        }
        _ => unconstrained(r),
    }
}

fn decode_known_string(
    r: &mut BitReader<'_>,
    size: &Size,
    charset: &Charset,
) -> Result<String, DecodeError> {
    let len = read_length(r, size)? as usize;
    let mut text = String::with_capacity(len.min(1024));
    for _ in 0..len {
        let code = r.read_bits(charset.bits)?;
        let c = match &charset.table {
            Some(table) => *table
                .get(code as usize)
                .ok_or_else(|| DecodeError::invalid(format!("character index {code} out of range")))?,
            None => char::from_u32(code as u32)
                .filter(|c| charset.permitted.contains(c))
                .ok_or_else(|| DecodeError::invalid(format!("character code {code} not permitted")))?,
        };
        text.push(c);
    }
    Ok(text)
}
