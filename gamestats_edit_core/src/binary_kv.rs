use std::fmt;

use thiserror::Error;

// Tag bytes of the binary key/value schema format. A node is a tag byte
// followed by a null-terminated UTF-8 name and either a scalar payload or a
// nested child list. 0x08 closes the current child list and is the only way
// nesting terminates.
const TAG_NESTED: u8 = 0x00;
const TAG_STRING: u8 = 0x01;
const TAG_INT32: u8 = 0x02;
const TAG_FLOAT32: u8 = 0x03;
const TAG_POINTER: u8 = 0x04;
const TAG_WIDE_STRING: u8 = 0x05;
const TAG_COLOR: u8 = 0x06;
const TAG_UINT64: u8 = 0x07;
const TAG_END: u8 = 0x08;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("schema stream truncated at offset {offset}")]
    Truncated { offset: usize },
    #[error("unknown type tag {tag:#04x} at offset {offset}")]
    UnknownTag { tag: u8, offset: usize },
    #[error("node name starting at offset {offset} is not valid UTF-8")]
    InvalidName { offset: usize },
    #[error("string value starting at offset {offset} is not valid UTF-8")]
    InvalidString { offset: usize },
    #[error("wide string value starting at offset {offset} is not valid UTF-16")]
    InvalidWideString { offset: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KvKind {
    Nested,
    String,
    Int32,
    Float32,
    Pointer,
    WideString,
    Color,
    UInt64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum KvValue {
    String(String),
    Int32(i32),
    Float32(f32),
    Pointer(i32),
    WideString(String),
    Color(i32),
    UInt64(u64),
}

impl fmt::Display for KvValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KvValue::String(text) | KvValue::WideString(text) => write!(f, "{text}"),
            KvValue::Int32(value) | KvValue::Pointer(value) | KvValue::Color(value) => {
                write!(f, "{value}")
            }
            KvValue::Float32(value) => write!(f, "{value}"),
            KvValue::UInt64(value) => write!(f, "{value}"),
        }
    }
}

/// One node of a decoded schema tree. Exactly one of `value`/`children` is
/// populated: scalars carry a value and no children, nested nodes the reverse.
#[derive(Debug, Clone, PartialEq)]
pub struct KvNode {
    pub name: String,
    pub kind: KvKind,
    pub value: Option<KvValue>,
    pub children: Vec<KvNode>,
}

impl KvNode {
    fn nested(name: String, children: Vec<KvNode>) -> Self {
        Self {
            name,
            kind: KvKind::Nested,
            value: None,
            children,
        }
    }

    fn scalar(name: String, kind: KvKind, value: KvValue) -> Self {
        Self {
            name,
            kind,
            value: Some(value),
            children: Vec::new(),
        }
    }

    /// Case-insensitive lookup among direct children, first match wins.
    /// Duplicate sibling names are a schema anomaly, not a decode error.
    pub fn child(&self, name: &str) -> Option<&KvNode> {
        self.children
            .iter()
            .find(|child| child.name.eq_ignore_ascii_case(name))
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            Some(KvValue::String(text)) | Some(KvValue::WideString(text)) => Some(text),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match &self.value {
            Some(KvValue::Int32(value))
            | Some(KvValue::Pointer(value))
            | Some(KvValue::Color(value)) => Some(*value),
            Some(KvValue::Float32(value)) => Some(*value as i32),
            Some(KvValue::UInt64(value)) => i32::try_from(*value).ok(),
            Some(KvValue::String(text)) | Some(KvValue::WideString(text)) => {
                text.trim().parse().ok()
            }
            None => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match &self.value {
            Some(KvValue::Float32(value)) => Some(*value),
            Some(KvValue::Int32(value))
            | Some(KvValue::Pointer(value))
            | Some(KvValue::Color(value)) => Some(*value as f32),
            Some(KvValue::UInt64(value)) => Some(*value as f32),
            Some(KvValue::String(text)) | Some(KvValue::WideString(text)) => {
                text.trim().parse().ok()
            }
            None => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.as_i32().map(|value| value != 0)
    }

    /// Renders any scalar payload as text. Nested nodes have none.
    pub fn scalar_text(&self) -> Option<String> {
        self.value.as_ref().map(|value| value.to_string())
    }

    /// Depth-first walk yielding (name, kind, value) per node, children in
    /// stream order.
    pub fn walk<'a>(&'a self, out: &mut Vec<(&'a str, KvKind, Option<&'a KvValue>)>) {
        out.push((self.name.as_str(), self.kind, self.value.as_ref()));
        for child in &self.children {
            child.walk(out);
        }
    }
}

struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn read_u8(&mut self) -> Result<u8, DecodeError> {
        let byte = *self
            .data
            .get(self.pos)
            .ok_or(DecodeError::Truncated { offset: self.pos })?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_exact(&mut self, count: usize) -> Result<&'a [u8], DecodeError> {
        let end = self
            .pos
            .checked_add(count)
            .filter(|end| *end <= self.data.len())
            .ok_or(DecodeError::Truncated { offset: self.pos })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_raw_cstring(&mut self) -> Result<(&'a [u8], usize), DecodeError> {
        let start = self.pos;
        let terminator = self.data[self.pos..]
            .iter()
            .position(|byte| *byte == 0)
            .ok_or(DecodeError::Truncated { offset: start })?;
        let raw = &self.data[start..start + terminator];
        self.pos = start + terminator + 1;
        Ok((raw, start))
    }

    fn read_name(&mut self) -> Result<String, DecodeError> {
        let (raw, offset) = self.read_raw_cstring()?;
        std::str::from_utf8(raw)
            .map(str::to_string)
            .map_err(|_| DecodeError::InvalidName { offset })
    }

    fn read_string(&mut self) -> Result<String, DecodeError> {
        let (raw, offset) = self.read_raw_cstring()?;
        std::str::from_utf8(raw)
            .map(str::to_string)
            .map_err(|_| DecodeError::InvalidString { offset })
    }

    fn read_wide_cstring(&mut self) -> Result<String, DecodeError> {
        let start = self.pos;
        let mut units = Vec::new();
        loop {
            let bytes = self.read_exact(2)?;
            let unit = u16::from_le_bytes([bytes[0], bytes[1]]);
            if unit == 0 {
                break;
            }
            units.push(unit);
        }
        String::from_utf16(&units).map_err(|_| DecodeError::InvalidWideString { offset: start })
    }

    fn read_i32(&mut self) -> Result<i32, DecodeError> {
        let bytes = self.read_exact(4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_f32(&mut self) -> Result<f32, DecodeError> {
        let bytes = self.read_exact(4)?;
        Ok(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_u64(&mut self) -> Result<u64, DecodeError> {
        let bytes = self.read_exact(8)?;
        let mut raw = [0_u8; 8];
        raw.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(raw))
    }
}

/// Decodes a full schema stream into an implicit nested root. Any failure
/// aborts the whole parse; no partial tree is ever returned.
pub fn decode(data: &[u8]) -> Result<KvNode, DecodeError> {
    let mut reader = ByteReader::new(data);
    let children = read_children(&mut reader)?;
    Ok(KvNode::nested(String::new(), children))
}

fn read_children(reader: &mut ByteReader<'_>) -> Result<Vec<KvNode>, DecodeError> {
    let mut children = Vec::new();
    loop {
        let tag_offset = reader.pos;
        let tag = reader.read_u8()?;
        if tag == TAG_END {
            return Ok(children);
        }
        if tag > TAG_END {
            return Err(DecodeError::UnknownTag {
                tag,
                offset: tag_offset,
            });
        }

        let name = reader.read_name()?;

        let node = match tag {
            TAG_NESTED => KvNode::nested(name, read_children(reader)?),
            TAG_STRING => {
                let text = reader.read_string()?;
                KvNode::scalar(name, KvKind::String, KvValue::String(text))
            }
            TAG_INT32 => {
                let value = reader.read_i32()?;
                KvNode::scalar(name, KvKind::Int32, KvValue::Int32(value))
            }
            TAG_FLOAT32 => {
                let value = reader.read_f32()?;
                KvNode::scalar(name, KvKind::Float32, KvValue::Float32(value))
            }
            TAG_POINTER => {
                let value = reader.read_i32()?;
                KvNode::scalar(name, KvKind::Pointer, KvValue::Pointer(value))
            }
            // Defined by the format but never observed in shipped schemas;
            // decoded anyway for forward compatibility.
            TAG_WIDE_STRING => {
                let text = reader.read_wide_cstring()?;
                KvNode::scalar(name, KvKind::WideString, KvValue::WideString(text))
            }
            TAG_COLOR => {
                let value = reader.read_i32()?;
                KvNode::scalar(name, KvKind::Color, KvValue::Color(value))
            }
            TAG_UINT64 => {
                let value = reader.read_u64()?;
                KvNode::scalar(name, KvKind::UInt64, KvValue::UInt64(value))
            }
            _ => unreachable!("tags above TAG_END rejected earlier"),
        };
        children.push(node);
    }
}

#[cfg(test)]
pub(crate) mod stream {
    //! Test-side builder that writes the same byte layout `decode` reads.

    pub struct StreamBuilder {
        bytes: Vec<u8>,
    }

    impl StreamBuilder {
        pub fn new() -> Self {
            Self { bytes: Vec::new() }
        }

        fn name(&mut self, name: &str) {
            self.bytes.extend_from_slice(name.as_bytes());
            self.bytes.push(0);
        }

        pub fn begin_nested(mut self, name: &str) -> Self {
            self.bytes.push(super::TAG_NESTED);
            self.name(name);
            self
        }

        pub fn end(mut self) -> Self {
            self.bytes.push(super::TAG_END);
            self
        }

        pub fn string(mut self, name: &str, value: &str) -> Self {
            self.bytes.push(super::TAG_STRING);
            self.name(name);
            self.bytes.extend_from_slice(value.as_bytes());
            self.bytes.push(0);
            self
        }

        pub fn int32(mut self, name: &str, value: i32) -> Self {
            self.bytes.push(super::TAG_INT32);
            self.name(name);
            self.bytes.extend_from_slice(&value.to_le_bytes());
            self
        }

        pub fn float32(mut self, name: &str, value: f32) -> Self {
            self.bytes.push(super::TAG_FLOAT32);
            self.name(name);
            self.bytes.extend_from_slice(&value.to_le_bytes());
            self
        }

        pub fn uint64(mut self, name: &str, value: u64) -> Self {
            self.bytes.push(super::TAG_UINT64);
            self.name(name);
            self.bytes.extend_from_slice(&value.to_le_bytes());
            self
        }

        pub fn wide_string(mut self, name: &str, value: &str) -> Self {
            self.bytes.push(super::TAG_WIDE_STRING);
            self.name(name);
            for unit in value.encode_utf16() {
                self.bytes.extend_from_slice(&unit.to_le_bytes());
            }
            self.bytes.extend_from_slice(&[0, 0]);
            self
        }

        pub fn raw(mut self, bytes: &[u8]) -> Self {
            self.bytes.extend_from_slice(bytes);
            self
        }

        pub fn finish(self) -> Vec<u8> {
            self.bytes
        }
    }
}
