use std::fmt;

use serde::{Deserialize, Serialize};

use crate::span::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId {
    pub number: u32,
    pub generation: u16,
}

impl ObjectId {
    pub const fn new(number: u32, generation: u16) -> Self {
        Self { number, generation }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.number, self.generation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PdfNumber {
    Int(i64),
    Real(f64),
}

impl PdfNumber {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PdfNumber::Int(i) => Some(*i),
            PdfNumber::Real(_) => None,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match self {
            PdfNumber::Int(i) => *i as f64,
            PdfNumber::Real(f) => *f,
        }
    }
}

/// A name as written (`raw`, without the leading slash) and after `#xx`
/// unescaping (`decoded`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfName {
    pub raw: Vec<u8>,
    pub decoded: Vec<u8>,
}

impl PdfName {
    pub fn from_decoded(decoded: &[u8]) -> Self {
        Self { raw: decoded.to_vec(), decoded: decoded.to_vec() }
    }

    /// Exact comparison of the decoded bytes; names are case-sensitive.
    pub fn is(&self, name: &[u8]) -> bool {
        self.decoded == name
    }

    pub fn escape_count(&self) -> usize {
        self.raw.iter().filter(|b| **b == b'#').count()
    }

    pub fn is_escaped(&self) -> bool {
        self.raw != self.decoded
    }

    pub fn lossy(&self) -> String {
        String::from_utf8_lossy(&self.decoded).into_owned()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfString {
    pub raw: Vec<u8>,
    pub decoded: Vec<u8>,
    pub hex: bool,
    /// Backslash escapes in a literal string.
    pub escapes: usize,
}

impl PdfString {
    pub fn lossy(&self) -> String {
        decode_text(&self.decoded)
    }
}

/// UTF-16BE with BOM, otherwise Latin-1-ish lossy UTF-8.
pub fn decode_text(bytes: &[u8]) -> String {
    if bytes.len() >= 2 && bytes[0] == 0xfe && bytes[1] == 0xff {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    String::from_utf8_lossy(bytes).into_owned()
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PdfDict {
    pub entries: Vec<(PdfName, PdfObject)>,
}

impl PdfDict {
    /// First entry for `key`. Duplicate keys are kept in `entries` so that
    /// checks can see them.
    pub fn get(&self, key: &[u8]) -> Option<&PdfObject> {
        self.entries.iter().find(|(k, _)| k.is(key)).map(|(_, v)| v)
    }

    pub fn get_entry(&self, key: &[u8]) -> Option<(&PdfName, &PdfObject)> {
        self.entries.iter().find(|(k, _)| k.is(key)).map(|(k, v)| (k, v))
    }

    pub fn has(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    pub fn has_name(&self, key: &[u8], value: &[u8]) -> bool {
        self.entries.iter().any(|(k, v)| {
            k.is(key)
                && match v {
                    PdfObject::Name(n) => n.is(value),
                    _ => false,
                }
        })
    }

    pub fn name(&self, key: &[u8]) -> Option<&PdfName> {
        match self.get(key)? {
            PdfObject::Name(n) => Some(n),
            _ => None,
        }
    }

    pub fn int(&self, key: &[u8]) -> Option<i64> {
        self.get(key)?.as_int()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclaredLength {
    Direct(i64),
    Indirect(ObjectId),
    Missing,
    Invalid,
}

/// Stream dictionary plus the location of its raw bytes in the file.
#[derive(Debug, Clone, PartialEq)]
pub struct PdfStream {
    pub dict: PdfDict,
    pub data: Span,
    pub declared_length: DeclaredLength,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PdfObject {
    Null,
    Boolean(bool),
    Number(PdfNumber),
    String(PdfString),
    Name(PdfName),
    Array(Vec<PdfObject>),
    Dictionary(PdfDict),
    Reference(ObjectId),
    Stream(PdfStream),
}

impl PdfObject {
    pub fn type_name(&self) -> &'static str {
        match self {
            PdfObject::Null => "null",
            PdfObject::Boolean(_) => "boolean",
            PdfObject::Number(_) => "number",
            PdfObject::String(_) => "string",
            PdfObject::Name(_) => "name",
            PdfObject::Array(_) => "array",
            PdfObject::Dictionary(_) => "dictionary",
            PdfObject::Reference(_) => "reference",
            PdfObject::Stream(_) => "stream",
        }
    }

    /// The dictionary of a dictionary or stream object.
    pub fn as_dict(&self) -> Option<&PdfDict> {
        match self {
            PdfObject::Dictionary(d) => Some(d),
            PdfObject::Stream(s) => Some(&s.dict),
            _ => None,
        }
    }

    pub fn as_stream(&self) -> Option<&PdfStream> {
        match self {
            PdfObject::Stream(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_name(&self) -> Option<&PdfName> {
        match self {
            PdfObject::Name(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&PdfString> {
        match self {
            PdfObject::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            PdfObject::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<ObjectId> {
        match self {
            PdfObject::Reference(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[PdfObject]> {
        match self {
            PdfObject::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Container nesting depth: 0 for scalars, 1 for a flat array.
    pub fn depth(&self) -> usize {
        let mut max = 0usize;
        let mut stack = vec![(self, 0usize)];
        while let Some((obj, depth)) = stack.pop() {
            match obj {
                PdfObject::Array(items) => {
                    max = max.max(depth + 1);
                    stack.extend(items.iter().map(|o| (o, depth + 1)));
                }
                PdfObject::Dictionary(d) => {
                    max = max.max(depth + 1);
                    stack.extend(d.entries.iter().map(|(_, o)| (o, depth + 1)));
                }
                PdfObject::Stream(s) => {
                    max = max.max(depth + 1);
                    stack.extend(s.dict.entries.iter().map(|(_, o)| (o, depth + 1)));
                }
                _ => {}
            }
        }
        max
    }

    /// Depth-first visit of this object and every nested value, without
    /// recursion. Dictionary values are visited with their key.
    pub fn walk<'o, F>(&'o self, mut f: F)
    where
        F: FnMut(Option<&'o PdfName>, &'o PdfObject),
    {
        let mut stack: Vec<(Option<&'o PdfName>, &'o PdfObject)> = vec![(None, self)];
        while let Some((key, obj)) = stack.pop() {
            f(key, obj);
            match obj {
                PdfObject::Array(items) => {
                    stack.extend(items.iter().rev().map(|o| (None, o)));
                }
                PdfObject::Dictionary(d) => {
                    stack.extend(d.entries.iter().rev().map(|(k, o)| (Some(k), o)));
                }
                PdfObject::Stream(s) => {
                    stack.extend(s.dict.entries.iter().rev().map(|(k, o)| (Some(k), o)));
                }
                _ => {}
            }
        }
    }

    /// Every dictionary reachable inside this object, including itself.
    pub fn dicts(&self) -> Vec<&PdfDict> {
        let mut out = Vec::new();
        self.walk(|_, obj| {
            if let Some(d) = obj.as_dict() {
                out.push(d);
            }
        });
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> PdfName {
        PdfName::from_decoded(s.as_bytes())
    }

    #[test]
    fn depth_counts_container_nesting() {
        let inner = PdfObject::Array(vec![PdfObject::Null]);
        let dict = PdfObject::Dictionary(PdfDict { entries: vec![(name("K"), inner)] });
        assert_eq!(PdfObject::Null.depth(), 0);
        assert_eq!(dict.depth(), 2);
    }

    #[test]
    fn dict_lookup_is_case_sensitive() {
        let dict = PdfDict {
            entries: vec![(name("S"), PdfObject::Name(name("javascript")))],
        };
        assert!(!dict.has_name(b"S", b"JavaScript"));
        assert!(dict.has_name(b"S", b"javascript"));
        assert!(dict.get(b"s").is_none());
        assert!(!name("javascript").is(b"JavaScript"));
    }

    #[test]
    fn walk_visits_keys_in_order() {
        let dict = PdfObject::Dictionary(PdfDict {
            entries: vec![
                (name("A"), PdfObject::Boolean(true)),
                (name("B"), PdfObject::Reference(ObjectId::new(3, 0))),
            ],
        });
        let mut keys = Vec::new();
        dict.walk(|k, _| {
            if let Some(k) = k {
                keys.push(k.lossy());
            }
        });
        assert_eq!(keys, vec!["A", "B"]);
    }

    #[test]
    fn utf16_text_is_decoded() {
        assert_eq!(decode_text(&[0xfe, 0xff, 0x00, 0x41]), "A");
    }
}
