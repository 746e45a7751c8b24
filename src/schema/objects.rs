use std::fmt;

use serde::de::{self, DeserializeSeed, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeSeq, SerializeStruct};
use serde::{Deserialize, Serialize, Serializer};

use crate::types::Ref;

pub const TYPE_DIR_ENTRY: &str = "cas:DirEntry";
pub const TYPE_INLINE_LIST: &str = "cas:InlineList";
pub const TYPE_LIST: &str = "cas:List";

/// a registered schema object
///
/// serialization covers the payload only; the type tag is carried by the
/// codec framing (see [`super::encode`]).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Object {
    DirEntry(DirEntry),
    InlineList(InlineList),
    List(List),
}

impl Object {
    /// the registered tag for this object kind
    pub fn type_tag(&self) -> &'static str {
        match self {
            Object::DirEntry(_) => TYPE_DIR_ENTRY,
            Object::InlineList(_) => TYPE_INLINE_LIST,
            Object::List(_) => TYPE_LIST,
        }
    }

    /// refs this object points at, for walking the DAG
    ///
    /// zero refs are placeholders, not edges, and are skipped.
    pub fn references(&self) -> Vec<Ref> {
        match self {
            Object::DirEntry(e) => {
                if e.ref_.is_zero() {
                    vec![]
                } else {
                    vec![e.ref_]
                }
            }
            Object::InlineList(l) => l.items.iter().flat_map(|o| o.references()).collect(),
            Object::List(l) => l.items.iter().copied().filter(|r| !r.is_zero()).collect(),
        }
    }
}

impl Serialize for Object {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            Object::DirEntry(e) => e.serialize(s),
            Object::InlineList(l) => l.serialize(s),
            Object::List(l) => l.serialize(s),
        }
    }
}

/// one child in a directory listing
///
/// `count` is the total number of descendant entries including this one;
/// it is populated for single-page directories and undefined on paginated
/// interior nodes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    #[serde(rename = "ref")]
    pub ref_: Ref,
    pub size: u64,
    pub count: u64,
    pub name: String,
}

/// a page of same-typed objects stored inline
///
/// items carry no per-item framing; `elem` names the payload type of
/// every item, so decoding is seeded with it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InlineList {
    pub elem: String,
    pub items: Vec<Object>,
}

/// a page of refs to same-typed objects; interior Merkle-tree nodes
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct List {
    pub elem: String,
    #[serde(rename = "list")]
    pub items: Vec<Ref>,
}

impl Serialize for InlineList {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        let mut st = s.serialize_struct("InlineList", 2)?;
        st.serialize_field("elem", &self.elem)?;
        st.serialize_field("list", &Payloads(&self.items))?;
        st.end()
    }
}

/// serializes objects as bare payloads
struct Payloads<'a>(&'a [Object]);

impl Serialize for Payloads<'_> {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        let mut seq = s.serialize_seq(Some(self.0.len()))?;
        for obj in self.0 {
            seq.serialize_element(obj)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for InlineList {
    fn deserialize<D>(d: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct InlineListVisitor;

        impl<'de> Visitor<'de> for InlineListVisitor {
            type Value = InlineList;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a schema inline list")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut elem: Option<String> = None;
                let mut items: Option<Vec<Object>> = None;
                while let Some(key) = map.next_key::<String>()? {
                    match key.as_str() {
                        "elem" => elem = Some(map.next_value()?),
                        "list" => {
                            // items are bare payloads; their type comes
                            // from elem, which the canonical encoding
                            // always places first
                            let e = elem
                                .as_deref()
                                .ok_or_else(|| de::Error::custom("list field before elem"))?;
                            items = Some(map.next_value_seed(ObjectVecSeed(e))?);
                        }
                        _ => {
                            map.next_value::<IgnoredAny>()?;
                        }
                    }
                }
                Ok(InlineList {
                    elem: elem.ok_or_else(|| de::Error::missing_field("elem"))?,
                    items: items.ok_or_else(|| de::Error::missing_field("list"))?,
                })
            }
        }

        d.deserialize_struct("InlineList", &["elem", "list"], InlineListVisitor)
    }
}

struct ObjectVecSeed<'a>(&'a str);

impl<'de> DeserializeSeed<'de> for ObjectVecSeed<'_> {
    type Value = Vec<Object>;

    fn deserialize<D>(self, d: D) -> Result<Self::Value, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct SeqVisitor<'a>(&'a str);

        impl<'de> Visitor<'de> for SeqVisitor<'_> {
            type Value = Vec<Object>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a sequence of schema payloads")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
                while let Some(obj) = seq.next_element_seed(ObjectSeed(self.0))? {
                    items.push(obj);
                }
                Ok(items)
            }
        }

        d.deserialize_seq(SeqVisitor(self.0))
    }
}

struct ObjectSeed<'a>(&'a str);

impl<'de> DeserializeSeed<'de> for ObjectSeed<'_> {
    type Value = Object;

    fn deserialize<D>(self, d: D) -> Result<Self::Value, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        match self.0 {
            TYPE_DIR_ENTRY => DirEntry::deserialize(d).map(Object::DirEntry),
            TYPE_INLINE_LIST => InlineList::deserialize(d).map(Object::InlineList),
            TYPE_LIST => List::deserialize(d).map(Object::List),
            other => Err(de::Error::custom(format_args!(
                "unknown element type: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_tags() {
        let e = DirEntry {
            ref_: Ref::ZERO,
            size: 0,
            count: 0,
            name: String::new(),
        };
        assert_eq!(Object::DirEntry(e).type_tag(), TYPE_DIR_ENTRY);
        assert_eq!(
            Object::List(List {
                elem: TYPE_DIR_ENTRY.to_string(),
                items: vec![],
            })
            .type_tag(),
            TYPE_LIST
        );
    }

    #[test]
    fn test_nested_inline_list() {
        let inner = InlineList {
            elem: TYPE_DIR_ENTRY.to_string(),
            items: vec![Object::DirEntry(DirEntry {
                ref_: Ref::from_bytes([9; 32]),
                size: 1,
                count: 0,
                name: "n".to_string(),
            })],
        };
        let outer = InlineList {
            elem: TYPE_INLINE_LIST.to_string(),
            items: vec![Object::InlineList(inner)],
        };

        let mut buf = Vec::new();
        ciborium::into_writer(&outer, &mut buf).unwrap();
        let decoded: InlineList = ciborium::from_reader(&buf[..]).unwrap();
        assert_eq!(outer, decoded);
    }

    #[test]
    fn test_unknown_element_type_rejected() {
        let list = InlineList {
            elem: "cas:Bogus".to_string(),
            items: vec![],
        };
        let mut buf = Vec::new();
        ciborium::into_writer(&list, &mut buf).unwrap();

        // empty list decodes fine: no item ever consults the seed
        let decoded: InlineList = ciborium::from_reader(&buf[..]).unwrap();
        assert_eq!(decoded.elem, "cas:Bogus");

        // a populated list with an unknown elem must fail
        let bogus_payload = InlineList {
            elem: "cas:Bogus".to_string(),
            items: vec![Object::List(List {
                elem: TYPE_DIR_ENTRY.to_string(),
                items: vec![],
            })],
        };
        let mut buf = Vec::new();
        ciborium::into_writer(&bogus_payload, &mut buf).unwrap();
        assert!(ciborium::from_reader::<InlineList, _>(&buf[..]).is_err());
    }
}
