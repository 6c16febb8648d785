//! Binding of flat property maps to typed configuration structs
//!
//! Keys are dotted paths (`push.address`, `certificate-dn`). Segments become
//! nested groups, `-` becomes `_`. Values stay strings until the target type
//! asks for something else: a `bool`, number or char field parses the string,
//! a sequence splits it on commas.

use serde::de::value::{Error, MapDeserializer, SeqDeserializer};
use serde::de::{DeserializeOwned, Deserializer, Error as _, IntoDeserializer, Unexpected, Visitor};
use serde::forward_to_deserialize_any;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Leaf(String),
    Group(BTreeMap<String, Node>),
}

fn insert_path(root: &mut BTreeMap<String, Node>, path: &[String], value: &str) -> Result<(), String> {
    match path {
        [] => Ok(()),
        [last] => match root.get(last) {
            Some(Node::Group(_)) => Err(format!("property '{}' is both a value and a group", last)),
            _ => {
                root.insert(last.clone(), Node::Leaf(value.to_string()));
                Ok(())
            }
        },
        [head, rest @ ..] => {
            let entry = root
                .entry(head.clone())
                .or_insert_with(|| Node::Group(BTreeMap::new()));
            match entry {
                Node::Group(child) => insert_path(child, rest, value),
                Node::Leaf(_) => Err(format!("property '{}' is both a value and a group", head)),
            }
        }
    }
}

/// Collect all properties below `prefix` into a tree of groups
fn property_tree(properties: &HashMap<String, String>, prefix: &str) -> Result<Node, String> {
    let mut root = BTreeMap::new();
    let mut keys: Vec<&String> = properties.keys().collect();
    keys.sort();

    for key in keys {
        let relative = if prefix.is_empty() {
            Some(key.as_str())
        } else {
            key.strip_prefix(prefix).and_then(|rest| rest.strip_prefix('.'))
        };
        let Some(relative) = relative else {
            continue;
        };

        let path: Vec<String> = relative
            .split('.')
            .filter(|s| !s.is_empty())
            .map(|s| s.replace('-', "_"))
            .collect();
        insert_path(&mut root, &path, &properties[key])?;
    }
    Ok(Node::Group(root))
}

/// Bind all properties below `prefix` to `T`
pub fn bind_properties<T: DeserializeOwned>(properties: &HashMap<String, String>, prefix: &str) -> Result<T, String> {
    let tree = property_tree(properties, prefix)?;
    T::deserialize(NodeDeserializer(tree)).map_err(|e| e.to_string())
}

struct NodeDeserializer(Node);

impl<'de> IntoDeserializer<'de, Error> for NodeDeserializer {
    type Deserializer = Self;

    fn into_deserializer(self) -> Self {
        self
    }
}

fn visit_group<'de, V: Visitor<'de>>(group: BTreeMap<String, Node>, visitor: V) -> Result<V::Value, Error> {
    let mut access: MapDeserializer<'de, _, Error> =
        MapDeserializer::new(group.into_iter().map(|(k, v)| (k, NodeDeserializer(v))));
    let value = visitor.visit_map(&mut access)?;
    access.end()?;
    Ok(value)
}

macro_rules! parse_leaf {
    ($($method:ident => $visit:ident: $ty:ty),* $(,)?) => {
        $(
            fn $method<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
                match self.0 {
                    Node::Leaf(s) => match s.trim().parse::<$ty>() {
                        Ok(parsed) => visitor.$visit(parsed),
                        Err(_) => Err(Error::invalid_value(Unexpected::Str(&s), &visitor)),
                    },
                    Node::Group(_) => Err(Error::invalid_type(Unexpected::Map, &visitor)),
                }
            }
        )*
    };
}

impl<'de> Deserializer<'de> for NodeDeserializer {
    type Error = Error;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        match self.0 {
            Node::Leaf(s) => visitor.visit_string(s),
            Node::Group(group) => visit_group(group, visitor),
        }
    }

    parse_leaf! {
        deserialize_bool => visit_bool: bool,
        deserialize_i8 => visit_i8: i8,
        deserialize_i16 => visit_i16: i16,
        deserialize_i32 => visit_i32: i32,
        deserialize_i64 => visit_i64: i64,
        deserialize_u8 => visit_u8: u8,
        deserialize_u16 => visit_u16: u16,
        deserialize_u32 => visit_u32: u32,
        deserialize_u64 => visit_u64: u64,
        deserialize_f32 => visit_f32: f32,
        deserialize_f64 => visit_f64: f64,
        deserialize_char => visit_char: char,
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        visitor.visit_some(self)
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(self, _name: &'static str, visitor: V) -> Result<V::Value, Error> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_seq<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        match self.0 {
            Node::Leaf(s) => {
                let items: Vec<NodeDeserializer> = s
                    .split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(|item| NodeDeserializer(Node::Leaf(item.to_string())))
                    .collect();
                let mut access: SeqDeserializer<_, Error> = SeqDeserializer::new(items.into_iter());
                let value = visitor.visit_seq(&mut access)?;
                access.end()?;
                Ok(value)
            }
            Node::Group(_) => Err(Error::invalid_type(Unexpected::Map, &visitor)),
        }
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Error> {
        match self.0 {
            Node::Leaf(s) => visitor.visit_enum(s.into_deserializer()),
            Node::Group(_) => Err(Error::invalid_type(Unexpected::Map, &visitor)),
        }
    }

    forward_to_deserialize_any! {
        i128 u128 str string bytes byte_buf unit unit_struct tuple tuple_struct map struct identifier ignored_any
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Push {
        address: String,
        #[serde(default)]
        timeout_secs: Option<u64>,
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct PartnerConfig {
        certificate_dn: Option<String>,
        push: Option<Push>,
        #[serde(default)]
        enabled: bool,
    }

    fn props(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_bind_nested_with_prefix() {
        let properties = props(&[
            ("backend.certificate-dn", "CN=partner1"),
            ("backend.push.address", "http://backend/push"),
            ("backend.push.timeout-secs", "30"),
            ("backend.enabled", "true"),
            ("other.key", "ignored"),
        ]);

        let config: PartnerConfig = bind_properties(&properties, "backend").unwrap();
        assert_eq!(config.certificate_dn.as_deref(), Some("CN=partner1"));
        assert_eq!(
            config.push,
            Some(Push {
                address: "http://backend/push".to_string(),
                timeout_secs: Some(30),
            })
        );
        assert!(config.enabled);
    }

    #[test]
    fn test_bind_without_prefix() {
        let properties = props(&[("certificate-dn", "CN=x")]);
        let config: PartnerConfig = bind_properties(&properties, "").unwrap();
        assert_eq!(config.certificate_dn.as_deref(), Some("CN=x"));
        assert!(config.push.is_none());
    }

    #[test]
    fn test_prefix_must_match_whole_segment() {
        let properties = props(&[("backendx.certificate-dn", "CN=x")]);
        let config: PartnerConfig = bind_properties(&properties, "backend").unwrap();
        assert!(config.certificate_dn.is_none());
    }

    #[test]
    fn test_conflicting_paths_fail() {
        let properties = props(&[("a.push", "x"), ("a.push.address", "y")]);
        assert!(property_tree(&properties, "a").is_err());
    }

    // ============== Typed Leaf Tests ==============

    #[derive(Debug, Deserialize, PartialEq)]
    struct Texts {
        certificate_dn: Option<String>,
        version: String,
        flag: String,
    }

    #[test]
    fn test_numeric_looking_strings_stay_strings() {
        let properties = props(&[("certificate-dn", "0042"), ("version", "1.0"), ("flag", "true")]);
        let texts: Texts = bind_properties(&properties, "").unwrap();
        assert_eq!(texts.certificate_dn.as_deref(), Some("0042"));
        assert_eq!(texts.version, "1.0");
        assert_eq!(texts.flag, "true");
    }

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(rename_all = "lowercase")]
    enum Mode {
        Push,
        Pull,
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Typed {
        name: crate::LinkPartnerName,
        mode: Mode,
        ratio: f64,
        #[serde(default)]
        ports: Vec<u16>,
    }

    #[test]
    fn test_newtypes_enums_and_lists() {
        let properties = props(&[("name", "true"), ("mode", "pull"), ("ratio", "0.5"), ("ports", "80, 443")]);
        let typed: Typed = bind_properties(&properties, "").unwrap();
        assert_eq!(typed.name, crate::LinkPartnerName::new("true"));
        assert_eq!(typed.mode, Mode::Pull);
        assert_eq!(typed.ratio, 0.5);
        assert_eq!(typed.ports, vec![80, 443]);
    }

    #[test]
    fn test_type_mismatch_fails() {
        let properties = props(&[("push.address", "http://x"), ("push.timeout-secs", "soon")]);
        assert!(bind_properties::<PartnerConfig>(&properties, "").is_err());
    }
}
