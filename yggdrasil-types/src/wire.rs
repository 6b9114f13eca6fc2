//! Wire encoding helpers for associative containers.
//!
//! JSON cannot natively carry a mapping with non-string keys, and object
//! keys lose the ordering guarantees clients rely on. Mappings therefore
//! travel as arrays of `[key, value]` pairs and are rebuilt into `BTreeMap`
//! on receive. Sets (`BTreeSet`) already serialise as plain arrays and need
//! no helper.

/// Serde `with`-module: `BTreeMap<K, V>` as an array of `[key, value]` pairs.
pub mod map_as_pairs {
    use std::collections::BTreeMap;

    use serde::de::{Deserialize, Deserializer};
    use serde::ser::{Serialize, Serializer};

    pub fn serialize<K, V, S>(map: &BTreeMap<K, V>, serializer: S) -> Result<S::Ok, S::Error>
    where
        K: Serialize + Ord,
        V: Serialize,
        S: Serializer,
    {
        serializer.collect_seq(map.iter())
    }

    pub fn deserialize<'de, K, V, D>(deserializer: D) -> Result<BTreeMap<K, V>, D::Error>
    where
        K: Deserialize<'de> + Ord,
        V: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        let pairs = Vec::<(K, V)>::deserialize(deserializer)?;
        Ok(pairs.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Holder {
        #[serde(with = "super::map_as_pairs")]
        inner: BTreeMap<String, u32>,
    }

    #[test]
    fn map_serialises_as_pair_array() {
        let mut inner = BTreeMap::new();
        inner.insert("b".to_string(), 2);
        inner.insert("a".to_string(), 1);
        let json = serde_json::to_string(&Holder { inner }).unwrap();
        assert_eq!(json, r#"{"inner":[["a",1],["b",2]]}"#);
    }

    #[test]
    fn pair_array_roundtrips() {
        let mut inner = BTreeMap::new();
        inner.insert("x".to_string(), 7);
        inner.insert("y".to_string(), 9);
        let holder = Holder { inner };
        let json = serde_json::to_string(&holder).unwrap();
        let back: Holder = serde_json::from_str(&json).unwrap();
        assert_eq!(back, holder);
    }

    #[test]
    fn empty_map_is_empty_array() {
        let holder = Holder {
            inner: BTreeMap::new(),
        };
        let json = serde_json::to_string(&holder).unwrap();
        assert_eq!(json, r#"{"inner":[]}"#);
        let back: Holder = serde_json::from_str(&json).unwrap();
        assert_eq!(back, holder);
    }
}
