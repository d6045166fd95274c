//! Composite index keys
//!
//! ```text
//! [0]      kind tag          (IDX_QNAME)
//! [1..5]   collection id     u32 big-endian
//! [5]      name type         1 = element, 2 = attribute
//! [6..8]   namespace symbol  u16 big-endian
//! [8..10]  local symbol      u16 big-endian
//! [10..]   n-gram            UTF-8
//! ```
//!
//! Big-endian integers make byte order equal to numeric order, so keys sort
//! by collection, name type, namespace, local name and then n-gram bytes.
//! Every prefix of the layout is itself a scan prefix.

use crate::types::{CollectionId, NameType, QName, SymbolTable};
use crate::{Result, StorageError};
use std::fmt;

/// Kind tag of keys grouped by qualified name.
pub const IDX_QNAME: u8 = 0;

const COLLECTION_OFFSET: usize = 1;
const NAME_TYPE_OFFSET: usize = 5;
const NS_OFFSET: usize = 6;
const LOCAL_OFFSET: usize = 8;
const NGRAM_OFFSET: usize = 10;

/// Length of a collection-only prefix key.
pub const COLLECTION_KEY_LEN: usize = NAME_TYPE_OFFSET;
/// Length of a collection + qname prefix key.
pub const QNAME_KEY_LEN: usize = NGRAM_OFFSET;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NGramKey {
    data: Vec<u8>,
}

impl NGramKey {
    /// Prefix of every key of a collection.
    pub fn collection(collection_id: CollectionId) -> Self {
        let mut data = Vec::with_capacity(COLLECTION_KEY_LEN);
        data.push(IDX_QNAME);
        data.extend_from_slice(&collection_id.to_be_bytes());
        Self { data }
    }

    /// Prefix of every n-gram of `qname` in a collection.
    pub fn qname(collection_id: CollectionId, qname: &QName, symbols: &SymbolTable) -> Result<Self> {
        Ok(Self::from_symbols(
            collection_id,
            qname.name_type(),
            symbols.ns_symbol(qname.namespace())?,
            symbols.symbol(qname.local_name())?,
            "",
        ))
    }

    /// Full key of one n-gram.
    pub fn term(
        collection_id: CollectionId,
        qname: &QName,
        symbols: &SymbolTable,
        ngram: &str,
    ) -> Result<Self> {
        let mut key = Self::qname(collection_id, qname, symbols)?;
        key.data.extend_from_slice(ngram.as_bytes());
        Ok(key)
    }

    /// Key from already-resolved symbols.
    pub fn from_symbols(
        collection_id: CollectionId,
        name_type: NameType,
        ns_symbol: u16,
        local_symbol: u16,
        ngram: &str,
    ) -> Self {
        let mut data = Vec::with_capacity(NGRAM_OFFSET + ngram.len());
        data.push(IDX_QNAME);
        data.extend_from_slice(&collection_id.to_be_bytes());
        data.push(name_type.as_u8());
        data.extend_from_slice(&ns_symbol.to_be_bytes());
        data.extend_from_slice(&local_symbol.to_be_bytes());
        data.extend_from_slice(ngram.as_bytes());
        Self { data }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// The n-gram suffix of a full key.
    pub fn ngram_of(key: &[u8]) -> Result<&str> {
        if key.len() < NGRAM_OFFSET || key[0] != IDX_QNAME {
            return Err(StorageError::InvalidData(format!(
                "not an n-gram key ({} bytes)",
                key.len()
            )));
        }
        std::str::from_utf8(&key[NGRAM_OFFSET..])
            .map_err(|e| StorageError::InvalidData(format!("n-gram is not UTF-8: {}", e)))
    }

    /// Decodes every field of a full key.
    pub fn decode(key: &[u8]) -> Result<KeyParts<'_>> {
        let ngram = Self::ngram_of(key)?;
        let name_type = NameType::from_u8(key[NAME_TYPE_OFFSET]).ok_or_else(|| {
            StorageError::InvalidData(format!("unknown name type {}", key[NAME_TYPE_OFFSET]))
        })?;
        Ok(KeyParts {
            collection_id: u32::from_be_bytes([
                key[COLLECTION_OFFSET],
                key[COLLECTION_OFFSET + 1],
                key[COLLECTION_OFFSET + 2],
                key[COLLECTION_OFFSET + 3],
            ]),
            name_type,
            ns_symbol: u16::from_be_bytes([key[NS_OFFSET], key[NS_OFFSET + 1]]),
            local_symbol: u16::from_be_bytes([key[LOCAL_OFFSET], key[LOCAL_OFFSET + 1]]),
            ngram,
        })
    }
}

impl AsRef<[u8]> for NGramKey {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

/// Decoded view of a full key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyParts<'a> {
    pub collection_id: CollectionId,
    pub name_type: NameType,
    pub ns_symbol: u16,
    pub local_symbol: u16,
    pub ngram: &'a str,
}

impl fmt::Display for KeyParts<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "c{}/{:?}/{}:{}/'{}'",
            self.collection_id, self.name_type, self.ns_symbol, self.local_symbol, self.ngram
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let symbols = SymbolTable::new();
        let p = QName::element("p");
        let key = NGramKey::term(0x0102_0304, &p, &symbols, "cat").unwrap();
        let bytes = key.as_bytes();
        assert_eq!(bytes.len(), QNAME_KEY_LEN + 3);
        assert_eq!(&bytes[..6], &[IDX_QNAME, 1, 2, 3, 4, NameType::Element.as_u8()]);
        assert_eq!(&bytes[6..8], &[0, 0]);
        assert_eq!(&bytes[10..], b"cat");

        let parts = NGramKey::decode(bytes).unwrap();
        assert_eq!(parts.collection_id, 0x0102_0304);
        assert_eq!(parts.name_type, NameType::Element);
        assert_eq!(parts.local_symbol, symbols.symbol("p").unwrap());
        assert_eq!(parts.ngram, "cat");
    }

    #[test]
    fn test_prefixes_nest() {
        let symbols = SymbolTable::new();
        let p = QName::element("p");
        let collection = NGramKey::collection(7);
        let qname = NGramKey::qname(7, &p, &symbols).unwrap();
        let full = NGramKey::term(7, &p, &symbols, "été").unwrap();

        assert_eq!(collection.as_bytes().len(), COLLECTION_KEY_LEN);
        assert!(qname.as_bytes().starts_with(collection.as_bytes()));
        assert!(full.as_bytes().starts_with(qname.as_bytes()));
        assert_eq!(NGramKey::ngram_of(qname.as_bytes()).unwrap(), "");
        assert_eq!(NGramKey::ngram_of(full.as_bytes()).unwrap(), "été");
        assert!(NGramKey::ngram_of(collection.as_bytes()).is_err());
    }

    #[test]
    fn test_ordering() {
        let symbols = SymbolTable::new();
        let p = QName::element("p");
        let id = QName::attribute("id");
        let key = |c, q: &QName, g| NGramKey::term(c, q, &symbols, g).unwrap();

        // collection id dominates, then name type, then n-gram bytes
        assert!(key(1, &id, "zzz") < key(2, &p, "aaa"));
        assert!(key(256, &p, "aaa") > key(255, &p, "zzz"));
        assert!(key(1, &p, "zzz") < key(1, &id, "aaa"));
        assert!(key(1, &p, "ca") < key(1, &p, "cat"));
        assert!(key(1, &p, "cat") < key(1, &p, "cb"));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(NGramKey::decode(&[IDX_QNAME + 1; 12]).is_err());
        let mut bad_type = NGramKey::from_symbols(1, NameType::Element, 0, 1, "x").into_bytes();
        bad_type[NAME_TYPE_OFFSET] = 9;
        assert!(NGramKey::decode(&bad_type).is_err());
        let mut bad_utf8 = NGramKey::from_symbols(1, NameType::Element, 0, 1, "").into_bytes();
        bad_utf8.push(0xFF);
        assert!(NGramKey::ngram_of(&bad_utf8).is_err());
    }
}
