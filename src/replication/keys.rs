//! Certification keys
//!
//! A key is an ordered list of opaque parts naming the scope a certified
//! operation touches. Two operations conflict when their keys overlap, so
//! finer keys let more concurrent work through.
//!
//! | version | isolation (db, table) | row (cache key, row id)          |
//! |---------|-----------------------|----------------------------------|
//! | 0       | one coarse part       | cache key, row id                |
//! | 1       | db, table             | cache key split in two, row id   |

use std::fmt;

use super::errors::{ReplicationError, ReplicationResult};

/// One opaque key component.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyPart(Vec<u8>);

impl KeyPart {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Ordered key parts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct CertificationKey {
    parts: Vec<KeyPart>,
}

impl CertificationKey {
    pub fn parts(&self) -> &[KeyPart] {
        &self.parts
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

impl fmt::Display for CertificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .parts
            .iter()
            .map(|part| String::from_utf8_lossy(part.as_bytes()).into_owned())
            .collect();
        write!(f, "[{}]", rendered.join("/"))
    }
}

/// What a key is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource<'a> {
    /// Statement isolation scope (DDL and other TOI statements)
    Isolation {
        database: Option<&'a str>,
        table: Option<&'a str>,
    },
    /// A single row. The cache key is `db\0table\0`; the row id is the
    /// storage engine's primary key image.
    Row { cache_key: &'a [u8], row_id: &'a [u8] },
}

/// Builds keys for the negotiated protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CertificationKeyBuilder {
    protocol_version: i32,
    certify_non_pk: bool,
}

impl CertificationKeyBuilder {
    pub fn new(protocol_version: i32) -> Self {
        Self {
            protocol_version,
            certify_non_pk: true,
        }
    }

    /// Whether rows without a primary key are certified at table level
    /// (otherwise they are refused).
    pub fn with_certify_non_pk(mut self, certify: bool) -> Self {
        self.certify_non_pk = certify;
        self
    }

    pub fn protocol_version(&self) -> i32 {
        self.protocol_version
    }

    /// Parts the key for `source` needs under this version.
    pub fn required_parts(&self, source: &KeySource<'_>) -> ReplicationResult<usize> {
        match (self.protocol_version, source) {
            (0, KeySource::Isolation { .. }) => Ok(1),
            (1, KeySource::Isolation { .. }) => Ok(2),
            (0, KeySource::Row { .. }) => Ok(2),
            (1, KeySource::Row { .. }) => Ok(3),
            (version, _) => Err(ReplicationError::write_set_preparation(format!(
                "unsupported certification key protocol version {}",
                version
            ))),
        }
    }

    /// Build the key, refusing when `capacity` cannot hold it.
    pub fn build(
        &self,
        source: &KeySource<'_>,
        capacity: usize,
    ) -> ReplicationResult<CertificationKey> {
        let required = self.required_parts(source)?;
        if capacity < required {
            return Err(ReplicationError::write_set_preparation(format!(
                "key capacity {} is below the {} parts protocol version {} needs",
                capacity, required, self.protocol_version
            )));
        }

        let parts = match *source {
            KeySource::Isolation { database, table } => self.isolation_parts(database, table),
            KeySource::Row { cache_key, row_id } => self.row_parts(cache_key, row_id)?,
        };
        Ok(CertificationKey { parts })
    }

    /// Key for a TOI statement on `database.table`.
    pub fn isolation(
        &self,
        database: Option<&str>,
        table: Option<&str>,
    ) -> ReplicationResult<CertificationKey> {
        let source = KeySource::Isolation { database, table };
        let capacity = self.required_parts(&source)?;
        self.build(&source, capacity)
    }

    fn isolation_parts(&self, database: Option<&str>, table: Option<&str>) -> Vec<KeyPart> {
        if self.protocol_version == 0 {
            return vec![KeyPart::new(Vec::new())];
        }
        match (database, table) {
            (Some(db), Some(table)) => vec![KeyPart::new(db), KeyPart::new(table)],
            (Some(db), None) => vec![KeyPart::new(db)],
            // No schema: the whole server is the scope
            (None, _) => vec![KeyPart::new(Vec::new())],
        }
    }

    fn row_parts(&self, cache_key: &[u8], row_id: &[u8]) -> ReplicationResult<Vec<KeyPart>> {
        if row_id.is_empty() && !self.certify_non_pk {
            return Err(ReplicationError::write_set_preparation(
                "row has no primary key and non-PK certification is off",
            ));
        }

        let mut parts = if self.protocol_version == 0 {
            vec![KeyPart::new(cache_key)]
        } else {
            let (db, table) = split_cache_key(cache_key)?;
            vec![KeyPart::new(db), KeyPart::new(table)]
        };
        // Rows without a primary key certify the whole table
        if !row_id.is_empty() {
            parts.push(KeyPart::new(row_id));
        }
        Ok(parts)
    }
}

/// Split `db\0table\0` into its two NUL-terminated halves.
fn split_cache_key(cache_key: &[u8]) -> ReplicationResult<(&[u8], &[u8])> {
    let malformed = || {
        ReplicationError::write_set_preparation("cache key is not of the form db\\0table\\0")
    };
    let db_end = cache_key.iter().position(|b| *b == 0).ok_or_else(malformed)?;
    let rest = &cache_key[db_end + 1..];
    let table_end = rest.iter().position(|b| *b == 0).unwrap_or(rest.len());
    Ok((&cache_key[..db_end], &rest[..table_end]))
}
