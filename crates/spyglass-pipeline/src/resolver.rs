use spyglass_protocol_core::ProtocolAdapter;
use spyglass_protocol_v1_12::V1_12Adapter;
use spyglass_protocol_v1_8::V1_8Adapter;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no protocol adapter for server version `{0}`")]
    UnsupportedVersion(String),
}

/// One row of the version table: a tag prefix and the adapter built for
/// servers matching it.
pub struct VersionEntry {
    pub tag: &'static str,
    pub protocol: i32,
    factory: fn() -> Arc<dyn ProtocolAdapter>,
}

/// The adapter resolved for a version tag.
pub struct ResolvedVersion {
    pub tag: &'static str,
    pub protocol: i32,
    pub adapter: Arc<dyn ProtocolAdapter>,
}

impl std::fmt::Debug for ResolvedVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedVersion")
            .field("tag", &self.tag)
            .field("protocol", &self.protocol)
            .finish_non_exhaustive()
    }
}

/// Maps a detected server version tag to the protocol adapter compiled
/// for it. Pure lookup over a static table, evaluated once at startup:
/// every component above depends on the result, so an unmatched tag must
/// abort the whole subsystem rather than limp along.
pub struct VersionResolver {
    table: Vec<VersionEntry>,
}

impl VersionResolver {
    /// The built-in support matrix.
    pub fn builtin() -> Self {
        Self {
            table: vec![
                VersionEntry {
                    tag: "1.8",
                    protocol: 47,
                    factory: || Arc::new(V1_8Adapter::new()),
                },
                VersionEntry {
                    tag: "1.12",
                    protocol: 340,
                    factory: || Arc::new(V1_12Adapter::new()),
                },
            ],
        }
    }

    /// Resolve a version tag by exact match, then by the longest `.`
    /// separated prefix ("1.8.9" resolves through the "1.8" entry).
    pub fn resolve(&self, tag: &str) -> Result<ResolvedVersion, ResolveError> {
        let hit = self
            .table
            .iter()
            .filter(|entry| {
                tag == entry.tag
                    || (tag.starts_with(entry.tag)
                        && tag.as_bytes().get(entry.tag.len()) == Some(&b'.'))
            })
            .max_by_key(|entry| entry.tag.len());

        match hit {
            Some(entry) => Ok(ResolvedVersion {
                tag: entry.tag,
                protocol: entry.protocol,
                adapter: (entry.factory)(),
            }),
            None => Err(ResolveError::UnsupportedVersion(tag.to_string())),
        }
    }

    pub fn supported_tags(&self) -> Vec<&'static str> {
        self.table.iter().map(|e| e.tag).collect()
    }
}
