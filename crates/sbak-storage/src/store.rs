//! Put/get-by-URI blob store over an OpenDAL Operator
//!
//! Layout under the configured prefix:
//!   {prefix}/chunks/{backup_id}/{file_name}.chunk{id}.enc   -- nonce || ciphertext || tag
//!   {prefix}/manifests/manifest_{backup_id}.json             -- backup manifest
//!
//! Every stored object is addressed as `store://<key>`; a backup is removed by
//! deleting its chunk objects and then its manifest.

use opendal::{ErrorKind, Operator};

use sbak_core::{SbakError, SbakResult};

/// Scheme prefix of every URI handed out by [`BlobStore`]
pub const URI_SCHEME: &str = "store://";

const CHUNKS_DIR: &str = "chunks";
const MANIFESTS_DIR: &str = "manifests";

/// Map an OpenDAL error: missing objects become `NotFound`, everything else
/// is treated as a transport failure.
pub(crate) fn map_err(e: opendal::Error, key: &str) -> SbakError {
    match e.kind() {
        ErrorKind::NotFound => SbakError::NotFound(format!("{URI_SCHEME}{key}")),
        _ => SbakError::Network(format!("{key}: {e}")),
    }
}

/// Object store for one backup target. Owns the operator for the lifetime of
/// a command; dropping it releases the transport.
#[derive(Debug, Clone)]
pub struct BlobStore {
    op: Operator,
    prefix: String,
}

impl BlobStore {
    pub fn new(op: Operator, prefix: &str) -> Self {
        Self {
            op,
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    pub fn operator(&self) -> &Operator {
        &self.op
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn dir(&self, kind: &str) -> String {
        if self.prefix.is_empty() {
            format!("{kind}/")
        } else {
            format!("{}/{kind}/", self.prefix)
        }
    }

    fn object_key(&self, kind: &str, segments: &[&str]) -> SbakResult<String> {
        for segment in segments {
            let invalid = segment.is_empty()
                || segment.contains('/')
                || *segment == "."
                || *segment == "..";
            if invalid {
                return Err(SbakError::InvalidParams(format!(
                    "invalid object name: {segment:?}"
                )));
            }
        }
        Ok(format!("{}{}", self.dir(kind), segments.join("/")))
    }

    /// Build the URI for a raw object key.
    pub fn uri_for(key: &str) -> String {
        format!("{URI_SCHEME}{key}")
    }

    /// Strip the scheme from a URI. Anything without `store://` is rejected.
    pub fn key_for(uri: &str) -> SbakResult<&str> {
        match uri.strip_prefix(URI_SCHEME) {
            Some(key) if !key.is_empty() => Ok(key),
            _ => Err(SbakError::Format(format!(
                "not a store URI (expected {URI_SCHEME}<key>): {uri}"
            ))),
        }
    }

    async fn put(&self, key: String, bytes: Vec<u8>) -> SbakResult<String> {
        let len = bytes.len();
        self.op
            .write(&key, bytes)
            .await
            .map_err(|e| map_err(e, &key))?;
        tracing::debug!(key = %key, bytes = len, "stored object");
        Ok(Self::uri_for(&key))
    }

    /// Store one encrypted chunk blob under its backup's directory and
    /// return its URI.
    pub async fn put_chunk(
        &self,
        backup_id: &str,
        name: &str,
        blob: Vec<u8>,
    ) -> SbakResult<String> {
        let key = self.object_key(CHUNKS_DIR, &[backup_id, name])?;
        self.put(key, blob).await
    }

    /// Store a manifest document and return its URI.
    pub async fn put_manifest(&self, name: &str, json: &str) -> SbakResult<String> {
        let key = self.object_key(MANIFESTS_DIR, &[name])?;
        self.put(key, json.as_bytes().to_vec()).await
    }

    /// Fetch the object behind a URI previously returned by a put.
    pub async fn get(&self, uri: &str) -> SbakResult<Vec<u8>> {
        let key = Self::key_for(uri)?;
        let buf = self.op.read(key).await.map_err(|e| map_err(e, key))?;
        Ok(buf.to_vec())
    }

    pub async fn exists(&self, uri: &str) -> SbakResult<bool> {
        let key = Self::key_for(uri)?;
        self.op.exists(key).await.map_err(|e| map_err(e, key))
    }

    /// Remove the object behind a URI. Deleting a missing object succeeds.
    pub async fn delete(&self, uri: &str) -> SbakResult<()> {
        let key = Self::key_for(uri)?;
        self.op.delete(key).await.map_err(|e| map_err(e, key))?;
        tracing::debug!(key = %key, "deleted object");
        Ok(())
    }

    /// Whether `uri` names a chunk object under this store's prefix.
    pub fn is_chunk_uri(&self, uri: &str) -> bool {
        Self::key_for(uri).is_ok_and(|key| key.starts_with(&self.dir(CHUNKS_DIR)))
    }

    /// Whether `uri` names a manifest object under this store's prefix.
    pub fn is_manifest_uri(&self, uri: &str) -> bool {
        Self::key_for(uri).is_ok_and(|key| key.starts_with(&self.dir(MANIFESTS_DIR)))
    }

    /// URIs of every manifest under the prefix, sorted by name.
    ///
    /// Manifest names embed a millisecond timestamp, so name order is also
    /// creation order.
    pub async fn list_manifests(&self) -> SbakResult<Vec<String>> {
        let dir = self.dir(MANIFESTS_DIR);
        let entries = match self.op.list(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(map_err(e, &dir)),
        };

        let mut uris: Vec<String> = entries
            .into_iter()
            .filter(|entry| entry.metadata().mode().is_file())
            .filter(|entry| entry.name().ends_with(".json"))
            .map(|entry| Self::uri_for(entry.path()))
            .collect();
        uris.sort();
        Ok(uris)
    }

    /// List the prefix root; used as a reachability probe.
    pub(crate) async fn list_prefix(&self) -> SbakResult<usize> {
        let dir = if self.prefix.is_empty() {
            "/".to_string()
        } else {
            format!("{}/", self.prefix)
        };
        match self.op.list(&dir).await {
            Ok(entries) => Ok(entries.len()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            Err(e) => Err(SbakError::Network(format!(
                "storage health check failed: {e}"
            ))),
        }
    }
}
