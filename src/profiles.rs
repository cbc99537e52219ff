//! Stream authorization profiles: one `<streamKey>_<token>` file per stream
//! under `STREAM_PROFILE_PATH`. Tokens are compared in constant time to
//! avoid leaking timing information to an attacker probing stream keys.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::RwLock;

/// Authorization + status-seed data for one stream key.
#[derive(Debug, Clone)]
pub struct StreamProfile {
    pub stream_key: String,
    pub token: String,
    pub is_public: bool,
    pub motd: String,
}

impl StreamProfile {
    fn unauthenticated(stream_key: &str) -> Self {
        Self {
            stream_key: stream_key.to_string(),
            token: String::new(),
            is_public: true,
            motd: String::new(),
        }
    }
}

/// Lazily-loaded, cached view of the profile directory.
pub struct ProfileStore {
    dir: PathBuf,
    strict: bool,
    cache: RwLock<std::collections::HashMap<String, Option<Arc<StreamProfile>>>>,
}

impl ProfileStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, strict: bool) -> Self {
        Self {
            dir: dir.into(),
            strict,
            cache: RwLock::new(std::collections::HashMap::new()),
        }
    }

    /// Look up (and cache) the profile for `stream_key`. In permissive mode
    /// an absent profile is synthesized as an unauthenticated public
    /// profile; in strict mode it's `None`.
    pub async fn lookup(&self, stream_key: &str) -> Option<Arc<StreamProfile>> {
        if let Some(cached) = self.cache.read().await.get(stream_key) {
            return cached.clone();
        }

        let found = read_profile_file(&self.dir, stream_key).await;
        let resolved = match found {
            Some(profile) => Some(Arc::new(profile)),
            None if self.strict => None,
            None => Some(Arc::new(StreamProfile::unauthenticated(stream_key))),
        };

        self.cache.write().await.insert(stream_key.to_string(), resolved.clone());
        resolved
    }

    /// Validate a WHIP `Authorization: Bearer <token>` header against the
    /// stream's profile. A profile with an empty token (unauthenticated,
    /// permissive-mode synthesis) accepts any bearer value including none.
    pub async fn authorize(&self, stream_key: &str, bearer_token: Option<&str>) -> bool {
        let Some(profile) = self.lookup(stream_key).await else {
            return false;
        };
        if profile.token.is_empty() {
            return true;
        }
        let Some(presented) = bearer_token else {
            return false;
        };
        constant_time_eq(presented.as_bytes(), profile.token.as_bytes())
    }
}

async fn read_profile_file(dir: &Path, stream_key: &str) -> Option<StreamProfile> {
    let mut entries = tokio::fs::read_dir(dir).await.ok()?;
    let prefix = format!("{stream_key}_");
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(token) = name.strip_prefix(&prefix) {
            return Some(StreamProfile {
                stream_key: stream_key.to_string(),
                token: token.to_string(),
                is_public: true,
                motd: String::new(),
            });
        }
    }
    None
}

/// Split a WHIP `Authorization: Bearer <value>` payload into `(streamKey,
/// token)`, mirroring the on-disk `<streamKey>_<token>` profile filename
/// convention: the stream key is everything before the last `_`, the token
/// everything after. A bearer value with no `_` is the stream key alone with
/// no token, which permissive mode accepts as an unauthenticated public
/// stream.
#[must_use]
pub fn split_stream_key_and_token(bearer: &str) -> (&str, Option<&str>) {
    match bearer.rfind('_') {
        Some(idx) => (&bearer[..idx], Some(&bearer[idx + 1..])),
        None => (bearer, None),
    }
}

/// Constant-time byte comparison, used for bearer-token checks so response
/// latency doesn't leak how many leading bytes matched.
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_matches_equal_slices() {
        assert!(constant_time_eq(b"abc123", b"abc123"));
    }

    #[test]
    fn constant_time_eq_rejects_mismatches() {
        assert!(!constant_time_eq(b"abc123", b"abc124"));
        assert!(!constant_time_eq(b"short", b"longerstring"));
    }

    #[tokio::test]
    async fn permissive_mode_synthesizes_unauthenticated_profile() {
        let dir = tempdir_without_profiles();
        let store = ProfileStore::new(dir, false);
        assert!(store.authorize("unknown-key", None).await);
    }

    #[tokio::test]
    async fn strict_mode_rejects_unknown_stream_keys() {
        let dir = tempdir_without_profiles();
        let store = ProfileStore::new(dir, true);
        assert!(!store.authorize("unknown-key", None).await);
    }

    #[test]
    fn split_stream_key_and_token_splits_on_last_underscore() {
        assert_eq!(split_stream_key_and_token("alice_s3cr3t"), ("alice", Some("s3cr3t")));
        assert_eq!(split_stream_key_and_token("my_stream_key_token"), ("my_stream_key", Some("token")));
    }

    #[test]
    fn split_stream_key_and_token_without_underscore_has_no_token() {
        assert_eq!(split_stream_key_and_token("alice"), ("alice", None));
    }

    fn tempdir_without_profiles() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("bbox-relay-profiles-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
