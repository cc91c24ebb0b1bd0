use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use compass_common::Result;
use compass_db::{MatchStore, Profile};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};

/// Bump when the document layout changes; older payloads regenerate.
pub const MATCHES_SCHEMA_VERSION: u32 = 2;

/// Cached documents older than this are regenerated.
pub const MATCHES_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollegeMatchesDocument {
    pub version: u32,
    pub updated_at: DateTime<Utc>,
    pub profile_hash: String,
    #[serde(default)]
    pub colleges: Vec<CollegeMatch>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollegeMatch {
    pub name: String,
    #[serde(default)]
    pub match_score: f64,
    #[serde(default)]
    pub why_good_fit: String,
    #[serde(default)]
    pub program_strengths: Vec<String>,
    #[serde(default)]
    pub academic_fit: String,
    #[serde(default)]
    pub admission_stats: AdmissionStats,
    #[serde(default)]
    pub extracurricular_matches: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdmissionStats {
    #[serde(default)]
    pub acceptance_rate: Option<f64>,
    #[serde(default)]
    pub gpa_range: Option<GpaRange>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpaRange {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    Missing,
    Forced,
    VersionMismatch,
    Expired,
    ProfileChanged,
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            StaleReason::Missing => "no cached matches",
            StaleReason::Forced => "refresh requested",
            StaleReason::VersionMismatch => "schema version changed",
            StaleReason::Expired => "cache expired",
            StaleReason::ProfileChanged => "profile changed",
        };
        f.write_str(reason)
    }
}

/// Produces a fresh list of college matches for a profile.
#[async_trait]
pub trait MatchGenerator: Send + Sync {
    async fn generate_matches(&self, profile: &Profile) -> Result<Vec<CollegeMatch>>;
}

/// SHA-256 of the canonical JSON of the profile's content fields.
///
/// `Value` objects serialize with sorted keys, so the compact encoding is
/// canonical.
pub fn profile_hash(profile: &Profile) -> String {
    let content = serde_json::json!({
        "gpa": profile.gpa,
        "interests": profile.interests,
        "activities": profile.activities,
        "target_majors": profile.target_majors,
        "target_schools": profile.target_schools,
    });
    hex::encode(Sha256::digest(content.to_string().as_bytes()))
}

/// Why `doc` must be regenerated, or `None` if it can be served as is.
pub fn staleness(
    doc: Option<&CollegeMatchesDocument>,
    current_hash: &str,
    now: DateTime<Utc>,
    force: bool,
) -> Option<StaleReason> {
    let Some(doc) = doc else {
        return Some(StaleReason::Missing);
    };
    if force {
        return Some(StaleReason::Forced);
    }
    if doc.version != MATCHES_SCHEMA_VERSION {
        return Some(StaleReason::VersionMismatch);
    }
    if now - doc.updated_at > Duration::hours(MATCHES_TTL_HOURS) {
        return Some(StaleReason::Expired);
    }
    if doc.profile_hash != current_hash {
        return Some(StaleReason::ProfileChanged);
    }
    None
}

/// Per-user cache of generated college matches.
#[derive(Clone)]
pub struct MatchCache {
    store: MatchStore,
    generator: Arc<dyn MatchGenerator>,
}

impl MatchCache {
    pub fn new(store: MatchStore, generator: Arc<dyn MatchGenerator>) -> Self {
        Self { store, generator }
    }

    pub async fn fetch(
        &self,
        user_id: i64,
        profile: &Profile,
        force: bool,
    ) -> Result<CollegeMatchesDocument> {
        self.fetch_at(user_id, profile, force, Utc::now()).await
    }

    /// Serve the cached document unless it is stale at `now`; otherwise
    /// regenerate and store. A failed store still returns the fresh document.
    pub async fn fetch_at(
        &self,
        user_id: i64,
        profile: &Profile,
        force: bool,
        now: DateTime<Utc>,
    ) -> Result<CollegeMatchesDocument> {
        let cached = match self.store.load(user_id)? {
            Some(stored) => match serde_json::from_str::<CollegeMatchesDocument>(&stored.payload) {
                Ok(doc) => Some(doc),
                Err(e) => {
                    warn!("unreadable cached matches for user {}: {e}", user_id);
                    None
                }
            },
            None => None,
        };
        let hash = profile_hash(profile);

        let reason = match (staleness(cached.as_ref(), &hash, now, force), cached) {
            (None, Some(doc)) => {
                info!("serving cached college matches for user {}", user_id);
                return Ok(doc);
            }
            (reason, _) => reason.unwrap_or(StaleReason::Missing),
        };
        info!("regenerating college matches for user {}: {}", user_id, reason);

        let mut colleges = self.generator.generate_matches(profile).await?;
        for college in &mut colleges {
            college.match_score = college.match_score.clamp(0.0, 1.0);
        }
        let doc = CollegeMatchesDocument {
            version: MATCHES_SCHEMA_VERSION,
            updated_at: now,
            profile_hash: hash,
            colleges,
        };

        match serde_json::to_string(&doc) {
            Ok(payload) => {
                if let Err(e) = self.store.upsert(user_id, &payload) {
                    error!("failed to cache college matches for user {}: {e}", user_id);
                }
            }
            Err(e) => error!("failed to serialize college matches: {e}"),
        }
        Ok(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use compass_common::Error;
    use compass_db::{Database, UserStore};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingGenerator {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingGenerator {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail,
            })
        }
    }

    #[async_trait]
    impl MatchGenerator for CountingGenerator {
        async fn generate_matches(&self, _profile: &Profile) -> Result<Vec<CollegeMatch>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::Agent("generator down".into()));
            }
            Ok(vec![CollegeMatch {
                name: format!("College {n}"),
                match_score: 1.4,
                why_good_fit: "strong robotics program".into(),
                program_strengths: vec![],
                academic_fit: "target".into(),
                admission_stats: AdmissionStats::default(),
                extracurricular_matches: vec![],
            }])
        }
    }

    fn profile(gpa: f64) -> Profile {
        Profile {
            user_id: 1,
            gpa: Some(gpa),
            interests: vec!["robotics".into()],
            ..Profile::default()
        }
    }

    fn setup(generator: Arc<CountingGenerator>) -> (MatchCache, MatchStore, i64) {
        let db = Database::in_memory().unwrap();
        let user = UserStore::new(db.clone())
            .get_or_create("cache@example.org", "C")
            .unwrap();
        let store = MatchStore::new(db);
        (MatchCache::new(store.clone(), generator), store, user.id)
    }

    fn doc(hash: &str, updated_at: DateTime<Utc>) -> CollegeMatchesDocument {
        CollegeMatchesDocument {
            version: MATCHES_SCHEMA_VERSION,
            updated_at,
            profile_hash: hash.into(),
            colleges: vec![],
        }
    }

    #[test]
    fn hash_is_stable_and_content_sensitive() {
        let a = profile(3.5);
        let mut b = profile(3.5);
        b.updated_at = Some(Utc::now());
        b.user_id = 99;
        assert_eq!(profile_hash(&a), profile_hash(&b));
        assert_eq!(profile_hash(&a).len(), 64);
        assert_ne!(profile_hash(&a), profile_hash(&profile(3.6)));
    }

    #[test]
    fn hash_covers_sorted_compact_json() {
        let canonical = r#"{"activities":[],"gpa":3.5,"interests":["robotics"],"target_majors":[],"target_schools":[]}"#;
        assert_eq!(
            profile_hash(&profile(3.5)),
            hex::encode(Sha256::digest(canonical.as_bytes()))
        );
    }

    #[test]
    fn staleness_reasons() {
        let now = Utc::now();
        let fresh = doc("h", now - Duration::hours(1));
        assert_eq!(staleness(None, "h", now, false), Some(StaleReason::Missing));
        assert_eq!(staleness(Some(&fresh), "h", now, true), Some(StaleReason::Forced));
        assert_eq!(staleness(Some(&fresh), "h", now, false), None);
        assert_eq!(
            staleness(Some(&fresh), "other", now, false),
            Some(StaleReason::ProfileChanged)
        );

        let old = doc("h", now - Duration::hours(25));
        assert_eq!(staleness(Some(&old), "h", now, false), Some(StaleReason::Expired));

        let mut v1 = fresh.clone();
        v1.version = 1;
        assert_eq!(
            staleness(Some(&v1), "h", now, false),
            Some(StaleReason::VersionMismatch)
        );
    }

    #[tokio::test]
    async fn fresh_cache_is_served_without_generation() {
        let generator = CountingGenerator::new(false);
        let (cache, _, user_id) = setup(Arc::clone(&generator));
        let now = Utc::now();

        let first = cache.fetch_at(user_id, &profile(3.5), false, now).await.unwrap();
        let second = cache
            .fetch_at(user_id, &profile(3.5), false, now + Duration::hours(2))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.colleges[0].match_score, 1.0);
    }

    #[tokio::test]
    async fn profile_change_expiry_and_force_regenerate() {
        let generator = CountingGenerator::new(false);
        let (cache, _, user_id) = setup(Arc::clone(&generator));
        let now = Utc::now();

        cache.fetch_at(user_id, &profile(3.5), false, now).await.unwrap();
        cache.fetch_at(user_id, &profile(3.9), false, now).await.unwrap();
        assert_eq!(generator.calls.load(Ordering::SeqCst), 2);

        cache
            .fetch_at(user_id, &profile(3.9), false, now + Duration::hours(25))
            .await
            .unwrap();
        assert_eq!(generator.calls.load(Ordering::SeqCst), 3);

        cache.fetch_at(user_id, &profile(3.9), true, now).await.unwrap();
        assert_eq!(generator.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn unreadable_payload_is_treated_as_missing() {
        let generator = CountingGenerator::new(false);
        let (cache, store, user_id) = setup(Arc::clone(&generator));
        store.upsert(user_id, "not json").unwrap();

        let doc = cache.fetch(user_id, &profile(3.5), false).await.unwrap();
        assert_eq!(doc.version, MATCHES_SCHEMA_VERSION);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn generator_failure_propagates() {
        let (cache, _, user_id) = setup(CountingGenerator::new(true));
        let err = cache.fetch(user_id, &profile(3.5), false).await.unwrap_err();
        assert!(matches!(err, Error::Agent(_)));
    }

    #[tokio::test]
    async fn failed_cache_write_still_returns_document() {
        let generator = CountingGenerator::new(false);
        let (cache, _, _) = setup(Arc::clone(&generator));

        // No such user: the foreign key rejects the write.
        let doc = cache.fetch(4242, &profile(3.5), false).await.unwrap();
        assert_eq!(doc.colleges.len(), 1);
    }
}
