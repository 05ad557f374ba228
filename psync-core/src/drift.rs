//! Drift resolution for ordered statement lists.
//!
//! A remote policy may hand back its statements in a different textual form
//! than they were written in, so comparing the desired list with the stored
//! list would report changes that are not real. Instead we remember a
//! [`Fingerprint`] of the list we last wrote, together with the etag the remote
//! returned for that write, and only call a difference real when either the
//! desired content moved away from that fingerprint or someone else modified
//! the resource since (the etag no longer matches).

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// SHA-256 digest of an ordered statement list, rendered as lowercase hex.
///
/// The list is encoded as its element count followed by each element's
/// length and bytes, so no statement content can make two different lists
/// encode identically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of<S: AsRef<str>>(statements: &[S]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update((statements.len() as u64).to_be_bytes());
        for statement in statements {
            let bytes = statement.as_ref().as_bytes();
            hasher.update((bytes.len() as u64).to_be_bytes());
            hasher.update(bytes);
        }
        let hex = hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect();
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn matches(&self, other: &Fingerprint) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fingerprint and etag captured together after a successful write.
///
/// The two values only change as a pair: build a new marker and replace the
/// old one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedMarker {
    fingerprint: Fingerprint,
    #[serde(rename = "last_applied_etag")]
    etag: String,
}

impl AppliedMarker {
    pub fn new(fingerprint: Fingerprint, etag: impl Into<String>) -> Self {
        Self {
            fingerprint,
            etag: etag.into(),
        }
    }

    /// Marker for a write of `statements` that the remote acknowledged with `etag`.
    pub fn for_write<S: AsRef<str>>(statements: &[S], etag: impl Into<String>) -> Self {
        Self::new(Fingerprint::of(statements), etag)
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn etag(&self) -> &str {
        &self.etag
    }
}

/// Why a difference was judged real.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriftReason {
    /// Nothing has been written yet (e.g. an imported resource).
    NeverApplied,
    /// The desired statements differ from the last written ones.
    ContentChanged,
    /// Content matches, but the resource was modified since our last write.
    ModifiedOutOfBand { expected: String, observed: String },
    /// No etag has been observed for the resource.
    EtagUnknown,
}

impl fmt::Display for DriftReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriftReason::NeverApplied => f.write_str("statements were never applied"),
            DriftReason::ContentChanged => f.write_str("statements changed"),
            DriftReason::ModifiedOutOfBand { expected, observed } => write!(
                f,
                "modified out of band (etag {} -> {})",
                expected, observed
            ),
            DriftReason::EtagUnknown => f.write_str("no etag observed"),
        }
    }
}

/// Outcome of [`resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Drift {
    /// The difference is formatting noise; no write is needed.
    Suppressed,
    /// The statements must be written.
    Real(DriftReason),
}

impl Drift {
    pub fn is_real(&self) -> bool {
        matches!(self, Drift::Real(_))
    }
}

/// Decide whether `desired` statements need to be written.
///
/// Suppressed iff the fingerprint of `desired` equals the stored fingerprint
/// and `observed_etag` equals the etag stored with it. Both comparisons ignore
/// ASCII case.
pub fn resolve<S: AsRef<str>>(
    applied: Option<&AppliedMarker>,
    desired: &[S],
    observed_etag: Option<&str>,
) -> Drift {
    let Some(applied) = applied else {
        return Drift::Real(DriftReason::NeverApplied);
    };

    if !Fingerprint::of(desired).matches(&applied.fingerprint) {
        return Drift::Real(DriftReason::ContentChanged);
    }

    match observed_etag {
        None => Drift::Real(DriftReason::EtagUnknown),
        Some(observed) if !observed.eq_ignore_ascii_case(&applied.etag) => {
            Drift::Real(DriftReason::ModifiedOutOfBand {
                expected: applied.etag.clone(),
                observed: observed.to_string(),
            })
        }
        Some(_) => Drift::Suppressed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn statements() -> Vec<String> {
        vec![
            "Allow group A to read buckets in compartment X".to_string(),
            "Allow group A to write objects in compartment X".to_string(),
        ]
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        assert_eq!(Fingerprint::of(&statements()), Fingerprint::of(&statements()));
        assert_eq!(Fingerprint::of(&statements()).as_str().len(), 64);
    }

    #[test]
    fn test_fingerprint_is_order_sensitive() {
        let mut reversed = statements();
        reversed.reverse();
        assert_ne!(Fingerprint::of(&statements()), Fingerprint::of(&reversed));
    }

    #[test]
    fn test_fingerprint_does_not_collide_on_separators() {
        // A plain separator join would hash both of these as "a#b" / "a,b".
        assert_ne!(Fingerprint::of(&["a", "b"]), Fingerprint::of(&["a#b"]));
        assert_ne!(Fingerprint::of(&["a", "b"]), Fingerprint::of(&["a,b"]));
        assert_ne!(Fingerprint::of(&["a", ""]), Fingerprint::of(&["a"]));
        assert_ne!(Fingerprint::of(&["", "a"]), Fingerprint::of(&["a", ""]));
        assert_ne!(Fingerprint::of::<&str>(&[]), Fingerprint::of(&[""]));
    }

    #[test]
    fn test_fingerprint_accepts_str_and_string() {
        let owned = statements();
        let borrowed: Vec<&str> = owned.iter().map(String::as_str).collect();
        assert_eq!(Fingerprint::of(&owned), Fingerprint::of(&borrowed));
    }

    #[test]
    fn test_suppressed_when_fingerprint_and_etag_match() {
        let marker = AppliedMarker::for_write(&statements(), "E0");
        assert_eq!(
            resolve(Some(&marker), &statements(), Some("E0")),
            Drift::Suppressed
        );
    }

    #[test]
    fn test_comparison_ignores_ascii_case() {
        let upper = Fingerprint(Fingerprint::of(&statements()).as_str().to_uppercase());
        let marker = AppliedMarker::new(upper, "etag-ABC");
        assert_eq!(
            resolve(Some(&marker), &statements(), Some("ETAG-abc")),
            Drift::Suppressed
        );
    }

    #[test]
    fn test_real_when_never_applied() {
        assert_eq!(
            resolve(None, &statements(), Some("E0")),
            Drift::Real(DriftReason::NeverApplied)
        );
    }

    #[test]
    fn test_real_when_content_changed() {
        let marker = AppliedMarker::for_write(&statements(), "E0");
        let mut changed = statements();
        changed.push("Allow group B to inspect users in tenancy".to_string());
        assert_eq!(
            resolve(Some(&marker), &changed, Some("E0")),
            Drift::Real(DriftReason::ContentChanged)
        );
    }

    #[test]
    fn test_etag_mismatch_overrides_fingerprint_match() {
        let marker = AppliedMarker::for_write(&statements(), "E0");
        let drift = resolve(Some(&marker), &statements(), Some("E1"));
        assert_eq!(
            drift,
            Drift::Real(DriftReason::ModifiedOutOfBand {
                expected: "E0".to_string(),
                observed: "E1".to_string(),
            })
        );
        assert!(drift.is_real());
    }

    #[test]
    fn test_real_when_no_etag_observed() {
        let marker = AppliedMarker::for_write(&statements(), "E0");
        assert_eq!(
            resolve(Some(&marker), &statements(), None),
            Drift::Real(DriftReason::EtagUnknown)
        );
    }

    #[test]
    fn test_marker_serializes_with_stable_field_names() {
        let marker = AppliedMarker::for_write(&["x"], "E7");
        let json = serde_json::to_value(&marker).unwrap();
        assert_eq!(json["last_applied_etag"], "E7");
        assert_eq!(json["fingerprint"], Fingerprint::of(&["x"]).as_str());
    }
}
