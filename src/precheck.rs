//! Writability precondition check.
//!
//! Before anything is mutated, every path the manifest will touch is
//! resolved against the install root and probed for writability. The
//! check collects the complete list of violations instead of failing
//! fast, so a single run shows the operator every path that needs fixing.
//! The orchestrator treats a non-empty list as a hard stop.

use std::path::Path;

use tracing::debug;

use crate::core::PathViolation;
use crate::manifest::ManifestEntry;
use crate::utils::fs as fsutil;

/// Check that every manifest target can be mutated.
///
/// An existing target must itself be writable. A target that does not
/// exist yet must have a writable nearest existing ancestor, since the
/// applier creates missing parents on the way down.
pub fn check_writable(entries: &[ManifestEntry], install_root: &Path) -> Vec<PathViolation> {
    let mut violations = Vec::new();

    for entry in entries {
        let target = install_root.join(&entry.path);

        if target.exists() {
            if !fsutil::is_writable(&target) {
                violations.push(PathViolation {
                    path: target,
                    reason: "not writable".to_string(),
                });
            }
            continue;
        }

        match fsutil::nearest_existing_ancestor(&target) {
            Some(ancestor) if fsutil::is_writable(&ancestor) => {}
            Some(ancestor) => violations.push(PathViolation {
                path: target,
                reason: format!("parent directory {} is not writable", ancestor.display()),
            }),
            None => violations.push(PathViolation {
                path: target,
                reason: "no existing parent directory".to_string(),
            }),
        }
    }

    debug!("writability check found {} violation(s) across {} entries", violations.len(), entries.len());
    violations
}
