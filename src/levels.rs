// SPDX-License-Identifier: MIT
//
// Maps upstream log-level ids to the names the consumer expects. This core
// does not own the level-name registry (out of scope, per the host's
// log-level-name translation table) — it only applies the fixed mapping the
// consumer understands for the handful of well-known ids.

/// Returns the canonical consumer-facing name for a well-known level id, or
/// `None` if `id` is not one of the fixed set, in which case the caller's
/// own declared name passes through unchanged.
pub fn mapped_name(id: i32) -> Option<&'static str> {
    match id {
        0..=2 => Some("Failure"),
        3 => Some("Error"),
        4 => Some("Warning"),
        5..=6 => Some("Note"),
        7 => Some("Developer"),
        8 => Some("Trace0"),
        _ => None,
    }
}

/// Resolve the name to send for a level, applying [`mapped_name`] and
/// falling back to `declared_name` for ids outside the fixed set.
pub fn resolve_name<'a>(id: i32, declared_name: &'a str) -> std::borrow::Cow<'a, str> {
    match mapped_name(id) {
        Some(name) => std::borrow::Cow::Borrowed(name),
        None => std::borrow::Cow::Borrowed(declared_name),
    }
}
