//! Traits the wait engine and listener use to look inside API resources.

/// A resource with a numeric identifier.
pub trait Identified {
    /// The resource id.
    fn id(&self) -> u64;
}

/// A resource with a status field.
pub trait HasStatus {
    /// The current status as reported by the API.
    fn status(&self) -> &str;
}
