//! Error types for container operations.

use std::fmt;

/// Failure reported by an injected collaborator (activation bookkeeping,
/// passivation I/O, and similar).
///
/// A collaborator failure inside a compute block leaves the map unchanged:
/// the previous entry stays in place and the error propagates to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollaboratorError {
    collaborator: &'static str,
    message: String,
}

impl CollaboratorError {
    /// Create a new collaborator error.
    pub fn new(collaborator: &'static str, message: impl Into<String>) -> Self {
        Self {
            collaborator,
            message: message.into(),
        }
    }

    /// Name of the collaborator that failed.
    pub fn collaborator(&self) -> &'static str {
        self.collaborator
    }

    /// Failure description.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CollaboratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.collaborator, self.message)
    }
}

impl std::error::Error for CollaboratorError {}

/// Errors that can occur during container operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerError {
    /// Segment index is outside `[0, segment_count)`.
    ///
    /// This is a programmer error; callers derive segment indexes from the
    /// same topology the container was built with.
    SegmentOutOfRange {
        /// The offending segment index.
        segment: usize,
        /// Number of segments the container was built with.
        segment_count: usize,
    },

    /// The segment exists in the topology but is not currently assigned to
    /// this node.
    SegmentNotOwned {
        /// The unassigned segment index.
        segment: usize,
    },

    /// The operation requires a bounded container.
    NotBounded,

    /// An injected collaborator failed.
    Collaborator(CollaboratorError),
}

impl fmt::Display for ContainerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SegmentOutOfRange {
                segment,
                segment_count,
            } => write!(
                f,
                "segment {segment} out of range (segment count {segment_count})"
            ),
            Self::SegmentNotOwned { segment } => {
                write!(f, "segment {segment} not owned by this node")
            }
            Self::NotBounded => write!(f, "container is not bounded"),
            Self::Collaborator(e) => write!(f, "collaborator error: {e}"),
        }
    }
}

impl std::error::Error for ContainerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Collaborator(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CollaboratorError> for ContainerError {
    fn from(e: CollaboratorError) -> Self {
        Self::Collaborator(e)
    }
}

/// Result type for container operations.
pub type ContainerResult<T> = Result<T, ContainerError>;

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            format!(
                "{}",
                ContainerError::SegmentOutOfRange {
                    segment: 300,
                    segment_count: 256
                }
            ),
            "segment 300 out of range (segment count 256)"
        );
        assert_eq!(
            format!("{}", ContainerError::SegmentNotOwned { segment: 7 }),
            "segment 7 not owned by this node"
        );
        assert_eq!(
            format!("{}", ContainerError::NotBounded),
            "container is not bounded"
        );
    }

    #[test]
    fn test_collaborator_error_display() {
        let err = CollaboratorError::new("passivator", "disk full");
        assert_eq!(format!("{err}"), "passivator failed: disk full");
        assert_eq!(err.collaborator(), "passivator");
        assert_eq!(err.message(), "disk full");
    }

    #[test]
    fn test_collaborator_error_wraps() {
        let err: ContainerError = CollaboratorError::new("activator", "store gone").into();
        assert!(matches!(err, ContainerError::Collaborator(_)));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_error_is_error_trait() {
        fn assert_error<E: std::error::Error>() {}
        assert_error::<ContainerError>();
        assert_error::<CollaboratorError>();
    }
}
