//! Failure classification for migration attempts.
//!
//! A failed attempt is fatal when its captured output matches any
//! [`FatalSignature`] in the [`FailureClassifier`]'s set, and transient
//! otherwise. Signatures are pluggable so new fatal phrasings of the
//! migration tool can be added without touching the retry controller.

use crate::attempt::ErrorClass;

/// Database points at a revision that is absent from the file set.
pub const SIG_CANNOT_LOCATE_REVISION: &str = "cannot locate revision";

/// The tool's own phrasing of [`SIG_CANNOT_LOCATE_REVISION`].
pub const SIG_CANT_LOCATE_REVISION: &str = "can't locate revision";

/// Ambiguous migration graph.
pub const SIG_MULTIPLE_HEADS: &str = "multiple heads";

/// The tool's own phrasing of [`SIG_MULTIPLE_HEADS`].
pub const SIG_MULTIPLE_HEAD_REVISIONS: &str = "multiple head revisions";

/// Unexpected drift between the database and the chain.
pub const SIG_NOT_UP_TO_DATE: &str = "target database is not up to date";

/// A predicate recognising an unrecoverable migration failure.
pub trait FatalSignature: Send + Sync {
    /// Short label reported in logs when the signature matches.
    fn label(&self) -> &str;

    /// Test the attempt output. `output` is already lowercased.
    fn matches(&self, output: &str) -> bool;
}

/// Case-insensitive substring match.
#[derive(Debug, Clone)]
pub struct SubstringSignature {
    needle: String,
}

impl SubstringSignature {
    pub fn new(needle: &str) -> Self {
        Self {
            needle: needle.trim().to_lowercase(),
        }
    }
}

impl FatalSignature for SubstringSignature {
    fn label(&self) -> &str {
        &self.needle
    }

    fn matches(&self, output: &str) -> bool {
        !self.needle.is_empty() && output.contains(&self.needle)
    }
}

/// Ordered set of fatal signatures.
pub struct FailureClassifier {
    signatures: Vec<Box<dyn FatalSignature>>,
}

impl FailureClassifier {
    /// A classifier with no signatures; every failure is transient.
    pub fn empty() -> Self {
        Self {
            signatures: Vec::new(),
        }
    }

    /// Add a signature to the set.
    pub fn with_signature(mut self, signature: impl FatalSignature + 'static) -> Self {
        self.signatures.push(Box::new(signature));
        self
    }

    /// Add one substring signature per non-empty entry.
    pub fn with_substrings<'a>(self, needles: impl IntoIterator<Item = &'a str>) -> Self {
        needles
            .into_iter()
            .filter(|n| !n.trim().is_empty())
            .fold(self, |classifier, needle| {
                classifier.with_signature(SubstringSignature::new(needle))
            })
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    /// Label of the first signature matching `output`, if any.
    pub fn matching_signature(&self, output: &str) -> Option<&str> {
        let lowered = output.to_lowercase();
        self.signatures
            .iter()
            .find(|sig| sig.matches(&lowered))
            .map(|sig| sig.label())
    }

    /// Classify a failed attempt's captured output.
    pub fn classify(&self, output: &str) -> ErrorClass {
        match self.matching_signature(output) {
            Some(_) => ErrorClass::FatalVersionMismatch,
            None => ErrorClass::Transient,
        }
    }
}

impl Default for FailureClassifier {
    /// The built-in signature set.
    fn default() -> Self {
        Self::empty().with_substrings([
            SIG_CANNOT_LOCATE_REVISION,
            SIG_CANT_LOCATE_REVISION,
            SIG_MULTIPLE_HEADS,
            SIG_MULTIPLE_HEAD_REVISIONS,
            SIG_NOT_UP_TO_DATE,
        ])
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cannot_locate_revision_is_fatal_in_any_case() {
        let classifier = FailureClassifier::default();
        for output in [
            "ERROR: Cannot locate revision identified by 'abc123'",
            "CANNOT LOCATE REVISION",
            "cannot locate revision",
        ] {
            assert_eq!(classifier.classify(output), ErrorClass::FatalVersionMismatch, "{output}");
        }
    }

    #[test]
    fn tool_phrasing_is_fatal() {
        let classifier = FailureClassifier::default();
        let output = "FAILED: Can't locate revision identified by '1975ea83b712'";
        assert_eq!(classifier.classify(output), ErrorClass::FatalVersionMismatch);
        assert_eq!(classifier.matching_signature(output), Some(SIG_CANT_LOCATE_REVISION));
    }

    #[test]
    fn multiple_heads_and_drift_are_fatal() {
        let classifier = FailureClassifier::default();
        assert_eq!(
            classifier.classify("Multiple heads are present; please specify the head revision"),
            ErrorClass::FatalVersionMismatch
        );
        assert_eq!(
            classifier.classify("FAILED: Target database is not up to date."),
            ErrorClass::FatalVersionMismatch
        );
    }

    #[test]
    fn branched_graph_phrasing_is_fatal() {
        let classifier = FailureClassifier::default();
        let output = "FAILED: Multiple head revisions are present for given argument 'head'; \
                      please specify a specific target revision, '<branchname>@head' to narrow \
                      to a specific head, or 'heads' for all heads";
        assert_eq!(classifier.classify(output), ErrorClass::FatalVersionMismatch);
        assert_eq!(classifier.matching_signature(output), Some(SIG_MULTIPLE_HEAD_REVISIONS));
    }

    #[test]
    fn infrastructure_noise_is_transient() {
        let classifier = FailureClassifier::default();
        for output in [
            "(2003, \"Can't connect to MySQL server on 'db' ([Errno 111] Connection refused)\")",
            "Lock wait timeout exceeded; try restarting transaction",
            "",
        ] {
            assert_eq!(classifier.classify(output), ErrorClass::Transient, "{output}");
        }
    }

    #[test]
    fn custom_signatures_extend_the_set() {
        let classifier = FailureClassifier::default().with_substrings(["Duplicate column name", " "]);
        assert_eq!(classifier.len(), 6);
        assert_eq!(
            classifier.classify("1060, \"Duplicate column name 'slug'\""),
            ErrorClass::FatalVersionMismatch
        );
    }

    #[test]
    fn empty_classifier_never_fatal() {
        let classifier = FailureClassifier::empty();
        assert!(classifier.is_empty());
        assert_eq!(classifier.classify("cannot locate revision"), ErrorClass::Transient);
    }

    struct ExitMarker;

    impl FatalSignature for ExitMarker {
        fn label(&self) -> &str {
            "exit marker"
        }

        fn matches(&self, output: &str) -> bool {
            output.lines().any(|l| l.starts_with("fatal:"))
        }
    }

    #[test]
    fn trait_objects_plug_in() {
        let classifier = FailureClassifier::empty().with_signature(ExitMarker);
        assert_eq!(classifier.classify("FATAL: broken graph"), ErrorClass::FatalVersionMismatch);
        assert_eq!(classifier.classify("not fatal: retry"), ErrorClass::Transient);
    }
}
