use std::error;
use std::fmt;

/// Detailed errors raised when validation of a signature string fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum SignatureError {
    UnknownTypeCode(u8),
    SignatureTooLong,
    MissingArrayElementType,
    StructEndedButNotStarted,
    DictEndedButNotStarted,
    StructStartedButNotEnded,
    DictStartedButNotEnded,
    StructHasNoFields,
    DictKeyMustBeBasicType,
    DictEntryNotInsideArray,
    DictEntryMustHaveExactlyTwoFields,
    ExceededMaximumArrayRecursion,
    ExceededMaximumStructRecursion,
    TrailingGarbage,
    VariantSignatureMustBeSingleCompleteType,
}

impl fmt::Display for SignatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownTypeCode(b) => write!(f, "unknown type code {:?}", *b as char),
            Self::SignatureTooLong => write!(f, "signature exceeds 255 bytes"),
            Self::MissingArrayElementType => write!(f, "array is missing its element type"),
            Self::StructEndedButNotStarted => write!(f, "unmatched `)`"),
            Self::DictEndedButNotStarted => write!(f, "unmatched `}}`"),
            Self::StructStartedButNotEnded => write!(f, "unmatched `(`"),
            Self::DictStartedButNotEnded => write!(f, "unmatched `{{`"),
            Self::StructHasNoFields => write!(f, "struct must have at least one field"),
            Self::DictKeyMustBeBasicType => write!(f, "dict-entry key must be a basic type"),
            Self::DictEntryNotInsideArray => write!(f, "dict-entry may only appear inside an array"),
            Self::DictEntryMustHaveExactlyTwoFields => {
                write!(f, "dict-entry must have exactly one key and one value")
            }
            Self::ExceededMaximumArrayRecursion => write!(f, "exceeded maximum array nesting of 32"),
            Self::ExceededMaximumStructRecursion => write!(f, "exceeded maximum struct nesting of 32"),
            Self::TrailingGarbage => write!(f, "trailing garbage after a complete type"),
            Self::VariantSignatureMustBeSingleCompleteType => {
                write!(f, "variant signature must be exactly one complete type")
            }
        }
    }
}

impl error::Error for SignatureError {}
