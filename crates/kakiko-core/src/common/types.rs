//! # Request payload and identity types
//!
//! - [`ConversionRequest`] - The inbound `{"mml": "..."}` payload.
//! - [`UserId`] - Identity of the caller that will own the stored file.
//! - [`DriveFileId`] - Identifier assigned by the drive to a stored file.
//! - [`FolderId`] - Drive folder a file may be placed in.

use core::fmt;
use serde::{Deserialize, Serialize};

/// Inbound payload of the conversion endpoint.
///
/// The MML text is forwarded to the converter verbatim; no validation happens
/// before dispatch. Unknown fields are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConversionRequest {
    pub mml: String,
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Identity of an authenticated caller.
    UserId
);
string_id!(
    /// Identifier of a file stored in the drive.
    DriveFileId
);
string_id!(
    /// Identifier of a drive folder.
    FolderId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_accepts_any_mml_string() {
        let req: ConversionRequest =
            serde_json::from_str(r#"{"mml":"T120L4O3CDEFEDCR ; \"quoted\""}"#).unwrap();
        assert_eq!(req.mml, "T120L4O3CDEFEDCR ; \"quoted\"");
    }

    #[test]
    fn request_rejects_unknown_fields() {
        let err = serde_json::from_str::<ConversionRequest>(r#"{"mml":"C","rate":44100}"#)
            .unwrap_err();
        assert!(err.to_string().contains("unknown field"));
    }

    #[test]
    fn request_requires_mml() {
        assert!(serde_json::from_str::<ConversionRequest>("{}").is_err());
        assert!(serde_json::from_str::<ConversionRequest>(r#"{"mml":5}"#).is_err());
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = UserId::new("9abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""9abc""#);
        assert_eq!(id.to_string(), "9abc");
    }
}
