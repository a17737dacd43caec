//! Value types carried by storage requests.
//!
//! Object metadata, access-control settings, storage classes and
//! customer-provided encryption keys. These types are plain data; they carry
//! no behavior beyond parsing and formatting.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use chrono::{DateTime, Utc};
use digest::Digest;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ObjectMetadata
// ---------------------------------------------------------------------------

/// Metadata associated with a stored object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMetadata {
    /// Size of the object in bytes.
    #[serde(default)]
    pub content_length: u64,
    /// The MIME type of the object (e.g. `application/octet-stream`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// The entity tag (quoted hex MD5, or `"<md5>-<parts>"` for multipart objects).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    /// Version identifier, when the bucket is versioned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
    /// When the object was last written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
    /// User-defined metadata headers (`x-amz-meta-*`), keyed without the prefix.
    #[serde(default)]
    pub user_metadata: HashMap<String, String>,
}

impl ObjectMetadata {
    /// Create metadata with only the content length set.
    #[must_use]
    pub fn with_content_length(content_length: u64) -> Self {
        Self {
            content_length,
            ..Self::default()
        }
    }

    /// Look up a user metadata value.
    #[must_use]
    pub fn user_metadata_value(&self, key: &str) -> Option<&str> {
        self.user_metadata.get(key).map(String::as_str)
    }

    /// Insert a user metadata value, returning the previous one.
    pub fn insert_user_metadata(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Option<String> {
        self.user_metadata.insert(key.into(), value.into())
    }
}

// ---------------------------------------------------------------------------
// CannedAcl
// ---------------------------------------------------------------------------

/// Predefined (canned) ACL grants for objects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CannedAcl {
    /// Owner gets `FULL_CONTROL`. No one else has access rights (default).
    #[default]
    Private,
    /// Owner gets `FULL_CONTROL`. The `AllUsers` group gets `READ` access.
    PublicRead,
    /// Owner gets `FULL_CONTROL`. The `AllUsers` group gets `READ` and `WRITE` access.
    PublicReadWrite,
    /// Owner gets `FULL_CONTROL`. The `AuthenticatedUsers` group gets `READ` access.
    AuthenticatedRead,
    /// Owner gets `FULL_CONTROL`. Amazon EC2 gets `READ` access to GET an
    /// Amazon Machine Image (AMI) bundle.
    AwsExecRead,
    /// Object owner gets `FULL_CONTROL`. Bucket owner gets `READ` access.
    BucketOwnerRead,
    /// Both the object owner and the bucket owner get `FULL_CONTROL` over the object.
    BucketOwnerFullControl,
}

impl CannedAcl {
    /// Return the header value of the canned ACL.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::PublicRead => "public-read",
            Self::PublicReadWrite => "public-read-write",
            Self::AuthenticatedRead => "authenticated-read",
            Self::AwsExecRead => "aws-exec-read",
            Self::BucketOwnerRead => "bucket-owner-read",
            Self::BucketOwnerFullControl => "bucket-owner-full-control",
        }
    }
}

impl fmt::Display for CannedAcl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing a [`CannedAcl`] from a string fails.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown canned ACL: {0}")]
pub struct ParseCannedAclError(String);

impl FromStr for CannedAcl {
    type Err = ParseCannedAclError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "private" => Ok(Self::Private),
            "public-read" => Ok(Self::PublicRead),
            "public-read-write" => Ok(Self::PublicReadWrite),
            "authenticated-read" => Ok(Self::AuthenticatedRead),
            "aws-exec-read" => Ok(Self::AwsExecRead),
            "bucket-owner-read" => Ok(Self::BucketOwnerRead),
            "bucket-owner-full-control" => Ok(Self::BucketOwnerFullControl),
            _ => Err(ParseCannedAclError(s.to_owned())),
        }
    }
}

// ---------------------------------------------------------------------------
// AccessControlList / Grant / Grantee / Permission
// ---------------------------------------------------------------------------

/// An explicit access-control list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessControlList {
    /// The grants making up this ACL.
    pub grants: Vec<Grant>,
}

impl AccessControlList {
    /// Add a grant to this ACL.
    pub fn grant(&mut self, grantee: Grantee, permission: Permission) {
        self.grants.push(Grant {
            grantee,
            permission,
        });
    }
}

/// An ACL grant that pairs a grantee with a permission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Grant {
    /// The entity receiving the permission.
    pub grantee: Grantee,
    /// The permission granted.
    pub permission: Permission,
}

/// A grantee in an ACL grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum Grantee {
    /// A canonical user identified by an account ID.
    CanonicalUser {
        /// The canonical user ID.
        id: String,
    },
    /// A predefined group (e.g. `http://acs.amazonaws.com/groups/global/AllUsers`).
    Group {
        /// The URI of the group.
        uri: String,
    },
    /// A grantee identified by email.
    Email {
        /// The email address of the grantee.
        email: String,
    },
}

/// A permission that can be granted to a grantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Permission {
    /// Grants full control (READ, WRITE, READ_ACP, WRITE_ACP).
    FullControl,
    /// Allows grantee to read the object data.
    Read,
    /// Allows grantee to write the object.
    Write,
    /// Allows grantee to read the object ACL.
    ReadAcp,
    /// Allows grantee to write the object ACL.
    WriteAcp,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::FullControl => "FULL_CONTROL",
            Self::Read => "READ",
            Self::Write => "WRITE",
            Self::ReadAcp => "READ_ACP",
            Self::WriteAcp => "WRITE_ACP",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// StorageClass
// ---------------------------------------------------------------------------

/// Storage class for a stored object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageClass {
    /// Standard storage (default).
    #[default]
    Standard,
    /// Reduced redundancy storage.
    ReducedRedundancy,
    /// Standard infrequent access.
    StandardIa,
    /// One-zone infrequent access.
    OnezoneIa,
    /// Intelligent tiering.
    IntelligentTiering,
    /// Glacier flexible retrieval.
    Glacier,
    /// Glacier deep archive.
    DeepArchive,
}

impl StorageClass {
    /// Return the header value of the storage class.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "STANDARD",
            Self::ReducedRedundancy => "REDUCED_REDUNDANCY",
            Self::StandardIa => "STANDARD_IA",
            Self::OnezoneIa => "ONEZONE_IA",
            Self::IntelligentTiering => "INTELLIGENT_TIERING",
            Self::Glacier => "GLACIER",
            Self::DeepArchive => "DEEP_ARCHIVE",
        }
    }
}

impl fmt::Display for StorageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing a [`StorageClass`] from a string fails.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown storage class: {0}")]
pub struct ParseStorageClassError(String);

impl FromStr for StorageClass {
    type Err = ParseStorageClassError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STANDARD" => Ok(Self::Standard),
            "REDUCED_REDUNDANCY" => Ok(Self::ReducedRedundancy),
            "STANDARD_IA" => Ok(Self::StandardIa),
            "ONEZONE_IA" => Ok(Self::OnezoneIa),
            "INTELLIGENT_TIERING" => Ok(Self::IntelligentTiering),
            "GLACIER" => Ok(Self::Glacier),
            "DEEP_ARCHIVE" => Ok(Self::DeepArchive),
            _ => Err(ParseStorageClassError(s.to_owned())),
        }
    }
}

// ---------------------------------------------------------------------------
// SseCustomerKey
// ---------------------------------------------------------------------------

/// A customer-provided server-side encryption key (SSE-C).
///
/// The key travels as base64 together with the base64 MD5 of the raw key,
/// which the service uses to verify it received the key intact.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SseCustomerKey {
    /// Base64-encoded encryption key.
    pub key: String,
    /// Encryption algorithm (always `AES256`).
    pub algorithm: String,
    /// Base64-encoded MD5 digest of the raw key.
    pub key_md5: String,
}

impl SseCustomerKey {
    /// Build an SSE-C key from raw key bytes.
    ///
    /// # Examples
    ///
    /// ```
    /// use rustack_transfer_model::SseCustomerKey;
    ///
    /// let key = SseCustomerKey::from_raw(&[7u8; 32]);
    /// assert_eq!(key.algorithm, "AES256");
    /// assert_eq!(key.key.len(), 44);
    /// ```
    #[must_use]
    pub fn from_raw(raw: &[u8]) -> Self {
        let md5 = md5::Md5::digest(raw);
        Self {
            key: BASE64_STANDARD.encode(raw),
            algorithm: "AES256".to_owned(),
            key_md5: BASE64_STANDARD.encode(md5),
        }
    }
}

impl fmt::Debug for SseCustomerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SseCustomerKey")
            .field("key", &"<redacted>")
            .field("algorithm", &self.algorithm)
            .field("key_md5", &self.key_md5)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
