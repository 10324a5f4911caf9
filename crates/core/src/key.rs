//! Keys and digests
//!
//! A [`Key`] names one record: namespace, set, and an optional user value.
//! Routing and every identity comparison use the 20-byte [`Digest`], a
//! RIPEMD-160 hash over the set name, the user key's particle type and the
//! user key bytes. The digest is computed once at construction and never
//! changes afterwards.

use crate::error::{Error, Result};
use crate::value::Value;
use ripemd::{Digest as _, Ripemd160};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Digest length in bytes
pub const DIGEST_SIZE: usize = 20;

/// Number of partitions per namespace
pub const PARTITIONS: u32 = 4096;

/// Record identity used for routing and for transaction bookkeeping.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest(pub [u8; DIGEST_SIZE]);

impl Digest {
    /// Hash a set name and user key into a digest.
    ///
    /// Only `Int`, `String` and `Blob` user keys are accepted.
    pub fn compute(set_name: &str, user_key: &Value) -> Result<Digest> {
        let mut hasher = Ripemd160::new();
        hasher.update(set_name.as_bytes());
        hasher.update([user_key.particle_type() as u8]);
        match user_key {
            Value::Int(i) => hasher.update(i.to_be_bytes()),
            Value::String(s) => hasher.update(s.as_bytes()),
            Value::Blob(b) => hasher.update(b),
            other => {
                return Err(Error::InvalidArgument(format!(
                    "unsupported user key type: {}",
                    other.type_name()
                )))
            }
        }
        let mut out = [0u8; DIGEST_SIZE];
        out.copy_from_slice(&hasher.finalize());
        Ok(Digest(out))
    }

    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8; DIGEST_SIZE] {
        &self.0
    }

    /// Partition that owns this digest.
    pub fn partition_id(&self) -> u32 {
        u16::from_le_bytes([self.0[0], self.0[1]]) as u32 % PARTITIONS
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0.iter() {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// Record key: namespace, set name, optional user value and digest.
///
/// Two keys are equal when namespace and digest are equal, regardless of
/// whether either carries the original user value.
#[derive(Clone)]
pub struct Key {
    namespace: String,
    set_name: String,
    user_key: Option<Value>,
    digest: Digest,
}

impl Key {
    /// Create a key from a user value, computing its digest.
    pub fn new(
        namespace: impl Into<String>,
        set_name: impl Into<String>,
        user_key: impl Into<Value>,
    ) -> Result<Key> {
        let set_name = set_name.into();
        let user_key = user_key.into();
        let digest = Digest::compute(&set_name, &user_key)?;
        Ok(Key {
            namespace: namespace.into(),
            set_name,
            user_key: Some(user_key),
            digest,
        })
    }

    /// Create a key from an already-known digest.
    pub fn with_digest(
        namespace: impl Into<String>,
        set_name: impl Into<String>,
        digest: Digest,
    ) -> Key {
        Key {
            namespace: namespace.into(),
            set_name: set_name.into(),
            user_key: None,
            digest,
        }
    }

    /// Namespace
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Set name (may be empty)
    pub fn set_name(&self) -> &str {
        &self.set_name
    }

    /// User key, when the key was built from one
    pub fn user_key(&self) -> Option<&Value> {
        self.user_key.as_ref()
    }

    /// Digest
    pub fn digest(&self) -> &Digest {
        &self.digest
    }

    /// Partition that owns this key
    pub fn partition_id(&self) -> u32 {
        self.digest.partition_id()
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.digest == other.digest && self.namespace == other.namespace
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.namespace.hash(state);
        self.digest.hash(state);
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:", self.namespace, self.set_name)?;
        match &self.user_key {
            Some(v) => write!(f, "{}:", v)?,
            None => write!(f, "-:")?,
        }
        write!(f, "{}", self.digest)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_digest_is_stable_for_same_inputs() {
        let a = Key::new("test", "users", "alice").unwrap();
        let b = Key::new("test", "users", "alice").unwrap();
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn test_digest_depends_on_set_and_type() {
        let a = Key::new("test", "users", "1").unwrap();
        let b = Key::new("test", "orders", "1").unwrap();
        let c = Key::new("test", "users", 1i64).unwrap();
        assert_ne!(a.digest(), b.digest());
        assert_ne!(a.digest(), c.digest());
    }

    #[test]
    fn test_namespace_does_not_change_digest() {
        let a = Key::new("ns1", "s", 7i64).unwrap();
        let b = Key::new("ns2", "s", 7i64).unwrap();
        assert_eq!(a.digest(), b.digest());
        assert_ne!(a, b);
    }

    #[test]
    fn test_unsupported_user_key_rejected() {
        let err = Key::new("test", "s", Value::List(vec![])).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(Key::new("test", "s", 1.5).is_err());
    }

    #[test]
    fn test_with_digest_equals_original() {
        let a = Key::new("test", "s", "k").unwrap();
        let b = Key::with_digest("test", "s", *a.digest());
        assert_eq!(a, b);
        assert!(b.user_key().is_none());
    }

    #[test]
    fn test_partition_id_in_range() {
        let k = Key::new("test", "s", "k").unwrap();
        assert!(k.partition_id() < PARTITIONS);
        let d = Digest([0xff; DIGEST_SIZE]);
        assert_eq!(d.partition_id(), 0xffff % PARTITIONS);
    }

    #[test]
    fn test_digest_display_is_hex() {
        let d = Digest([0xab; DIGEST_SIZE]);
        assert_eq!(d.to_string(), "ab".repeat(DIGEST_SIZE));
    }

    proptest! {
        #[test]
        fn prop_digest_is_pure(set in "[a-z]{0,12}", user in any::<i64>(), text in ".{0,32}") {
            let a = Digest::compute(&set, &Value::Int(user)).unwrap();
            let b = Digest::compute(&set, &Value::Int(user)).unwrap();
            prop_assert_eq!(a, b);

            let s1 = Digest::compute(&set, &Value::String(text.clone())).unwrap();
            let s2 = Digest::compute(&set, &Value::String(text)).unwrap();
            prop_assert_eq!(s1, s2);
        }
    }
}
