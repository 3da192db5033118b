//! Per-resource permission bitmasks. Default deny.

use std::fmt;
use std::str::FromStr;

use dashmap::DashMap;
use tmplguard_core::error::{GuardError, Result};

/// User id whose grants apply to every user.
pub const PUBLIC_USER: &str = "*";

const ALL_BITS: u8 = 0b1111;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    Read,
    Write,
    Execute,
    Delete,
    /// Every other permission.
    Admin,
}

impl Permission {
    pub fn bits(self) -> u8 {
        match self {
            Permission::Read => 1,
            Permission::Write => 2,
            Permission::Execute => 4,
            Permission::Delete => 8,
            Permission::Admin => ALL_BITS,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Permission::Read => "read",
            Permission::Write => "write",
            Permission::Execute => "execute",
            Permission::Delete => "delete",
            Permission::Admin => "admin",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = GuardError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "read" => Ok(Permission::Read),
            "write" => Ok(Permission::Write),
            "execute" => Ok(Permission::Execute),
            "delete" => Ok(Permission::Delete),
            "admin" => Ok(Permission::Admin),
            other => Err(GuardError::InvalidContext(format!("unknown permission: {other}"))),
        }
    }
}

#[derive(Default)]
pub struct PermissionManager {
    masks: DashMap<(String, String), u8>,
}

impl PermissionManager {
    pub fn new() -> Self {
        Self {
            masks: DashMap::new(),
        }
    }

    pub fn grant(&self, user: &str, resource: &str, permission: Permission) {
        let mut mask = self
            .masks
            .entry((user.to_string(), resource.to_string()))
            .or_insert(0);
        *mask |= permission.bits();
        tracing::debug!(user = %user, resource = %resource, permission = %permission, "permission granted");
    }

    /// Grant to every user via the wildcard tier.
    pub fn grant_public(&self, resource: &str, permission: Permission) {
        self.grant(PUBLIC_USER, resource, permission);
    }

    /// Clears the permission's bits. Revoking `Admin` clears everything.
    pub fn revoke(&self, user: &str, resource: &str, permission: Permission) {
        let key = (user.to_string(), resource.to_string());
        if let Some(mut mask) = self.masks.get_mut(&key) {
            *mask &= !permission.bits();
        }
        self.masks.remove_if(&key, |_, m| *m == 0);
        tracing::debug!(user = %user, resource = %resource, permission = %permission, "permission revoked");
    }

    pub fn revoke_all(&self, user: &str, resource: &str) {
        self.masks.remove(&(user.to_string(), resource.to_string()));
    }

    pub fn has_permission(&self, user: &str, resource: &str, permission: Permission) -> bool {
        let want = permission.bits();
        let held = self.mask(user, resource) | self.mask(PUBLIC_USER, resource);
        held & want == want
    }

    /// Same as [`has_permission`](Self::has_permission), parsing the name first.
    pub fn has_named_permission(&self, user: &str, resource: &str, permission: &str) -> Result<bool> {
        Ok(self.has_permission(user, resource, permission.parse()?))
    }

    #[allow(clippy::panic)]
    fn mask(&self, user: &str, resource: &str) -> u8 {
        let mask = self
            .masks
            .get(&(user.to_string(), resource.to_string()))
            .map(|m| *m)
            .unwrap_or(0);
        // Only grant/revoke write masks, and they stay within the four bits.
        if mask & !ALL_BITS != 0 {
            panic!("permission table corrupted: mask {mask:#x} for resource `{resource}`");
        }
        mask
    }
}
