use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Sub};

/// Memory region and queue pair access permissions.
///
/// Bit values are those of `enum ibv_access_flags` so they pass through to
/// libibverbs unchanged.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct Permission(u32);

impl Permission {
    pub const EMPTY: Self = Self(0);
    pub const LOCAL_WRITE: Self = Self(1 << 0);
    pub const REMOTE_WRITE: Self = Self(1 << 1);
    pub const REMOTE_READ: Self = Self(1 << 2);
    pub const REMOTE_ATOMIC: Self = Self(1 << 3);

    /// Inbound buffers: peers deposit messages here.
    pub const INBOUND: Self = Self(Self::LOCAL_WRITE.0 | Self::REMOTE_WRITE.0);

    /// Outbound buffers: only ever the source of one-sided writes.
    pub const OUTBOUND: Self = Self::LOCAL_WRITE;

    /// Access granted to the peer on a connected queue pair.
    pub const QP_ACCESS: Self =
        Self(Self::LOCAL_WRITE.0 | Self::REMOTE_READ.0 | Self::REMOTE_WRITE.0);

    /// Raw flag bits.
    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Whether every flag in `other` is also set in `self`.
    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl fmt::Debug for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(Permission, &str); 4] = [
            (Permission::LOCAL_WRITE, "LOCAL_WRITE"),
            (Permission::REMOTE_WRITE, "REMOTE_WRITE"),
            (Permission::REMOTE_READ, "REMOTE_READ"),
            (Permission::REMOTE_ATOMIC, "REMOTE_ATOMIC"),
        ];
        let mut first = true;
        f.write_str("Permission(")?;
        for (flag, name) in NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str(" | ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        f.write_str(")")
    }
}

impl From<Permission> for i32 {
    fn from(p: Permission) -> Self {
        p.0 as _
    }
}

impl BitOr for Permission {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for Permission {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Permission {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self::Output {
        Self(self.0 & rhs.0)
    }
}

impl Sub for Permission {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 & !rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_permissions() {
        assert!(Permission::INBOUND.contains(Permission::REMOTE_WRITE));
        assert!(!Permission::OUTBOUND.contains(Permission::REMOTE_WRITE));
        assert_eq!(Permission::QP_ACCESS.bits(), 0b111);
        assert_eq!(Permission::QP_ACCESS - Permission::REMOTE_READ, Permission::INBOUND);
        assert_eq!(
            format!("{:?}", Permission::INBOUND),
            "Permission(LOCAL_WRITE | REMOTE_WRITE)"
        );
    }
}
