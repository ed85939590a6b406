// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Identifiers of virtual topology objects.

use super::ConfigError;
use alloc::string::ToString;
use core::fmt;
use core::fmt::Display;
use core::str::FromStr;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$attr:meta])* $name:ident) => {
        $(#[$attr])*
        #[derive(
            Clone,
            Copy,
            Debug,
            Deserialize,
            Eq,
            Hash,
            Ord,
            PartialEq,
            PartialOrd,
            Serialize,
        )]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub const fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            pub const fn from_u128(v: u128) -> Self {
                Self(Uuid::from_u128(v))
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl FromStr for $name {
            type Err = ConfigError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse::<Uuid>()
                    .map(Self)
                    .map_err(|_| ConfigError::BadId(s.to_string()))
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// A virtual port, the attachment point of a VM interface or the
    /// link between two forwarding elements.
    PortId
);

uuid_id!(
    /// A named group of ports.
    GroupId
);

uuid_id!(
    /// A forwarding element (bridge or router) of the virtual topology.
    DeviceId
);

uuid_id!(
    /// The key under which a rule's condition is stored.
    RuleId
);

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_and_display() {
        let s = "6a3cc0d1-2f11-4c9b-9a55-0f0a3d7c1e22";
        let id: PortId = s.parse().unwrap();
        assert_eq!(id.to_string(), s);
        assert!(matches!(
            "not-a-uuid".parse::<DeviceId>(),
            Err(ConfigError::BadId(_))
        ));
    }

    #[test]
    fn transparent_serde() {
        let id = GroupId::from_u128(0x1234);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"00000000-0000-0000-0000-000000001234\"");
        assert_eq!(serde_json::from_str::<GroupId>(&json).unwrap(), id);
    }
}
