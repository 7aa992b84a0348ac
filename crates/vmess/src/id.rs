use std::fmt;

use md5::{Digest, Md5};
use uuid::Uuid;

use crate::crypto;

const CMD_KEY_SALT: &[u8] = b"c48619fe-8f02-49e0-b9e9-edf763e17e21";
const NEXT_ID_SALT: &[u8] = b"16167dc8-16b6-4e6d-b8bb-65dd68113a81";
const NEXT_ID_RETRY_SALT: &[u8] = b"533eff8a-4113-4b10-b5ce-0f5d76b98cd2";

/// One secret a peer can authenticate with, plus the header key derived
/// from it.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ID {
    uuid: Uuid,
    cmd_key: [u8; 16],
}

impl ID {
    pub fn new(uuid: Uuid) -> Self {
        let cmd_key = crypto::md5(&[uuid.as_bytes(), CMD_KEY_SALT]);
        Self { uuid, cmd_key }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn cmd_key(&self) -> [u8; 16] {
        self.cmd_key
    }

    pub fn auth_hash(&self, timestamp: i64) -> [u8; 16] {
        crypto::auth_hash(self.uuid.as_bytes(), timestamp)
    }

    /// One-way step to the next alternate ID. Never returns `self`.
    pub fn next(&self) -> ID {
        let mut hasher = Md5::new();
        hasher.update(self.uuid.as_bytes());
        hasher.update(NEXT_ID_SALT);
        loop {
            let candidate: [u8; 16] = hasher.clone().finalize().into();
            if candidate != *self.uuid.as_bytes() {
                return ID::new(Uuid::from_bytes(candidate));
            }
            hasher.update(NEXT_ID_RETRY_SALT);
        }
    }
}

// secrets stay out of logs
impl fmt::Debug for ID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ID(..)")
    }
}

/// `count` alternates chained from `primary`.
pub fn alter_ids(primary: &ID, count: u16) -> Vec<ID> {
    let mut prev = *primary;
    (0..count)
        .map(|_| {
            prev = prev.next();
            prev
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    const UUID: &str = "b831381d-6324-4d53-ad4f-8cda48b30811";

    #[test]
    fn cmd_key_is_md5_of_uuid_and_salt() {
        let uuid = Uuid::parse_str(UUID).unwrap();
        let id = ID::new(uuid);
        let mut hasher = Md5::new();
        hasher.update(uuid.as_bytes());
        hasher.update(b"c48619fe-8f02-49e0-b9e9-edf763e17e21");
        let expected: [u8; 16] = hasher.finalize().into();
        assert_eq!(id.cmd_key(), expected);
    }

    #[test]
    fn alternates_are_deterministic_and_distinct() {
        let primary = ID::new(Uuid::parse_str(UUID).unwrap());
        let first = alter_ids(&primary, 8);
        let second = alter_ids(&primary, 8);
        assert_eq!(first, second);

        let mut seen: HashSet<Uuid> = first.iter().map(ID::uuid).collect();
        seen.insert(primary.uuid());
        assert_eq!(seen.len(), 9);
        assert_eq!(first[1], first[0].next());
    }

    #[test]
    fn debug_hides_secret() {
        let id = ID::new(Uuid::parse_str(UUID).unwrap());
        assert_eq!(format!("{:?}", id), "ID(..)");
    }
}
