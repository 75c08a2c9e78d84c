//! Save states. A snapshot is the bincode encoding of the entire `Gba`, cartridge ROM included, so it can be restored
//! into any instance regardless of what that instance was running before. Host side state (the frame and audio
//! buffers, pending serial output, configuration) is not part of it.

use crate::gba::Gba;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("failed to encode snapshot: {0}")]
    Encode(bincode::Error),
    #[error("malformed snapshot: {0}")]
    Decode(bincode::Error),
    #[error("snapshot does not contain a cartridge image")]
    MissingCartridge,
}

/// An owned, opaque copy of the machine state.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    data: Vec<u8>,
}

impl Snapshot {
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Wraps bytes previously obtained from `as_bytes`. They're not validated until the snapshot is restored.
    pub fn from_bytes(data: Vec<u8>) -> Snapshot {
        Snapshot { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

pub(crate) fn encode(gba: &Gba) -> Result<Snapshot, SnapshotError> {
    let mut data = Vec::new();
    bincode::serialize_into(&mut data, gba).map_err(SnapshotError::Encode)?;
    Ok(Snapshot { data })
}

pub(crate) fn decode(snapshot: &Snapshot) -> Result<Gba, SnapshotError> {
    bincode::deserialize_from(&snapshot.data[..]).map_err(SnapshotError::Decode)
}
