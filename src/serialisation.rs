//! Versioned binary archives
//!
//! Every top level object is written as a little-endian `u32` version tag
//! followed by its bincode body. Reading rejects any other version.
//! Files add a magic and a four byte kind tag in front of the archive.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{corrupted_data, version_mismatch, ForgeResult};

/// Magic bytes of resource files
const FILE_MAGIC: &[u8; 4] = b"MFRG";

/// Type with a versioned archive layout
pub trait Versioned: Serialize + DeserializeOwned {
    /// Layout version written in front of the body
    const VERSION: u32;
    /// Four byte tag identifying the type in resource files
    const KIND: [u8; 4];
}

/// Serialise a value with its version tag
pub fn write_versioned<T: Versioned>(value: &T) -> ForgeResult<Vec<u8>> {
    let body_size = bincode::serialized_size(value)? as usize;
    let mut out = Vec::with_capacity(body_size + 4);
    out.extend_from_slice(&T::VERSION.to_le_bytes());
    bincode::serialize_into(&mut out, value)?;
    Ok(out)
}

/// Deserialise a value written by `write_versioned`
pub fn read_versioned<T: Versioned>(data: &[u8]) -> ForgeResult<T> {
    if data.len() < 4 {
        return Err(corrupted_data("Archive too small to contain a version tag"));
    }
    let found = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    if found != T::VERSION {
        return Err(version_mismatch(T::VERSION, found));
    }
    Ok(bincode::deserialize(&data[4..])?)
}

/// Write a value to a resource file
pub fn save_file<T: Versioned>(path: impl AsRef<Path>, value: &T) -> ForgeResult<()> {
    let archive = write_versioned(value)?;
    let mut out = Vec::with_capacity(archive.len() + 8);
    out.extend_from_slice(FILE_MAGIC);
    out.extend_from_slice(&T::KIND);
    out.extend_from_slice(&archive);
    std::fs::write(path.as_ref(), out)?;
    Ok(())
}

/// Read a value from a resource file
pub fn load_file<T: Versioned>(path: impl AsRef<Path>) -> ForgeResult<T> {
    let data = std::fs::read(path.as_ref())?;
    let kind = file_kind(&data)?;
    if kind != T::KIND {
        return Err(corrupted_data(format!(
            "Resource file holds {} instead of {}",
            String::from_utf8_lossy(&kind),
            String::from_utf8_lossy(&T::KIND)
        )));
    }
    read_versioned(&data[8..])
}

/// Kind tag of a resource file's contents
pub fn file_kind(data: &[u8]) -> ForgeResult<[u8; 4]> {
    if data.len() < 8 || &data[0..4] != FILE_MAGIC {
        return Err(corrupted_data("Invalid resource file magic"));
    }
    Ok([data[4], data[5], data[6], data[7]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ForgeError;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        values: Vec<u32>,
    }

    impl Versioned for Sample {
        const VERSION: u32 = 7;
        const KIND: [u8; 4] = *b"SMPL";
    }

    #[test]
    fn test_version_tag_is_leading() {
        let sample = Sample { name: "a".into(), values: vec![1, 2] };
        let data = write_versioned(&sample).expect("Writing should succeed");
        assert_eq!(&data[0..4], &7u32.to_le_bytes());
        let back: Sample = read_versioned(&data).expect("Reading should succeed");
        assert_eq!(back, sample);
    }

    #[test]
    fn test_version_mismatch_is_rejected() {
        let sample = Sample { name: "a".into(), values: vec![] };
        let mut data = write_versioned(&sample).expect("Writing should succeed");
        data[0] = 8;
        let result: ForgeResult<Sample> = read_versioned(&data);
        assert!(matches!(
            result,
            Err(ForgeError::VersionMismatch { expected: 7, found: 8 })
        ));
    }

    #[test]
    fn test_truncated_archive() {
        let result: ForgeResult<Sample> = read_versioned(&[1, 2]);
        assert!(matches!(result, Err(ForgeError::CorruptedData(_))));
    }
}
