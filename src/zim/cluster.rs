use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read};

use super::codec::{get_codec, CodecError, Compression};
use super::ZimError;

/// Info-byte flag: blob offsets are 64-bit.
pub const EXTENDED_FLAG: u8 = 0x10;

#[derive(Debug, Clone)]
enum ClusterBody {
    /// Decompressed cluster data, offset table included.
    Decoded(Vec<u8>),
    /// Stored cluster left on disk; blob bytes are read on demand.
    Stored { data_pos: u64 },
}

/// A parsed cluster: its blob offset table plus either the decoded bytes or
/// the on-disk position of the stored bytes.
#[derive(Debug, Clone)]
pub struct Cluster {
    pub compression: Compression,
    pub extended:    bool,
    offsets:         Vec<u64>,
    body:            ClusterBody,
}

impl Cluster {
    /// Split a cluster info byte into compression and extended flag.
    pub fn parse_info(info: u8) -> Result<(Compression, bool), CodecError> {
        Ok((Compression::from_code(info)?, info & EXTENDED_FLAG != 0))
    }

    /// Build from fully decompressed cluster data.
    pub fn decoded(compression: Compression, extended: bool, data: Vec<u8>) -> Result<Self, ZimError> {
        let data_len = data.len() as u64;
        let offsets = read_offsets(&mut Cursor::new(&data), extended, data_len)?;
        Ok(Self { compression, extended, offsets, body: ClusterBody::Decoded(data) })
    }

    /// Build for a stored cluster whose data starts at `data_pos` in the
    /// archive.  `reader` must be positioned at `data_pos`; only the offset
    /// table is consumed.
    pub fn stored<R: Read>(extended: bool, data_pos: u64, data_len: u64, reader: &mut R) -> Result<Self, ZimError> {
        let offsets = read_offsets(reader, extended, data_len)?;
        Ok(Self {
            compression: Compression::None,
            extended,
            offsets,
            body: ClusterBody::Stored { data_pos },
        })
    }

    pub fn blob_count(&self) -> u32 {
        (self.offsets.len() - 1) as u32
    }

    /// `[start, end)` of `blob` relative to the cluster data.
    pub fn blob_bounds(&self, blob: u32) -> Result<(u64, u64), ZimError> {
        let i = blob as usize;
        if i + 1 >= self.offsets.len() {
            return Err(ZimError::Corrupt(format!(
                "blob {blob} out of range (cluster holds {})", self.blob_count()
            )));
        }
        Ok((self.offsets[i], self.offsets[i + 1]))
    }

    pub fn blob_size(&self, blob: u32) -> Result<u64, ZimError> {
        let (start, end) = self.blob_bounds(blob)?;
        Ok(end - start)
    }

    /// Absolute archive position of `blob`'s first byte, for stored clusters.
    pub fn stored_position(&self, blob: u32) -> Result<Option<u64>, ZimError> {
        let (start, _) = self.blob_bounds(blob)?;
        Ok(match self.body {
            ClusterBody::Stored { data_pos } => Some(data_pos + start),
            ClusterBody::Decoded(_)          => None,
        })
    }

    /// Bytes `[start, end)` of `blob`, for decoded clusters.
    /// Callers clamp the range against [`blob_size`](Self::blob_size).
    pub fn decoded_slice(&self, blob: u32, start: u64, end: u64) -> Result<Option<&[u8]>, ZimError> {
        let (b_start, _) = self.blob_bounds(blob)?;
        Ok(match &self.body {
            ClusterBody::Decoded(data) => {
                let from = (b_start + start) as usize;
                let to   = (b_start + end) as usize;
                Some(&data[from..to])
            }
            ClusterBody::Stored { .. } => None,
        })
    }
}

/// Read and validate a blob offset table.
///
/// The first offset doubles as the table length: it points just past the
/// table, so `first / word_size` offsets follow (the last one marks the end
/// of the final blob).
fn read_offsets<R: Read>(reader: &mut R, extended: bool, data_len: u64) -> Result<Vec<u64>, ZimError> {
    let word = if extended { 8 } else { 4 };
    let read_one = |r: &mut R| -> Result<u64, ZimError> {
        Ok(if extended {
            r.read_u64::<LittleEndian>()?
        } else {
            r.read_u32::<LittleEndian>()? as u64
        })
    };

    let first = read_one(reader)?;
    if first < word || first % word != 0 || first > data_len {
        return Err(ZimError::Corrupt(format!("bad first blob offset {first}")));
    }
    let count = (first / word) as usize;
    let mut offsets = Vec::with_capacity(count);
    offsets.push(first);
    for _ in 1..count {
        let off = read_one(reader)?;
        let prev = offsets[offsets.len() - 1];
        if off < prev || off > data_len {
            return Err(ZimError::Corrupt(format!("blob offset {off} out of order or past cluster end")));
        }
        offsets.push(off);
    }
    Ok(offsets)
}

/// Serialize `blobs` into one cluster: info byte followed by the
/// (compressed) offset table and blob data.
pub fn encode_cluster(blobs: &[Vec<u8>], compression: Compression) -> Result<Vec<u8>, CodecError> {
    let total: u64 = blobs.iter().map(|b| b.len() as u64).sum();
    let table_narrow = 4 * (blobs.len() as u64 + 1);
    let extended = table_narrow + total > u32::MAX as u64;
    let word = if extended { 8 } else { 4 };

    let mut raw = Vec::with_capacity((table_narrow + total) as usize);
    let mut offset = word * (blobs.len() as u64 + 1);
    for blob in blobs.iter().map(Some).chain(std::iter::once(None)) {
        if extended {
            raw.write_u64::<LittleEndian>(offset)?;
        } else {
            raw.write_u32::<LittleEndian>(offset as u32)?;
        }
        if let Some(b) = blob {
            offset += b.len() as u64;
        }
    }
    for blob in blobs {
        raw.extend_from_slice(blob);
    }

    let payload = get_codec(compression).compress(&raw)?;
    let mut info = compression.code();
    if extended {
        info |= EXTENDED_FLAG;
    }
    let mut out = Vec::with_capacity(payload.len() + 1);
    out.push(info);
    out.extend_from_slice(&payload);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(encoded: &[u8]) -> Cluster {
        let (compression, extended) = Cluster::parse_info(encoded[0]).unwrap();
        let data = get_codec(compression).decompress(&encoded[1..]).unwrap();
        Cluster::decoded(compression, extended, data).unwrap()
    }

    #[test]
    fn blobs_keep_their_bounds() {
        let blobs = vec![b"alpha".to_vec(), Vec::new(), b"gamma!".to_vec()];
        let cluster = parse(&encode_cluster(&blobs, Compression::Zstd).unwrap());
        assert_eq!(cluster.blob_count(), 3);
        assert_eq!(cluster.blob_size(1).unwrap(), 0);
        assert_eq!(cluster.decoded_slice(2, 1, 4).unwrap().unwrap(), b"amm");
        assert!(cluster.blob_bounds(3).is_err());
    }

    #[test]
    fn stored_cluster_reads_only_the_table() {
        let blobs = vec![b"one".to_vec(), b"three".to_vec()];
        let encoded = encode_cluster(&blobs, Compression::None).unwrap();
        let (compression, extended) = Cluster::parse_info(encoded[0]).unwrap();
        assert_eq!(compression, Compression::None);
        let data = &encoded[1..];
        let mut cursor = Cursor::new(data);
        let cluster = Cluster::stored(extended, 100, data.len() as u64, &mut cursor).unwrap();
        // 3 offsets * 4 bytes
        assert_eq!(cursor.position(), 12);
        assert_eq!(cluster.stored_position(1).unwrap(), Some(100 + 12 + 3));
    }

    #[test]
    fn extended_offsets_parse() {
        let mut data = Vec::new();
        for off in [24u64, 26, 29] {
            data.extend_from_slice(&off.to_le_bytes());
        }
        data.extend_from_slice(b"hiyou");
        let cluster = Cluster::decoded(Compression::None, true, data).unwrap();
        assert_eq!(cluster.blob_count(), 2);
        assert_eq!(cluster.decoded_slice(1, 0, 3).unwrap().unwrap(), b"you");
    }

    #[test]
    fn offset_past_end_is_corrupt() {
        let mut data = Vec::new();
        for off in [8u32, 64] {
            data.extend_from_slice(&off.to_le_bytes());
        }
        assert!(matches!(
            Cluster::decoded(Compression::None, false, data),
            Err(ZimError::Corrupt(_))
        ));
    }
}
