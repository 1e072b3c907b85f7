use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};
use uuid::Uuid;

use super::ZimError;

pub const MAGIC: u32 = 0x044D_495A;
pub const HEADER_SIZE: u64 = 80;
/// Marker for "no main page" / "no layout page".
pub const NO_PAGE: u32 = u32::MAX;

pub const MAJOR_VERSION: u16 = 6;
pub const MINOR_VERSION: u16 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub major_version:  u16,
    pub minor_version:  u16,
    pub uuid:           Uuid,
    pub entry_count:    u32,
    pub cluster_count:  u32,
    pub path_ptr_pos:   u64,
    pub title_ptr_pos:  u64,
    pub cluster_ptr_pos: u64,
    pub mime_list_pos:  u64,
    pub main_page:      u32,
    pub layout_page:    u32,
    pub checksum_pos:   u64,
}

impl Header {
    pub fn new() -> Self {
        Self {
            major_version:   MAJOR_VERSION,
            minor_version:   MINOR_VERSION,
            uuid:            Uuid::new_v4(),
            entry_count:     0,
            cluster_count:   0,
            path_ptr_pos:    0,
            title_ptr_pos:   0,
            cluster_ptr_pos: 0,
            mime_list_pos:   HEADER_SIZE,
            main_page:       NO_PAGE,
            layout_page:     NO_PAGE,
            checksum_pos:    0,
        }
    }

    /// Archives from 6.1 on keep all user content in namespace `C`.
    pub fn uses_new_namespaces(&self) -> bool {
        self.major_version >= 6 && self.minor_version >= 1
    }

    pub fn main_page(&self) -> Option<u32> {
        (self.main_page != NO_PAGE).then_some(self.main_page)
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(MAGIC)?;
        writer.write_u16::<LittleEndian>(self.major_version)?;
        writer.write_u16::<LittleEndian>(self.minor_version)?;
        writer.write_all(self.uuid.as_bytes())?;
        writer.write_u32::<LittleEndian>(self.entry_count)?;
        writer.write_u32::<LittleEndian>(self.cluster_count)?;
        writer.write_u64::<LittleEndian>(self.path_ptr_pos)?;
        writer.write_u64::<LittleEndian>(self.title_ptr_pos)?;
        writer.write_u64::<LittleEndian>(self.cluster_ptr_pos)?;
        writer.write_u64::<LittleEndian>(self.mime_list_pos)?;
        writer.write_u32::<LittleEndian>(self.main_page)?;
        writer.write_u32::<LittleEndian>(self.layout_page)?;
        writer.write_u64::<LittleEndian>(self.checksum_pos)?;
        Ok(())
    }

    pub fn read<R: Read>(mut reader: R) -> Result<Self, ZimError> {
        let magic = reader.read_u32::<LittleEndian>()?;
        if magic != MAGIC {
            return Err(ZimError::InvalidMagic(magic));
        }
        let major_version = reader.read_u16::<LittleEndian>()?;
        if !(5..=6).contains(&major_version) {
            return Err(ZimError::UnsupportedVersion(major_version));
        }
        let minor_version = reader.read_u16::<LittleEndian>()?;
        let mut uuid_bytes = [0u8; 16];
        reader.read_exact(&mut uuid_bytes)?;
        Ok(Self {
            major_version,
            minor_version,
            uuid:            Uuid::from_bytes(uuid_bytes),
            entry_count:     reader.read_u32::<LittleEndian>()?,
            cluster_count:   reader.read_u32::<LittleEndian>()?,
            path_ptr_pos:    reader.read_u64::<LittleEndian>()?,
            title_ptr_pos:   reader.read_u64::<LittleEndian>()?,
            cluster_ptr_pos: reader.read_u64::<LittleEndian>()?,
            mime_list_pos:   reader.read_u64::<LittleEndian>()?,
            main_page:       reader.read_u32::<LittleEndian>()?,
            layout_page:     reader.read_u32::<LittleEndian>()?,
            checksum_pos:    reader.read_u64::<LittleEndian>()?,
        })
    }
}

impl Default for Header {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn header_is_eighty_bytes() {
        let mut buf = Vec::new();
        Header::new().write(&mut buf).unwrap();
        assert_eq!(buf.len() as u64, HEADER_SIZE);
        let back = Header::read(Cursor::new(&buf)).unwrap();
        assert_eq!(back.main_page(), None);
        assert!(back.uses_new_namespaces());
    }

    #[test]
    fn rejects_foreign_magic() {
        let buf = b".6cy\x01\x00\x00\x00".to_vec();
        assert!(matches!(Header::read(Cursor::new(buf)), Err(ZimError::InvalidMagic(_))));
    }

    #[test]
    fn rejects_unknown_major_version() {
        let mut h = Header::new();
        h.major_version = 9;
        let mut buf = Vec::new();
        h.write(&mut buf).unwrap();
        assert!(matches!(Header::read(Cursor::new(buf)), Err(ZimError::UnsupportedVersion(9))));
    }
}
