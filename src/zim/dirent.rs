//! Directory entries.
//!
//! ```text
//! u16  mime index     (0xFFFF redirect, 0xFFFE link target, 0xFFFD deleted)
//! u8   parameter length
//! u8   namespace
//! u32  revision
//! u32  cluster | redirect index      (absent for link target / deleted)
//! u32  blob                          (content entries only)
//! str  path   NUL-terminated
//! str  title  NUL-terminated, empty = same as path
//! [u8] parameter bytes
//! ```

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, BufRead, Write};

use super::ZimError;

pub const MIME_REDIRECT:    u16 = 0xFFFF;
pub const MIME_LINK_TARGET: u16 = 0xFFFE;
pub const MIME_DELETED:     u16 = 0xFFFD;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirentKind {
    Content { mime: u16, cluster: u32, blob: u32 },
    Redirect { target: u32 },
    /// Link target or deleted entry; carries no payload.
    Unused,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dirent {
    pub namespace: char,
    pub path:      String,
    pub title:     String,
    pub kind:      DirentKind,
}

impl Dirent {
    pub fn title(&self) -> &str {
        if self.title.is_empty() { &self.path } else { &self.title }
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self.kind, DirentKind::Redirect { .. })
    }

    pub fn read<R: BufRead>(mut reader: R) -> Result<Self, ZimError> {
        let mime = reader.read_u16::<LittleEndian>()?;
        let param_len = reader.read_u8()?;
        let namespace = reader.read_u8()? as char;
        let _revision = reader.read_u32::<LittleEndian>()?;

        let kind = match mime {
            MIME_REDIRECT => DirentKind::Redirect {
                target: reader.read_u32::<LittleEndian>()?,
            },
            MIME_LINK_TARGET | MIME_DELETED => DirentKind::Unused,
            mime => DirentKind::Content {
                mime,
                cluster: reader.read_u32::<LittleEndian>()?,
                blob:    reader.read_u32::<LittleEndian>()?,
            },
        };

        let path  = read_cstr(&mut reader)?;
        let title = read_cstr(&mut reader)?;
        let mut param = vec![0u8; param_len as usize];
        reader.read_exact(&mut param)?;

        Ok(Self { namespace, path, title, kind })
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        let mime = match self.kind {
            DirentKind::Content { mime, .. } => mime,
            DirentKind::Redirect { .. }      => MIME_REDIRECT,
            DirentKind::Unused               => MIME_DELETED,
        };
        writer.write_u16::<LittleEndian>(mime)?;
        writer.write_u8(0)?;
        writer.write_u8(self.namespace as u8)?;
        writer.write_u32::<LittleEndian>(0)?;
        match self.kind {
            DirentKind::Content { cluster, blob, .. } => {
                writer.write_u32::<LittleEndian>(cluster)?;
                writer.write_u32::<LittleEndian>(blob)?;
            }
            DirentKind::Redirect { target } => writer.write_u32::<LittleEndian>(target)?,
            DirentKind::Unused => {}
        }
        writer.write_all(self.path.as_bytes())?;
        writer.write_u8(0)?;
        // Title identical to path is stored empty.
        if self.title != self.path {
            writer.write_all(self.title.as_bytes())?;
        }
        writer.write_u8(0)?;
        Ok(())
    }
}

/// Read a NUL-terminated UTF-8 string.
pub fn read_cstr<R: BufRead>(reader: &mut R) -> Result<String, ZimError> {
    let mut buf = Vec::new();
    reader.read_until(0, &mut buf)?;
    if buf.pop() != Some(0) {
        return Err(ZimError::Corrupt("unterminated string".into()));
    }
    String::from_utf8(buf).map_err(|e| ZimError::Corrupt(format!("non UTF-8 string: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn redirect_has_no_blob_field() {
        let d = Dirent {
            namespace: 'C',
            path:      "old".into(),
            title:     "old".into(),
            kind:      DirentKind::Redirect { target: 7 },
        };
        let mut buf = Vec::new();
        d.write(&mut buf).unwrap();
        // 2 + 1 + 1 + 4 + 4 + "old\0" + "\0"
        assert_eq!(buf.len(), 12 + 4 + 1);
        let back = Dirent::read(Cursor::new(buf)).unwrap();
        assert_eq!(back.kind, DirentKind::Redirect { target: 7 });
        assert_eq!(back.title(), "old");
    }

    #[test]
    fn truncated_path_is_corrupt() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&[0, b'C']);
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(b"home");
        assert!(matches!(Dirent::read(Cursor::new(buf)), Err(ZimError::Corrupt(_))));
    }
}
