// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    fmt,
    io::{self, Read, Seek, SeekFrom, Write},
    mem,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;
use zerocopy::{FromBytes, IntoBytes, byteorder::little_endian};
use zerocopy_derive::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::{
    stream::{FromReader, ReadFixedSizeExt, ToWriter},
    util,
};

/// Magic value for [`RawFooter::magic`].
pub const FOOTER_MAGIC: [u8; 4] = *b"AVBf";

/// The only footer major version that can be read or written.
pub const FOOTER_VERSION_MAJOR: u32 = 2;
/// The only footer minor version that can be read or written.
pub const FOOTER_VERSION_MINOR: u32 = 1;

/// Size of a SHA-256 digest.
pub const DIGEST_LEN: usize = 32;

/// Bytes after the digest that are always zero. A future signature block would
/// live here.
const RESERVED_LEN: usize = 4036;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Digest must be {DIGEST_LEN} bytes, but have {0}")]
    InvalidDigestLength(usize),
    #[error("Footer must be {size} bytes, but have {0}", size = Footer::SIZE)]
    InvalidFooterSize(usize),
    #[error("Invalid footer magic: {0:?}")]
    InvalidFooterMagic([u8; 4]),
    #[error("Unsupported footer version: {major}.{minor}")]
    UnsupportedFooterVersion { major: u32, minor: u32 },
    #[error("Footer reserved region contains non-zero bytes")]
    ReservedNotZero,
    #[error("{0:?} field is out of bounds")]
    FieldOutOfBounds(&'static str),
    #[error("{0} byte image size is too small to fit footer")]
    TooSmallForFooter(u64),
    #[error("I/O error")]
    Io(#[from] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// Raw on-disk layout for the footer. Every field has an explicit offset and
/// length, so no write can spill into a neighboring field.
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C, packed)]
struct RawFooter {
    /// Magic value. This should be equal to [`FOOTER_MAGIC`].
    magic: [u8; 4],
    /// Major version. Must be [`FOOTER_VERSION_MAJOR`].
    version_major: little_endian::U32,
    /// Minor version. Must be [`FOOTER_VERSION_MINOR`].
    version_minor: little_endian::U32,
    /// Size of the image data preceding the padding.
    original_image_size: little_endian::U64,
    /// Total size of the partition, including padding and this footer.
    partition_size: little_endian::U64,
    /// SHA-256 digest of the original image data.
    hash: [u8; DIGEST_LEN],
    /// Always zero.
    reserved: [u8; RESERVED_LEN],
}

const _: () = {
    assert!(mem::offset_of!(RawFooter, magic) == 0);
    assert!(mem::offset_of!(RawFooter, version_major) == 4);
    assert!(mem::offset_of!(RawFooter, version_minor) == 8);
    assert!(mem::offset_of!(RawFooter, original_image_size) == 12);
    assert!(mem::offset_of!(RawFooter, partition_size) == 20);
    assert!(mem::offset_of!(RawFooter, hash) == 28);
    assert!(mem::offset_of!(RawFooter, reserved) == 60);
    assert!(mem::size_of::<RawFooter>() == Footer::SIZE);
};

impl RawFooter {
    fn validate(&self) -> Result<()> {
        if self.magic != FOOTER_MAGIC {
            return Err(Error::InvalidFooterMagic(self.magic));
        }

        let major = self.version_major.get();
        let minor = self.version_minor.get();

        if major != FOOTER_VERSION_MAJOR || minor != FOOTER_VERSION_MINOR {
            return Err(Error::UnsupportedFooterVersion { major, minor });
        }

        if !util::is_zero(&self.reserved) {
            return Err(Error::ReservedNotZero);
        }

        let footer_end = self
            .original_image_size
            .get()
            .checked_add(Footer::SIZE as u64)
            .ok_or(Error::FieldOutOfBounds("original_image_size"))?;
        if footer_end > self.partition_size.get() {
            return Err(Error::FieldOutOfBounds("partition_size"));
        }

        Ok(())
    }
}

/// Parsed footer. The version is not stored because only the current version
/// can be read or written. The algorithm label passed to [`encode_footer`] is
/// not part of the footer.
#[derive(Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct Footer {
    pub original_image_size: u64,
    pub partition_size: u64,
    #[serde(with = "hex")]
    pub hash: [u8; DIGEST_LEN],
}

impl fmt::Debug for Footer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Footer")
            .field("original_image_size", &self.original_image_size)
            .field("partition_size", &self.partition_size)
            .field("hash", &hex::encode(self.hash))
            .finish()
    }
}

impl Footer {
    pub const SIZE: usize = 4096;

    /// Create a footer for the current version. Fails if `hash` is not exactly
    /// [`DIGEST_LEN`] bytes. The digest is never truncated or padded.
    pub fn new(hash: &[u8], original_image_size: u64, partition_size: u64) -> Result<Self> {
        let hash = hash
            .try_into()
            .map_err(|_| Error::InvalidDigestLength(hash.len()))?;

        Ok(Self {
            original_image_size,
            partition_size,
            hash,
        })
    }

    fn to_raw(&self) -> RawFooter {
        RawFooter {
            magic: FOOTER_MAGIC,
            version_major: FOOTER_VERSION_MAJOR.into(),
            version_minor: FOOTER_VERSION_MINOR.into(),
            original_image_size: self.original_image_size.into(),
            partition_size: self.partition_size.into(),
            hash: self.hash,
            reserved: [0u8; RESERVED_LEN],
        }
    }

    /// Serialize to the fixed-size on-disk representation.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf.copy_from_slice(self.to_raw().as_bytes());
        buf
    }

    /// Parse and validate the on-disk representation. `data` must be exactly
    /// [`Self::SIZE`] bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let raw = RawFooter::read_from_bytes(data)
            .map_err(|_| Error::InvalidFooterSize(data.len()))?;
        raw.validate()?;

        Ok(Self {
            original_image_size: raw.original_image_size.get(),
            partition_size: raw.partition_size.get(),
            hash: raw.hash,
        })
    }

    /// Number of zero bytes between the image data and the footer. Returns
    /// [`None`] if the image and footer do not fit in the partition.
    pub fn padding_size(&self) -> Option<u64> {
        self.partition_size
            .checked_sub(self.original_image_size)?
            .checked_sub(Self::SIZE as u64)
    }
}

impl<R: Read> FromReader<R> for Footer {
    type Error = Error;

    fn from_reader(mut reader: R) -> Result<Self> {
        let data = reader.read_array_exact::<{ Footer::SIZE }>()?;

        Self::from_bytes(&data)
    }
}

impl<W: Write> ToWriter<W> for Footer {
    type Error = Error;

    fn to_writer(&self, mut writer: W) -> Result<()> {
        writer.write_all(&self.to_bytes())?;
        Ok(())
    }
}

/// Build the footer block for an image. `algorithm` is accepted so that callers
/// can pass the same parameters as a real signing tool, but it has no effect on
/// the output. Nothing is signed.
pub fn encode_footer(
    hash: &[u8],
    original_image_size: u64,
    partition_size: u64,
    algorithm: &str,
) -> Result<[u8; Footer::SIZE]> {
    trace!("Ignoring algorithm label: {algorithm:?}");

    let footer = Footer::new(hash, original_image_size, partition_size)?;

    Ok(footer.to_bytes())
}

/// Load the footer from the end of the specified reader. Returns the footer and
/// the total size of the reader's data.
pub fn load_footer(mut reader: impl Read + Seek) -> Result<(Footer, u64)> {
    let image_size = reader.seek(SeekFrom::End(0))?;
    if image_size < Footer::SIZE as u64 {
        return Err(Error::TooSmallForFooter(image_size));
    }

    reader.seek(SeekFrom::End(-(Footer::SIZE as i64)))?;
    let footer = Footer::from_reader(&mut reader)?;

    Ok((footer, image_size))
}
