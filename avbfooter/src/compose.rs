// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! Appending a footer to an image so that it exactly fills a partition.
//!
//! The composed image has the layout:
//!
//! ```text
//! [original image][zero padding][footer (4096 bytes)]
//! ```
//!
//! The whole image and the composed output are held in memory at the same
//! time. This is fine for boot images, but means that the usable image size is
//! bounded by available memory.

use std::{
    ffi::{OsStr, OsString},
    fs,
    io::{self, Read, Seek, Write},
    path::{Path, PathBuf},
};

use ring::digest::Context;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, trace};

use crate::{
    format::footer::{self, Footer},
    stream::{CountingWriter, HashingReader, WriteZerosExt},
    util::{self, NumBytes},
};

/// Partition size used when none is specified.
pub const DEFAULT_PARTITION_SIZE: u64 = 100_663_296;

/// Algorithm label used when none is specified.
pub const DEFAULT_ALGORITHM: &str = "SHA256_RSA4096";

#[derive(Debug, Error)]
pub enum Error {
    #[error("Image size ({image_size}) exceeds partition size ({partition_size})")]
    PartitionTooSmall { image_size: u64, partition_size: u64 },
    #[error(
        "Image size ({image_size}) plus {size} byte footer exceeds partition size ({partition_size})",
        size = Footer::SIZE
    )]
    FooterDoesNotFit { image_size: u64, partition_size: u64 },
    #[error("Expected hash {expected}, but have {actual}")]
    HashMismatch { expected: String, actual: String },
    #[error("Expected image size {expected}, but have {actual}")]
    SizeMismatch { expected: u64, actual: u64 },
    #[error("Padding between image and footer contains non-zero bytes")]
    PaddingNotZero,
    #[error("Failed to read image: {0:?}")]
    ReadImage(PathBuf, #[source] io::Error),
    #[error("Failed to write image: {0:?}")]
    WriteImage(PathBuf, #[source] io::Error),
    #[error("Failed to read options: {0:?}")]
    ReadOptions(PathBuf, #[source] io::Error),
    #[error("Failed to parse options TOML")]
    ParseOptions(#[from] toml_edit::de::Error),
    #[error("Failed to serialize options TOML")]
    SerializeOptions(#[from] toml_edit::ser::Error),
    #[error("Footer error")]
    Footer(#[from] footer::Error),
    #[error("I/O error")]
    Io(#[from] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// Parameters for [`append_footer`].
///
/// `key_path` and `algorithm` mirror the parameters of a real signing tool,
/// but no signing is done. The key file is never opened and the algorithm
/// label is not written to the footer. They exist so that signing can be added
/// later without changing callers.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct AppendOptions {
    /// Total size of the output image.
    pub partition_size: u64,
    /// Private key path. Unused.
    pub key_path: PathBuf,
    /// Signature algorithm label. Unused.
    pub algorithm: String,
    /// Output path. If unset, the input image is replaced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
}

impl Default for AppendOptions {
    fn default() -> Self {
        Self {
            partition_size: DEFAULT_PARTITION_SIZE,
            key_path: PathBuf::new(),
            algorithm: DEFAULT_ALGORITHM.to_owned(),
            output: None,
        }
    }
}

impl AppendOptions {
    pub fn new(partition_size: u64, key_path: impl Into<PathBuf>) -> Self {
        Self {
            partition_size,
            key_path: key_path.into(),
            ..Default::default()
        }
    }

    /// Parse options from TOML. Missing fields use the defaults.
    pub fn from_toml(data: &str) -> Result<Self> {
        let options = toml_edit::de::from_str(data)?;

        Ok(options)
    }

    pub fn to_toml(&self) -> Result<String> {
        let data = toml_edit::ser::to_string_pretty(self)?;

        Ok(data)
    }

    /// Read options from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data =
            fs::read_to_string(path).map_err(|e| Error::ReadOptions(path.to_owned(), e))?;

        Self::from_toml(&data)
    }
}

/// Compute the number of zero bytes between the image and the footer.
fn padding_size(image_size: u64, partition_size: u64) -> Result<u64> {
    if image_size > partition_size {
        return Err(Error::PartitionTooSmall {
            image_size,
            partition_size,
        });
    }

    (partition_size - image_size)
        .checked_sub(Footer::SIZE as u64)
        .ok_or(Error::FooterDoesNotFit {
            image_size,
            partition_size,
        })
}

/// Write `image`, followed by zero padding and the footer, to `writer`. The
/// total number of bytes written is always `partition_size`, which is also the
/// return value. If the image does not fit, nothing is written.
pub fn write_composed(
    writer: impl Write,
    image: &[u8],
    partition_size: u64,
    algorithm: &str,
) -> Result<u64> {
    let image_size = image.len() as u64;
    let padding = padding_size(image_size, partition_size)?;

    let digest = ring::digest::digest(&ring::digest::SHA256, image);
    let footer = footer::encode_footer(digest.as_ref(), image_size, partition_size, algorithm)?;

    debug!(
        "Image: {:?}, padding: {:?}, sha256: {}",
        NumBytes(image_size),
        NumBytes(padding),
        hex::encode(digest),
    );

    let mut writer = CountingWriter::new(writer);
    writer.write_all(image)?;
    writer.write_zeros_exact(padding)?;
    writer.write_all(&footer)?;
    writer.flush()?;

    let (_, written) = writer.finish();

    Ok(written)
}

/// Build the composed image in memory.
pub fn compose_image(image: &[u8], partition_size: u64, algorithm: &str) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    write_composed(&mut data, image, partition_size, algorithm)?;

    Ok(data)
}

/// Permissions for a newly created output file. NamedTempFile forces 600
/// permissions on temp files because it's the safe option for a shared /tmp.
/// Since we're writing to the output file's directory, just mimic umask.
#[cfg(unix)]
fn new_file_permissions() -> Option<fs::Permissions> {
    use std::os::unix::prelude::PermissionsExt;

    use rustix::{fs::Mode, process::umask};

    let mask = umask(Mode::empty());
    umask(mask);

    // Mac uses a 16-bit value.
    #[allow(clippy::useless_conversion)]
    let mode = u32::from(0o666 & !mask.bits());

    Some(fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn new_file_permissions() -> Option<fs::Permissions> {
    None
}

/// Write `data` to a temporary file next to `path` and then move it over
/// `path`. If anything fails, `path` is left untouched. If `path` already
/// exists, symlinks are followed and the existing file's permissions are kept.
fn write_replace(path: &Path, data: &[u8]) -> Result<()> {
    let (target, permissions) = match fs::canonicalize(path) {
        Ok(p) => {
            let permissions = fs::metadata(&p)
                .map_err(|e| Error::WriteImage(p.clone(), e))?
                .permissions();
            (p, Some(permissions))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            (path.to_owned(), new_file_permissions())
        }
        Err(e) => return Err(Error::WriteImage(path.to_owned(), e)),
    };

    if target != path {
        debug!("Writing through to {target:?}");
    }

    let mut temp_writer = NamedTempFile::with_prefix_in(
        target
            .file_name()
            .unwrap_or_else(|| OsStr::new("avbfooter.tmp")),
        util::parent_path(&target),
    )
    .map_err(|e| Error::WriteImage(target.clone(), e))?;

    trace!("Writing to temporary file: {:?}", temp_writer.path());

    temp_writer
        .write_all(data)
        .and_then(|()| temp_writer.as_file().sync_all())
        .map_err(|e| Error::WriteImage(temp_writer.path().to_owned(), e))?;

    if let Some(permissions) = permissions {
        temp_writer
            .as_file()
            .set_permissions(permissions)
            .map_err(|e| Error::WriteImage(temp_writer.path().to_owned(), e))?;
    }

    temp_writer
        .persist(&target)
        .map_err(|e| Error::WriteImage(target.clone(), e.error))?;

    Ok(())
}

/// Append a footer to the image at `image_path` so that it exactly fills
/// `options.partition_size` bytes. The result is written to `options.output`,
/// or back to `image_path` if no output is set. Returns the composed image.
///
/// The image is hashed with SHA-256 before any padding is added. The hash never
/// covers the padding or the footer.
pub fn append_footer(image_path: &Path, options: &AppendOptions) -> Result<Vec<u8>> {
    let image = fs::read(image_path).map_err(|e| Error::ReadImage(image_path.to_owned(), e))?;

    debug!(
        "Loaded image {image_path:?}: {:?}; partition size: {:?}",
        NumBytes(image.len()),
        NumBytes(options.partition_size),
    );
    trace!("Not signing; key is unused: {:?}", options.key_path);

    let data = compose_image(&image, options.partition_size, &options.algorithm)?;

    let output = options.output.as_deref().unwrap_or(image_path);
    write_replace(output, &data)?;

    info!("Wrote {:?} to {output:?}", NumBytes(data.len()));

    Ok(data)
}

/// Check that `count` bytes from `reader` are all zero.
fn read_zeros(mut reader: impl Read, mut count: u64) -> io::Result<bool> {
    let mut buf = vec![0u8; util::ZEROS.len()];

    while count > 0 {
        let n = count.min(buf.len() as u64) as usize;
        reader.read_exact(&mut buf[..n])?;

        if !util::is_zero(&buf[..n]) {
            return Ok(false);
        }

        count -= n as u64;
    }

    Ok(true)
}

/// Verify a composed image. The file size must match the footer's partition
/// size, the hash must match the original image data, and the padding must be
/// zero. Returns the parsed footer.
pub fn verify_image(mut reader: impl Read + Seek) -> Result<Footer> {
    let (footer, image_size) = footer::load_footer(&mut reader)?;

    if image_size != footer.partition_size {
        return Err(Error::SizeMismatch {
            expected: footer.partition_size,
            actual: image_size,
        });
    }

    reader.rewind()?;

    let hashing_reader = HashingReader::new(&mut reader, Context::new(&ring::digest::SHA256));
    let mut limited_reader = hashing_reader.take(footer.original_image_size);
    io::copy(&mut limited_reader, &mut io::sink())?;

    let (reader, context) = limited_reader.into_inner().finish();
    let digest = context.finish();

    if digest.as_ref() != footer.hash {
        return Err(Error::HashMismatch {
            expected: hex::encode(footer.hash),
            actual: hex::encode(digest),
        });
    }

    let padding = footer
        .padding_size()
        .ok_or(footer::Error::FieldOutOfBounds("partition_size"))?;

    if !read_zeros(reader, padding)? {
        return Err(Error::PaddingNotZero);
    }

    Ok(footer)
}

/// Default output path for a signed copy of `input`. The first `.img` in the
/// file name becomes `_signed.img`, so `boot.img` becomes `boot_signed.img` and
/// `boot.img.gz` becomes `boot_signed.img.gz`. Names without `.img` get
/// `_signed` appended.
pub fn signed_output_path(input: &Path) -> PathBuf {
    let file_name = input.file_name().unwrap_or_default();

    let name = match file_name.to_str() {
        Some(s) if s.contains(".img") => OsString::from(s.replacen(".img", "_signed.img", 1)),
        _ => {
            let mut name = file_name.to_owned();
            name.push("_signed");
            name
        }
    };

    input.with_file_name(name)
}
