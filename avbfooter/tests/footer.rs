// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::io::Cursor;

use assert_matches::assert_matches;

use avbfooter::{
    self,
    format::footer::{self, Error, FOOTER_MAGIC, Footer},
    stream::{FromReader, ToWriter},
};

/// SHA-256 of 100 zero bytes.
const ZEROS_100_SHA256: [u8; 32] = [
    0xcd, 0x00, 0xe2, 0x92, 0xc5, 0x97, 0x0d, 0x3c, 0x5e, 0x2f, 0x0f, 0xfa, 0x51, 0x71, 0xe5, 0x55,
    0xbc, 0x46, 0xbf, 0xc4, 0xfa, 0xdd, 0xfb, 0x4a, 0x41, 0x8b, 0x68, 0x40, 0xb8, 0x6e, 0x79, 0xa3,
];

#[test]
fn encode_field_offsets() {
    let data = footer::encode_footer(&ZEROS_100_SHA256, 100, 4300, "SHA256_RSA4096").unwrap();

    assert_eq!(data.len(), Footer::SIZE);
    assert_eq!(&data[0..4], b"AVBf");
    assert_eq!(&data[4..8], &[2, 0, 0, 0]);
    assert_eq!(&data[8..12], &[1, 0, 0, 0]);
    assert_eq!(&data[12..20], &[0x64, 0, 0, 0, 0, 0, 0, 0]);
    assert_eq!(&data[20..28], &[0xcc, 0x10, 0, 0, 0, 0, 0, 0]);
    assert_eq!(&data[28..60], &ZEROS_100_SHA256);
    assert!(data[60..].iter().all(|b| *b == 0));
}

#[test]
fn encode_ignores_algorithm() {
    let a = footer::encode_footer(&ZEROS_100_SHA256, 100, 4300, "SHA256_RSA4096").unwrap();
    let b = footer::encode_footer(&ZEROS_100_SHA256, 100, 4300, "SHA512_RSA8192").unwrap();
    let c = footer::encode_footer(&ZEROS_100_SHA256, 100, 4300, "").unwrap();

    assert_eq!(a, b);
    assert_eq!(a, c);
}

#[test]
fn encode_rejects_wrong_digest_length() {
    assert_matches!(
        footer::encode_footer(&[0u8; 31], 0, 4096, "SHA256_RSA4096"),
        Err(Error::InvalidDigestLength(31))
    );
    assert_matches!(
        footer::encode_footer(&[0u8; 64], 0, 4096, "SHA512_RSA4096"),
        Err(Error::InvalidDigestLength(64))
    );
    assert_matches!(
        Footer::new(&[], 0, 4096),
        Err(Error::InvalidDigestLength(0))
    );
}

#[test]
fn decode_encoded() {
    let data = footer::encode_footer(&ZEROS_100_SHA256, 100, 4300, "SHA256_RSA4096").unwrap();
    let footer = Footer::from_bytes(&data).unwrap();

    assert_eq!(footer.original_image_size, 100);
    assert_eq!(footer.partition_size, 4300);
    assert_eq!(footer.hash, ZEROS_100_SHA256);
    assert_eq!(footer.padding_size(), Some(104));
}

#[test]
fn reader_and_writer() {
    let footer = Footer::new(&ZEROS_100_SHA256, 0, 8192).unwrap();

    let mut writer = Cursor::new(Vec::new());
    footer.to_writer(&mut writer).unwrap();
    let data = writer.into_inner();
    assert_eq!(data.len(), Footer::SIZE);

    let new_footer = Footer::from_reader(Cursor::new(&data)).unwrap();
    assert_eq!(new_footer, footer);

    assert_matches!(
        Footer::from_reader(Cursor::new(&data[..100])),
        Err(Error::Io(_))
    );
}

#[test]
fn decode_rejects_invalid() {
    let valid = footer::encode_footer(&ZEROS_100_SHA256, 100, 4300, "SHA256_RSA4096").unwrap();

    assert_matches!(
        Footer::from_bytes(&valid[..Footer::SIZE - 1]),
        Err(Error::InvalidFooterSize(4095))
    );

    let mut data = valid;
    data[0..4].copy_from_slice(b"AVB0");
    assert_matches!(
        Footer::from_bytes(&data),
        Err(Error::InvalidFooterMagic(m)) if &m == b"AVB0"
    );

    let mut data = valid;
    data[8] = 0;
    assert_matches!(
        Footer::from_bytes(&data),
        Err(Error::UnsupportedFooterVersion { major: 2, minor: 0 })
    );

    let mut data = valid;
    data[Footer::SIZE - 1] = 1;
    assert_matches!(Footer::from_bytes(&data), Err(Error::ReservedNotZero));

    // Partition is one byte too small to hold the image and footer.
    let data = footer::encode_footer(&ZEROS_100_SHA256, 100, 4195, "SHA256_RSA4096").unwrap();
    assert_matches!(
        Footer::from_bytes(&data),
        Err(Error::FieldOutOfBounds("partition_size"))
    );

    let data = footer::encode_footer(&ZEROS_100_SHA256, u64::MAX, u64::MAX, "").unwrap();
    assert_matches!(
        Footer::from_bytes(&data),
        Err(Error::FieldOutOfBounds("original_image_size"))
    );
}

#[test]
fn load_from_end_of_image() {
    let footer = Footer::new(&ZEROS_100_SHA256, 100, 4300).unwrap();

    let mut data = vec![0u8; 204];
    data.extend_from_slice(&footer.to_bytes());

    let (new_footer, image_size) = footer::load_footer(Cursor::new(&data)).unwrap();
    assert_eq!(new_footer, footer);
    assert_eq!(image_size, 4300);

    assert_matches!(
        footer::load_footer(Cursor::new(&data[..1000])),
        Err(Error::TooSmallForFooter(1000))
    );
}

#[test]
fn magic_constant() {
    assert_eq!(&FOOTER_MAGIC, b"AVBf");
}

#[test]
fn deserialized_always_writes_current_version() {
    let data = format!(
        "version_major = 3\nversion_minor = 0\noriginal_image_size = 100\n\
         partition_size = 4300\nhash = \"{}\"\n",
        hex::encode(ZEROS_100_SHA256),
    );
    let footer: Footer = toml_edit::de::from_str(&data).unwrap();

    let raw = footer.to_bytes();
    assert_eq!(&raw[4..8], &footer::FOOTER_VERSION_MAJOR.to_le_bytes());
    assert_eq!(&raw[8..12], &footer::FOOTER_VERSION_MINOR.to_le_bytes());
    assert_eq!(Footer::from_bytes(&raw).unwrap(), footer);
}

#[test]
fn serde_hex_hash() {
    let footer = Footer::new(&ZEROS_100_SHA256, 100, 4300).unwrap();

    let data = toml_edit::ser::to_string(&footer).unwrap();
    assert!(data.contains(&hex::encode(ZEROS_100_SHA256)));

    let new_footer: Footer = toml_edit::de::from_str(&data).unwrap();
    assert_eq!(new_footer, footer);
}
