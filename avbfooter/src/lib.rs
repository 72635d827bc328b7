/*
 * SPDX-FileCopyrightText: 2026 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

//! Appends a fixed-size hash footer to boot images.
//!
//! This is a heavily simplified take on the AVB "add hash footer" operation.
//! The footer records the SHA-256 digest of the image along with the image and
//! partition sizes. There is no vbmeta structure and nothing is signed.

pub mod compose;
pub mod format;
pub mod stream;
pub mod util;
