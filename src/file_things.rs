// Copyright (C) 2022 Cendyne.
// This file is part of Frame Server.

// Frame Server is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as
// published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.

// Frame Server is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use bytes::BytesMut;
use ct_codecs::{Base64UrlSafeNoPadding, Encoder};
use once_cell::sync::OnceCell;
use std::fs::create_dir_all;
use std::path::{Path, PathBuf};
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncWriteExt},
};

static DATA_PATH: OnceCell<PathBuf> = OnceCell::new();
static UPLOAD_PATH: OnceCell<PathBuf> = OnceCell::new();

pub fn data_path() -> Result<PathBuf, String> {
    DATA_PATH
        .get_or_try_init(|| internal_dir_path("DATA_PATH", "./data"))
        .map(|p| p.clone())
}

pub fn upload_path() -> Result<PathBuf, String> {
    UPLOAD_PATH
        .get_or_try_init(|| internal_dir_path("UPLOAD_PATH", "./uploads"))
        .map(|p| p.clone())
}

fn internal_dir_path(var: &str, fallback: &str) -> Result<PathBuf, String> {
    let path = std::env::var(var).unwrap_or_else(|_| {
        println!("Warning {} is not set, will use {}", var, fallback);
        fallback.to_string()
    });
    create_dir_all(&path).map_err(|err| format!("{}", err))?;
    let absolute_path = Path::new(&path)
        .canonicalize()
        .map_err(|err| format!("{}", err))?;
    Ok(absolute_path)
}

pub async fn hash_file(path: &Path) -> Result<String, String> {
    let mut open_file = File::open(path).await.map_err(|err| format!("{:?}", err))?;
    let mut buffer = BytesMut::with_capacity(8192);
    let mut hasher = blake3::Hasher::new();
    let mut read_bytes = open_file
        .read_buf(&mut buffer)
        .await
        .map_err(|err| format!("{:?}", err))?;
    while read_bytes > 0 {
        hasher.update(&buffer[0..read_bytes]);
        buffer.clear();
        read_bytes = open_file
            .read_buf(&mut buffer)
            .await
            .map_err(|err| format!("{:?}", err))?;
    }
    let hash = hasher.finalize();
    let content_hash = Base64UrlSafeNoPadding::encode_to_string(hash.as_bytes())
        .map_err(|e| format!("{}", e))?;
    Ok(content_hash)
}

pub async fn copy_temp(from_path: &Path, to_path: &Path) -> Result<u64, String> {
    let mut from_file = File::open(from_path)
        .await
        .map_err(|err| format!("{:?}", err))?;
    let mut to_file = File::create(to_path)
        .await
        .map_err(|err| format!("{:?}", err))?;
    let mut buffer = BytesMut::with_capacity(8192);
    let mut total_bytes: u64 = 0;
    let mut read_bytes = from_file
        .read_buf(&mut buffer)
        .await
        .map_err(|err| format!("{:?}", err))?;
    while read_bytes > 0 {
        to_file
            .write_all(&buffer[0..read_bytes])
            .await
            .map_err(|err| format!("{:?}", err))?;
        total_bytes += read_bytes as u64;
        buffer.clear();
        read_bytes = from_file
            .read_buf(&mut buffer)
            .await
            .map_err(|err| format!("{:?}", err))?;
    }
    to_file.flush().await.map_err(|err| format!("{:?}", err))?;
    Ok(total_bytes)
}

/// Untrusted upload names are reduced to a safe character set before they
/// touch the filesystem.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(&['/', '\\'][..]).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "upload".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Copy an uploaded temp file into the photo directory under a
/// content-hash-prefixed name. Returns the stored name and byte count.
pub async fn store_upload(
    root: &Path,
    temp_path: &Path,
    original_name: &str,
) -> Result<(String, u64), String> {
    let content_hash = hash_file(temp_path).await?;
    let stored_name = format!("{}_{}", &content_hash[..10], sanitize_filename(original_name));
    let destination = root.join(&stored_name);
    let bytes = copy_temp(temp_path, &destination).await?;
    println!("Stored upload {} ({} bytes)", stored_name, bytes);
    Ok((stored_name, bytes))
}

pub fn thumbnail_path(root: &Path, stored_name: &str) -> Result<PathBuf, String> {
    let dir = root.join("thumbs");
    create_dir_all(&dir).map_err(|err| format!("{}", err))?;
    Ok(dir.join(format!("{}.jpg", stored_name)))
}

/// The catalog's hook into backing-file lifetime: removing an image removes
/// its photo and thumbnail.
pub trait UploadStorage: Send + Sync {
    fn delete(&self, stored_name: &str) -> Result<(), String>;
}

pub struct DiskStorage {
    root: PathBuf,
}

impl DiskStorage {
    pub fn new(root: PathBuf) -> Self {
        DiskStorage { root }
    }
}

impl UploadStorage for DiskStorage {
    fn delete(&self, stored_name: &str) -> Result<(), String> {
        let mut failures = Vec::new();
        let photo = self.root.join(stored_name);
        if let Err(err) = std::fs::remove_file(&photo) {
            if err.kind() != std::io::ErrorKind::NotFound {
                failures.push(format!("{}: {}", photo.display(), err));
            }
        }
        let thumb = self.root.join("thumbs").join(format!("{}.jpg", stored_name));
        if let Err(err) = std::fs::remove_file(&thumb) {
            if err.kind() != std::io::ErrorKind::NotFound {
                failures.push(format!("{}: {}", thumb.display(), err));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(failures.join("; "))
        }
    }
}
