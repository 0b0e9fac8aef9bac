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

use phf::phf_map;

/// Photo formats the frame accepts, keyed by lowercase extension.
pub const EXTENSION_CONTENT_TYPES: phf::Map<&'static str, (&'static str, &'static str)> = phf_map! {
    "png" => ("image", "png"),
    "jpg" => ("image", "jpeg"),
    "jpeg" => ("image", "jpeg"),
    "gif" => ("image", "gif"),
    "webp" => ("image", "webp"),
    "bmp" => ("image", "bmp"),
};

pub fn extension(filename: &str) -> Option<String> {
    let dot = filename.rfind('.')?;
    if dot + 1 >= filename.len() {
        return None;
    }
    Some(filename[dot + 1..].to_lowercase())
}

pub fn allowed_file(filename: &str) -> bool {
    match extension(filename) {
        Some(ext) => EXTENSION_CONTENT_TYPES.contains_key(ext.as_str()),
        None => false,
    }
}

pub fn content_type_for(filename: &str) -> Option<(&'static str, &'static str)> {
    extension(filename).and_then(|ext| EXTENSION_CONTENT_TYPES.get(ext.as_str()).copied())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_extensions_are_allowed() {
        assert!(allowed_file("photo.jpg"));
        assert!(allowed_file("photo.JPEG"));
        assert!(allowed_file("photo.png"));
        assert!(allowed_file("photo.webp"));
        assert!(allowed_file("photo.bmp"));
    }

    #[test]
    fn unknown_extensions_are_rejected() {
        assert!(!allowed_file("archive.zip"));
        assert!(!allowed_file("script.sh"));
        assert!(!allowed_file("noextension"));
        assert!(!allowed_file("trailingdot."));
    }

    #[test]
    fn content_type_lookup() {
        assert_eq!(Some(("image", "jpeg")), content_type_for("a.jpg"));
        assert_eq!(Some(("image", "png")), content_type_for("b.PNG"));
        assert_eq!(None, content_type_for("c.txt"));
    }
}
