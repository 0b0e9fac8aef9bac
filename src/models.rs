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

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// A PATCH field: an absent key, an explicit null, and a value are three
/// different instructions. Absent leaves the stored field alone, null clears
/// it, a value replaces it.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Patch<T> {
    #[default]
    Absent,
    Null,
    Value(T),
}

impl<T> Patch<T> {
    pub fn is_absent(&self) -> bool {
        matches!(self, Patch::Absent)
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Patch::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn apply_to(&self, slot: &mut Option<T>)
    where
        T: Clone,
    {
        match self {
            Patch::Absent => {}
            Patch::Null => *slot = None,
            Patch::Value(v) => *slot = Some(v.clone()),
        }
    }
}

// Relies on #[serde(default)] at the field site: a missing key never reaches
// deserialize and stays Absent, so Option covers the null/value split.
impl<'de, T: Deserialize<'de>> Deserialize<'de> for Patch<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Option::<T>::deserialize(deserializer)? {
            None => Patch::Null,
            Some(v) => Patch::Value(v),
        })
    }
}

/// Presentation overrides shared by images and groups. All fields optional;
/// an image falls back to its group, then to the global settings.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Overrides {
    pub mat_color: Option<String>,
    pub mat_finish: Option<String>,
    pub bevel_width: Option<u32>,
    pub scale: Option<f32>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ImageRecord {
    pub original_name: String,
    pub title: String,
    pub uploaded_by: String,
    pub uploaded_at: String,
    pub size: u64,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub enabled: bool,
    pub order: usize,
    #[serde(default)]
    pub overrides: Overrides,
    /// Perceptual hash, 64 bits hex encoded. Absent until computed.
    #[serde(default)]
    pub phash: Option<String>,
    #[serde(default)]
    pub group_id: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GroupRecord {
    pub name: String,
    #[serde(default)]
    pub overrides: Overrides,
    pub created_at: String,
}

/// The gallery catalog: one store, one unit of atomicity.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct GalleryRecord {
    #[serde(default)]
    pub images: BTreeMap<String, ImageRecord>,
    #[serde(default)]
    pub groups: BTreeMap<String, GroupRecord>,
}

fn default_true() -> bool {
    true
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ScheduleEntry {
    #[serde(default)]
    pub id: String,
    pub on_time: String,
    pub off_time: String,
    pub days: Vec<u8>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

pub const SLIDESHOW_INTERVAL_MIN: u32 = 3;
pub const SLIDESHOW_INTERVAL_MAX: u32 = 300;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Settings {
    pub mat_color: String,
    pub mat_finish: String,
    pub bevel_width: u32,
    pub slideshow_interval: u32,
    pub transition_duration: f32,
    pub fit_mode: String,
    pub shuffle: bool,
    pub show_filenames: bool,
    #[serde(default)]
    pub tv_schedules: Vec<ScheduleEntry>,
    #[serde(default = "Settings::default_backup_time")]
    pub backup_time: String,
    #[serde(default = "Settings::default_backup_path")]
    pub backup_path: String,
    #[serde(default = "default_true")]
    pub backup_enabled: bool,
}

impl Settings {
    fn default_backup_time() -> String {
        "03:00".to_string()
    }

    fn default_backup_path() -> String {
        "PhotoFrameBackup".to_string()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            mat_color: "#2c2c2c".to_string(),
            mat_finish: "flat".to_string(),
            bevel_width: 4,
            slideshow_interval: 10,
            transition_duration: 1.0,
            fit_mode: "contain".to_string(),
            shuffle: false,
            show_filenames: false,
            tv_schedules: Vec::new(),
            backup_time: Settings::default_backup_time(),
            backup_path: Settings::default_backup_path(),
            backup_enabled: true,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Error,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BackupRun {
    pub started_at: String,
    pub finished_at: String,
    pub status: RunStatus,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub bytes: Option<u64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct BackupLog {
    pub last_backup: Option<String>,
    pub last_result: Option<RunStatus>,
    pub last_error: Option<String>,
    #[serde(default)]
    pub history: Vec<BackupRun>,
}

// ---- PATCH request bodies ----

#[derive(Deserialize, Debug, Default)]
pub struct ImagePatch {
    #[serde(default)]
    pub enabled: Patch<bool>,
    #[serde(default)]
    pub title: Patch<String>,
    #[serde(default)]
    pub mat_color: Patch<String>,
    #[serde(default)]
    pub mat_finish: Patch<String>,
    #[serde(default)]
    pub bevel_width: Patch<u32>,
    #[serde(default)]
    pub scale: Patch<f32>,
    #[serde(default)]
    pub group_id: Patch<String>,
}

#[derive(Deserialize, Debug, Default)]
pub struct GroupPatch {
    #[serde(default)]
    pub name: Patch<String>,
    #[serde(default)]
    pub mat_color: Patch<String>,
    #[serde(default)]
    pub mat_finish: Patch<String>,
    #[serde(default)]
    pub bevel_width: Patch<u32>,
    #[serde(default)]
    pub scale: Patch<f32>,
    /// Replaces the membership exactly: listed images point at the group,
    /// anything else pointing at it is detached.
    #[serde(default)]
    pub members: Patch<Vec<String>>,
}

#[derive(Deserialize, Debug, Default)]
pub struct SettingsPatch {
    #[serde(default)]
    pub mat_color: Patch<String>,
    #[serde(default)]
    pub mat_finish: Patch<String>,
    #[serde(default)]
    pub bevel_width: Patch<u32>,
    #[serde(default)]
    pub slideshow_interval: Patch<u32>,
    #[serde(default)]
    pub transition_duration: Patch<f32>,
    #[serde(default)]
    pub fit_mode: Patch<String>,
    #[serde(default)]
    pub shuffle: Patch<bool>,
    #[serde(default)]
    pub show_filenames: Patch<bool>,
}

#[derive(Deserialize, Debug, Default)]
pub struct BackupSettingsPatch {
    #[serde(default)]
    pub backup_time: Patch<String>,
    #[serde(default)]
    pub backup_path: Patch<String>,
    #[serde(default)]
    pub backup_enabled: Patch<bool>,
}

// ---- display projection ----

/// What the unauthenticated display client sees, and nothing more: no
/// hidden images, no uploader names, no raw override bookkeeping.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct DisplayImage {
    pub filename: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub mat_color: Option<String>,
    pub mat_finish: Option<String>,
    pub bevel_width: Option<u32>,
    pub scale: f32,
    pub group_id: Option<String>,
}
