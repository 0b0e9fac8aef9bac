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

use rocket::serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::error::Error;
use crate::file_things::UploadStorage;
use crate::models::{
    DisplayImage, GalleryRecord, GroupPatch, GroupRecord, ImagePatch, ImageRecord, Overrides,
    Patch,
};
use crate::store::JsonStore;
use crate::phash;

pub const SCALE_MIN: f32 = 0.1;
pub const SCALE_MAX: f32 = 2.0;
pub const BEVEL_MAX: u32 = 64;

const MAT_FINISHES: [&str; 4] = ["flat", "linen", "suede", "silk"];

/// The gallery catalog. Owns image and group lifetime; every mutation is one
/// store transaction, so order indices stay a contiguous permutation at rest.
pub struct Gallery {
    store: JsonStore<GalleryRecord>,
}

pub struct NewImage {
    pub stored_name: String,
    pub original_name: String,
    pub uploaded_by: String,
    pub uploaded_at: String,
    pub size: u64,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub phash: Option<u64>,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum BulkAction {
    Show,
    Hide,
    Delete,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct BulkFailure {
    pub filename: String,
    pub error: String,
}

#[derive(Serialize, Debug, Default)]
pub struct BulkOutcome {
    pub applied: Vec<String>,
    pub failures: Vec<BulkFailure>,
    /// Best-effort file removals that did not go through; the catalog entries
    /// are gone regardless.
    pub warnings: Vec<String>,
}

fn validate_mat_color(color: &str) -> Result<(), Error> {
    let hex_part = color.strip_prefix('#').unwrap_or("");
    if hex_part.len() == 6 && hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(())
    } else {
        Err(Error::validation(format!(
            "mat_color must look like #rrggbb, got {:?}",
            color
        )))
    }
}

fn validate_mat_finish(finish: &str) -> Result<(), Error> {
    if MAT_FINISHES.contains(&finish) {
        Ok(())
    } else {
        Err(Error::validation(format!(
            "mat_finish must be one of {:?}",
            MAT_FINISHES
        )))
    }
}

fn validate_scale(scale: f32) -> Result<(), Error> {
    if (SCALE_MIN..=SCALE_MAX).contains(&scale) {
        Ok(())
    } else {
        Err(Error::validation(format!(
            "scale must be between {} and {}",
            SCALE_MIN, SCALE_MAX
        )))
    }
}

fn validate_bevel(bevel: u32) -> Result<(), Error> {
    if bevel <= BEVEL_MAX {
        Ok(())
    } else {
        Err(Error::validation(format!(
            "bevel_width must be at most {}",
            BEVEL_MAX
        )))
    }
}

fn validate_override_fields(
    mat_color: &Patch<String>,
    mat_finish: &Patch<String>,
    bevel_width: &Patch<u32>,
    scale: &Patch<f32>,
) -> Result<(), Error> {
    if let Some(color) = mat_color.value() {
        validate_mat_color(color)?;
    }
    if let Some(finish) = mat_finish.value() {
        validate_mat_finish(finish)?;
    }
    if let Some(bevel) = bevel_width.value() {
        validate_bevel(*bevel)?;
    }
    if let Some(scale) = scale.value() {
        validate_scale(*scale)?;
    }
    Ok(())
}

pub fn validate_overrides(overrides: &Overrides) -> Result<(), Error> {
    if let Some(color) = overrides.mat_color.as_deref() {
        validate_mat_color(color)?;
    }
    if let Some(finish) = overrides.mat_finish.as_deref() {
        validate_mat_finish(finish)?;
    }
    if let Some(bevel) = overrides.bevel_width {
        validate_bevel(bevel)?;
    }
    if let Some(scale) = overrides.scale {
        validate_scale(scale)?;
    }
    Ok(())
}

fn group_id_for(record: &GalleryRecord, name: &str, created_at: &str) -> String {
    for attempt in 0u32.. {
        let mut hasher = blake3::Hasher::new();
        hasher.update(name.as_bytes());
        hasher.update(created_at.as_bytes());
        hasher.update(&attempt.to_le_bytes());
        let id = format!("group_{}", &hasher.finalize().to_hex().as_str()[..8]);
        if !record.groups.contains_key(&id) {
            return id;
        }
    }
    unreachable!()
}

impl Gallery {
    pub fn open(dir: &Path) -> Self {
        Gallery {
            store: JsonStore::open(dir, "gallery"),
        }
    }

    pub fn store(&self) -> &JsonStore<GalleryRecord> {
        &self.store
    }

    pub fn load(&self) -> Result<GalleryRecord, Error> {
        self.store.load()
    }

    pub fn add_image(&self, new: NewImage) -> Result<ImageRecord, Error> {
        self.store.update(|record| {
            if record.images.contains_key(&new.stored_name) {
                return Err(Error::validation(format!(
                    "an image named {} already exists",
                    new.stored_name
                )));
            }
            let order = record
                .images
                .values()
                .map(|img| img.order)
                .max()
                .map_or(0, |m| m + 1);
            let image = ImageRecord {
                original_name: new.original_name,
                title: String::new(),
                uploaded_by: new.uploaded_by,
                uploaded_at: new.uploaded_at,
                size: new.size,
                width: new.width,
                height: new.height,
                enabled: true,
                order,
                overrides: Overrides::default(),
                phash: new.phash.map(phash::encode),
                group_id: None,
            };
            record.images.insert(new.stored_name, image.clone());
            Ok(image)
        })
    }

    pub fn update_image(&self, id: &str, patch: &ImagePatch) -> Result<ImageRecord, Error> {
        validate_override_fields(
            &patch.mat_color,
            &patch.mat_finish,
            &patch.bevel_width,
            &patch.scale,
        )?;
        self.store.update(|record| {
            if let Patch::Value(group_id) = &patch.group_id {
                if !record.groups.contains_key(group_id) {
                    return Err(Error::validation(format!("unknown group {}", group_id)));
                }
            }
            let image = record
                .images
                .get_mut(id)
                .ok_or_else(|| Error::not_found(format!("image {}", id)))?;
            if let Patch::Value(enabled) = patch.enabled {
                image.enabled = enabled;
            }
            if let Patch::Value(title) = &patch.title {
                image.title = title.clone();
            }
            patch.mat_color.apply_to(&mut image.overrides.mat_color);
            patch.mat_finish.apply_to(&mut image.overrides.mat_finish);
            patch.bevel_width.apply_to(&mut image.overrides.bevel_width);
            patch.scale.apply_to(&mut image.overrides.scale);
            patch.group_id.apply_to(&mut image.group_id);
            Ok(image.clone())
        })
    }

    /// Removes the catalog entry and closes the order gap. The backing file
    /// and thumbnail are removed best-effort afterwards; a failure there is
    /// returned for logging, never a reason to keep the entry.
    pub fn delete_image(
        &self,
        id: &str,
        storage: &dyn UploadStorage,
    ) -> Result<(ImageRecord, Option<String>), Error> {
        let removed = self.store.update(|record| {
            let removed = record
                .images
                .remove(id)
                .ok_or_else(|| Error::not_found(format!("image {}", id)))?;
            for image in record.images.values_mut() {
                if image.order > removed.order {
                    image.order -= 1;
                }
            }
            Ok(removed)
        })?;
        let file_error = storage.delete(id).err();
        Ok((removed, file_error))
    }

    pub fn bulk(
        &self,
        ids: &[String],
        action: BulkAction,
        storage: &dyn UploadStorage,
    ) -> Result<BulkOutcome, Error> {
        let mut outcome = self.store.update(|record| {
            let mut outcome = BulkOutcome::default();
            let mut seen = HashSet::new();
            for id in ids {
                if !seen.insert(id.clone()) {
                    continue;
                }
                if !record.images.contains_key(id) {
                    outcome.failures.push(BulkFailure {
                        filename: id.clone(),
                        error: "not found".to_string(),
                    });
                    continue;
                }
                match action {
                    BulkAction::Show => record.images.get_mut(id).unwrap().enabled = true,
                    BulkAction::Hide => record.images.get_mut(id).unwrap().enabled = false,
                    BulkAction::Delete => {
                        record.images.remove(id);
                    }
                }
                outcome.applied.push(id.clone());
            }
            if action == BulkAction::Delete && !outcome.applied.is_empty() {
                let mut remaining: Vec<&mut ImageRecord> = record.images.values_mut().collect();
                remaining.sort_by_key(|img| img.order);
                for (index, image) in remaining.into_iter().enumerate() {
                    image.order = index;
                }
            }
            Ok(outcome)
        })?;
        if action == BulkAction::Delete {
            for id in &outcome.applied {
                if let Err(err) = storage.delete(id) {
                    outcome.warnings.push(format!("{}: {}", id, err));
                }
            }
        }
        Ok(outcome)
    }

    /// The new order must be a permutation of every current id; anything
    /// missing, unknown or repeated rejects the whole request and leaves the
    /// store as it was.
    pub fn reorder(&self, ordered: &[String]) -> Result<(), Error> {
        self.store.update(|record| {
            let mut seen = HashSet::new();
            for id in ordered {
                if !seen.insert(id.as_str()) {
                    return Err(Error::validation(format!("duplicate id {}", id)));
                }
                if !record.images.contains_key(id) {
                    return Err(Error::validation(format!("unknown id {}", id)));
                }
            }
            if ordered.len() != record.images.len() {
                return Err(Error::validation(format!(
                    "order must include all {} images, got {}",
                    record.images.len(),
                    ordered.len()
                )));
            }
            for (index, id) in ordered.iter().enumerate() {
                record.images.get_mut(id).unwrap().order = index;
            }
            Ok(())
        })
    }

    pub fn create_group(
        &self,
        name: &str,
        overrides: Overrides,
        members: &[String],
        created_at: String,
    ) -> Result<(String, GroupRecord), Error> {
        if name.trim().is_empty() {
            return Err(Error::validation("group name must not be empty"));
        }
        validate_overrides(&overrides)?;
        self.store.update(|record| {
            for member in members {
                if !record.images.contains_key(member) {
                    return Err(Error::validation(format!("unknown image {}", member)));
                }
            }
            let id = group_id_for(record, name, &created_at);
            let group = GroupRecord {
                name: name.to_string(),
                overrides,
                created_at,
            };
            record.groups.insert(id.clone(), group.clone());
            for member in members {
                record.images.get_mut(member).unwrap().group_id = Some(id.clone());
            }
            Ok((id, group))
        })
    }

    pub fn update_group(&self, id: &str, patch: &GroupPatch) -> Result<GroupRecord, Error> {
        validate_override_fields(
            &patch.mat_color,
            &patch.mat_finish,
            &patch.bevel_width,
            &patch.scale,
        )?;
        if matches!(patch.name, Patch::Null) {
            return Err(Error::validation("group name cannot be cleared"));
        }
        if matches!(patch.members, Patch::Null) {
            return Err(Error::validation(
                "members cannot be null, send a list or delete the group",
            ));
        }
        self.store.update(|record| {
            if !record.groups.contains_key(id) {
                return Err(Error::not_found(format!("group {}", id)));
            }
            if let Patch::Value(members) = &patch.members {
                for member in members {
                    if !record.images.contains_key(member) {
                        return Err(Error::validation(format!("unknown image {}", member)));
                    }
                }
                let keep: HashSet<&str> = members.iter().map(|m| m.as_str()).collect();
                for (filename, image) in record.images.iter_mut() {
                    if image.group_id.as_deref() == Some(id) && !keep.contains(filename.as_str()) {
                        image.group_id = None;
                    }
                }
                for member in members {
                    record.images.get_mut(member).unwrap().group_id = Some(id.to_string());
                }
            }
            let group = record.groups.get_mut(id).unwrap();
            if let Patch::Value(name) = &patch.name {
                if name.trim().is_empty() {
                    return Err(Error::validation("group name must not be empty"));
                }
                group.name = name.clone();
            }
            patch.mat_color.apply_to(&mut group.overrides.mat_color);
            patch.mat_finish.apply_to(&mut group.overrides.mat_finish);
            patch.bevel_width.apply_to(&mut group.overrides.bevel_width);
            patch.scale.apply_to(&mut group.overrides.scale);
            Ok(group.clone())
        })
    }

    /// Deleting a group never deletes images; member references are cleared
    /// in the same store write.
    pub fn delete_group(&self, id: &str) -> Result<(), Error> {
        self.store.update(|record| {
            record
                .groups
                .remove(id)
                .ok_or_else(|| Error::not_found(format!("group {}", id)))?;
            for image in record.images.values_mut() {
                if image.group_id.as_deref() == Some(id) {
                    image.group_id = None;
                }
            }
            Ok(())
        })
    }

    /// The one read path with no auth in front of it. Enabled images only,
    /// ascending order, group defaults folded into the per-image overrides.
    pub fn enabled_images(&self) -> Result<Vec<DisplayImage>, Error> {
        let record = self.store.load()?;
        let mut visible: Vec<(&String, &ImageRecord)> = record
            .images
            .iter()
            .filter(|(_, image)| image.enabled)
            .collect();
        visible.sort_by_key(|(_, image)| image.order);
        Ok(visible
            .into_iter()
            .map(|(filename, image)| {
                let group = image
                    .group_id
                    .as_deref()
                    .and_then(|gid| record.groups.get(gid));
                let group_overrides = group.map(|g| &g.overrides);
                let fallback = |field: fn(&Overrides) -> Option<String>| {
                    field(&image.overrides).or_else(|| group_overrides.and_then(field))
                };
                DisplayImage {
                    filename: filename.clone(),
                    width: image.width,
                    height: image.height,
                    mat_color: fallback(|o| o.mat_color.clone()),
                    mat_finish: fallback(|o| o.mat_finish.clone()),
                    bevel_width: image
                        .overrides
                        .bevel_width
                        .or_else(|| group_overrides.and_then(|o| o.bevel_width)),
                    scale: image
                        .overrides
                        .scale
                        .or_else(|| group_overrides.and_then(|o| o.scale))
                        .unwrap_or(1.0),
                    group_id: image.group_id.clone(),
                }
            })
            .collect())
    }

    pub fn set_phash(&self, id: &str, hash: u64) -> Result<(), Error> {
        self.store.update(|record| {
            // the image may have been deleted since the caller saw it
            if let Some(image) = record.images.get_mut(id) {
                image.phash = Some(phash::encode(hash));
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct NullStorage;
    impl UploadStorage for NullStorage {
        fn delete(&self, _stored_name: &str) -> Result<(), String> {
            Ok(())
        }
    }

    struct BrokenStorage;
    impl UploadStorage for BrokenStorage {
        fn delete(&self, stored_name: &str) -> Result<(), String> {
            Err(format!("cannot remove {}", stored_name))
        }
    }

    fn new_image(name: &str) -> NewImage {
        NewImage {
            stored_name: name.to_string(),
            original_name: name.to_string(),
            uploaded_by: "admin".to_string(),
            uploaded_at: "2024-05-01T10:00:00Z".to_string(),
            size: 1000,
            width: Some(1920),
            height: Some(1080),
            phash: None,
        }
    }

    fn gallery() -> (TempDir, Gallery) {
        let dir = TempDir::new().unwrap();
        let gallery = Gallery::open(dir.path());
        (dir, gallery)
    }

    fn assert_contiguous_orders(gallery: &Gallery) {
        let record = gallery.load().unwrap();
        let mut orders: Vec<usize> = record.images.values().map(|img| img.order).collect();
        orders.sort_unstable();
        let expected: Vec<usize> = (0..record.images.len()).collect();
        assert_eq!(expected, orders);
    }

    #[test]
    fn add_assigns_dense_ascending_orders() {
        let (_dir, gallery) = gallery();
        for name in ["a.png", "b.png", "c.png"] {
            gallery.add_image(new_image(name)).unwrap();
        }
        let record = gallery.load().unwrap();
        assert_eq!(0, record.images["a.png"].order);
        assert_eq!(1, record.images["b.png"].order);
        assert_eq!(2, record.images["c.png"].order);
    }

    #[test]
    fn duplicate_filename_is_rejected() {
        let (_dir, gallery) = gallery();
        gallery.add_image(new_image("a.png")).unwrap();
        let err = gallery.add_image(new_image("a.png")).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(1, gallery.load().unwrap().images.len());
    }

    #[test]
    fn delete_compacts_order_indices() {
        let (_dir, gallery) = gallery();
        for name in ["a.png", "b.png", "c.png", "d.png"] {
            gallery.add_image(new_image(name)).unwrap();
        }
        gallery.delete_image("b.png", &NullStorage).unwrap();
        assert_contiguous_orders(&gallery);
        let record = gallery.load().unwrap();
        assert_eq!(0, record.images["a.png"].order);
        assert_eq!(1, record.images["c.png"].order);
        assert_eq!(2, record.images["d.png"].order);
    }

    #[test]
    fn orders_stay_contiguous_across_add_delete_reorder() {
        let (_dir, gallery) = gallery();
        for name in ["a.png", "b.png", "c.png"] {
            gallery.add_image(new_image(name)).unwrap();
        }
        gallery.delete_image("a.png", &NullStorage).unwrap();
        gallery.add_image(new_image("d.png")).unwrap();
        gallery
            .reorder(&[
                "d.png".to_string(),
                "b.png".to_string(),
                "c.png".to_string(),
            ])
            .unwrap();
        gallery.delete_image("b.png", &NullStorage).unwrap();
        assert_contiguous_orders(&gallery);
    }

    #[test]
    fn delete_survives_file_removal_failure() {
        let (_dir, gallery) = gallery();
        gallery.add_image(new_image("a.png")).unwrap();
        let (removed, file_error) = gallery.delete_image("a.png", &BrokenStorage).unwrap();
        assert_eq!("a.png", removed.original_name);
        assert!(file_error.unwrap().contains("cannot remove"));
        assert!(gallery.load().unwrap().images.is_empty());
    }

    #[test]
    fn delete_unknown_image_is_not_found() {
        let (_dir, gallery) = gallery();
        let err = gallery.delete_image("nope.png", &NullStorage).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn update_merges_only_provided_fields() {
        let (_dir, gallery) = gallery();
        gallery.add_image(new_image("a.png")).unwrap();
        let patch: ImagePatch =
            serde_json::from_str(r##"{"enabled": false, "mat_color": "#ff0000"}"##).unwrap();
        let updated = gallery.update_image("a.png", &patch).unwrap();
        assert!(!updated.enabled);
        assert_eq!(Some("#ff0000".to_string()), updated.overrides.mat_color);
        assert_eq!(None, updated.overrides.mat_finish);

        // a later null clears only that field
        let patch: ImagePatch = serde_json::from_str(r#"{"mat_color": null}"#).unwrap();
        let updated = gallery.update_image("a.png", &patch).unwrap();
        assert_eq!(None, updated.overrides.mat_color);
        assert!(!updated.enabled);
    }

    #[test]
    fn update_rejects_out_of_range_values() {
        let (_dir, gallery) = gallery();
        gallery.add_image(new_image("a.png")).unwrap();
        for body in [
            r#"{"scale": 0.05}"#,
            r#"{"scale": 2.5}"#,
            r#"{"bevel_width": 1000}"#,
            r#"{"mat_color": "red"}"#,
            r#"{"mat_finish": "sandpaper"}"#,
        ] {
            let patch: ImagePatch = serde_json::from_str(body).unwrap();
            let err = gallery.update_image("a.png", &patch).unwrap_err();
            assert!(matches!(err, Error::Validation(_)), "{} should fail", body);
        }
        let patch: ImagePatch = serde_json::from_str(r#"{"scale": 1.5}"#).unwrap();
        assert!(gallery.update_image("a.png", &patch).is_ok());
    }

    #[test]
    fn update_unknown_image_is_not_found() {
        let (_dir, gallery) = gallery();
        let patch = ImagePatch::default();
        let err = gallery.update_image("nope.png", &patch).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn reorder_applies_permutation() {
        let (_dir, gallery) = gallery();
        for name in ["a.png", "b.png", "c.png"] {
            gallery.add_image(new_image(name)).unwrap();
        }
        gallery
            .reorder(&[
                "c.png".to_string(),
                "a.png".to_string(),
                "b.png".to_string(),
            ])
            .unwrap();
        let record = gallery.load().unwrap();
        assert_eq!(0, record.images["c.png"].order);
        assert_eq!(1, record.images["a.png"].order);
        assert_eq!(2, record.images["b.png"].order);
    }

    #[test]
    fn reorder_rejects_non_permutations_and_keeps_state() {
        let (_dir, gallery) = gallery();
        for name in ["a.png", "b.png", "c.png"] {
            gallery.add_image(new_image(name)).unwrap();
        }
        let before = gallery.load().unwrap();
        for bad in [
            vec!["a.png".to_string(), "b.png".to_string()],
            vec![
                "a.png".to_string(),
                "a.png".to_string(),
                "b.png".to_string(),
            ],
            vec![
                "a.png".to_string(),
                "b.png".to_string(),
                "ghost.png".to_string(),
            ],
        ] {
            let err = gallery.reorder(&bad).unwrap_err();
            assert!(matches!(err, Error::Validation(_)));
            assert_eq!(before, gallery.load().unwrap());
        }
    }

    #[test]
    fn bulk_hide_and_show() {
        let (_dir, gallery) = gallery();
        for name in ["a.png", "b.png"] {
            gallery.add_image(new_image(name)).unwrap();
        }
        let outcome = gallery
            .bulk(
                &["a.png".to_string(), "b.png".to_string()],
                BulkAction::Hide,
                &NullStorage,
            )
            .unwrap();
        assert_eq!(2, outcome.applied.len());
        assert!(gallery.enabled_images().unwrap().is_empty());

        gallery
            .bulk(&["a.png".to_string()], BulkAction::Show, &NullStorage)
            .unwrap();
        assert_eq!(1, gallery.enabled_images().unwrap().len());
    }

    #[test]
    fn bulk_collects_unknown_ids_without_aborting() {
        let (_dir, gallery) = gallery();
        gallery.add_image(new_image("a.png")).unwrap();
        let outcome = gallery
            .bulk(
                &["ghost.png".to_string(), "a.png".to_string()],
                BulkAction::Hide,
                &NullStorage,
            )
            .unwrap();
        assert_eq!(vec!["a.png".to_string()], outcome.applied);
        assert_eq!(1, outcome.failures.len());
        assert_eq!("ghost.png", outcome.failures[0].filename);
    }

    #[test]
    fn bulk_delete_compacts_and_reports_file_warnings() {
        let (_dir, gallery) = gallery();
        for name in ["a.png", "b.png", "c.png"] {
            gallery.add_image(new_image(name)).unwrap();
        }
        let outcome = gallery
            .bulk(
                &["a.png".to_string(), "c.png".to_string()],
                BulkAction::Delete,
                &BrokenStorage,
            )
            .unwrap();
        assert_eq!(2, outcome.applied.len());
        assert_eq!(2, outcome.warnings.len());
        assert_contiguous_orders(&gallery);
        let record = gallery.load().unwrap();
        assert_eq!(1, record.images.len());
        assert_eq!(0, record.images["b.png"].order);
    }

    #[test]
    fn groups_set_and_clear_member_references() {
        let (_dir, gallery) = gallery();
        for name in ["a.png", "b.png", "c.png"] {
            gallery.add_image(new_image(name)).unwrap();
        }
        let (id, _) = gallery
            .create_group(
                "Vacation",
                Overrides::default(),
                &["a.png".to_string(), "b.png".to_string()],
                "2024-05-01T10:00:00Z".to_string(),
            )
            .unwrap();
        let record = gallery.load().unwrap();
        assert_eq!(Some(id.clone()), record.images["a.png"].group_id);
        assert_eq!(Some(id.clone()), record.images["b.png"].group_id);
        assert_eq!(None, record.images["c.png"].group_id);

        gallery.delete_group(&id).unwrap();
        let record = gallery.load().unwrap();
        assert!(record.groups.is_empty());
        assert_eq!(None, record.images["a.png"].group_id);
        assert_eq!(None, record.images["b.png"].group_id);
        // images survive group deletion
        assert_eq!(3, record.images.len());
    }

    #[test]
    fn group_membership_replacement() {
        let (_dir, gallery) = gallery();
        for name in ["a.png", "b.png", "c.png"] {
            gallery.add_image(new_image(name)).unwrap();
        }
        let (id, _) = gallery
            .create_group(
                "Wall",
                Overrides::default(),
                &["a.png".to_string(), "b.png".to_string()],
                "2024-05-01T10:00:00Z".to_string(),
            )
            .unwrap();
        let patch: GroupPatch =
            serde_json::from_str(r#"{"members": ["b.png", "c.png"]}"#).unwrap();
        gallery.update_group(&id, &patch).unwrap();
        let record = gallery.load().unwrap();
        assert_eq!(None, record.images["a.png"].group_id);
        assert_eq!(Some(id.clone()), record.images["b.png"].group_id);
        assert_eq!(Some(id), record.images["c.png"].group_id);
    }

    #[test]
    fn group_with_unknown_member_is_rejected() {
        let (_dir, gallery) = gallery();
        gallery.add_image(new_image("a.png")).unwrap();
        let err = gallery
            .create_group(
                "Broken",
                Overrides::default(),
                &["ghost.png".to_string()],
                "2024-05-01T10:00:00Z".to_string(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(gallery.load().unwrap().groups.is_empty());
    }

    #[test]
    fn enabled_images_hides_disabled_and_sorts_by_order() {
        let (_dir, gallery) = gallery();
        for name in ["a.png", "b.png", "c.png"] {
            gallery.add_image(new_image(name)).unwrap();
        }
        let patch: ImagePatch = serde_json::from_str(r#"{"enabled": false}"#).unwrap();
        gallery.update_image("b.png", &patch).unwrap();
        gallery
            .reorder(&[
                "c.png".to_string(),
                "b.png".to_string(),
                "a.png".to_string(),
            ])
            .unwrap();
        let display = gallery.enabled_images().unwrap();
        let names: Vec<&str> = display.iter().map(|d| d.filename.as_str()).collect();
        assert_eq!(vec!["c.png", "a.png"], names);
    }

    #[test]
    fn enabled_images_layer_group_defaults_under_image_overrides() {
        let (_dir, gallery) = gallery();
        for name in ["a.png", "b.png"] {
            gallery.add_image(new_image(name)).unwrap();
        }
        let group_overrides = Overrides {
            mat_color: Some("#101010".to_string()),
            mat_finish: Some("linen".to_string()),
            bevel_width: None,
            scale: Some(0.8),
        };
        gallery
            .create_group(
                "Framed",
                group_overrides,
                &["a.png".to_string(), "b.png".to_string()],
                "2024-05-01T10:00:00Z".to_string(),
            )
            .unwrap();
        let patch: ImagePatch = serde_json::from_str(r##"{"mat_color": "#ffffff"}"##).unwrap();
        gallery.update_image("a.png", &patch).unwrap();

        let display = gallery.enabled_images().unwrap();
        let a = display.iter().find(|d| d.filename == "a.png").unwrap();
        let b = display.iter().find(|d| d.filename == "b.png").unwrap();
        // image override wins, group fills the gaps
        assert_eq!(Some("#ffffff".to_string()), a.mat_color);
        assert_eq!(Some("linen".to_string()), a.mat_finish);
        assert_eq!(Some("#101010".to_string()), b.mat_color);
        assert!((b.scale - 0.8).abs() < f32::EPSILON);
    }

    #[test]
    fn display_scale_defaults_to_one() {
        let (_dir, gallery) = gallery();
        gallery.add_image(new_image("a.png")).unwrap();
        let display = gallery.enabled_images().unwrap();
        assert!((display[0].scale - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn set_phash_tolerates_deleted_images() {
        let (_dir, gallery) = gallery();
        gallery.add_image(new_image("a.png")).unwrap();
        gallery.set_phash("a.png", 42).unwrap();
        assert_eq!(
            Some(phash::encode(42)),
            gallery.load().unwrap().images["a.png"].phash
        );
        // no entry, no error
        gallery.set_phash("gone.png", 7).unwrap();
    }
}
