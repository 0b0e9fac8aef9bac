#[macro_use]
extern crate rocket;
extern crate frame_server;

use frame_server::*;

use rocket::data::{Limits, ToByteUnit};
use rocket::fairing::AdHoc;
use rocket::form::Form;
use rocket::fs::{NamedFile, TempFile};
use rocket::http::{ContentType, MediaType};
use rocket::serde::{json::Json, Deserialize, Serialize};
use rocket::State;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use frame_server::backup::{BackupOrchestrator, TRANSFER_TIMEOUT_SECS};
use frame_server::cloud_sync::{self, CloudSync, RcloneSync};
use frame_server::file_things::{
    sanitize_filename, store_upload, thumbnail_path, DiskStorage, UploadStorage,
};
use frame_server::gallery::{BulkAction, BulkOutcome, NewImage};
use frame_server::guards::{display_token, AdminUser, ManagerUser};
use frame_server::image_operations::{open_image, write_thumbnail};
use frame_server::models::{
    BackupSettingsPatch, DisplayImage, GalleryRecord, GroupPatch, GroupRecord, ImagePatch,
    ImageRecord, Overrides, ScheduleEntry, Settings, SettingsPatch, SLIDESHOW_INTERVAL_MAX,
    SLIDESHOW_INTERVAL_MIN,
};
use frame_server::phash::{self, DuplicateMatch};
use frame_server::power::{PowerCommand, PowerControl};
use frame_server::schedule::{self, Clock, SystemClock};
use frame_server::scheduler::{self, Scheduler};
use frame_server::slideshow::ControlAction;

struct UploadRoot(PathBuf);

#[get("/")]
fn index() -> &'static str {
    "Frame Server"
}

const TINY_GIF: [u8; 37] = [
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x21, 0xf9, 0x04,
    0x01, 0x0a, 0x00, 0x01, 0x00, 0x2c, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x02,
    0x02, 0x4c, 0x01, 0x00, 0x3b,
];

#[get("/favicon.ico")]
fn favicon() -> (ContentType, &'static [u8]) {
    (ContentType::from(MediaType::GIF), &TINY_GIF)
}

#[get("/robots.txt")]
async fn robots_txt() -> &'static str {
    "User-agent: *\nDisallow: /"
}

// --- display surface (no auth) ---

#[derive(Serialize)]
struct DisplayResponse {
    images: Vec<DisplayImage>,
    settings: Settings,
}

#[get("/api/images")]
fn api_images(
    gallery: &State<Gallery>,
    settings: &State<Arc<JsonStore<Settings>>>,
) -> Result<Json<DisplayResponse>, Error> {
    Ok(Json(DisplayResponse {
        images: gallery.enabled_images()?,
        settings: settings.load()?,
    }))
}

#[derive(Serialize)]
struct DisplayStateResponse {
    index: usize,
    paused: bool,
    updated_at: i64,
    total: usize,
}

#[get("/api/display/state")]
fn api_display_state(
    gallery: &State<Gallery>,
    coordinator: &State<SlideshowCoordinator>,
) -> Result<Json<DisplayStateResponse>, Error> {
    let total = gallery.enabled_images()?.len();
    let state = coordinator.snapshot(total);
    Ok(Json(DisplayStateResponse {
        index: state.index,
        paused: state.paused,
        updated_at: state.updated_at,
        total,
    }))
}

#[derive(Deserialize)]
struct ControlRequest {
    action: ControlAction,
}

#[post("/api/display/control", data = "<body>")]
fn api_display_control(
    body: Json<ControlRequest>,
    _user: ManagerUser,
    gallery: &State<Gallery>,
    coordinator: &State<SlideshowCoordinator>,
) -> Result<Json<DisplayStateResponse>, Error> {
    let total = gallery.enabled_images()?.len();
    let state = coordinator.apply(body.action, total);
    Ok(Json(DisplayStateResponse {
        index: state.index,
        paused: state.paused,
        updated_at: state.updated_at,
        total,
    }))
}

#[derive(Serialize)]
struct MaintenanceWindowResponse {
    deploy_allowed: bool,
    display_active: bool,
}

#[get("/api/maintenance-window")]
fn api_maintenance_window(
    settings: &State<Arc<JsonStore<Settings>>>,
) -> Result<Json<MaintenanceWindowResponse>, Error> {
    let settings = settings.load()?;
    let (weekday, time) = SystemClock.now();
    let active = schedule::is_active(&settings.tv_schedules, weekday, time);
    Ok(Json(MaintenanceWindowResponse {
        deploy_allowed: !active,
        display_active: active,
    }))
}

#[get("/uploads/<filename>")]
async fn serve_upload(
    filename: &str,
    gallery: &State<Gallery>,
    root: &State<UploadRoot>,
) -> Result<NamedFile, Error> {
    // only files tracked in the catalog are served
    if !gallery.load()?.images.contains_key(filename) {
        return Err(Error::not_found(format!("image {}", filename)));
    }
    NamedFile::open(root.0.join(filename))
        .await
        .map_err(|_| Error::not_found(format!("image {}", filename)))
}

#[get("/thumbs/<filename>")]
async fn serve_thumbnail(
    filename: &str,
    gallery: &State<Gallery>,
    root: &State<UploadRoot>,
) -> Result<NamedFile, Error> {
    if !gallery.load()?.images.contains_key(filename) {
        return Err(Error::not_found(format!("image {}", filename)));
    }
    NamedFile::open(root.0.join("thumbs").join(format!("{}.jpg", filename)))
        .await
        .map_err(|_| Error::not_found(format!("thumbnail for {}", filename)))
}

// --- uploads and duplicate checking ---

#[derive(FromForm)]
struct UploadForm<'r> {
    files: Vec<TempFile<'r>>,
}

#[derive(Serialize)]
struct UploadWarning {
    matches: Vec<DuplicateMatch>,
    low_resolution: bool,
}

#[derive(Serialize)]
struct UploadResponse {
    uploaded: Vec<String>,
    errors: Vec<String>,
    warnings: BTreeMap<String, UploadWarning>,
    total_images: usize,
}

fn raw_upload_name<'a>(file: &'a TempFile<'_>) -> Option<&'a str> {
    file.raw_name()
        .map(|fname| fname.dangerous_unsafe_unsanitized_raw())
        .map(|rawname| rawname.as_str())
}

async fn stage_temp_file(
    root: &std::path::Path,
    file: &mut TempFile<'_>,
    tag: usize,
    name: &str,
) -> Result<PathBuf, Error> {
    let staging = root.join(format!(".incoming-{}-{}", tag, sanitize_filename(name)));
    file.copy_to(&staging)
        .await
        .map_err(|err| Error::storage(format!("{}: {}", staging.display(), err)))?;
    Ok(staging)
}

#[post("/api/upload", data = "<form>")]
async fn api_upload(
    form: Form<UploadForm<'_>>,
    _user: ManagerUser,
    gallery: &State<Gallery>,
    sem: &State<ImageSemaphore>,
    root: &State<UploadRoot>,
) -> Result<Json<UploadResponse>, Error> {
    let mut upload_form = form.into_inner();
    let mut uploaded = Vec::new();
    let mut errors = Vec::new();
    let mut warnings = BTreeMap::new();

    for (tag, file) in upload_form.files.iter_mut().enumerate() {
        let raw_name = match raw_upload_name(file) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => continue,
        };
        if !content_type::allowed_file(&raw_name) {
            errors.push(format!("Invalid file type: {}", raw_name));
            continue;
        }

        let staging = stage_temp_file(&root.0, file, tag, &raw_name).await?;
        let stored = store_upload(&root.0, &staging, &raw_name).await;
        let _ = tokio::fs::remove_file(&staging).await;
        let (stored_name, size) = match stored {
            Ok(result) => result,
            Err(err) => {
                eprintln!("Could not store {}: {}", raw_name, err);
                errors.push(format!("Could not store {}", raw_name));
                continue;
            }
        };

        // decode once for dimensions, hash and thumbnail; an undecodable
        // file is still admitted, just without any of those
        let mut width = None;
        let mut height = None;
        let mut hash = None;
        match open_image(&root.0, &stored_name, sem).await {
            Ok(opened) => {
                let (w, h) = opened.dimensions();
                width = Some(w);
                height = Some(h);
                hash = Some(phash::compute(opened.image()));

                let record = gallery.load()?;
                let matches = match hash {
                    Some(candidate) => {
                        phash::find_matches(candidate, &record, phash::DEFAULT_THRESHOLD)
                    }
                    None => Vec::new(),
                };
                let low_resolution = phash::below_resolution_floor(w, h);
                if !matches.is_empty() || low_resolution {
                    warnings.insert(
                        stored_name.clone(),
                        UploadWarning {
                            matches,
                            low_resolution,
                        },
                    );
                }

                match thumbnail_path(&root.0, &stored_name) {
                    Ok(dest) => {
                        if let Err(err) = write_thumbnail(opened, dest).await {
                            println!("No thumbnail for {}: {}", stored_name, err);
                        }
                    }
                    Err(err) => println!("No thumbnail for {}: {}", stored_name, err),
                }
            }
            Err(err) => {
                println!("Could not decode {}: {}", stored_name, err);
            }
        }

        match gallery.add_image(NewImage {
            stored_name: stored_name.clone(),
            original_name: raw_name,
            uploaded_by: "manager".to_string(),
            uploaded_at: chrono::Utc::now().to_rfc3339(),
            size,
            width,
            height,
            phash: hash,
        }) {
            Ok(_) => uploaded.push(stored_name),
            Err(Error::Validation(message)) => errors.push(message),
            Err(err) => return Err(err),
        }
    }

    let total_images = gallery.load()?.images.len();
    Ok(Json(UploadResponse {
        uploaded,
        errors,
        warnings,
        total_images,
    }))
}

#[derive(Serialize)]
struct DuplicateCheckEntry {
    matches: Vec<DuplicateMatch>,
    width: Option<u32>,
    height: Option<u32>,
    low_resolution: bool,
}

#[derive(Serialize)]
struct DuplicateCheckResponse {
    results: BTreeMap<String, DuplicateCheckEntry>,
}

#[post("/api/check-duplicates?<threshold>", data = "<form>")]
async fn api_check_duplicates(
    form: Form<UploadForm<'_>>,
    threshold: Option<u32>,
    _user: ManagerUser,
    gallery: &State<Gallery>,
    sem: &State<ImageSemaphore>,
    root: &State<UploadRoot>,
) -> Result<Json<DuplicateCheckResponse>, Error> {
    let threshold = threshold.unwrap_or(phash::DEFAULT_THRESHOLD);
    let record = gallery.load()?;
    let mut upload_form = form.into_inner();
    let mut results = BTreeMap::new();

    for (tag, file) in upload_form.files.iter_mut().enumerate() {
        let raw_name = match raw_upload_name(file) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => continue,
        };
        let staging = stage_temp_file(&root.0, file, tag, &raw_name).await?;
        let staged_name = staging
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let opened = open_image(&root.0, &staged_name, sem).await;
        let entry = match opened {
            Ok(opened) => {
                let (width, height) = opened.dimensions();
                let candidate = phash::compute(opened.image());
                DuplicateCheckEntry {
                    matches: phash::find_matches(candidate, &record, threshold),
                    width: Some(width),
                    height: Some(height),
                    low_resolution: phash::below_resolution_floor(width, height),
                }
            }
            Err(err) => {
                println!("Could not decode {} for duplicate check: {}", raw_name, err);
                DuplicateCheckEntry {
                    matches: Vec::new(),
                    width: None,
                    height: None,
                    low_resolution: false,
                }
            }
        };
        let _ = tokio::fs::remove_file(&staging).await;
        results.insert(raw_name, entry);
    }

    Ok(Json(DuplicateCheckResponse { results }))
}

#[derive(Serialize)]
struct BackfillResponse {
    success: bool,
    updated: usize,
    failed: usize,
}

#[post("/api/gallery/backfill-hashes")]
async fn api_backfill_hashes(
    _admin: AdminUser,
    gallery: &State<Gallery>,
    sem: &State<ImageSemaphore>,
    root: &State<UploadRoot>,
) -> Result<Json<BackfillResponse>, Error> {
    let report = phash::backfill(gallery, &root.0, sem).await?;
    Ok(Json(BackfillResponse {
        success: true,
        updated: report.updated,
        failed: report.failed,
    }))
}

// --- catalog management ---

#[get("/api/gallery")]
fn api_get_gallery(
    _user: ManagerUser,
    gallery: &State<Gallery>,
) -> Result<Json<GalleryRecord>, Error> {
    Ok(Json(gallery.load()?))
}

#[patch("/api/gallery/<filename>", data = "<patch>")]
fn api_update_image(
    filename: &str,
    patch: Json<ImagePatch>,
    _user: ManagerUser,
    gallery: &State<Gallery>,
) -> Result<Json<ImageRecord>, Error> {
    Ok(Json(gallery.update_image(filename, &patch)?))
}

#[derive(Serialize)]
struct DeleteResponse {
    success: bool,
    file_warning: Option<String>,
}

#[delete("/api/gallery/<filename>")]
fn api_delete_image(
    filename: &str,
    _user: ManagerUser,
    gallery: &State<Gallery>,
    storage: &State<DiskStorage>,
) -> Result<Json<DeleteResponse>, Error> {
    let (_removed, file_warning) = gallery.delete_image(filename, storage.inner())?;
    if let Some(warning) = &file_warning {
        eprintln!("File removal after delete of {}: {}", filename, warning);
    }
    Ok(Json(DeleteResponse {
        success: true,
        file_warning,
    }))
}

#[derive(Deserialize)]
struct BulkRequest {
    action: BulkAction,
    filenames: Vec<String>,
}

#[post("/api/gallery/bulk", data = "<body>")]
fn api_bulk(
    body: Json<BulkRequest>,
    _user: ManagerUser,
    gallery: &State<Gallery>,
    storage: &State<DiskStorage>,
) -> Result<Json<BulkOutcome>, Error> {
    if body.filenames.is_empty() {
        return Err(Error::validation("no images selected"));
    }
    let outcome = gallery.bulk(&body.filenames, body.action, storage.inner() as &dyn UploadStorage)?;
    for warning in &outcome.warnings {
        eprintln!("Bulk file removal: {}", warning);
    }
    Ok(Json(outcome))
}

#[derive(Deserialize)]
struct ReorderRequest {
    images: Vec<String>,
}

#[derive(Serialize)]
struct OkResponse {
    success: bool,
}

#[post("/api/reorder", data = "<body>")]
fn api_reorder(
    body: Json<ReorderRequest>,
    _user: ManagerUser,
    gallery: &State<Gallery>,
) -> Result<Json<OkResponse>, Error> {
    gallery.reorder(&body.images)?;
    Ok(Json(OkResponse { success: true }))
}

// --- groups ---

#[derive(Serialize)]
struct GroupsResponse {
    groups: BTreeMap<String, GroupRecord>,
}

#[get("/api/groups")]
fn api_get_groups(
    _user: ManagerUser,
    gallery: &State<Gallery>,
) -> Result<Json<GroupsResponse>, Error> {
    Ok(Json(GroupsResponse {
        groups: gallery.load()?.groups,
    }))
}

#[derive(Deserialize)]
struct CreateGroupRequest {
    name: String,
    #[serde(default)]
    overrides: Overrides,
    #[serde(default)]
    images: Vec<String>,
}

#[derive(Serialize)]
struct CreateGroupResponse {
    success: bool,
    group_id: String,
}

#[post("/api/groups", data = "<body>")]
fn api_create_group(
    body: Json<CreateGroupRequest>,
    _user: ManagerUser,
    gallery: &State<Gallery>,
) -> Result<Json<CreateGroupResponse>, Error> {
    let body = body.into_inner();
    let (group_id, _group) = gallery.create_group(
        &body.name,
        body.overrides,
        &body.images,
        chrono::Utc::now().to_rfc3339(),
    )?;
    Ok(Json(CreateGroupResponse {
        success: true,
        group_id,
    }))
}

#[patch("/api/groups/<group_id>", data = "<patch>")]
fn api_update_group(
    group_id: &str,
    patch: Json<GroupPatch>,
    _user: ManagerUser,
    gallery: &State<Gallery>,
) -> Result<Json<GroupRecord>, Error> {
    Ok(Json(gallery.update_group(group_id, &patch)?))
}

#[delete("/api/groups/<group_id>")]
fn api_delete_group(
    group_id: &str,
    _user: ManagerUser,
    gallery: &State<Gallery>,
) -> Result<Json<OkResponse>, Error> {
    gallery.delete_group(group_id)?;
    Ok(Json(OkResponse { success: true }))
}

// --- settings ---

#[get("/api/settings")]
fn api_get_settings(settings: &State<Arc<JsonStore<Settings>>>) -> Result<Json<Settings>, Error> {
    Ok(Json(settings.load()?))
}

#[post("/api/settings", data = "<patch>")]
fn api_set_settings(
    patch: Json<SettingsPatch>,
    _user: ManagerUser,
    settings: &State<Arc<JsonStore<Settings>>>,
) -> Result<Json<Settings>, Error> {
    let patch = patch.into_inner();
    gallery::validate_overrides(&Overrides {
        mat_color: patch.mat_color.value().cloned(),
        mat_finish: patch.mat_finish.value().cloned(),
        bevel_width: patch.bevel_width.value().copied(),
        scale: None,
    })?;
    if let Some(interval) = patch.slideshow_interval.value() {
        if !(SLIDESHOW_INTERVAL_MIN..=SLIDESHOW_INTERVAL_MAX).contains(interval) {
            return Err(Error::validation(format!(
                "slideshow_interval must be between {} and {} seconds",
                SLIDESHOW_INTERVAL_MIN, SLIDESHOW_INTERVAL_MAX
            )));
        }
    }
    if let Some(duration) = patch.transition_duration.value() {
        if !(0.0..=30.0).contains(duration) {
            return Err(Error::validation(
                "transition_duration must be between 0 and 30 seconds",
            ));
        }
    }
    let updated = settings.update(|current| {
        if let Some(v) = patch.mat_color.value() {
            current.mat_color = v.clone();
        }
        if let Some(v) = patch.mat_finish.value() {
            current.mat_finish = v.clone();
        }
        if let Some(v) = patch.bevel_width.value() {
            current.bevel_width = *v;
        }
        if let Some(v) = patch.slideshow_interval.value() {
            current.slideshow_interval = *v;
        }
        if let Some(v) = patch.transition_duration.value() {
            current.transition_duration = *v;
        }
        if let Some(v) = patch.fit_mode.value() {
            current.fit_mode = v.clone();
        }
        if let Some(v) = patch.shuffle.value() {
            current.shuffle = *v;
        }
        if let Some(v) = patch.show_filenames.value() {
            current.show_filenames = *v;
        }
        Ok(current.clone())
    })?;
    Ok(Json(updated))
}

// --- TV schedules and power ---

#[derive(Serialize)]
struct SchedulesResponse {
    schedules: Vec<ScheduleEntry>,
}

#[get("/api/tv-schedules")]
fn api_get_tv_schedules(
    _user: ManagerUser,
    settings: &State<Arc<JsonStore<Settings>>>,
) -> Result<Json<SchedulesResponse>, Error> {
    Ok(Json(SchedulesResponse {
        schedules: settings.load()?.tv_schedules,
    }))
}

#[derive(Deserialize)]
struct SaveSchedulesRequest {
    schedules: Vec<ScheduleEntry>,
}

#[post("/api/tv-schedules", data = "<body>")]
fn api_save_tv_schedules(
    body: Json<SaveSchedulesRequest>,
    _user: ManagerUser,
    settings: &State<Arc<JsonStore<Settings>>>,
) -> Result<Json<SchedulesResponse>, Error> {
    let mut entries = body.into_inner().schedules;
    schedule::validate_entries(&mut entries)?;
    let saved = settings.update(|current| {
        current.tv_schedules = entries.clone();
        Ok(current.tv_schedules.clone())
    })?;
    Ok(Json(SchedulesResponse { schedules: saved }))
}

#[derive(Serialize)]
struct CecStatusResponse {
    available: bool,
}

#[get("/api/cec/status")]
async fn api_cec_status(
    _user: ManagerUser,
    power: &State<Arc<dyn PowerControl>>,
) -> Json<CecStatusResponse> {
    let power = power.inner().clone();
    let available = tokio::task::spawn_blocking(move || power.is_available())
        .await
        .unwrap_or(false);
    Json(CecStatusResponse { available })
}

#[derive(Deserialize)]
struct CecTestRequest {
    command: PowerCommand,
}

#[post("/api/cec/test", data = "<body>")]
async fn api_cec_test(
    body: Json<CecTestRequest>,
    _user: ManagerUser,
    power: &State<Arc<dyn PowerControl>>,
) -> Result<Json<OkResponse>, Error> {
    let power = power.inner().clone();
    let command = body.command;
    tokio::task::spawn_blocking(move || power.set_power(command))
        .await
        .map_err(|err| Error::storage(err))?
        .map_err(|err| Error::CollaboratorUnavailable("power control", err))?;
    Ok(Json(OkResponse { success: true }))
}

// --- backup ---

#[derive(Serialize)]
struct BackupStatusResponse {
    configured: bool,
    in_progress: bool,
    restore_in_progress: bool,
    last_backup: Option<String>,
    last_result: Option<models::RunStatus>,
    last_error: Option<String>,
    next_scheduled: Option<String>,
    backup_time: String,
    backup_path: String,
    backup_enabled: bool,
}

#[get("/api/backup/status")]
fn api_backup_status(
    _admin: AdminUser,
    orchestrator: &State<Arc<BackupOrchestrator>>,
    settings: &State<Arc<JsonStore<Settings>>>,
) -> Result<Json<BackupStatusResponse>, Error> {
    let settings = settings.load()?;
    let log = orchestrator.log()?;
    let next_scheduled = if settings.backup_enabled {
        scheduler::next_backup_run(&settings.backup_time, chrono::Local::now().naive_local())
    } else {
        None
    };
    Ok(Json(BackupStatusResponse {
        configured: orchestrator.configured(),
        in_progress: orchestrator.backup_running(),
        restore_in_progress: orchestrator.restore_running(),
        last_backup: log.last_backup,
        last_result: log.last_result,
        last_error: log.last_error,
        next_scheduled,
        backup_time: settings.backup_time,
        backup_path: settings.backup_path,
        backup_enabled: settings.backup_enabled,
    }))
}

#[derive(Serialize)]
struct StartedResponse {
    success: bool,
    message: &'static str,
}

#[post("/api/backup/run")]
fn api_backup_run(
    _admin: AdminUser,
    orchestrator: &State<Arc<BackupOrchestrator>>,
    sync: &State<Arc<dyn CloudSync>>,
    settings: &State<Arc<JsonStore<Settings>>>,
) -> Result<Json<StartedResponse>, Error> {
    if orchestrator.backup_running() || orchestrator.restore_running() {
        return Err(Error::AlreadyRunning);
    }
    if !orchestrator.configured() {
        return Err(Error::validation("backup is not configured"));
    }
    let remote = settings.load()?.backup_path;
    let orchestrator = orchestrator.inner().clone();
    let sync = sync.inner().clone();
    tokio::task::spawn_blocking(move || match orchestrator.run(sync.as_ref(), &remote) {
        Ok(run) => println!("Manual backup finished: {:?}", run.status),
        Err(err) => eprintln!("Manual backup did not run: {}", err),
    });
    Ok(Json(StartedResponse {
        success: true,
        message: "Backup started",
    }))
}

#[post("/api/backup/restore")]
fn api_backup_restore(
    _admin: AdminUser,
    orchestrator: &State<Arc<BackupOrchestrator>>,
    sync: &State<Arc<dyn CloudSync>>,
    settings: &State<Arc<JsonStore<Settings>>>,
) -> Result<Json<StartedResponse>, Error> {
    if orchestrator.backup_running() || orchestrator.restore_running() {
        return Err(Error::AlreadyRunning);
    }
    if !orchestrator.configured() {
        return Err(Error::validation("backup is not configured"));
    }
    let remote = settings.load()?.backup_path;
    let orchestrator = orchestrator.inner().clone();
    let sync = sync.inner().clone();
    tokio::task::spawn_blocking(move || {
        match orchestrator.restore(sync.as_ref(), &remote) {
            Ok(()) => println!("Restore finished"),
            Err(err) => eprintln!("Restore failed: {}", err),
        }
    });
    Ok(Json(StartedResponse {
        success: true,
        message: "Restore started",
    }))
}

#[derive(Serialize)]
struct HistoryResponse {
    history: Vec<models::BackupRun>,
}

#[get("/api/backup/history")]
fn api_backup_history(
    _admin: AdminUser,
    orchestrator: &State<Arc<BackupOrchestrator>>,
) -> Result<Json<HistoryResponse>, Error> {
    Ok(Json(HistoryResponse {
        history: orchestrator.history()?,
    }))
}

#[post("/api/backup/settings", data = "<patch>")]
fn api_backup_settings(
    patch: Json<BackupSettingsPatch>,
    _admin: AdminUser,
    settings: &State<Arc<JsonStore<Settings>>>,
) -> Result<Json<OkResponse>, Error> {
    let patch = patch.into_inner();
    if let Some(time) = patch.backup_time.value() {
        schedule::parse_hhmm(time)?;
    }
    if let Some(path) = patch.backup_path.value() {
        if path.trim().is_empty() {
            return Err(Error::validation("backup_path must not be empty"));
        }
    }
    settings.update(|current| {
        if let Some(time) = patch.backup_time.value() {
            current.backup_time = time.clone();
        }
        if let Some(path) = patch.backup_path.value() {
            current.backup_path = path.trim().to_string();
        }
        if let Some(enabled) = patch.backup_enabled.value() {
            current.backup_enabled = *enabled;
        }
        Ok(())
    })?;
    Ok(Json(OkResponse { success: true }))
}

#[derive(Deserialize)]
struct ConfigureRequest {
    token: String,
}

#[post("/api/backup/configure", data = "<body>")]
async fn api_backup_configure(
    body: Json<ConfigureRequest>,
    _admin: AdminUser,
) -> Result<Json<OkResponse>, Error> {
    let token = body.token.trim().to_string();
    if token.is_empty() {
        return Err(Error::validation("no token provided"));
    }
    if serde_json::from_str::<serde_json::Value>(&token).is_err() {
        return Err(Error::validation(
            "invalid token format, expected the JSON blob from rclone authorize",
        ));
    }
    let data_dir = data_path().map_err(Error::storage)?;
    cloud_sync::write_rclone_config(&data_dir, &token).map_err(Error::storage)?;

    let config = cloud_sync::rclone_config_path(&data_dir);
    let test = tokio::task::spawn_blocking(move || cloud_sync::test_connection(&config))
        .await
        .map_err(Error::storage)?;
    if let Err(err) = test {
        let _ = cloud_sync::remove_rclone_config(&data_dir);
        return if err.contains("not installed") {
            Err(Error::CollaboratorUnavailable("cloud sync", err))
        } else {
            Err(Error::validation(format!("connection test failed: {}", err)))
        };
    }
    Ok(Json(OkResponse { success: true }))
}

#[delete("/api/backup/configure")]
fn api_backup_disconnect(_admin: AdminUser) -> Result<Json<OkResponse>, Error> {
    let data_dir = data_path().map_err(Error::storage)?;
    cloud_sync::remove_rclone_config(&data_dir).map_err(Error::storage)?;
    Ok(Json(OkResponse { success: true }))
}

#[derive(Serialize)]
struct DisplayTokenResponse {
    token: String,
}

#[get("/api/display-token")]
fn api_display_token(_admin: AdminUser) -> Result<Json<DisplayTokenResponse>, Error> {
    Ok(Json(DisplayTokenResponse {
        token: display_token().map_err(Error::storage)?,
    }))
}

#[launch]
fn rocket() -> _ {
    dotenv::dotenv().ok();
    let data_dir = data_path().expect("data directory should be creatable");
    let upload_dir = upload_path().expect("upload directory should be creatable");

    let settings: Arc<JsonStore<Settings>> = Arc::new(JsonStore::open(&data_dir, "settings"));
    let orchestrator = Arc::new(BackupOrchestrator::new(
        data_dir.clone(),
        upload_dir.clone(),
    ));
    let sync: Arc<dyn CloudSync> = Arc::new(RcloneSync::new(
        cloud_sync::rclone_config_path(&data_dir),
        Duration::from_secs(TRANSFER_TIMEOUT_SECS),
    ));
    let power: Arc<dyn PowerControl> = Arc::new(power::CecPower);
    let ticker = Arc::new(Scheduler::new());

    let scheduler_settings = settings.clone();
    let scheduler_orchestrator = orchestrator.clone();
    let scheduler_sync = sync.clone();
    let scheduler_power = power.clone();
    let scheduler_ticker = ticker.clone();

    let figment = rocket::Config::figment().merge((
        "limits",
        Limits::default()
            .limit("file", 50.mebibytes())
            .limit("data-form", 52.mebibytes()),
    ));

    rocket::custom(figment)
        .manage(Gallery::open(&data_dir))
        .manage(settings)
        .manage(orchestrator)
        .manage(sync)
        .manage(power)
        .manage(ticker)
        .manage(SlideshowCoordinator::new())
        .manage(ImageSemaphore::new(2))
        .manage(DiskStorage::new(upload_dir.clone()))
        .manage(UploadRoot(upload_dir))
        .mount(
            "/",
            routes![
                index,
                favicon,
                robots_txt,
                api_images,
                api_display_state,
                api_display_control,
                api_maintenance_window,
                serve_upload,
                serve_thumbnail,
                api_upload,
                api_check_duplicates,
                api_backfill_hashes,
                api_get_gallery,
                api_update_image,
                api_delete_image,
                api_bulk,
                api_reorder,
                api_get_groups,
                api_create_group,
                api_update_group,
                api_delete_group,
                api_get_settings,
                api_set_settings,
                api_get_tv_schedules,
                api_save_tv_schedules,
                api_cec_status,
                api_cec_test,
                api_backup_status,
                api_backup_run,
                api_backup_restore,
                api_backup_history,
                api_backup_settings,
                api_backup_configure,
                api_backup_disconnect,
                api_display_token,
            ],
        )
        .attach(rocket::shield::Shield::new())
        .attach(AdHoc::on_liftoff("scheduler tick", move |_| {
            Box::pin(async move {
                scheduler::spawn(
                    scheduler_settings,
                    scheduler_orchestrator,
                    scheduler_sync,
                    scheduler_power,
                    scheduler_ticker,
                );
            })
        }))
}
