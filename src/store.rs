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

use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use crate::error::Error;

/// A named record set persisted as one JSON file, loaded whole and saved
/// whole. Writers serialize on an exclusive advisory lock; saves go through
/// a temp file and an atomic rename so a crash mid-write leaves the previous
/// record intact.
pub struct JsonStore<T> {
    path: PathBuf,
    lock_path: PathBuf,
    _record: PhantomData<fn() -> T>,
}

struct WriteLock(File);

impl Drop for WriteLock {
    fn drop(&mut self) {
        let _ = self.0.unlock();
    }
}

impl<T> JsonStore<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    pub fn open(dir: &Path, name: &str) -> Self {
        JsonStore {
            path: dir.join(format!("{}.json", name)),
            lock_path: dir.join(format!(".{}.lock", name)),
            _record: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the record set. A missing file is the defined default; a corrupt
    /// file is logged and also treated as missing rather than fatal. Any
    /// other read failure is a hard storage error.
    pub fn load(&self) -> Result<T, Error> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(T::default()),
            Err(err) => return Err(Error::storage(format!("{}: {}", self.path.display(), err))),
        };
        match serde_json::from_slice(&bytes) {
            Ok(record) => Ok(record),
            Err(err) => {
                eprintln!(
                    "Corrupt record in {}, falling back to defaults: {}",
                    self.path.display(),
                    err
                );
                Ok(T::default())
            }
        }
    }

    pub fn save(&self, record: &T) -> Result<(), Error> {
        let _lock = self.write_lock()?;
        self.write_atomic(record)
    }

    /// The read-modify-write transaction every mutation goes through: take
    /// the writer lock, load, mutate, save. The new record persists only if
    /// the mutation returns Ok; on Err the on-disk state is untouched.
    pub fn update<R>(&self, mutate: impl FnOnce(&mut T) -> Result<R, Error>) -> Result<R, Error> {
        let _lock = self.write_lock()?;
        let mut record = self.load()?;
        let out = mutate(&mut record)?;
        self.write_atomic(&record)?;
        Ok(out)
    }

    fn write_lock(&self) -> Result<WriteLock, Error> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&self.lock_path)
            .map_err(|err| Error::storage(format!("{}: {}", self.lock_path.display(), err)))?;
        file.lock_exclusive()
            .map_err(|err| Error::storage(format!("{}: {}", self.lock_path.display(), err)))?;
        Ok(WriteLock(file))
    }

    fn write_atomic(&self, record: &T) -> Result<(), Error> {
        let json = serde_json::to_vec_pretty(record).map_err(Error::storage)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, &json)
            .map_err(|err| Error::storage(format!("{}: {}", tmp.display(), err)))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|err| Error::storage(format!("{}: {}", self.path.display(), err)))
    }
}
