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

use chrono::{Datelike, Local, NaiveTime, Timelike};

use crate::error::Error;
use crate::models::ScheduleEntry;

/// Weekdays are numbered 0 = Monday through 6 = Sunday, matching the stored
/// schedule format.
pub type WeekdayIndex = u8;

/// Injected wherever schedule decisions are made so tests can pin the clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> (WeekdayIndex, NaiveTime);
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> (WeekdayIndex, NaiveTime) {
        let now = Local::now();
        let weekday = now.weekday().num_days_from_monday() as WeekdayIndex;
        let time = NaiveTime::from_hms_opt(now.hour(), now.minute(), now.second())
            .expect("wall clock out of range");
        (weekday, time)
    }
}

pub fn parse_hhmm(value: &str) -> Result<NaiveTime, Error> {
    let invalid = || Error::validation(format!("invalid time {:?}, expected HH:MM", value));
    let (h, m) = value.split_once(':').ok_or_else(invalid)?;
    let hour: u32 = h.parse().map_err(|_| invalid())?;
    let minute: u32 = m.parse().map_err(|_| invalid())?;
    NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(invalid)
}

/// Validate a schedule list before it is persisted, filling in missing entry
/// ids.
pub fn validate_entries(entries: &mut [ScheduleEntry]) -> Result<(), Error> {
    for (index, entry) in entries.iter_mut().enumerate() {
        parse_hhmm(&entry.on_time)?;
        parse_hhmm(&entry.off_time)?;
        for day in &entry.days {
            if *day > 6 {
                return Err(Error::validation(format!(
                    "day {} is out of range, days run 0 (Monday) through 6 (Sunday)",
                    day
                )));
            }
        }
        if entry.id.is_empty() {
            let mut hasher = blake3::Hasher::new();
            hasher.update(entry.on_time.as_bytes());
            hasher.update(entry.off_time.as_bytes());
            hasher.update(&(index as u32).to_le_bytes());
            entry.id = format!("sched_{}", &hasher.finalize().to_hex().as_str()[..8]);
        }
    }
    Ok(())
}

fn previous_day(weekday: WeekdayIndex) -> WeekdayIndex {
    (weekday + 6) % 7
}

fn entry_active(entry: &ScheduleEntry, weekday: WeekdayIndex, time: NaiveTime) -> bool {
    if !entry.enabled || entry.days.is_empty() {
        return false;
    }
    let (on, off) = match (parse_hhmm(&entry.on_time), parse_hhmm(&entry.off_time)) {
        (Ok(on), Ok(off)) => (on, off),
        // stored garbage never turns the display on
        _ => return false,
    };
    let today = entry.days.contains(&weekday);
    if on < off {
        today && time >= on && time < off
    } else {
        // window wraps past midnight; the tail end anchors on the previous day
        let yesterday = entry.days.contains(&previous_day(weekday));
        (today && time >= on) || (yesterday && time < off)
    }
}

/// True when any entry says the display should be on. Entries are a union:
/// they may overlap and their order never matters.
pub fn is_active(entries: &[ScheduleEntry], weekday: WeekdayIndex, time: NaiveTime) -> bool {
    entries
        .iter()
        .any(|entry| entry_active(entry, weekday, time))
}

/// Deploy gating: updates may roll out only while no schedule reports the
/// display as on. With nothing scheduled there is nothing to protect.
pub fn deploy_allowed(entries: &[ScheduleEntry], weekday: WeekdayIndex, time: NaiveTime) -> bool {
    !is_active(entries, weekday, time)
}
