use std::{
    fs::{File, create_dir_all},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use chrono::{NaiveDateTime, Timelike};
use serde::Serialize;

/// ISO-8601 local time with `:` and `.` swapped for `-`, safe to put in a file name.
/// Microseconds are written only when non-zero.
pub fn timestamp(now: NaiveDateTime) -> String {
    let fmt = if now.nanosecond() / 1_000 == 0 {
        "%Y-%m-%dT%H:%M:%S"
    } else {
        "%Y-%m-%dT%H:%M:%S%.6f"
    };

    now.format(fmt).to_string().replace([':', '.'], "-")
}

pub fn output_name(timestamp: &str) -> String {
    format!("PY_jobs-{timestamp}.json")
}

/// Writes `value` as 2-space indented JSON to `dir/name`, creating `dir` if needed.
pub fn write_json<T: Serialize + ?Sized>(dir: &Path, name: &str, value: &T) -> anyhow::Result<PathBuf> {
    create_dir_all(dir)?;
    let path = dir.join(name);

    let file = File::create(&path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()?;

    Ok(path)
}

pub fn init_logger() {
    pretty_env_logger::formatted_timed_builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();
}
