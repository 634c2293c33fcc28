use std::collections::BTreeSet;
use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// A count of items and their total size, both bumped atomically.
#[derive(Debug, Default)]
pub struct ItemCountSize {
    count: AtomicU64,
    bytes: AtomicU64,
}

impl ItemCountSize {
    /// Adds one item of `size` bytes and returns the new totals.
    pub fn add(&self, size: i64) -> (u64, u64) {
        let size = u64::try_from(size).unwrap_or(0);
        let count = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        let bytes = self.bytes.fetch_add(size, Ordering::Relaxed) + size;
        (count, bytes)
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

impl fmt::Display for ItemCountSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({})",
            format_count(self.count()),
            format_size(self.bytes() as f64)
        )
    }
}

#[derive(Debug, Default)]
pub struct RunStats {
    pub total: ItemCountSize,
    pub ignored: ItemCountSize,
    pub up_to_date: ItemCountSize,
    pub new: ItemCountSize,
    pub modified: ItemCountSize,
    pub downloaded: ItemCountSize,
    pub local: ItemCountSize,
    pub deleted: ItemCountSize,
    exceptions: AtomicU64,
    failed_downloads: AtomicU64,
}

impl RunStats {
    pub fn add_exception(&self) -> u64 {
        self.exceptions.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn add_failed_download(&self) -> u64 {
        self.failed_downloads.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn exceptions(&self) -> u64 {
        self.exceptions.load(Ordering::Relaxed)
    }

    pub fn failed_downloads(&self) -> u64 {
        self.failed_downloads.load(Ordering::Relaxed)
    }

    pub fn summary_lines(&self) -> Vec<String> {
        vec![
            format!("{} remote items scanned and found:", self.total),
            format!("{} new", self.new),
            format!("{} modified", self.modified),
            format!("{} downloaded", self.downloaded),
            format!("{} up to date", self.up_to_date),
            format!(
                "{} ignored, {} failed, {} exceptions",
                self.ignored,
                format_count(self.failed_downloads()),
                format_count(self.exceptions())
            ),
            format!("{} local", self.local),
            format!("{} local files deleted (or moved)", self.deleted),
        ]
    }
}

const SIZE_UNITS: [&str; 9] = ["B", "KB", "MB", "GB", "TB", "PB", "EB", "ZB", "YB"];

/// Binary-unit size with at most two decimals and grouped thousands.
pub fn format_size(size: f64) -> String {
    let mut size = size;
    let mut unit = 0;
    while size >= 1024.0 && unit < SIZE_UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    let rounded = format!("{size:.2}");
    let (int_part, frac_part) = rounded.split_once('.').unwrap_or((&rounded, ""));
    let frac_part = frac_part.trim_end_matches('0');
    let mut out = group_thousands(int_part);
    if !frac_part.is_empty() {
        out.push('.');
        out.push_str(frac_part);
    }
    out.push(' ');
    out.push_str(SIZE_UNITS[unit]);
    out
}

pub fn format_count(value: u64) -> String {
    group_thousands(&value.to_string())
}

fn group_thousands(digits: &str) -> String {
    let len = digits.len();
    let mut out = String::with_capacity(len + len / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (len - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Characters describing what happened since the last progress line
/// (`.` scan progress, `N` new, `m` modified, `d`/`D` deletions).
#[derive(Debug, Default)]
pub struct ActivityLog {
    marks: Mutex<BTreeSet<char>>,
}

impl ActivityLog {
    pub fn mark(&self, c: char) -> bool {
        self.marks
            .lock()
            .map(|mut marks| marks.insert(c))
            .unwrap_or(false)
    }

    pub fn take(&self) -> String {
        match self.marks.lock() {
            Ok(mut marks) => std::mem::take(&mut *marks).into_iter().collect(),
            Err(_) => String::new(),
        }
    }
}
