//! CLI output formatting.
//!
//! # Output Format
//!
//! ## resize / permalink
//!
//! ```text
//! https://example.com/imageresize/3a7bd3...4f1b.jpg
//! ```
//!
//! ## fetch
//!
//! ```text
//! image/jpeg, 14.2 KB
//!     Artifact: storage/imageresizecache/3a7/bd3/e23/3a7bd3...4f1b.jpg
//!     Written: thumb.jpg
//! ```
//!
//! ## clear / gc / cache-cleared
//!
//! ```text
//! Deleted 12 files (3.4 MB) from storage/imageresizecache
//!     Removed 4 empty directories
//!     Failed: 1
//! ```
//!
//! # Architecture
//!
//! Each command has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure: no I/O, no side effects.

use crate::gc::GcReport;
use crate::materialize::RenderedImage;
use std::path::Path;

// ============================================================================
// Helpers
// ============================================================================

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// `1 file`, `2 files`.
fn plural(count: usize, word: &str) -> String {
    if count == 1 {
        format!("{count} {word}")
    } else {
        format!("{count} {word}s")
    }
}

/// Byte count in the largest unit that keeps the value at or above 1.
fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = UNITS[0];
    for next in UNITS[1..].iter().copied() {
        if value < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = next;
    }
    format!("{value:.1} {unit}")
}

// ============================================================================
// Fetch
// ============================================================================

pub fn format_rendered(image: &RenderedImage, written: Option<&Path>) -> Vec<String> {
    let mut lines = vec![format!(
        "{}, {}",
        image.content_type(),
        human_bytes(image.bytes.len() as u64)
    )];
    lines.push(format!("{}Artifact: {}", indent(1), image.path.display()));
    if let Some(out) = written {
        lines.push(format!("{}Written: {}", indent(1), out.display()));
    }
    lines
}

pub fn print_rendered(image: &RenderedImage, written: Option<&Path>) {
    for line in format_rendered(image, written) {
        println!("{}", line);
    }
}

// ============================================================================
// Garbage collection
// ============================================================================

pub fn format_gc_report(report: &GcReport, root: &Path) -> Vec<String> {
    let mut lines = vec![format!(
        "Deleted {} ({}) from {}",
        plural(report.deleted, "file"),
        human_bytes(report.bytes_freed),
        root.display()
    )];
    if report.dirs_removed > 0 {
        let noun = if report.dirs_removed == 1 {
            "directory"
        } else {
            "directories"
        };
        lines.push(format!(
            "{}Removed {} empty {noun}",
            indent(1),
            report.dirs_removed
        ));
    }
    if report.descriptors_purged > 0 {
        lines.push(format!(
            "{}Purged {}",
            indent(1),
            plural(report.descriptors_purged, "expired descriptor")
        ));
    }
    if report.failed > 0 {
        lines.push(format!("{}Failed: {}", indent(1), report.failed));
    }
    lines
}

pub fn print_gc_report(report: &GcReport, root: &Path) {
    for line in format_gc_report(report, root) {
        println!("{}", line);
    }
}

/// Line shown when a config-gated collection is switched off.
pub fn format_gc_disabled(setting: &str) -> String {
    format!("Skipped: {setting} is disabled")
}

// ============================================================================
// Permalinks
// ============================================================================

pub fn format_reset(count: usize) -> String {
    format!("Successfully deleted {}", plural(count, "permalink"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::OutputFormat;
    use std::path::PathBuf;

    // =========================================================================
    // Helper tests
    // =========================================================================

    #[test]
    fn plural_forms() {
        assert_eq!(plural(0, "file"), "0 files");
        assert_eq!(plural(1, "file"), "1 file");
        assert_eq!(plural(2, "file"), "2 files");
    }

    #[test]
    fn human_bytes_units() {
        assert_eq!(human_bytes(0), "0 B");
        assert_eq!(human_bytes(1023), "1023 B");
        assert_eq!(human_bytes(1024), "1.0 KB");
        assert_eq!(human_bytes(1536), "1.5 KB");
        assert_eq!(human_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    // =========================================================================
    // Command output tests
    // =========================================================================

    #[test]
    fn rendered_output() {
        let image = RenderedImage {
            bytes: vec![0; 2048],
            format: OutputFormat::Jpg,
            path: PathBuf::from("cache/a.jpg"),
        };
        assert_eq!(
            format_rendered(&image, Some(Path::new("out.jpg"))),
            vec![
                "image/jpeg, 2.0 KB",
                "    Artifact: cache/a.jpg",
                "    Written: out.jpg",
            ]
        );
        assert_eq!(format_rendered(&image, None).len(), 2);
    }

    #[test]
    fn gc_report_minimal() {
        let report = GcReport::default();
        assert_eq!(
            format_gc_report(&report, Path::new("cache")),
            vec!["Deleted 0 files (0 B) from cache"]
        );
    }

    #[test]
    fn gc_report_full() {
        let report = GcReport {
            scanned: 10,
            candidates: 6,
            deleted: 4,
            failed: 1,
            bytes_freed: 4096,
            dirs_removed: 1,
            descriptors_purged: 2,
        };
        assert_eq!(
            format_gc_report(&report, Path::new("cache")),
            vec![
                "Deleted 4 files (4.0 KB) from cache",
                "    Removed 1 empty directory",
                "    Purged 2 expired descriptors",
                "    Failed: 1",
            ]
        );
    }

    #[test]
    fn gc_report_directories_plural() {
        let report = GcReport {
            dirs_removed: 3,
            ..GcReport::default()
        };
        assert_eq!(
            format_gc_report(&report, Path::new("c"))[1],
            "    Removed 3 empty directories"
        );
    }

    #[test]
    fn reset_and_disabled_lines() {
        assert_eq!(format_reset(1), "Successfully deleted 1 permalink");
        assert_eq!(format_reset(3), "Successfully deleted 3 permalinks");
        assert_eq!(
            format_gc_disabled("cache.scheduled_gc"),
            "Skipped: cache.scheduled_gc is disabled"
        );
    }
}
