//! Conflict naming for keep-both resolution
//!
//! Generates unique file names for conflict copies, following the pattern:
//! `filename (conflict YYYY-MM-DDTHH:MM:SSZ).ext`

use chrono::Utc;

/// Generates unique conflict file names
pub struct ConflictNamer;

impl ConflictNamer {
    /// Generates a conflict copy filename
    ///
    /// Given "report.docx", produces something like:
    /// "report (conflict 2026-02-07T10:15:30Z).docx"
    pub fn generate(original_name: &str) -> String {
        let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%SZ");

        if let Some(dot_pos) = original_name.rfind('.') {
            let stem = &original_name[..dot_pos];
            let ext = &original_name[dot_pos..];
            format!("{stem} (conflict {timestamp}){ext}")
        } else {
            format!("{original_name} (conflict {timestamp})")
        }
    }

    /// Verifies the generated name doesn't collide with existing names
    ///
    /// If the name already exists, appends an incrementing numeric suffix
    /// (`(2)`, `(3)`, ...) until a free name is found.
    pub fn generate_unique<F>(original_name: &str, mut exists: F) -> String
    where
        F: FnMut(&str) -> bool,
    {
        let candidate = Self::generate(original_name);
        if !exists(&candidate) {
            return candidate;
        }

        for i in 2..=99 {
            let numbered = if let Some(dot_pos) = candidate.rfind('.') {
                let stem = &candidate[..dot_pos];
                let ext = &candidate[dot_pos..];
                format!("{stem} ({i}){ext}")
            } else {
                format!("{candidate} ({i})")
            };

            if !exists(&numbered) {
                return numbered;
            }
        }

        // Exhausted the numeric fallback range; fall back to a nanosecond
        // timestamp, which cannot collide with anything generated this run.
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        if let Some(dot_pos) = candidate.rfind('.') {
            let stem = &candidate[..dot_pos];
            let ext = &candidate[dot_pos..];
            format!("{stem} ({nanos}){ext}")
        } else {
            format!("{candidate} ({nanos})")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_with_extension() {
        let name = ConflictNamer::generate("report.docx");
        assert!(name.starts_with("report (conflict "));
        assert!(name.ends_with(").docx"));
        assert!(name.contains("20")); // year prefix
    }

    #[test]
    fn test_generate_without_extension() {
        let name = ConflictNamer::generate("Makefile");
        assert!(name.starts_with("Makefile (conflict "));
        assert!(name.ends_with(')'));
    }

    #[test]
    fn test_generate_with_multiple_dots() {
        let name = ConflictNamer::generate("archive.tar.gz");
        assert!(name.ends_with(").gz"));
        assert!(name.contains("archive.tar (conflict"));
    }

    #[test]
    fn test_generate_unique_no_collision() {
        let name = ConflictNamer::generate_unique("test.txt", |_| false);
        assert!(name.contains("conflict"));
    }

    #[test]
    fn test_generate_unique_with_collision_falls_back_to_numeric_suffix() {
        let mut call_count = 0;
        let name = ConflictNamer::generate_unique("test.txt", |_| {
            call_count += 1;
            call_count <= 1 // first candidate collides
        });
        assert!(name.ends_with("(2).txt"));
    }
}
