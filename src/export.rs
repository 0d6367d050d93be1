//! Render a changelog snapshot as Markdown.
//!
//! Layout: one `##` section per day, newest first, headed by a long-form
//! date (`January 02, 2024`). Within a day, one `###` section per change
//! type in the fixed order features, bug fixes, improvements, docs, other.
//! Each entry is a bullet linking its pull request, with details on an
//! indented continuation line.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::fmt::Write as _;
use std::path::Path;

use crate::models::{ChangeRecord, ChangeType, Snapshot};

fn heading(change_type: ChangeType) -> &'static str {
    match change_type {
        ChangeType::Feature => "New Features",
        ChangeType::Bugfix => "Bug Fixes",
        ChangeType::Improvement => "Improvements",
        ChangeType::Docs => "Docs",
        ChangeType::Other => "Other",
    }
}

fn long_date(date: NaiveDate) -> String {
    date.format("%B %d, %Y").to_string()
}

fn entry_line(record: &ChangeRecord) -> String {
    let mut line = format!("- {}", record.summary);
    match (record.pr_number, record.pr_url.as_deref()) {
        (Some(number), Some(url)) => {
            let _ = write!(line, " ([#{}]({}))", number, url);
        }
        (Some(number), None) => {
            let _ = write!(line, " (#{})", number);
        }
        _ => {}
    }
    if let Some(details) = record.details.as_deref() {
        for detail_line in details.lines().filter(|l| !l.trim().is_empty()) {
            let _ = write!(line, "\n  {}", detail_line.trim());
        }
    }
    line
}

/// Render `snapshot` under a top-level `# {title}` heading.
pub fn render_markdown(snapshot: &Snapshot, title: &str) -> String {
    let mut out = format!("# {}\n", title);

    if snapshot.is_empty() {
        out.push_str("\n_No changes recorded._\n");
        return out;
    }

    for records in snapshot.changes.values().rev() {
        let Some(first) = records.first() else {
            continue;
        };
        let _ = write!(out, "\n## {}\n", long_date(first.date));

        for change_type in ChangeType::ALL {
            let section: Vec<&ChangeRecord> = records
                .iter()
                .filter(|r| r.change_type == change_type)
                .collect();
            if section.is_empty() {
                continue;
            }
            let _ = write!(out, "\n### {}\n\n", heading(change_type));
            for record in section {
                out.push_str(&entry_line(record));
                out.push('\n');
            }
        }
    }
    out
}

/// Print `content` to stdout, or write it to `output` (creating parent
/// directories) and report the path on stderr.
pub fn write_output(content: &str, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            std::fs::write(path, content)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!("Wrote changelog to {}", path.display());
        }
        None => {
            print!("{}", content);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::{assemble, AssemblyInput};
    use crate::models::GenerationScope;
    use chrono::Utc;

    fn record(pr: Option<i64>, day: u32, change_type: ChangeType, summary: &str) -> ChangeRecord {
        ChangeRecord {
            pr_number: pr,
            summary: summary.into(),
            details: None,
            change_type,
            author: None,
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            pr_url: pr.map(|n| format!("https://github.com/acme/widgets/pull/{}", n)),
            files: None,
            labels: Vec::new(),
            manual_id: if pr.is_none() { Some(1) } else { None },
        }
    }

    fn snapshot(new_records: Vec<ChangeRecord>, manual: &[ChangeRecord]) -> Snapshot {
        assemble(AssemblyInput {
            repo_id: "r1",
            previous: None,
            manual_entries: manual,
            versions: &[],
            scope: GenerationScope::Window {
                since: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                until: NaiveDate::from_ymd_opt(2024, 1, 8).unwrap(),
            },
            new_records,
            generated_at: Utc::now(),
        })
    }

    #[test]
    fn test_days_newest_first_with_sections() {
        let mut fix = record(Some(11), 3, ChangeType::Bugfix, "Fixed crash on save");
        fix.details = Some("Happened with empty files.".into());
        let manual = vec![record(None, 3, ChangeType::Docs, "Docs pass")];
        let md = render_markdown(
            &snapshot(
                vec![record(Some(10), 2, ChangeType::Feature, "Dark mode"), fix],
                &manual,
            ),
            "Widgets Changelog",
        );

        let expected = "# Widgets Changelog\n\
\n## January 03, 2024\n\
\n### Bug Fixes\n\n\
- Fixed crash on save ([#11](https://github.com/acme/widgets/pull/11))\n  Happened with empty files.\n\
\n### Docs\n\n\
- Docs pass\n\
\n## January 02, 2024\n\
\n### New Features\n\n\
- Dark mode ([#10](https://github.com/acme/widgets/pull/10))\n";
        assert_eq!(md, expected);
    }

    #[test]
    fn test_empty_snapshot() {
        let md = render_markdown(&snapshot(Vec::new(), &[]), "Empty");
        assert_eq!(md, "# Empty\n\n_No changes recorded._\n");
    }

    #[test]
    fn test_write_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("CHANGELOG.md");
        write_output("# x\n", Some(&path)).unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "# x\n");
    }
}
