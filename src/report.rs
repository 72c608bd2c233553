use std::fmt::Write;

use chrono::NaiveDate;

use crate::models::{GroupGradeRow, RunSummary};

fn or_dash<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |value| value.to_string())
}

pub fn build_report(
    seminar_title: &str,
    generated_on: NaiveDate,
    rows: &[GroupGradeRow],
    runs: &[RunSummary],
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Seminar Grade Report");
    let _ = writeln!(output, "Generated for {} on {}", seminar_title, generated_on);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Group Grades");

    if rows.is_empty() {
        let _ = writeln!(output, "No groups registered for this seminar.");
    } else {
        let _ = writeln!(output, "| Group | Presentation | Report | Final |");
        let _ = writeln!(output, "| --- | --- | --- | --- |");

        for row in rows {
            let _ = writeln!(
                output,
                "| {} | {} | {} | {} |",
                row.group_name,
                or_dash(row.presentation_grade.map(|grade| format!("{grade:.2}"))),
                or_dash(row.report_grade),
                or_dash(row.final_grade),
            );
        }
    }

    for run in runs {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Run: {} grades", run.kind);
        let _ = writeln!(
            output,
            "- {} assigned, {} excluded, {} failed",
            run.assignments.len(),
            run.excluded.len(),
            run.failures.len()
        );

        for failure in run.failures.iter() {
            let _ = writeln!(output, "- failed: {} ({})", failure.entity, failure.reason);
        }
    }

    output
}
