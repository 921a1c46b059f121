use colored::Colorize;
use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, ContentArrangement, Table};

use migrator_core::discovery::LogicalDatabase;
use migrator_core::{DatabaseStatus, GenerateReport, MigrateReport, StatusRow};

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header.into_iter().map(Cell::new).collect::<Vec<_>>());
    table
}

fn format_version(version: Option<u64>) -> String {
    version.map_or_else(|| "none".to_string(), |v| v.to_string())
}

/// Discovered databases and their migration directories.
pub fn print_database_list(databases: &[LogicalDatabase]) {
    if databases.is_empty() {
        println!("{}", "No databases found.".yellow());
        return;
    }

    let mut table = new_table(vec!["Database", "Migrations Path", "Declared In"]);
    for db in databases {
        table.add_row(vec![
            Cell::new(&db.name),
            Cell::new(db.migrations_path.display()),
            Cell::new(&db.origin).fg(comfy_table::Color::DarkGrey),
        ]);
    }
    println!("{table}");
}

/// Format migration status as a colored table.
pub fn print_status_table(rows: &[StatusRow]) {
    let mut table = new_table(vec!["Database", "PG Name", "Version", "Dirty", "Error"]);

    for row in rows {
        let pg_name = row.pg_database.as_deref().unwrap_or("N/A");
        let (version, dirty) = if row.error.is_some() {
            ("error".red().to_string(), String::new())
        } else if row.dirty {
            (format_version(row.version), "YES".red().bold().to_string())
        } else {
            (format_version(row.version), "no".green().to_string())
        };

        table.add_row(vec![
            Cell::new(&row.database),
            Cell::new(pg_name),
            Cell::new(version),
            Cell::new(dirty),
            Cell::new(row.error.as_deref().unwrap_or("")),
        ]);
    }

    println!("{table}");
}

/// Print a migration run summary, one line per database.
pub fn print_migrate_summary(report: &MigrateReport) {
    for result in &report.results {
        match &result.status {
            DatabaseStatus::Migrated { outcome } => println!(
                "  {} {} version {} -> {}",
                "→".green(),
                result.database.bold(),
                format_version(outcome.version_before),
                format_version(outcome.version_after)
            ),
            DatabaseStatus::Unchanged { outcome } => println!(
                "  {} {} no changes (version {})",
                "=".dimmed(),
                result.database.bold(),
                format_version(outcome.version_after)
            ),
            DatabaseStatus::Skipped { reason } => eprintln!(
                "  {} {} skipped: {}",
                "!".yellow(),
                result.database.bold(),
                reason
            ),
            DatabaseStatus::Failed { error } => eprintln!(
                "  {} {} {}",
                "✗".red(),
                result.database.bold(),
                error
            ),
        }
    }

    let migrated = report.migrated();
    let problems = report.skipped() + report.failed();
    if problems == 0 && migrated == 0 {
        println!("{}", "All databases are up to date. No migration necessary.".green());
    } else if problems == 0 {
        println!(
            "{}",
            format!("Successfully migrated {} database(s) {}", migrated, report.direction)
                .green()
                .bold()
        );
    } else {
        println!(
            "{}",
            format!(
                "Migrated {} database(s) {}; {} skipped, {} failed",
                migrated,
                report.direction,
                report.skipped(),
                report.failed()
            )
            .yellow()
            .bold()
        );
    }
}

/// Print what `generate` did.
pub fn print_generate_result(report: &GenerateReport) {
    for copy in &report.copied {
        println!(
            "  {} copied {} file(s) for {} to {}",
            "→".green(),
            copy.files,
            copy.database.bold(),
            copy.to.display()
        );
    }

    match &report.output {
        Some(path) => println!(
            "{}",
            format!(
                "Wrote manifest with {} database(s) to {}",
                report.manifest.databases.len(),
                path.display()
            )
            .green()
            .bold()
        ),
        None => print!("{}", report.rendered),
    }
}
