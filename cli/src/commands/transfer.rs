use std::path::Path;

use anyhow::{Context, Result};

use food_diary_core::service::DiaryService;

use super::helpers::{parse_date, print_json};

pub(crate) fn cmd_import(svc: &DiaryService, path: &Path, json: bool) -> Result<()> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))?;

    let summary = svc
        .import_json(&bytes)
        .with_context(|| format!("Import of {} failed", path.display()))?;

    if json {
        print_json(&summary)?;
    } else {
        println!("Import complete.\n");
        println!("  Pages created:  {}", summary.pages_created);
        println!("  Pages updated:  {}", summary.pages_updated);
        println!("  Notes imported: {}", summary.notes_imported);
    }
    Ok(())
}

/// Export pages in `[from, to]`. Without `out`, the file goes to stdout.
pub(crate) fn cmd_export(
    svc: &DiaryService,
    from: &str,
    to: &str,
    out: Option<&Path>,
    json: bool,
) -> Result<()> {
    let start = parse_date(Some(from.to_string()))?;
    let end = parse_date(Some(to.to_string()))?;
    let bytes = svc.export_json(start, end)?;

    let Some(out) = out else {
        println!("{}", String::from_utf8_lossy(&bytes));
        return Ok(());
    };

    std::fs::write(out, &bytes)
        .with_context(|| format!("Failed to write file: {}", out.display()))?;
    if json {
        print_json(&serde_json::json!({
            "path": out.display().to_string(),
            "bytes": bytes.len(),
        }))?;
    } else {
        println!("Exported {start} to {end} into {}", out.display());
    }
    Ok(())
}
