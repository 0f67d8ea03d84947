use anyhow::{Result, bail};

use food_diary_core::models::{Page, PagesFilter};
use food_diary_core::service::DiaryService;

use super::helpers::{exit_not_found, parse_date, print_json, print_note_table, print_page_table};

pub(crate) fn cmd_page_create(svc: &DiaryService, date: Option<String>, json: bool) -> Result<()> {
    let date = parse_date(date)?;
    let page = svc.create_page(date)?;
    if json {
        print_json(&page)?;
    } else {
        println!(
            "Created page for {} (ID {})",
            page.date.format("%Y-%m-%d"),
            page.id.unwrap_or_default()
        );
    }
    Ok(())
}

/// Show a page by `--id`, or by date (default: today).
pub(crate) fn cmd_page_show(
    svc: &DiaryService,
    date: Option<String>,
    id: Option<i64>,
    json: bool,
) -> Result<()> {
    let page = if let Some(id) = id {
        let Ok(page) = svc.get_page(id) else {
            exit_not_found(&format!("Page {id} not found"), json);
        };
        page
    } else {
        let date = parse_date(date)?;
        let Some(page) = svc.get_page_by_date(date)? else {
            exit_not_found(&format!("No page for {}", date.format("%Y-%m-%d")), json);
        };
        page
    };

    if json {
        print_json(&page)?;
    } else {
        print_page(&page);
    }
    Ok(())
}

fn print_page(page: &Page) {
    println!(
        "{} (page {})",
        page.date.format("%A, %Y-%m-%d"),
        page.id.unwrap_or_default()
    );
    if page.notes.is_empty() {
        println!("  No notes.");
        return;
    }
    print_note_table(&page.notes);
    println!("Total: {:.0} kcal", page.total_calories());
}

pub(crate) fn cmd_page_list(svc: &DiaryService, filter: &PagesFilter, json: bool) -> Result<()> {
    let result = svc.search_pages(filter)?;
    if json {
        print_json(&result)?;
        return Ok(());
    }
    if result.pages.is_empty() {
        println!("No pages found");
        return Ok(());
    }
    print_page_table(&result.pages);
    println!(
        "Page {} · showing {} of {} diary pages",
        filter.page_number.unwrap_or(1),
        result.pages.len(),
        result.total_count
    );
    Ok(())
}

pub(crate) fn cmd_page_delete(svc: &DiaryService, ids: &[i64], json: bool) -> Result<()> {
    if ids.is_empty() {
        bail!("Provide at least one page ID");
    }
    let deleted = svc.delete_pages(ids)?;
    if json {
        println!("{}", serde_json::json!({ "deleted": deleted }));
    } else {
        println!("Deleted {deleted} page(s)");
    }
    Ok(())
}
