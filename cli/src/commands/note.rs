use anyhow::{Result, bail};

use food_diary_core::models::{MealType, NewNote, UpdateNote};
use food_diary_core::service::DiaryService;

use super::helpers::{exit_not_found, parse_date, print_json, print_note_table};
use super::resolve_product;

pub(crate) fn cmd_note_add(
    svc: &DiaryService,
    product: &str,
    quantity: Option<f64>,
    meal: &str,
    date: Option<String>,
    order: Option<i64>,
    json: bool,
) -> Result<()> {
    let meal_type: MealType = meal.parse()?;
    let date = parse_date(date)?;
    let product = resolve_product(svc, product)?;
    let page = svc.get_or_create_page(date)?;
    let page_id = page.id.unwrap_or_default();

    let note = svc.add_note(
        page_id,
        &NewNote {
            product_id: product.id,
            quantity: quantity.unwrap_or(product.default_quantity),
            meal_type,
            display_order: order,
        },
    )?;

    if json {
        print_json(&note)?;
    } else {
        println!(
            "Logged {:.0}g {} for {meal_type} on {}: {:.0} kcal (note {})",
            note.quantity,
            note.product_name,
            date.format("%Y-%m-%d"),
            note.calories,
            note.id.unwrap_or_default()
        );
    }
    Ok(())
}

pub(crate) fn cmd_note_edit(
    svc: &DiaryService,
    id: i64,
    product: Option<&str>,
    quantity: Option<f64>,
    meal: Option<&str>,
    order: Option<i64>,
    json: bool,
) -> Result<()> {
    let update = UpdateNote {
        product_id: product.map(|p| resolve_product(svc, p)).transpose()?.map(|p| p.id),
        quantity,
        meal_type: meal.map(str::parse).transpose()?,
        display_order: order,
    };
    if update.is_empty() {
        bail!("Nothing to update. Provide at least one of --product, --quantity, --meal, or --order");
    }
    if svc.get_note(id).is_err() {
        exit_not_found(&format!("Note {id} not found"), json);
    }

    let note = svc.edit_note(id, &update)?;
    if json {
        print_json(&note)?;
    } else {
        println!(
            "Updated note {id}: {:.0}g {} for {}: {:.0} kcal",
            note.quantity, note.product_name, note.meal_type, note.calories
        );
    }
    Ok(())
}

pub(crate) fn cmd_note_delete(svc: &DiaryService, id: i64, json: bool) -> Result<()> {
    if svc.delete_note(id)? {
        if json {
            println!("{}", serde_json::json!({ "deleted": id }));
        } else {
            println!("Deleted note {id}");
        }
        Ok(())
    } else {
        exit_not_found(&format!("Note {id} not found"), json)
    }
}

pub(crate) fn cmd_note_list(svc: &DiaryService, date: Option<String>, json: bool) -> Result<()> {
    let date = parse_date(date)?;
    let Some(page) = svc.get_page_by_date(date)? else {
        exit_not_found(&format!("No page for {}", date.format("%Y-%m-%d")), json);
    };
    if json {
        print_json(&page.notes)?;
    } else if page.notes.is_empty() {
        println!("No notes for {}", date.format("%Y-%m-%d"));
    } else {
        print_note_table(&page.notes);
    }
    Ok(())
}
