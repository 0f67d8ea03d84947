use anyhow::Result;

use food_diary_core::service::DiaryService;

use super::helpers::{exit_not_found, print_category_table, print_json};

pub(crate) fn cmd_category_add(svc: &DiaryService, name: &str, json: bool) -> Result<()> {
    let category = svc.create_category(name)?;
    if json {
        print_json(&category)?;
    } else {
        println!("Added category {} (ID {})", category.name, category.id);
    }
    Ok(())
}

pub(crate) fn cmd_category_list(svc: &DiaryService, filter: Option<&str>, json: bool) -> Result<()> {
    let categories = svc.categories_dropdown(filter)?;
    if json {
        print_json(&categories)?;
    } else if categories.is_empty() {
        println!("No categories yet. Add one with: food-diary category add <name>");
    } else {
        print_category_table(&categories);
    }
    Ok(())
}

pub(crate) fn cmd_category_rename(svc: &DiaryService, id: i64, name: &str, json: bool) -> Result<()> {
    if svc.get_category(id).is_err() {
        exit_not_found(&format!("Category {id} not found"), json);
    }
    let category = svc.rename_category(id, name)?;
    if json {
        print_json(&category)?;
    } else {
        println!("Renamed category {id} to {}", category.name);
    }
    Ok(())
}

pub(crate) fn cmd_category_delete(svc: &DiaryService, id: i64, json: bool) -> Result<()> {
    if svc.delete_category(id)? {
        if json {
            println!("{}", serde_json::json!({ "deleted": id }));
        } else {
            println!("Deleted category {id}");
        }
        Ok(())
    } else {
        exit_not_found(&format!("Category {id} not found"), json)
    }
}
