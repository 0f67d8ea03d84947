mod category;
mod helpers;
mod note;
mod page;
mod product;
mod transfer;

use anyhow::{Result, bail};

use food_diary_core::models::Product;
use food_diary_core::service::DiaryService;

pub(crate) use category::{
    cmd_category_add, cmd_category_delete, cmd_category_list, cmd_category_rename,
};
pub(crate) use helpers::parse_optional_date;
pub(crate) use note::{cmd_note_add, cmd_note_delete, cmd_note_edit, cmd_note_list};
pub(crate) use page::{cmd_page_create, cmd_page_delete, cmd_page_list, cmd_page_show};
pub(crate) use product::{
    cmd_product_add, cmd_product_delete, cmd_product_edit, cmd_product_find, cmd_product_search,
    cmd_product_show,
};
pub(crate) use transfer::{cmd_export, cmd_import};

/// Resolve a product given by ID or by name.
///
/// Names match exactly (case-insensitive) first, then by substring if that
/// leaves a single candidate.
pub(super) fn resolve_product(svc: &DiaryService, query: &str) -> Result<Product> {
    if let Ok(id) = query.trim().parse::<i64>() {
        return svc.get_product(id);
    }
    if let Some(product) = svc.find_product_by_name(query)? {
        return Ok(product);
    }

    let mut candidates = svc.products_dropdown(Some(query))?;
    match candidates.len() {
        0 => bail!("No product found for '{query}'"),
        1 => Ok(candidates.remove(0)),
        n => {
            let names: Vec<&str> = candidates.iter().take(5).map(|p| p.name.as_str()).collect();
            bail!(
                "'{query}' matches {n} products ({}). Use the exact name or the product ID",
                names.join(", ")
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use food_diary_core::models::NewProduct;

    fn service() -> DiaryService {
        let svc = DiaryService::new_in_memory().unwrap();
        let category = svc.create_category("Drinks").unwrap();
        for name in ["Green Tea", "Black Tea", "Tomato Juice"] {
            svc.create_product(&NewProduct {
                name: name.to_string(),
                calories_cost: 1.0,
                default_quantity: 250.0,
                category_id: category.id,
            })
            .unwrap();
        }
        svc
    }

    #[test]
    fn test_resolve_product_by_id_and_name() {
        let svc = service();
        let tea = resolve_product(&svc, "green tea").unwrap();
        assert_eq!(tea.name, "Green Tea");
        assert_eq!(resolve_product(&svc, &tea.id.to_string()).unwrap(), tea);
    }

    #[test]
    fn test_resolve_product_single_substring_match() {
        let svc = service();
        assert_eq!(resolve_product(&svc, "juice").unwrap().name, "Tomato Juice");
    }

    #[test]
    fn test_resolve_product_ambiguous_or_missing() {
        let svc = service();
        let err = resolve_product(&svc, "tea").unwrap_err();
        assert!(err.to_string().contains("matches 2 products"));
        assert!(resolve_product(&svc, "coffee").is_err());
        assert!(resolve_product(&svc, "999").is_err());
    }
}
