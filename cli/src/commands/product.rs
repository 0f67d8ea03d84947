use anyhow::{Result, bail};

use food_diary_core::models::{NewProduct, ProductsSearchRequest};
use food_diary_core::service::DiaryService;

use super::helpers::{exit_not_found, print_json, print_product_table};

pub(crate) fn cmd_product_add(
    svc: &DiaryService,
    name: &str,
    calories: f64,
    default_quantity: f64,
    category_id: i64,
    json: bool,
) -> Result<()> {
    let product = svc.create_product(&NewProduct {
        name: name.to_string(),
        calories_cost: calories,
        default_quantity,
        category_id,
    })?;
    if json {
        print_json(&product)?;
    } else {
        println!(
            "Added {} (ID {}): {:.0} kcal/100g",
            product.name, product.id, product.calories_cost
        );
    }
    Ok(())
}

/// Fields left as `None` keep their current value.
pub(crate) fn cmd_product_edit(
    svc: &DiaryService,
    id: i64,
    name: Option<String>,
    calories: Option<f64>,
    default_quantity: Option<f64>,
    category_id: Option<i64>,
    json: bool,
) -> Result<()> {
    if name.is_none() && calories.is_none() && default_quantity.is_none() && category_id.is_none()
    {
        bail!(
            "Nothing to update. Provide at least one of --name, --calories, --default-quantity, or --category"
        );
    }
    let Ok(current) = svc.get_product(id) else {
        exit_not_found(&format!("Product {id} not found"), json);
    };

    let product = svc.edit_product(
        id,
        &NewProduct {
            name: name.unwrap_or(current.name),
            calories_cost: calories.unwrap_or(current.calories_cost),
            default_quantity: default_quantity.unwrap_or(current.default_quantity),
            category_id: category_id.unwrap_or(current.category_id),
        },
    )?;
    if json {
        print_json(&product)?;
    } else {
        println!("Updated product {id}: {}", product.name);
    }
    Ok(())
}

pub(crate) fn cmd_product_show(svc: &DiaryService, id: i64, json: bool) -> Result<()> {
    let Ok(product) = svc.get_product(id) else {
        exit_not_found(&format!("Product {id} not found"), json);
    };
    if json {
        print_json(&product)?;
    } else {
        print_product_table(std::slice::from_ref(&product));
    }
    Ok(())
}

pub(crate) fn cmd_product_delete(svc: &DiaryService, ids: &[i64], json: bool) -> Result<()> {
    let deleted = match ids {
        [] => bail!("Provide at least one product ID"),
        [id] => {
            if !svc.delete_product(*id)? {
                exit_not_found(&format!("Product {id} not found"), json);
            }
            1
        }
        _ => svc.delete_products(ids)?,
    };
    if json {
        println!("{}", serde_json::json!({ "deleted": deleted }));
    } else {
        println!("Deleted {deleted} product(s)");
    }
    Ok(())
}

pub(crate) fn cmd_product_search(
    svc: &DiaryService,
    request: &ProductsSearchRequest,
    json: bool,
) -> Result<()> {
    let result = svc.search_products(request)?;
    if json {
        print_json(&result)?;
        return Ok(());
    }
    if result.products.is_empty() {
        println!("No products found");
        return Ok(());
    }
    print_product_table(&result.products);
    println!(
        "Page {} · showing {} of {} products",
        request.page_number.unwrap_or(1),
        result.products.len(),
        result.total_count
    );
    Ok(())
}

pub(crate) fn cmd_product_find(svc: &DiaryService, filter: Option<&str>, json: bool) -> Result<()> {
    let products = svc.products_dropdown(filter)?;
    if json {
        print_json(&products)?;
    } else if products.is_empty() {
        println!("No products found");
    } else {
        print_product_table(&products);
    }
    Ok(())
}
