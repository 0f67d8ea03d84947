//! Builds the JSON export file. Its shape is the one the importer reads back.

use anyhow::Result;

use crate::models::{ExportFile, NoteSnapshot, Page, PageSnapshot};

/// Snapshot a page. Notes keep their stored order.
#[must_use]
pub fn page_snapshot(page: &Page) -> PageSnapshot {
    PageSnapshot {
        date: page.date,
        notes: Some(
            page.notes
                .iter()
                .map(|n| NoteSnapshot {
                    product_name: n.product_name.clone(),
                    quantity: n.quantity,
                    meal_type: n.meal_type,
                    display_order: n.display_order,
                })
                .collect(),
        ),
    }
}

#[must_use]
pub fn build_export_file(pages: &[Page]) -> ExportFile {
    ExportFile {
        pages: pages.iter().map(|p| Some(page_snapshot(p))).collect(),
    }
}

pub fn to_json(file: &ExportFile) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(file)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::{CatalogNoteTranslator, ExistingPages, parse_import_file, reconcile_pages};
    use crate::models::{MealType, Note, Product, parse_date};

    fn page_with_notes() -> Page {
        Page {
            id: Some(3),
            date: parse_date("2022-04-10").unwrap(),
            notes: vec![
                Note {
                    id: Some(1),
                    page_id: Some(3),
                    product_id: 5,
                    product_name: "Rye Bread".to_string(),
                    quantity: 60.0,
                    meal_type: MealType::Breakfast,
                    display_order: 0,
                    calories: 155.4,
                },
                Note {
                    id: Some(2),
                    page_id: Some(3),
                    product_id: 6,
                    product_name: "Kefir".to_string(),
                    quantity: 250.0,
                    meal_type: MealType::Dinner,
                    display_order: 0,
                    calories: 127.5,
                },
            ],
        }
    }

    #[test]
    fn test_snapshot_drops_ids_and_calories() {
        let snapshot = page_snapshot(&page_with_notes());
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["date"], "2022-04-10");
        let notes = json["notes"].as_array().unwrap();
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0]["productName"], "Rye Bread");
        assert_eq!(notes[0]["mealType"], "breakfast");
        assert_eq!(notes[0]["displayOrder"], 0);
        assert!(notes[0].get("id").is_none());
        assert!(notes[0].get("calories").is_none());
    }

    #[test]
    fn test_empty_page_exports_empty_notes_list() {
        let file = build_export_file(&[Page::new(parse_date("2022-04-11").unwrap())]);
        let json: serde_json::Value = serde_json::from_slice(&to_json(&file).unwrap()).unwrap();
        assert_eq!(json["pages"][0]["notes"], serde_json::json!([]));
    }

    #[test]
    fn test_export_is_importable() {
        let bytes = to_json(&build_export_file(&[page_with_notes()])).unwrap();
        let file = parse_import_file(&bytes).unwrap();
        let catalog = CatalogNoteTranslator::new([
            Product {
                id: 50,
                name: "Rye Bread".to_string(),
                calories_cost: 259.0,
                default_quantity: 100.0,
                category_id: 1,
                category_name: None,
            },
            Product {
                id: 60,
                name: "Kefir".to_string(),
                calories_cost: 51.0,
                default_quantity: 100.0,
                category_id: 1,
                category_name: None,
            },
        ]);

        let outcome = reconcile_pages(&file, &ExistingPages::default(), &catalog).unwrap();

        assert_eq!(outcome.created.len(), 1);
        let notes = &outcome.created[0].notes;
        assert_eq!(notes[0].product_id, 50);
        assert_eq!(notes[1].product_id, 60);
        assert_eq!(notes[1].meal_type, MealType::Dinner);
    }
}
