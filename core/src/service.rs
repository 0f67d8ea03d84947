use std::path::Path;

use anyhow::Result;
use chrono::NaiveDate;
use tracing::info;

use crate::db::Database;
use crate::export;
use crate::import::{self, CatalogNoteTranslator, ExistingPages};
use crate::models::{
    Category, ImportSummary, NewNote, NewProduct, Note, Page, PagesFilter, PagesSearchResult,
    Product, ProductsSearchRequest, ProductsSearchResult, UpdateNote, validate_date_range,
};

pub struct DiaryService {
    db: Database,
}

impl DiaryService {
    pub fn new(db_path: &Path) -> Result<Self> {
        let db = Database::open(db_path)?;
        Ok(Self { db })
    }

    pub fn new_in_memory() -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self { db })
    }

    // --- Categories ---

    pub fn create_category(&self, name: &str) -> Result<Category> {
        self.db.insert_category(name)
    }

    pub fn get_category(&self, id: i64) -> Result<Category> {
        self.db.get_category(id)
    }

    pub fn list_categories(&self) -> Result<Vec<Category>> {
        self.db.list_categories()
    }

    pub fn rename_category(&self, id: i64, name: &str) -> Result<Category> {
        self.db.rename_category(id, name)
    }

    pub fn delete_category(&self, id: i64) -> Result<bool> {
        self.db.delete_category(id)
    }

    pub fn categories_dropdown(&self, filter: Option<&str>) -> Result<Vec<Category>> {
        self.db.categories_dropdown(filter)
    }

    // --- Products ---

    pub fn create_product(&self, product: &NewProduct) -> Result<Product> {
        self.db.insert_product(product)
    }

    pub fn get_product(&self, id: i64) -> Result<Product> {
        self.db.get_product(id)
    }

    pub fn edit_product(&self, id: i64, product: &NewProduct) -> Result<Product> {
        self.db.update_product(id, product)
    }

    pub fn delete_product(&self, id: i64) -> Result<bool> {
        self.db.delete_product(id)
    }

    pub fn delete_products(&self, ids: &[i64]) -> Result<usize> {
        self.db.delete_products(ids)
    }

    pub fn search_products(&self, request: &ProductsSearchRequest) -> Result<ProductsSearchResult> {
        self.db.search_products(request)
    }

    pub fn products_dropdown(&self, filter: Option<&str>) -> Result<Vec<Product>> {
        self.db.products_dropdown(filter)
    }

    /// Exact, case-insensitive name match.
    pub fn find_product_by_name(&self, name: &str) -> Result<Option<Product>> {
        Ok(self
            .db
            .get_products_by_names(&[name.trim().to_string()])?
            .into_iter()
            .next())
    }

    // --- Pages ---

    pub fn create_page(&self, date: NaiveDate) -> Result<Page> {
        self.db.create_page(date)
    }

    pub fn get_or_create_page(&self, date: NaiveDate) -> Result<Page> {
        self.db.get_or_create_page(date)
    }

    pub fn get_page(&self, id: i64) -> Result<Page> {
        self.db.get_page(id)
    }

    pub fn get_page_by_date(&self, date: NaiveDate) -> Result<Option<Page>> {
        self.db.get_page_by_date(date)
    }

    pub fn search_pages(&self, filter: &PagesFilter) -> Result<PagesSearchResult> {
        if let (Some(start), Some(end)) = (filter.start_date, filter.end_date) {
            validate_date_range(start, end)?;
        }
        self.db.search_pages(filter)
    }

    pub fn delete_pages(&self, ids: &[i64]) -> Result<usize> {
        self.db.delete_pages(ids)
    }

    // --- Notes ---

    pub fn add_note(&self, page_id: i64, note: &NewNote) -> Result<Note> {
        self.db.insert_note(page_id, note)
    }

    pub fn get_note(&self, id: i64) -> Result<Note> {
        self.db.get_note(id)
    }

    pub fn edit_note(&self, id: i64, update: &UpdateNote) -> Result<Note> {
        self.db.update_note(id, update)
    }

    pub fn delete_note(&self, id: i64) -> Result<bool> {
        self.db.delete_note(id)
    }

    pub fn list_notes(&self, page_id: i64) -> Result<Vec<Note>> {
        // Surface "Page not found" rather than an empty list
        self.db.get_page(page_id).map(|p| p.notes)
    }

    // --- Import / Export ---

    /// Import a JSON export file.
    ///
    /// Pages are matched by date: known dates get their notes replaced, new
    /// dates get a new page. Nothing is written unless every page reconciles.
    /// Failures of the file itself come back as [`crate::error::ImportError`]
    /// inside the `anyhow::Error`.
    pub fn import_json(&self, bytes: &[u8]) -> Result<ImportSummary> {
        let file = import::parse_import_file(bytes)?;
        import::ensure_unique_dates(&file)?;

        let existing: ExistingPages = self
            .db
            .get_pages_by_dates(&import::referenced_dates(&file))?
            .into_iter()
            .collect();
        let translator = CatalogNoteTranslator::new(
            self.db
                .get_products_by_names(&import::referenced_product_names(&file))?,
        );

        let outcome = import::reconcile_pages(&file, &existing, &translator)?;
        self.db.apply_import(&outcome.created, &outcome.updated)?;

        let summary = ImportSummary {
            pages_created: outcome.created.len(),
            pages_updated: outcome.updated.len(),
            notes_imported: outcome.notes_count(),
        };
        info!(
            pages_created = summary.pages_created,
            pages_updated = summary.pages_updated,
            notes = summary.notes_imported,
            "import committed"
        );
        Ok(summary)
    }

    /// Pages with `start <= date <= end` as an indented JSON export file.
    pub fn export_json(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<u8>> {
        validate_date_range(start, end)?;
        let pages = self.db.get_pages_in_range(start, end)?;
        info!(%start, %end, pages = pages.len(), "exporting pages");
        export::to_json(&export::build_export_file(&pages))
    }
}
