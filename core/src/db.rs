use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Value, ValueRef};
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};

use crate::models::{
    Category, MealType, NewNote, NewProduct, Note, Page, PageItem, PagesFilter, PagesSearchResult,
    Product, ProductsSearchRequest, ProductsSearchResult, SortOrder, UpdateNote, calories_for,
    resolve_paging, validate_category_name, validate_new_product, validate_quantity,
};

// 0: p.id, 1: p.name, 2: p.calories_cost, 3: p.default_quantity, 4: p.category_id, 5: c.name
const PRODUCT_SELECT: &str = "SELECT p.id, p.name, p.calories_cost, p.default_quantity, p.category_id, c.name
     FROM products p
     JOIN categories c ON c.id = p.category_id";

// 0: n.id, 1: n.page_id, 2: n.product_id, 3: pr.name, 4: n.quantity,
// 5: n.meal_type, 6: n.display_order, 7: pr.calories_cost
const NOTE_SELECT: &str = "SELECT n.id, n.page_id, n.product_id, pr.name, n.quantity, n.meal_type, n.display_order, pr.calories_cost
     FROM notes n
     JOIN products pr ON pr.id = n.product_id";

const CATEGORY_SELECT: &str = "SELECT c.id, c.name, COUNT(p.id)
     FROM categories c
     LEFT JOIN products p ON p.category_id = c.id";

impl ToSql for MealType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.code()))
    }
}

impl FromSql for MealType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let code = i64::column_result(value)?;
        MealType::from_code(code).ok_or(FromSqlError::OutOfRange(code))
    }
}

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS categories (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL UNIQUE
                );

                CREATE TABLE IF NOT EXISTS products (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL UNIQUE,
                    calories_cost REAL NOT NULL CHECK (calories_cost >= 0),
                    default_quantity REAL NOT NULL DEFAULT 100,
                    category_id INTEGER NOT NULL REFERENCES categories(id) ON DELETE RESTRICT
                );

                CREATE TABLE IF NOT EXISTS pages (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    date TEXT NOT NULL UNIQUE
                );

                CREATE TABLE IF NOT EXISTS notes (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    page_id INTEGER NOT NULL REFERENCES pages(id) ON DELETE CASCADE,
                    product_id INTEGER NOT NULL REFERENCES products(id) ON DELETE RESTRICT,
                    quantity REAL NOT NULL CHECK (quantity > 0),
                    meal_type INTEGER NOT NULL CHECK (meal_type BETWEEN 1 AND 4),
                    display_order INTEGER NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_products_category ON products(category_id);
                CREATE INDEX IF NOT EXISTS idx_notes_page ON notes(page_id, meal_type, display_order);
                CREATE INDEX IF NOT EXISTS idx_notes_product ON notes(product_id);

                PRAGMA user_version = 1;",
            )?;
        }

        Ok(())
    }

    fn product_from_row(row: &rusqlite::Row) -> rusqlite::Result<Product> {
        Ok(Product {
            id: row.get(0)?,
            name: row.get(1)?,
            calories_cost: row.get(2)?,
            default_quantity: row.get(3)?,
            category_id: row.get(4)?,
            category_name: row.get(5)?,
        })
    }

    fn note_from_row(row: &rusqlite::Row) -> rusqlite::Result<Note> {
        let quantity: f64 = row.get(4)?;
        let calories_cost: f64 = row.get(7)?;
        Ok(Note {
            id: Some(row.get(0)?),
            page_id: Some(row.get(1)?),
            product_id: row.get(2)?,
            product_name: row.get(3)?,
            quantity,
            meal_type: row.get(5)?,
            display_order: row.get(6)?,
            calories: calories_for(calories_cost, quantity),
        })
    }

    fn category_from_row(row: &rusqlite::Row) -> rusqlite::Result<Category> {
        Ok(Category {
            id: row.get(0)?,
            name: row.get(1)?,
            products_count: row.get(2)?,
        })
    }

    // --- Categories ---

    pub fn insert_category(&self, name: &str) -> Result<Category> {
        let name = validate_category_name(name)?;
        self.ensure_category_name_free(&name, None)?;
        self.conn
            .execute("INSERT INTO categories (name) VALUES (?1)", params![name])?;
        self.get_category(self.conn.last_insert_rowid())
    }

    pub fn get_category(&self, id: i64) -> Result<Category> {
        self.conn
            .query_row(
                &format!("{CATEGORY_SELECT} WHERE c.id = ?1 GROUP BY c.id"),
                params![id],
                Self::category_from_row,
            )
            .context("Category not found")
    }

    pub fn list_categories(&self) -> Result<Vec<Category>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{CATEGORY_SELECT} GROUP BY c.id ORDER BY c.name"))?;
        let categories = stmt
            .query_map([], Self::category_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(categories)
    }

    /// Categories whose name contains `filter`, for selection lists.
    pub fn categories_dropdown(&self, filter: Option<&str>) -> Result<Vec<Category>> {
        let Some(filter) = filter.map(str::trim).filter(|f| !f.is_empty()) else {
            return self.list_categories();
        };
        let pattern = format!("%{}%", escape_like(filter));
        let mut stmt = self.conn.prepare(&format!(
            "{CATEGORY_SELECT} WHERE c.name LIKE ?1 ESCAPE '\\' GROUP BY c.id ORDER BY c.name"
        ))?;
        let categories = stmt
            .query_map(params![pattern], Self::category_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(categories)
    }

    pub fn rename_category(&self, id: i64, name: &str) -> Result<Category> {
        let name = validate_category_name(name)?;
        self.get_category(id)?;
        self.ensure_category_name_free(&name, Some(id))?;
        self.conn.execute(
            "UPDATE categories SET name = ?1 WHERE id = ?2",
            params![name, id],
        )?;
        self.get_category(id)
    }

    pub fn delete_category(&self, id: i64) -> Result<bool> {
        let Some(category) = self.get_category(id).ok() else {
            return Ok(false);
        };
        if category.products_count > 0 {
            bail!(
                "Category '{}' still has {} products",
                category.name,
                category.products_count
            );
        }
        let rows = self
            .conn
            .execute("DELETE FROM categories WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    fn ensure_category_name_free(&self, name: &str, except_id: Option<i64>) -> Result<()> {
        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM categories WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        match existing {
            Some(id) if Some(id) != except_id => {
                bail!("Category with the name '{name}' already exists")
            }
            _ => Ok(()),
        }
    }

    // --- Products ---

    pub fn insert_product(&self, product: &NewProduct) -> Result<Product> {
        validate_new_product(product)?;
        let name = product.name.trim();
        self.get_category(product.category_id)?;
        self.ensure_product_name_free(name, None)?;
        self.conn.execute(
            "INSERT INTO products (name, calories_cost, default_quantity, category_id)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                name,
                product.calories_cost,
                product.default_quantity,
                product.category_id,
            ],
        )?;
        self.get_product(self.conn.last_insert_rowid())
    }

    pub fn get_product(&self, id: i64) -> Result<Product> {
        self.conn
            .query_row(
                &format!("{PRODUCT_SELECT} WHERE p.id = ?1"),
                params![id],
                Self::product_from_row,
            )
            .context("Product not found")
    }

    /// Keeping the current name is always allowed; a new name must be free.
    pub fn update_product(&self, id: i64, product: &NewProduct) -> Result<Product> {
        validate_new_product(product)?;
        let name = product.name.trim();
        self.get_product(id)?;
        self.get_category(product.category_id)?;
        self.ensure_product_name_free(name, Some(id))?;
        self.conn.execute(
            "UPDATE products SET name = ?1, calories_cost = ?2, default_quantity = ?3, category_id = ?4
             WHERE id = ?5",
            params![
                name,
                product.calories_cost,
                product.default_quantity,
                product.category_id,
                id,
            ],
        )?;
        self.get_product(id)
    }

    pub fn delete_product(&self, id: i64) -> Result<bool> {
        let Some(product) = self.get_product(id).ok() else {
            return Ok(false);
        };
        let used: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM notes WHERE product_id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        if used > 0 {
            bail!("Product '{}' is used by {used} notes", product.name);
        }
        let rows = self
            .conn
            .execute("DELETE FROM products WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    /// Delete several products at once. Every id must exist.
    pub fn delete_products(&self, ids: &[i64]) -> Result<usize> {
        let ids: BTreeSet<i64> = ids.iter().copied().collect();
        for &id in &ids {
            if self.get_product(id).is_err() {
                bail!("Products cannot be deleted: wrong ids specified");
            }
        }
        let tx = self.conn.unchecked_transaction()?;
        let mut deleted = 0;
        for &id in &ids {
            let used: i64 = tx.query_row(
                "SELECT COUNT(*) FROM notes WHERE product_id = ?1",
                params![id],
                |row| row.get(0),
            )?;
            if used > 0 {
                bail!("Product {id} is used by {used} notes");
            }
            deleted += tx.execute("DELETE FROM products WHERE id = ?1", params![id])?;
        }
        tx.commit()?;
        Ok(deleted)
    }

    /// Name-prefix and category search, ordered by name, one page at a time.
    pub fn search_products(&self, request: &ProductsSearchRequest) -> Result<ProductsSearchResult> {
        let (page_number, page_size) = resolve_paging(request.page_number, request.page_size)?;

        let mut clauses: Vec<String> = Vec::new();
        let mut args: Vec<Value> = Vec::new();
        if let Some(name) = request
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
        {
            args.push(Value::Text(format!("{}%", escape_like(&name.to_lowercase()))));
            clauses.push(format!("lower(p.name) LIKE ?{} ESCAPE '\\'", args.len()));
        }
        if let Some(category_id) = request.category_id {
            args.push(Value::Integer(category_id));
            clauses.push(format!("p.category_id = ?{}", args.len()));
        }
        let filter = where_clause(&clauses);

        let total_count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM products p {filter}"),
            params_from_iter(args.iter()),
            |row| row.get(0),
        )?;

        args.push(Value::Integer(page_size));
        let limit = args.len();
        args.push(Value::Integer((page_number - 1) * page_size));
        let offset = args.len();

        let mut stmt = self.conn.prepare(&format!(
            "{PRODUCT_SELECT} {filter} ORDER BY p.name LIMIT ?{limit} OFFSET ?{offset}"
        ))?;
        let products = stmt
            .query_map(params_from_iter(args.iter()), Self::product_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ProductsSearchResult {
            products,
            total_count,
        })
    }

    /// Products whose name contains `filter`, for selection lists.
    pub fn products_dropdown(&self, filter: Option<&str>) -> Result<Vec<Product>> {
        let pattern = format!(
            "%{}%",
            escape_like(filter.map(str::trim).unwrap_or_default())
        );
        let mut stmt = self.conn.prepare(&format!(
            "{PRODUCT_SELECT} WHERE p.name LIKE ?1 ESCAPE '\\' ORDER BY p.name"
        ))?;
        let products = stmt
            .query_map(params![pattern], Self::product_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(products)
    }

    /// Case-insensitive exact-name lookup. Unknown names are skipped.
    ///
    /// Folding happens in Rust: SQLite's `lower()` only folds ASCII, so
    /// names like "Гречка" would never match their lowercase form.
    pub fn get_products_by_names(&self, names: &[String]) -> Result<Vec<Product>> {
        let wanted: HashSet<String> = names.iter().map(|n| n.to_lowercase()).collect();
        if wanted.is_empty() {
            return Ok(Vec::new());
        }
        let mut stmt = self
            .conn
            .prepare_cached(&format!("{PRODUCT_SELECT} ORDER BY p.id"))?;
        let mut products = Vec::with_capacity(wanted.len());
        for row in stmt.query_map([], Self::product_from_row)? {
            let product = row?;
            if wanted.contains(&product.name.to_lowercase()) {
                products.push(product);
            }
        }
        Ok(products)
    }

    fn ensure_product_name_free(&self, name: &str, except_id: Option<i64>) -> Result<()> {
        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM products WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        match existing {
            Some(id) if Some(id) != except_id => {
                bail!("Product with the name '{name}' already exists")
            }
            _ => Ok(()),
        }
    }

    // --- Pages ---

    pub fn create_page(&self, date: NaiveDate) -> Result<Page> {
        if self.get_page_by_date(date)?.is_some() {
            bail!("Page for {date} already exists");
        }
        self.conn
            .execute("INSERT INTO pages (date) VALUES (?1)", params![date])?;
        Ok(Page {
            id: Some(self.conn.last_insert_rowid()),
            date,
            notes: Vec::new(),
        })
    }

    pub fn get_or_create_page(&self, date: NaiveDate) -> Result<Page> {
        match self.get_page_by_date(date)? {
            Some(page) => Ok(page),
            None => self.create_page(date),
        }
    }

    pub fn get_page(&self, id: i64) -> Result<Page> {
        let date: NaiveDate = self
            .conn
            .query_row(
                "SELECT date FROM pages WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .context("Page not found")?;
        Ok(Page {
            id: Some(id),
            date,
            notes: self.get_notes_for_page(id)?,
        })
    }

    pub fn get_page_by_date(&self, date: NaiveDate) -> Result<Option<Page>> {
        let id: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM pages WHERE date = ?1",
                params![date],
                |row| row.get(0),
            )
            .optional()?;
        match id {
            Some(id) => Ok(Some(Page {
                id: Some(id),
                date,
                notes: self.get_notes_for_page(id)?,
            })),
            None => Ok(None),
        }
    }

    /// Pages (with notes) for whichever of `dates` have one.
    pub fn get_pages_by_dates(&self, dates: &[NaiveDate]) -> Result<Vec<Page>> {
        let mut pages = Vec::new();
        for &date in dates {
            if let Some(page) = self.get_page_by_date(date)? {
                pages.push(page);
            }
        }
        Ok(pages)
    }

    /// Pages with `start <= date <= end`, oldest first, notes included.
    pub fn get_pages_in_range(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<Page>> {
        let rows: Vec<(i64, NaiveDate)> = {
            let mut stmt = self.conn.prepare(
                "SELECT id, date FROM pages WHERE date BETWEEN ?1 AND ?2 ORDER BY date",
            )?;
            stmt.query_map(params![start, end], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<Vec<_>, _>>()?
        };
        let mut pages = Vec::with_capacity(rows.len());
        for (id, date) in rows {
            pages.push(Page {
                id: Some(id),
                date,
                notes: self.get_notes_for_page(id)?,
            });
        }
        Ok(pages)
    }

    pub fn search_pages(&self, filter: &PagesFilter) -> Result<PagesSearchResult> {
        let (page_number, page_size) = resolve_paging(filter.page_number, filter.page_size)?;

        let mut clauses: Vec<String> = Vec::new();
        let mut args: Vec<Value> = Vec::new();
        if let Some(start) = filter.start_date {
            args.push(Value::Text(start.to_string()));
            clauses.push(format!("p.date >= ?{}", args.len()));
        }
        if let Some(end) = filter.end_date {
            args.push(Value::Text(end.to_string()));
            clauses.push(format!("p.date <= ?{}", args.len()));
        }
        let where_sql = where_clause(&clauses);

        let total_count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM pages p {where_sql}"),
            params_from_iter(args.iter()),
            |row| row.get(0),
        )?;

        let direction = match filter.sort_order {
            SortOrder::Ascending => "ASC",
            SortOrder::Descending => "DESC",
        };
        args.push(Value::Integer(page_size));
        let limit = args.len();
        args.push(Value::Integer((page_number - 1) * page_size));
        let offset = args.len();

        let mut stmt = self.conn.prepare(&format!(
            "SELECT p.id, p.date, COUNT(n.id),
                    COALESCE(SUM(pr.calories_cost * n.quantity / 100.0), 0.0)
             FROM pages p
             LEFT JOIN notes n ON n.page_id = p.id
             LEFT JOIN products pr ON pr.id = n.product_id
             {where_sql}
             GROUP BY p.id
             ORDER BY p.date {direction}
             LIMIT ?{limit} OFFSET ?{offset}"
        ))?;
        let pages = stmt
            .query_map(params_from_iter(args.iter()), |row| {
                let calories: f64 = row.get(3)?;
                Ok(PageItem {
                    id: row.get(0)?,
                    date: row.get(1)?,
                    count_notes: row.get(2)?,
                    count_calories: calories.round() as i64,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(PagesSearchResult { pages, total_count })
    }

    /// Delete several pages and their notes. Every id must exist.
    pub fn delete_pages(&self, ids: &[i64]) -> Result<usize> {
        let ids: BTreeSet<i64> = ids.iter().copied().collect();
        for &id in &ids {
            if !self.page_exists(id)? {
                bail!("Pages cannot be deleted: wrong ids specified");
            }
        }
        let tx = self.conn.unchecked_transaction()?;
        let mut deleted = 0;
        for &id in &ids {
            deleted += tx.execute("DELETE FROM pages WHERE id = ?1", params![id])?;
        }
        tx.commit()?;
        Ok(deleted)
    }

    fn page_exists(&self, id: i64) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM pages WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    // --- Notes ---

    pub fn insert_note(&self, page_id: i64, note: &NewNote) -> Result<Note> {
        validate_quantity(note.quantity)?;
        if !self.page_exists(page_id)? {
            bail!("Page not found");
        }
        self.get_product(note.product_id)?;
        let display_order = match note.display_order {
            Some(order) => order,
            None => self.next_display_order(page_id, note.meal_type)?,
        };
        self.conn.execute(
            "INSERT INTO notes (page_id, product_id, quantity, meal_type, display_order)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                page_id,
                note.product_id,
                note.quantity,
                note.meal_type,
                display_order,
            ],
        )?;
        self.get_note(self.conn.last_insert_rowid())
    }

    pub fn get_note(&self, id: i64) -> Result<Note> {
        self.conn
            .query_row(
                &format!("{NOTE_SELECT} WHERE n.id = ?1"),
                params![id],
                Self::note_from_row,
            )
            .context("Note not found")
    }

    /// Moving a note to another meal without an explicit order appends it there.
    ///
    /// Every field is checked before the first write, and the writes share
    /// one transaction, so a rejected edit leaves the note untouched.
    pub fn update_note(&self, id: i64, update: &UpdateNote) -> Result<Note> {
        let current = self.get_note(id)?;
        if let Some(quantity) = update.quantity {
            validate_quantity(quantity)?;
        }
        if let Some(product_id) = update.product_id {
            self.get_product(product_id)?;
        }

        let moved_to = update.meal_type.filter(|m| *m != current.meal_type);
        let display_order = match (moved_to, update.display_order) {
            (_, Some(order)) => Some(order),
            (Some(meal_type), None) => {
                let page_id = current.page_id.context("Note has no page")?;
                Some(self.next_display_order(page_id, meal_type)?)
            }
            (None, None) => None,
        };

        let tx = self.conn.unchecked_transaction()?;
        if let Some(quantity) = update.quantity {
            tx.execute(
                "UPDATE notes SET quantity = ?1 WHERE id = ?2",
                params![quantity, id],
            )?;
        }
        if let Some(product_id) = update.product_id {
            tx.execute(
                "UPDATE notes SET product_id = ?1 WHERE id = ?2",
                params![product_id, id],
            )?;
        }
        if let Some(meal_type) = moved_to {
            tx.execute(
                "UPDATE notes SET meal_type = ?1 WHERE id = ?2",
                params![meal_type, id],
            )?;
        }
        if let Some(order) = display_order {
            tx.execute(
                "UPDATE notes SET display_order = ?1 WHERE id = ?2",
                params![order, id],
            )?;
        }
        tx.commit()?;

        self.get_note(id)
    }

    pub fn delete_note(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM notes WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    pub fn get_notes_for_page(&self, page_id: i64) -> Result<Vec<Note>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "{NOTE_SELECT} WHERE n.page_id = ?1 ORDER BY n.meal_type, n.display_order, n.id"
        ))?;
        let notes = stmt
            .query_map(params![page_id], Self::note_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(notes)
    }

    fn next_display_order(&self, page_id: i64, meal_type: MealType) -> Result<i64> {
        let order = self.conn.query_row(
            "SELECT COALESCE(MAX(display_order) + 1, 0) FROM notes WHERE page_id = ?1 AND meal_type = ?2",
            params![page_id, meal_type],
            |row| row.get(0),
        )?;
        Ok(order)
    }

    // --- Import ---

    /// Store the result of an import in one transaction.
    ///
    /// `created` pages are inserted with their notes. Each `updated` page must
    /// carry its id; its stored notes are replaced by the ones it holds.
    pub fn apply_import(&self, created: &[Page], updated: &[Page]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;

        for page in created {
            tx.execute("INSERT INTO pages (date) VALUES (?1)", params![page.date])
                .with_context(|| format!("Failed to create page for {}", page.date))?;
            let page_id = tx.last_insert_rowid();
            Self::insert_notes(&tx, page_id, &page.notes)?;
        }

        for page in updated {
            let page_id = page
                .id
                .with_context(|| format!("Page for {} has no id", page.date))?;
            tx.execute("DELETE FROM notes WHERE page_id = ?1", params![page_id])?;
            Self::insert_notes(&tx, page_id, &page.notes)?;
        }

        tx.commit()?;
        Ok(())
    }

    fn insert_notes(conn: &Connection, page_id: i64, notes: &[Note]) -> Result<()> {
        let mut stmt = conn.prepare_cached(
            "INSERT INTO notes (page_id, product_id, quantity, meal_type, display_order)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for note in notes {
            stmt.execute(params![
                page_id,
                note.product_id,
                note.quantity,
                note.meal_type,
                note.display_order,
            ])
            .with_context(|| format!("Failed to store note for '{}'", note.product_name))?;
        }
        Ok(())
    }
}

/// True when `err` was caused by SQLite itself rather than by a rejected input.
#[must_use]
pub fn is_storage_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<rusqlite::Error>())
}

fn escape_like(query: &str) -> String {
    query
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn where_clause(clauses: &[String]) -> String {
    if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn new_product(name: &str, calories_cost: f64, category_id: i64) -> NewProduct {
        NewProduct {
            name: name.to_string(),
            calories_cost,
            default_quantity: 100.0,
            category_id,
        }
    }

    fn new_note(product_id: i64, quantity: f64, meal_type: MealType) -> NewNote {
        NewNote {
            product_id,
            quantity,
            meal_type,
            display_order: None,
        }
    }

    /// Database with two categories and three products.
    fn seeded() -> (Database, Vec<Product>) {
        let db = Database::open_in_memory().unwrap();
        let cereals = db.insert_category("Cereals").unwrap();
        let fruit = db.insert_category("Fruit").unwrap();
        let products = vec![
            db.insert_product(&new_product("Oatmeal", 350.0, cereals.id))
                .unwrap(),
            db.insert_product(&new_product("Banana", 90.0, fruit.id))
                .unwrap(),
            db.insert_product(&new_product("Apple", 50.0, fruit.id))
                .unwrap(),
        ];
        (db, products)
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        let version: i64 = db
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn test_category_crud() {
        let db = Database::open_in_memory().unwrap();
        let dairy = db.insert_category("  Dairy ").unwrap();
        assert_eq!(dairy.name, "Dairy");
        assert_eq!(dairy.products_count, 0);

        assert!(db.insert_category("Dairy").is_err());
        assert!(db.insert_category(" ").is_err());

        let renamed = db.rename_category(dairy.id, "Milk products").unwrap();
        assert_eq!(renamed.name, "Milk products");
        // Renaming to its own name is fine
        db.rename_category(dairy.id, "Milk products").unwrap();

        assert!(db.delete_category(dairy.id).unwrap());
        assert!(!db.delete_category(dairy.id).unwrap());
        assert!(db.get_category(dairy.id).is_err());
    }

    #[test]
    fn test_list_categories_counts_products() {
        let (db, _) = seeded();
        let categories = db.list_categories().unwrap();
        let summary: Vec<_> = categories
            .iter()
            .map(|c| (c.name.as_str(), c.products_count))
            .collect();
        assert_eq!(summary, vec![("Cereals", 1), ("Fruit", 2)]);
    }

    #[test]
    fn test_delete_category_with_products_fails() {
        let (db, products) = seeded();
        let err = db.delete_category(products[1].category_id).unwrap_err();
        assert!(err.to_string().contains("still has 2 products"));
    }

    #[test]
    fn test_categories_dropdown() {
        let (db, _) = seeded();
        let found = db.categories_dropdown(Some("rui")).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Fruit");
        assert_eq!(db.categories_dropdown(None).unwrap().len(), 2);
    }

    #[test]
    fn test_product_crud() {
        let (db, products) = seeded();
        let oatmeal = &products[0];
        assert_eq!(oatmeal.category_name.as_deref(), Some("Cereals"));

        assert!(
            db.insert_product(&new_product("Oatmeal", 1.0, oatmeal.category_id))
                .is_err()
        );
        assert!(db.insert_product(&new_product("Rice", 130.0, 999)).is_err());

        // Keeping the name while changing other fields is allowed
        let edited = db
            .update_product(oatmeal.id, &new_product("Oatmeal", 370.0, oatmeal.category_id))
            .unwrap();
        assert!((edited.calories_cost - 370.0).abs() < f64::EPSILON);

        // Taking another product's name is not
        assert!(
            db.update_product(oatmeal.id, &new_product("Banana", 370.0, oatmeal.category_id))
                .is_err()
        );

        assert!(db.delete_product(oatmeal.id).unwrap());
        assert!(!db.delete_product(oatmeal.id).unwrap());
    }

    #[test]
    fn test_delete_product_in_use_fails() {
        let (db, products) = seeded();
        let page = db.create_page(date("2022-01-01")).unwrap();
        db.insert_note(page.id.unwrap(), &new_note(products[1].id, 100.0, MealType::Snack))
            .unwrap();
        assert!(db.delete_product(products[1].id).is_err());
        assert!(db.delete_products(&[products[1].id]).is_err());
        assert!(db.get_product(products[1].id).is_ok());
    }

    #[test]
    fn test_delete_products_requires_all_ids() {
        let (db, products) = seeded();
        let err = db.delete_products(&[products[0].id, 999]).unwrap_err();
        assert!(err.to_string().contains("wrong ids specified"));
        assert!(db.get_product(products[0].id).is_ok());

        let deleted = db
            .delete_products(&[products[0].id, products[2].id, products[0].id])
            .unwrap();
        assert_eq!(deleted, 2);
        assert!(db.get_product(products[1].id).is_ok());
    }

    #[test]
    fn test_search_products_prefix_category_paging() {
        let (db, products) = seeded();
        let fruit_id = products[1].category_id;

        let all = db.search_products(&ProductsSearchRequest::default()).unwrap();
        assert_eq!(all.total_count, 3);
        let names: Vec<_> = all.products.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Apple", "Banana", "Oatmeal"]);

        let prefix = db
            .search_products(&ProductsSearchRequest {
                name: Some("ba".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(prefix.total_count, 1);
        assert_eq!(prefix.products[0].name, "Banana");

        // Prefix, not substring
        let inner = db
            .search_products(&ProductsSearchRequest {
                name: Some("nana".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(inner.total_count, 0);

        let second_page = db
            .search_products(&ProductsSearchRequest {
                category_id: Some(fruit_id),
                page_number: Some(2),
                page_size: Some(1),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(second_page.total_count, 2);
        assert_eq!(second_page.products.len(), 1);
        assert_eq!(second_page.products[0].name, "Banana");
    }

    #[test]
    fn test_search_products_escapes_like() {
        let (db, products) = seeded();
        db.insert_product(&new_product("100% Juice", 45.0, products[1].category_id))
            .unwrap();
        let found = db
            .search_products(&ProductsSearchRequest {
                name: Some("100%".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(found.total_count, 1);
        let none = db
            .search_products(&ProductsSearchRequest {
                name: Some("%".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(none.total_count, 0);
    }

    #[test]
    fn test_products_dropdown_contains() {
        let (db, _) = seeded();
        let found = db.products_dropdown(Some("an")).unwrap();
        let names: Vec<_> = found.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Banana"]);
        assert_eq!(db.products_dropdown(None).unwrap().len(), 3);
    }

    #[test]
    fn test_get_products_by_names_case_insensitive() {
        let (db, _) = seeded();
        let found = db
            .get_products_by_names(&["banana".to_string(), "OATMEAL".to_string(), "kiwi".to_string()])
            .unwrap();
        let names: Vec<_> = found.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Oatmeal", "Banana"]);
    }

    #[test]
    fn test_get_products_by_names_folds_non_ascii() {
        let (db, _) = seeded();
        let cereals = db.list_categories().unwrap()[0].id;
        db.insert_product(&new_product("Гречка", 310.0, cereals))
            .unwrap();

        for query in ["Гречка", "гречка", "ГРЕЧКА"] {
            let found = db.get_products_by_names(&[query.to_string()]).unwrap();
            assert_eq!(found.len(), 1, "{query}");
            assert_eq!(found[0].name, "Гречка");
        }
        assert!(db.get_products_by_names(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_create_page_rejects_duplicate_date() {
        let db = Database::open_in_memory().unwrap();
        let page = db.create_page(date("2022-01-01")).unwrap();
        assert!(page.id.is_some());
        assert!(db.create_page(date("2022-01-01")).is_err());
        let same = db.get_or_create_page(date("2022-01-01")).unwrap();
        assert_eq!(same.id, page.id);
    }

    #[test]
    fn test_notes_ordered_by_meal_then_order() {
        let (db, products) = seeded();
        let page_id = db.create_page(date("2022-01-01")).unwrap().id.unwrap();
        db.insert_note(page_id, &new_note(products[2].id, 150.0, MealType::Snack))
            .unwrap();
        let first = db
            .insert_note(page_id, &new_note(products[0].id, 80.0, MealType::Breakfast))
            .unwrap();
        let second = db
            .insert_note(page_id, &new_note(products[1].id, 120.0, MealType::Breakfast))
            .unwrap();
        assert_eq!(first.display_order, 0);
        assert_eq!(second.display_order, 1);
        assert!((first.calories - 280.0).abs() < 1e-9);

        let page = db.get_page(page_id).unwrap();
        let order: Vec<_> = page
            .notes
            .iter()
            .map(|n| (n.meal_type, n.product_name.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![
                (MealType::Breakfast, "Oatmeal"),
                (MealType::Breakfast, "Banana"),
                (MealType::Snack, "Apple"),
            ]
        );
    }

    #[test]
    fn test_insert_note_validation() {
        let (db, products) = seeded();
        let page_id = db.create_page(date("2022-01-01")).unwrap().id.unwrap();
        assert!(
            db.insert_note(page_id, &new_note(products[0].id, 0.0, MealType::Lunch))
                .is_err()
        );
        assert!(db.insert_note(page_id, &new_note(999, 10.0, MealType::Lunch)).is_err());
        assert!(
            db.insert_note(999, &new_note(products[0].id, 10.0, MealType::Lunch))
                .is_err()
        );
    }

    #[test]
    fn test_update_note_moves_to_end_of_new_meal() {
        let (db, products) = seeded();
        let page_id = db.create_page(date("2022-01-01")).unwrap().id.unwrap();
        db.insert_note(page_id, &new_note(products[0].id, 80.0, MealType::Lunch))
            .unwrap();
        let note = db
            .insert_note(page_id, &new_note(products[1].id, 100.0, MealType::Breakfast))
            .unwrap();

        let moved = db
            .update_note(
                note.id.unwrap(),
                &UpdateNote {
                    meal_type: Some(MealType::Lunch),
                    quantity: Some(50.0),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(moved.meal_type, MealType::Lunch);
        assert_eq!(moved.display_order, 1);
        assert!((moved.quantity - 50.0).abs() < f64::EPSILON);

        let swapped = db
            .update_note(
                note.id.unwrap(),
                &UpdateNote {
                    product_id: Some(products[2].id),
                    display_order: Some(5),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(swapped.product_name, "Apple");
        assert_eq!(swapped.display_order, 5);

        assert!(
            db.update_note(
                note.id.unwrap(),
                &UpdateNote {
                    quantity: Some(-1.0),
                    ..Default::default()
                }
            )
            .is_err()
        );
    }

    #[test]
    fn test_update_note_rejected_edit_changes_nothing() {
        let (db, products) = seeded();
        let page_id = db.create_page(date("2022-01-01")).unwrap().id.unwrap();
        let note = db
            .insert_note(page_id, &new_note(products[0].id, 80.0, MealType::Lunch))
            .unwrap();
        let id = note.id.unwrap();

        let err = db
            .update_note(
                id,
                &UpdateNote {
                    quantity: Some(50.0),
                    meal_type: Some(MealType::Dinner),
                    product_id: Some(999),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
        assert_eq!(db.get_note(id).unwrap(), note);

        assert!(
            db.update_note(
                id,
                &UpdateNote {
                    product_id: Some(products[1].id),
                    quantity: Some(f64::NAN),
                    ..Default::default()
                }
            )
            .is_err()
        );
        assert_eq!(db.get_note(id).unwrap(), note);
    }

    #[test]
    fn test_delete_note() {
        let (db, products) = seeded();
        let page_id = db.create_page(date("2022-01-01")).unwrap().id.unwrap();
        let note = db
            .insert_note(page_id, &new_note(products[0].id, 80.0, MealType::Lunch))
            .unwrap();
        assert!(db.delete_note(note.id.unwrap()).unwrap());
        assert!(!db.delete_note(note.id.unwrap()).unwrap());
        assert!(db.get_notes_for_page(page_id).unwrap().is_empty());
    }

    #[test]
    fn test_search_pages_counts_and_sorts() {
        let (db, products) = seeded();
        for d in ["2022-01-01", "2022-01-02", "2022-01-03"] {
            db.create_page(date(d)).unwrap();
        }
        let page_id = db.get_page_by_date(date("2022-01-02")).unwrap().unwrap().id.unwrap();
        db.insert_note(page_id, &new_note(products[0].id, 100.0, MealType::Breakfast))
            .unwrap();
        db.insert_note(page_id, &new_note(products[1].id, 150.0, MealType::Snack))
            .unwrap();

        let all = db.search_pages(&PagesFilter::default()).unwrap();
        assert_eq!(all.total_count, 3);
        let dates: Vec<_> = all.pages.iter().map(|p| p.date).collect();
        assert_eq!(
            dates,
            vec![date("2022-01-03"), date("2022-01-02"), date("2022-01-01")]
        );
        let busy = &all.pages[1];
        assert_eq!(busy.count_notes, 2);
        // 350 + 90 * 1.5 = 485
        assert_eq!(busy.count_calories, 485);
        assert_eq!(all.pages[0].count_notes, 0);
        assert_eq!(all.pages[0].count_calories, 0);

        let bounded = db
            .search_pages(&PagesFilter {
                start_date: Some(date("2022-01-02")),
                end_date: Some(date("2022-01-03")),
                sort_order: SortOrder::Ascending,
                page_number: Some(1),
                page_size: Some(1),
            })
            .unwrap();
        assert_eq!(bounded.total_count, 2);
        assert_eq!(bounded.pages.len(), 1);
        assert_eq!(bounded.pages[0].date, date("2022-01-02"));
    }

    #[test]
    fn test_delete_pages_cascades_notes() {
        let (db, products) = seeded();
        let a = db.create_page(date("2022-01-01")).unwrap().id.unwrap();
        let b = db.create_page(date("2022-01-02")).unwrap().id.unwrap();
        let note = db
            .insert_note(a, &new_note(products[0].id, 100.0, MealType::Lunch))
            .unwrap();

        assert!(db.delete_pages(&[a, 999]).is_err());
        assert!(db.get_page(a).is_ok());

        assert_eq!(db.delete_pages(&[a, b]).unwrap(), 2);
        assert!(db.get_page(a).is_err());
        assert!(db.get_note(note.id.unwrap()).is_err());
    }

    #[test]
    fn test_pages_in_range_and_by_dates() {
        let db = Database::open_in_memory().unwrap();
        for d in ["2022-01-05", "2022-01-01", "2022-01-03"] {
            db.create_page(date(d)).unwrap();
        }
        let range = db
            .get_pages_in_range(date("2022-01-01"), date("2022-01-04"))
            .unwrap();
        let dates: Vec<_> = range.iter().map(|p| p.date).collect();
        assert_eq!(dates, vec![date("2022-01-01"), date("2022-01-03")]);

        let found = db
            .get_pages_by_dates(&[date("2022-01-05"), date("2022-01-06")])
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].date, date("2022-01-05"));
    }

    fn import_note(product: &Product, quantity: f64, meal_type: MealType, order: i64) -> Note {
        Note {
            id: None,
            page_id: None,
            product_id: product.id,
            product_name: product.name.clone(),
            quantity,
            meal_type,
            display_order: order,
            calories: calories_for(product.calories_cost, quantity),
        }
    }

    #[test]
    fn test_apply_import_creates_and_replaces() {
        let (db, products) = seeded();
        let existing = db.create_page(date("2022-01-01")).unwrap();
        let existing_id = existing.id.unwrap();
        db.insert_note(existing_id, &new_note(products[2].id, 10.0, MealType::Dinner))
            .unwrap();

        let mut updated = existing.clone();
        updated.notes = vec![import_note(&products[1], 120.0, MealType::Snack, 0)];
        let mut created = Page::new(date("2022-01-02"));
        created.notes = vec![
            import_note(&products[0], 60.0, MealType::Breakfast, 0),
            import_note(&products[1], 100.0, MealType::Breakfast, 1),
        ];

        db.apply_import(&[created], &[updated]).unwrap();

        let replaced = db.get_page(existing_id).unwrap();
        assert_eq!(replaced.notes.len(), 1);
        assert_eq!(replaced.notes[0].product_name, "Banana");

        let new_page = db.get_page_by_date(date("2022-01-02")).unwrap().unwrap();
        assert_eq!(new_page.notes.len(), 2);
        assert_eq!(new_page.notes[0].product_name, "Oatmeal");
    }

    #[test]
    fn test_apply_import_rolls_back_on_failure() {
        let (db, products) = seeded();
        let existing = db.create_page(date("2022-01-01")).unwrap();
        let existing_id = existing.id.unwrap();
        db.insert_note(existing_id, &new_note(products[2].id, 10.0, MealType::Dinner))
            .unwrap();

        let mut updated = existing.clone();
        updated.notes = vec![import_note(&products[1], 120.0, MealType::Snack, 0)];
        let mut ok_page = Page::new(date("2022-01-02"));
        ok_page.notes = vec![import_note(&products[0], 60.0, MealType::Breakfast, 0)];
        // Same date as an existing page: violates the unique constraint
        let clashing = Page::new(date("2022-01-01"));

        assert!(db.apply_import(&[ok_page, clashing], &[updated]).is_err());

        assert!(db.get_page_by_date(date("2022-01-02")).unwrap().is_none());
        let untouched = db.get_page(existing_id).unwrap();
        assert_eq!(untouched.notes.len(), 1);
        assert_eq!(untouched.notes[0].product_name, "Apple");
    }

    #[test]
    fn test_is_storage_error() {
        let db = Database::open_in_memory().unwrap();
        assert!(is_storage_error(&db.get_product(1).unwrap_err()));
        assert!(!is_storage_error(&db.insert_category(" ").unwrap_err()));
    }

    #[test]
    fn test_apply_import_requires_id_for_updates() {
        let db = Database::open_in_memory().unwrap();
        let orphan = Page::new(date("2022-01-01"));
        assert!(db.apply_import(&[], &[orphan]).is_err());
    }
}
