//! Reconciles an imported JSON file against the pages already in the diary.
//!
//! Every page snapshot is matched by date. A known date keeps its page and
//! gets its notes replaced; an unknown date produces a new page with no id.
//! Both collaborators are traits so the reconciler never touches storage.

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::error::ImportError;
use crate::models::{ExportFile, Note, NoteSnapshot, Page, PageSnapshot, Product, calories_for};

/// Read access to the pages that already exist for the dates being imported.
pub trait PageLookup {
    fn existing_page(&self, date: NaiveDate) -> Option<Page>;
}

impl<F> PageLookup for F
where
    F: Fn(NaiveDate) -> Option<Page>,
{
    fn existing_page(&self, date: NaiveDate) -> Option<Page> {
        self(date)
    }
}

/// Turns one note snapshot into a domain note, resolving its product.
pub trait NoteTranslator {
    fn translate(&self, snapshot: &NoteSnapshot) -> Result<Note, ImportError>;
}

/// Date-keyed lookup over pages loaded up front.
#[derive(Debug, Clone, Default)]
pub struct ExistingPages {
    by_date: HashMap<NaiveDate, Page>,
}

impl FromIterator<Page> for ExistingPages {
    fn from_iter<I: IntoIterator<Item = Page>>(iter: I) -> Self {
        Self {
            by_date: iter.into_iter().map(|p| (p.date, p)).collect(),
        }
    }
}

impl PageLookup for ExistingPages {
    fn existing_page(&self, date: NaiveDate) -> Option<Page> {
        self.by_date.get(&date).cloned()
    }
}

/// Resolves product names case-insensitively against a preloaded catalog slice.
#[derive(Debug, Clone, Default)]
pub struct CatalogNoteTranslator {
    products: HashMap<String, Product>,
}

impl CatalogNoteTranslator {
    pub fn new(products: impl IntoIterator<Item = Product>) -> Self {
        Self {
            products: products
                .into_iter()
                .map(|p| (p.name.to_lowercase(), p))
                .collect(),
        }
    }
}

impl NoteTranslator for CatalogNoteTranslator {
    fn translate(&self, snapshot: &NoteSnapshot) -> Result<Note, ImportError> {
        if !snapshot.quantity.is_finite() || snapshot.quantity <= 0.0 {
            return Err(ImportError::InvalidQuantity {
                product: snapshot.product_name.clone(),
                quantity: snapshot.quantity,
            });
        }
        let product = self
            .products
            .get(&snapshot.product_name.to_lowercase())
            .ok_or_else(|| ImportError::UnknownProduct {
                product: snapshot.product_name.clone(),
            })?;
        Ok(Note {
            id: None,
            page_id: None,
            product_id: product.id,
            product_name: product.name.clone(),
            quantity: snapshot.quantity,
            meal_type: snapshot.meal_type,
            display_order: snapshot.display_order,
            calories: calories_for(product.calories_cost, snapshot.quantity),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconciledPage {
    pub page: Page,
    /// The page itself must be inserted, not just its notes replaced.
    pub was_created: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ReconcileOutcome {
    /// New pages in file order. Repeated dates yield repeated pages.
    pub created: Vec<Page>,
    /// Existing pages carrying their replacement notes.
    pub updated: Vec<Page>,
}

impl ReconcileOutcome {
    #[must_use]
    pub fn notes_count(&self) -> usize {
        self.created
            .iter()
            .chain(&self.updated)
            .map(|p| p.notes.len())
            .sum()
    }
}

/// Match one snapshot to its target page and rebuild that page's notes.
///
/// Notes are translated before anything is assigned, so a failed
/// translation leaves no partial note list behind.
pub fn reconcile_page(
    snapshot: &PageSnapshot,
    lookup: &impl PageLookup,
    translator: &impl NoteTranslator,
) -> Result<ReconciledPage, ImportError> {
    let note_snapshots = snapshot
        .notes
        .as_deref()
        .ok_or(ImportError::MissingNotes {
            date: snapshot.date,
        })?;

    let (mut page, was_created) = match lookup.existing_page(snapshot.date) {
        Some(existing) => (existing, false),
        None => (Page::new(snapshot.date), true),
    };

    let mut notes = note_snapshots
        .iter()
        .map(|n| translator.translate(n))
        .collect::<Result<Vec<_>, _>>()
        .inspect_err(|err| warn!(date = %snapshot.date, %err, "note translation failed"))?;
    for note in &mut notes {
        note.page_id = page.id;
    }
    page.notes = notes;

    debug!(
        date = %page.date,
        was_created,
        notes = page.notes.len(),
        "reconciled page"
    );
    Ok(ReconciledPage { page, was_created })
}

/// Reconcile every page of a file, stopping at the first failure.
///
/// The lookup is not updated as pages are created, so two snapshots with the
/// same date both come back as created. Use [`ensure_unique_dates`] first if
/// that is not wanted.
pub fn reconcile_pages(
    file: &ExportFile,
    lookup: &impl PageLookup,
    translator: &impl NoteTranslator,
) -> Result<ReconcileOutcome, ImportError> {
    let mut outcome = ReconcileOutcome::default();
    for (index, entry) in file.pages.iter().enumerate() {
        let snapshot = entry.as_ref().ok_or(ImportError::MissingPage { index })?;
        let reconciled = reconcile_page(snapshot, lookup, translator)?;
        if reconciled.was_created {
            outcome.created.push(reconciled.page);
        } else {
            outcome.updated.push(reconciled.page);
        }
    }
    Ok(outcome)
}

pub fn parse_import_file(bytes: &[u8]) -> Result<ExportFile, ImportError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Reject files that mention the same date twice.
pub fn ensure_unique_dates(file: &ExportFile) -> Result<(), ImportError> {
    let mut seen = HashSet::new();
    for snapshot in file.pages.iter().flatten() {
        if !seen.insert(snapshot.date) {
            return Err(ImportError::DuplicateDate {
                date: snapshot.date,
            });
        }
    }
    Ok(())
}

/// Distinct dates in the file, ascending.
#[must_use]
pub fn referenced_dates(file: &ExportFile) -> Vec<NaiveDate> {
    file.pages
        .iter()
        .flatten()
        .map(|p| p.date)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Distinct product names referenced by any note, lowercased.
#[must_use]
pub fn referenced_product_names(file: &ExportFile) -> Vec<String> {
    file.pages
        .iter()
        .flatten()
        .filter_map(|p| p.notes.as_ref())
        .flatten()
        .map(|n| n.product_name.to_lowercase())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
