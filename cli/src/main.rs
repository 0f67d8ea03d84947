mod commands;
mod config;
mod server;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

use crate::commands::{
    cmd_category_add, cmd_category_delete, cmd_category_list, cmd_category_rename, cmd_export,
    cmd_import, cmd_note_add, cmd_note_delete, cmd_note_edit, cmd_note_list, cmd_page_create,
    cmd_page_delete, cmd_page_list, cmd_page_show, cmd_product_add, cmd_product_delete,
    cmd_product_edit, cmd_product_find, cmd_product_search, cmd_product_show,
    parse_optional_date,
};
use crate::config::Config;
use food_diary_core::models::{PagesFilter, ProductsSearchRequest, SortOrder};
use food_diary_core::service::DiaryService;

#[derive(Parser)]
#[command(
    name = "food-diary",
    version,
    about = "A personal food diary: products, daily pages, and JSON import/export"
)]
struct Cli {
    /// Database file (default: food-diary.db in the data directory, or $FOOD_DIARY_DB)
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage product categories
    Category {
        #[command(subcommand)]
        command: CategoryCommands,
    },
    /// Manage the product catalog
    Product {
        #[command(subcommand)]
        command: ProductCommands,
    },
    /// Manage diary pages (one per day)
    Page {
        #[command(subcommand)]
        command: PageCommands,
    },
    /// Log and edit notes on a diary page
    Note {
        #[command(subcommand)]
        command: NoteCommands,
    },
    /// Import pages from a JSON export file
    Import {
        /// Path to the JSON file
        file: PathBuf,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Export pages in a date range as JSON
    Export {
        /// First date to include (YYYY-MM-DD or today/yesterday/tomorrow)
        #[arg(long)]
        from: String,
        /// Last date to include (YYYY-MM-DD or today/yesterday/tomorrow)
        #[arg(long)]
        to: String,
        /// Write to this file instead of stdout
        #[arg(short, long, value_name = "PATH")]
        out: Option<PathBuf>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Start the REST API server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Address to bind to (default: 127.0.0.1, use 0.0.0.0 to expose to network)
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,
        /// Disable API key authentication (for development/testing)
        #[arg(long)]
        no_auth: bool,
    },
}

#[derive(Subcommand)]
enum CategoryCommands {
    /// Add a category
    Add {
        /// Category name
        name: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List categories with their product counts
    List {
        /// Only show categories whose name contains this text
        #[arg(short, long)]
        filter: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Rename a category
    Rename {
        /// Category ID
        id: i64,
        /// New name
        name: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete an empty category
    Delete {
        /// Category ID
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ProductCommands {
    /// Add a product
    Add {
        /// Product name
        name: String,
        /// Calories per 100g
        #[arg(long)]
        calories: f64,
        /// Default serving in grams
        #[arg(long, default_value = "100")]
        default_quantity: f64,
        /// Category ID
        #[arg(short, long)]
        category: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Edit a product
    Edit {
        /// Product ID
        id: i64,
        /// New name
        #[arg(long)]
        name: Option<String>,
        /// New calories per 100g
        #[arg(long)]
        calories: Option<f64>,
        /// New default serving in grams
        #[arg(long)]
        default_quantity: Option<f64>,
        /// New category ID
        #[arg(short, long)]
        category: Option<i64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one product
    Show {
        /// Product ID
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete one or more products
    Delete {
        /// Product IDs
        #[arg(required = true)]
        ids: Vec<i64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Search products by name prefix and category
    Search {
        /// Name prefix
        name: Option<String>,
        /// Category ID
        #[arg(short, long)]
        category: Option<i64>,
        /// Result page (starting at 1)
        #[arg(long, default_value = "1")]
        page: i64,
        /// Results per page
        #[arg(long, default_value = "10")]
        size: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List products whose name contains the given text
    Find {
        /// Text to look for
        filter: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum PageCommands {
    /// Create an empty page
    Create {
        /// Date (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a page with its notes
    Show {
        /// Date (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        date: Option<String>,
        /// Look up by page ID instead of date
        #[arg(long, conflicts_with = "date")]
        id: Option<i64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List pages with note counts and calories
    List {
        /// Earliest date
        #[arg(long)]
        from: Option<String>,
        /// Latest date
        #[arg(long)]
        to: Option<String>,
        /// Oldest first (default: newest first)
        #[arg(long)]
        asc: bool,
        /// Result page (starting at 1)
        #[arg(long, default_value = "1")]
        page: i64,
        /// Results per page
        #[arg(long, default_value = "10")]
        size: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete pages and their notes
    Delete {
        /// Page IDs
        #[arg(required = true)]
        ids: Vec<i64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum NoteCommands {
    /// Log a product on a page (the page is created if needed)
    Add {
        /// Product name or ID
        product: String,
        /// Quantity in grams (default: the product's default quantity)
        quantity: Option<f64>,
        /// Meal type: breakfast, lunch, dinner, snack
        #[arg(short, long, default_value = "snack")]
        meal: String,
        /// Date (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Position within the meal (default: last)
        #[arg(long)]
        order: Option<i64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Edit a note
    Edit {
        /// Note ID
        id: i64,
        /// New product name or ID
        #[arg(long)]
        product: Option<String>,
        /// New quantity in grams
        #[arg(short, long)]
        quantity: Option<f64>,
        /// New meal type
        #[arg(long)]
        meal: Option<String>,
        /// New position within the meal
        #[arg(long)]
        order: Option<i64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a note
    Delete {
        /// Note ID
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List the notes of a day
    List {
        /// Date (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

#[allow(clippy::too_many_lines)]
async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.db)?;
    let svc = DiaryService::new(&config.db_path)?;

    match cli.command {
        Commands::Category { command } => match command {
            CategoryCommands::Add { name, json } => cmd_category_add(&svc, &name, json),
            CategoryCommands::List { filter, json } => {
                cmd_category_list(&svc, filter.as_deref(), json)
            }
            CategoryCommands::Rename { id, name, json } => {
                cmd_category_rename(&svc, id, &name, json)
            }
            CategoryCommands::Delete { id, json } => cmd_category_delete(&svc, id, json),
        },
        Commands::Product { command } => match command {
            ProductCommands::Add {
                name,
                calories,
                default_quantity,
                category,
                json,
            } => cmd_product_add(&svc, &name, calories, default_quantity, category, json),
            ProductCommands::Edit {
                id,
                name,
                calories,
                default_quantity,
                category,
                json,
            } => cmd_product_edit(&svc, id, name, calories, default_quantity, category, json),
            ProductCommands::Show { id, json } => cmd_product_show(&svc, id, json),
            ProductCommands::Delete { ids, json } => cmd_product_delete(&svc, &ids, json),
            ProductCommands::Search {
                name,
                category,
                page,
                size,
                json,
            } => cmd_product_search(
                &svc,
                &ProductsSearchRequest {
                    name,
                    category_id: category,
                    page_number: Some(page),
                    page_size: Some(size),
                },
                json,
            ),
            ProductCommands::Find { filter, json } => {
                cmd_product_find(&svc, filter.as_deref(), json)
            }
        },
        Commands::Page { command } => match command {
            PageCommands::Create { date, json } => cmd_page_create(&svc, date, json),
            PageCommands::Show { date, id, json } => cmd_page_show(&svc, date, id, json),
            PageCommands::List {
                from,
                to,
                asc,
                page,
                size,
                json,
            } => {
                let filter = PagesFilter {
                    start_date: parse_optional_date(from)?,
                    end_date: parse_optional_date(to)?,
                    sort_order: if asc {
                        SortOrder::Ascending
                    } else {
                        SortOrder::Descending
                    },
                    page_number: Some(page),
                    page_size: Some(size),
                };
                cmd_page_list(&svc, &filter, json)
            }
            PageCommands::Delete { ids, json } => cmd_page_delete(&svc, &ids, json),
        },
        Commands::Note { command } => match command {
            NoteCommands::Add {
                product,
                quantity,
                meal,
                date,
                order,
                json,
            } => cmd_note_add(&svc, &product, quantity, &meal, date, order, json),
            NoteCommands::Edit {
                id,
                product,
                quantity,
                meal,
                order,
                json,
            } => cmd_note_edit(
                &svc,
                id,
                product.as_deref(),
                quantity,
                meal.as_deref(),
                order,
                json,
            ),
            NoteCommands::Delete { id, json } => cmd_note_delete(&svc, id, json),
            NoteCommands::List { date, json } => cmd_note_list(&svc, date, json),
        },
        Commands::Import { file, json } => cmd_import(&svc, &file, json),
        Commands::Export {
            from,
            to,
            out,
            json,
        } => cmd_export(&svc, &from, &to, out.as_deref(), json),
        Commands::Serve {
            port,
            bind,
            no_auth,
        } => {
            let api_key = if no_auth {
                None
            } else {
                let (key, _created) = config.load_or_create_api_key()?;
                Some(key)
            };
            server::start_server(svc, port, &bind, api_key).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_db_flag_after_subcommand() {
        let cli = Cli::try_parse_from(["food-diary", "category", "list", "--db", "/tmp/x.db"])
            .unwrap();
        assert_eq!(cli.db, Some(PathBuf::from("/tmp/x.db")));
    }

    #[test]
    fn test_delete_requires_ids() {
        assert!(Cli::try_parse_from(["food-diary", "product", "delete"]).is_err());
    }
}
