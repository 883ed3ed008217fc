//! Operator command line for the storefront data layer.
//!
//! # Responsibility
//! - Load configuration from the environment and open the selected backend.
//! - Print a catalog/order summary or apply an order status transition.

use angel_core::model::order::status as order_status;
use angel_core::repo::order_repo::OrderQuery;
use angel_core::repo::product_repo::ProductQuery;
use angel_core::{init_logging, AppConfig, OrderService, Storage};
use clap::{Parser, Subcommand};
use log::error;
use std::error::Error;
use std::process::ExitCode;

#[derive(Parser)]
#[command(
    name = "angel",
    version = angel_core::core_version(),
    about = "Angel Marketplace storage operations",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show backend, catalog and order counts
    Status,
    /// Set the fulfilment status of one order
    OrderStatus {
        /// Order reference, e.g. AMP2026123456
        id: String,
        /// New status, e.g. shipped
        status: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("event=cli_command module=cli status=error error={err}");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let config = AppConfig::from_env()?;
    if let Some(log_dir) = &config.log_dir {
        init_logging(config.log_level, log_dir)?;
    }
    let storage = Storage::open(&config.storage)?;
    let repos = storage.repositories()?;

    match cli.command {
        Commands::Status => {
            let all = repos.products.list_products(&ProductQuery::admin())?;
            let active = all.iter().filter(|product| product.active).count();
            let orders = repos.orders.list_orders(&OrderQuery::all())?;
            let pending = orders
                .iter()
                .filter(|order| order.status == order_status::PENDING)
                .count();
            println!("backend={}", storage.backend().as_str());
            println!("products={} active={active}", all.len());
            println!(
                "categories={}",
                repos.categories.list_categories(false)?.len()
            );
            println!("orders={} pending={pending}", orders.len());
            println!(
                "subscribers={}",
                repos.newsletter.list_subscribers(true)?.len()
            );
        }
        Commands::OrderStatus { id, status } => {
            let order = OrderService::new(&repos).set_status(&id, &status)?;
            println!("order={} status={}", order.id, order.status);
        }
    }
    Ok(())
}
