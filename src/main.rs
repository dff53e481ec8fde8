use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use gasflow::application::Platform;
use gasflow::config::Settings;
use gasflow::domain::Page;
use gasflow::domain::account::{AccountId, Actor, Role};
use gasflow::domain::cylinder::{CylinderFilter, CylinderId, CylinderStatus};
use gasflow::domain::delivery::{DeliveryUpdate, DriverInfo};
use gasflow::domain::geo::Location;
use gasflow::domain::order::{Amount, OrderDraft, OrderId, OrderStatus, Urgency};
use gasflow::domain::ports::StoreHandle;
use gasflow::infrastructure::in_memory::InMemoryCache;
use gasflow::infrastructure::kv::KvStore;
use gasflow::infrastructure::notifier::LogNotifier;
#[cfg(feature = "storage-rocksdb")]
use gasflow::infrastructure::rocksdb::RocksDBBackend;
use gasflow::interfaces::csv::cylinder_reader::CylinderReader;
use gasflow::interfaces::csv::cylinder_writer::CylinderWriter;
use gasflow::telemetry;
use miette::{IntoDiagnostic, Result};
use serde::Serialize;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args)]
struct Coordinates {
    #[arg(long, allow_hyphen_values = true)]
    latitude: Option<f64>,
    #[arg(long, allow_hyphen_values = true)]
    longitude: Option<f64>,
    #[arg(long)]
    address: Option<String>,
}

impl Coordinates {
    fn into_location(self) -> Option<Location> {
        if self.latitude.is_none() && self.longitude.is_none() && self.address.is_none() {
            return None;
        }
        Some(Location {
            address: self.address,
            latitude: self.latitude,
            longitude: self.longitude,
            notes: None,
        })
    }
}

#[derive(Subcommand)]
enum Command {
    /// Register a hospital, vendor or admin account
    RegisterAccount {
        name: String,
        #[arg(long)]
        role: Role,
        #[command(flatten)]
        at: Coordinates,
    },
    /// Import a vendor's cylinder inventory from a CSV file
    ImportCylinders {
        /// CSV with columns serial_number,status,address,latitude,longitude
        input: PathBuf,
        #[arg(long)]
        vendor: AccountId,
    },
    /// List cylinders as CSV
    ListCylinders {
        #[arg(long)]
        vendor: Option<AccountId>,
        #[arg(long)]
        status: Option<CylinderStatus>,
        #[arg(long, value_parser = clap::value_parser!(bool))]
        assigned: Option<bool>,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Place an order on behalf of a hospital
    CreateOrder {
        #[arg(long)]
        hospital: AccountId,
        #[arg(long)]
        quantity: u32,
        #[arg(long, default_value = "medium")]
        urgency: Urgency,
        #[arg(long)]
        instructions: Option<String>,
        /// Quoted price, must be positive
        #[arg(long)]
        total_amount: Option<Amount>,
        #[command(flatten)]
        at: Coordinates,
    },
    /// Vendors able to serve an order at a location, nearest first
    NearbyVendors {
        #[arg(long)]
        quantity: u32,
        #[arg(long)]
        max_distance_km: Option<f64>,
        #[command(flatten)]
        at: Coordinates,
    },
    /// Accept a pending order and reserve cylinders for it
    AcceptOrder {
        order: OrderId,
        #[arg(long)]
        vendor: AccountId,
        /// Expected delivery time (RFC 3339)
        #[arg(long)]
        eta: DateTime<Utc>,
        #[arg(long, value_delimiter = ',')]
        cylinders: Vec<CylinderId>,
    },
    /// Push a live tracking update for an order out for delivery
    UpdateDelivery {
        order: OrderId,
        #[arg(long)]
        vendor: AccountId,
        #[arg(long)]
        status: OrderStatus,
        #[arg(long)]
        eta: Option<DateTime<Utc>>,
        #[arg(long)]
        location: Option<String>,
        #[arg(long)]
        notes: Option<String>,
        #[arg(long, requires = "driver_phone")]
        driver_name: Option<String>,
        #[arg(long)]
        driver_phone: Option<String>,
    },
    /// Cancel a pending or accepted order
    CancelOrder {
        order: OrderId,
        #[arg(long)]
        by: AccountId,
        #[arg(long)]
        reason: String,
    },
    /// Current delivery snapshot of an order
    DeliveryStatus { order: OrderId },
    /// Full event timeline of an order
    Timeline { order: OrderId },
}

fn open_store(settings: &Settings) -> Result<StoreHandle> {
    match &settings.db_path {
        #[cfg(feature = "storage-rocksdb")]
        Some(path) => {
            let backend = RocksDBBackend::open(path).into_diagnostic()?;
            Ok(Arc::new(KvStore::new(backend)))
        }
        #[cfg(not(feature = "storage-rocksdb"))]
        Some(_) => {
            eprintln!(
                "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
            );
            Ok(Arc::new(KvStore::in_memory()))
        }
        None => Ok(Arc::new(KvStore::in_memory())),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let stdout = io::stdout();
    serde_json::to_writer_pretty(stdout.lock(), value).into_diagnostic()?;
    println!();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::setup_tracing();
    let cli = Cli::parse();

    let store = open_store(&cli.settings)?;
    let platform = Platform::new(
        store,
        Arc::new(InMemoryCache::new()),
        Arc::new(LogNotifier),
        &cli.settings,
    );

    match cli.command {
        Command::RegisterAccount { name, role, at } => {
            let account = platform
                .accounts
                .register(&name, role, at.into_location())
                .await
                .into_diagnostic()?;
            print_json(&account)?;
        }
        Command::ImportCylinders { input, vendor } => {
            let file = File::open(input).into_diagnostic()?;
            let mut imported = Vec::new();
            for draft in CylinderReader::new(file).drafts() {
                let draft = match draft {
                    Ok(draft) => draft,
                    Err(e) => {
                        eprintln!("Error reading cylinder: {}", e);
                        continue;
                    }
                };
                match platform
                    .cylinders
                    .create(draft, vendor, Actor::vendor(vendor))
                    .await
                {
                    Ok(cylinder) => imported.push(cylinder),
                    Err(e) => eprintln!("Error importing cylinder: {}", e),
                }
            }

            let stdout = io::stdout();
            let mut writer = CylinderWriter::new(stdout.lock());
            writer.write_cylinders(&imported).into_diagnostic()?;
        }
        Command::ListCylinders {
            vendor,
            status,
            assigned,
            offset,
            limit,
        } => {
            let filter = CylinderFilter {
                vendor_id: vendor,
                status,
                is_assigned: assigned,
                order_id: None,
            };
            let page = Page::new(offset, limit.unwrap_or(cli.settings.page_limit));
            let cylinders = platform
                .cylinders
                .list(filter, page)
                .await
                .into_diagnostic()?;

            let stdout = io::stdout();
            let mut writer = CylinderWriter::new(stdout.lock());
            writer.write_cylinders(&cylinders).into_diagnostic()?;
        }
        Command::CreateOrder {
            hospital,
            quantity,
            urgency,
            instructions,
            total_amount,
            at,
        } => {
            let location = at.into_location().unwrap_or_default();
            let mut draft = OrderDraft::new(quantity, urgency, location);
            draft.special_instructions = instructions;
            draft.total_amount = total_amount;
            let order = platform
                .orders
                .create(draft, hospital)
                .await
                .into_diagnostic()?;
            print_json(&order)?;
        }
        Command::NearbyVendors {
            quantity,
            max_distance_km,
            at,
        } => {
            let location = at.into_location().unwrap_or_default();
            let vendors = platform
                .orders
                .find_nearby_vendors(
                    &location,
                    quantity,
                    max_distance_km.unwrap_or(cli.settings.max_distance_km),
                )
                .await
                .into_diagnostic()?;
            let rows: Vec<_> = vendors
                .into_iter()
                .map(|(vendor_id, distance_km)| {
                    serde_json::json!({ "vendor_id": vendor_id, "distance_km": distance_km })
                })
                .collect();
            print_json(&rows)?;
        }
        Command::AcceptOrder {
            order,
            vendor,
            eta,
            cylinders,
        } => {
            let order = platform
                .orders
                .accept_order(order, vendor, eta, &cylinders)
                .await
                .into_diagnostic()?;
            print_json(&order)?;
        }
        Command::UpdateDelivery {
            order,
            vendor,
            status,
            eta,
            location,
            notes,
            driver_name,
            driver_phone,
        } => {
            let update = DeliveryUpdate {
                status,
                eta,
                current_location: location,
                notes,
            };
            let driver = driver_name
                .zip(driver_phone)
                .map(|(name, phone)| DriverInfo::new(name, phone));
            let snapshot = platform
                .delivery
                .update_delivery_status(order, update, Actor::vendor(vendor), driver)
                .await
                .into_diagnostic()?;
            print_json(&snapshot)?;
        }
        Command::CancelOrder { order, by, reason } => {
            let order = platform
                .orders
                .cancel_order(order, Actor::hospital(by), &reason)
                .await
                .into_diagnostic()?;
            print_json(&order)?;
        }
        Command::DeliveryStatus { order } => {
            let snapshot = platform
                .delivery
                .get_delivery_status(order)
                .await
                .into_diagnostic()?;
            print_json(&snapshot)?;
        }
        Command::Timeline { order } => {
            let timeline = platform
                .delivery
                .get_delivery_timeline(order)
                .await
                .into_diagnostic()?;
            print_json(&timeline)?;
        }
    }

    Ok(())
}
